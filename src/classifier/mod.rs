//! 第三方分类器接口
//!
//! 可插拔的分类引擎通过 [`ThirdPartyModule`] 接入。宿主只认识这个契约，
//! 具体实现可以是编译进来的分类器，也可以是一张由加载器填充的入口表
//! （见 [`table::ModuleTable`]）。

pub mod catalog;
pub mod manager;
pub mod table;

#[cfg(feature = "reference-classifier")]
pub mod reference;
#[cfg(feature = "reference-classifier")]
pub mod tls_hello;

pub use catalog::ModuleCatalog;
pub use manager::ClassifierManager;
pub use table::ModuleTable;

use crate::config::ThirdPartyConfig;
use crate::core::app_id::AppId;
use crate::core::attributes::AttributeData;
use crate::core::packet::{Direction, Packet};
use crate::core::session::{FlagBit, FlagSet};
use crate::error::Result;
use std::any::Any;
use std::fmt;

/// 宿主期望的模块接口版本，必须完全一致
pub const THIRD_PARTY_APP_ID_API_VERSION: u32 = 5;

/// 最高置信度
pub const MAX_CONFIDENCE: u8 = 100;

/// 分类器在一条流上的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpState {
    /// 尚未开始
    Uninitialized,
    /// 正在检查，仍需要更多数据包
    Inspecting,
    /// 已识别应用，只做后续监控
    Monitoring,
    /// 已完成分类
    Classified,
}

/// 可以对分类器会话设置的属性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpAttr {
    /// 请求分类器继续监控该会话
    ContinueMonitoring,
}

/// 可以在分类器会话上关闭的能力
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TpSessionFlag {
    /// 属性提取
    Attribute,
    /// 隧道跟踪
    Tunneling,
    /// 关联未来流
    FutureFlow,
}

impl FlagBit for TpSessionFlag {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// 分类器会话能力集合
pub type TpSessionFlags = FlagSet<TpSessionFlag>;

/// 监控阶段或终结时关闭的能力
pub fn monitoring_disable_flags() -> TpSessionFlags {
    let mut flags = TpSessionFlags::new();
    flags.set(TpSessionFlag::Attribute);
    flags.set(TpSessionFlag::Tunneling);
    flags.set(TpSessionFlag::FutureFlow);
    flags
}

/// 模块入口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EntryPoint {
    Init,
    Fini,
    Reconfigure,
    SessionCreate,
    SessionDelete,
    SessionProcess,
    SessionAttrSet,
    SessionStateGet,
    SessionAppIdGet,
    DisableFlags,
    PrintStats,
    ResetStats,
}

impl EntryPoint {
    /// 全部必需入口
    pub const ALL: [EntryPoint; 12] = [
        EntryPoint::Init,
        EntryPoint::Fini,
        EntryPoint::Reconfigure,
        EntryPoint::SessionCreate,
        EntryPoint::SessionDelete,
        EntryPoint::SessionProcess,
        EntryPoint::SessionAttrSet,
        EntryPoint::SessionStateGet,
        EntryPoint::SessionAppIdGet,
        EntryPoint::DisableFlags,
        EntryPoint::PrintStats,
        EntryPoint::ResetStats,
    ];
}

/// 分类器的流会话句柄
///
/// 由模块创建，由流记录独占持有。删除时按值交还给模块，
/// 因此同一个句柄不可能被释放两次。
pub struct TpSession {
    inner: Box<dyn Any + Send>,
}

impl TpSession {
    /// 包装模块自己的会话状态
    pub fn new<T: Any + Send>(state: T) -> Self {
        Self {
            inner: Box::new(state),
        }
    }

    /// 读取模块状态
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// 修改模块状态
    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.inner.downcast_mut::<T>()
    }

    /// 取回模块状态
    pub fn into_inner<T: Any>(self) -> Option<Box<T>> {
        self.inner.downcast::<T>().ok()
    }
}

impl fmt::Debug for TpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpSession").finish_non_exhaustive()
    }
}

/// 一次分类器调用的输出
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// 识别出的应用
    pub app_id: AppId,
    /// 置信度 (0 - 100)
    pub confidence: u8,
    /// 候选协议列表，按报告顺序
    pub proto_list: Vec<AppId>,
    /// 新证据
    pub attributes: AttributeData,
}

impl ProcessOutput {
    /// 没有任何结论的输出
    pub fn none() -> Self {
        Self::default()
    }

    /// 候选列表中是否包含该协议
    pub fn has_proto(&self, proto: AppId) -> bool {
        self.proto_list.contains(&proto)
    }
}

/// 宿主提供给模块的工具
#[derive(Debug, Clone)]
pub struct HostUtils {
    instance_id: String,
}

impl HostUtils {
    /// 创建宿主工具
    pub fn new<S: Into<String>>(instance_id: S) -> Self {
        Self {
            instance_id: instance_id.into(),
        }
    }

    /// 宿主实例ID
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 以宿主的日志输出模块消息
    pub fn log_message(&self, module: &str, message: &str) {
        tracing::info!(instance = %self.instance_id, module, "{}", message);
    }
}

/// 第三方分类模块契约
///
/// 生命周期调用（`init`、`reconfigure`、`fini`）只会从单一的初始化路径发起，
/// 不会与同一工作线程上的包处理并发。
pub trait ThirdPartyModule: Send {
    /// 模块实现的接口版本
    fn api_version(&self) -> u32;

    /// 模块名称
    fn module_name(&self) -> &str;

    /// 模块提供的入口
    fn entry_points(&self) -> Vec<EntryPoint> {
        EntryPoint::ALL.to_vec()
    }

    /// 初始化
    fn init(&mut self, config: &ThirdPartyConfig, host: &HostUtils) -> Result<()>;

    /// 终止
    fn fini(&mut self) -> Result<()>;

    /// 更新运行参数
    fn reconfigure(&mut self, config: &ThirdPartyConfig) -> Result<()>;

    /// 创建流会话
    fn session_create(&self) -> Option<TpSession>;

    /// 删除流会话
    fn session_delete(&self, session: TpSession, core_only: bool);

    /// 处理一个数据包
    fn session_process(
        &self,
        session: &mut TpSession,
        packet: &Packet<'_>,
        direction: Direction,
    ) -> ProcessOutput;

    /// 设置会话属性
    fn session_attr_set(&self, session: &mut TpSession, attr: TpAttr);

    /// 会话状态
    fn session_state_get(&self, session: &TpSession) -> TpState;

    /// 会话当前识别出的应用
    fn session_appid_get(&self, session: &TpSession) -> AppId;

    /// 关闭会话能力
    fn disable_flags(&self, session: &mut TpSession, flags: TpSessionFlags);

    /// 输出统计
    fn print_stats(&self);

    /// 清零统计
    fn reset_stats(&self);
}
