//! 流会话记录
//!
//! 每条双向流一份，只由拥有该流的工作线程修改。

use crate::classifier::TpSession;
use crate::core::app_id::AppId;
use crate::core::http_session::HttpSession;
use crate::core::tls::TlsSession;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::net::IpAddr;

/// 可放入标志集合的标志
pub trait FlagBit: Copy + fmt::Debug {
    /// 标志对应的位
    fn bit(self) -> u32;
}

/// 类型化的标志集合
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FlagSet<F> {
    bits: u32,
    _marker: PhantomData<F>,
}

impl<F: FlagBit> FlagSet<F> {
    /// 空集合
    pub fn new() -> Self {
        Self {
            bits: 0,
            _marker: PhantomData,
        }
    }

    /// 设置标志
    pub fn set(&mut self, flag: F) {
        self.bits |= flag.bit();
    }

    /// 清除标志
    pub fn clear(&mut self, flag: F) {
        self.bits &= !flag.bit();
    }

    /// 是否包含标志
    pub fn contains(&self, flag: F) -> bool {
        self.bits & flag.bit() != 0
    }

    /// 是否包含任意一个标志
    pub fn contains_any(&self, flags: &[F]) -> bool {
        flags.iter().any(|f| self.contains(*f))
    }

    /// 是否包含全部标志
    pub fn contains_all(&self, flags: &[F]) -> bool {
        flags.iter().all(|f| self.contains(*f))
    }

    /// 清空
    pub fn clear_all(&mut self) {
        self.bits = 0;
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl<F: FlagBit> Default for FlagSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FlagBit> fmt::Debug for FlagSet<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlagSet({:#x})", self.bits)
    }
}

/// 流会话标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionFlag {
    /// HTTP会话
    HttpSession,
    /// SPDY会话
    SpdySession,
    /// SSL会话
    SslSession,
    /// 跳过第三方检查
    NoTpi,
    /// 请求重新检查应用
    AppReinspect,
    /// SSL解密后请求重新检查
    AppReinspectSsl,
    /// 流量已解密
    Decrypted,
    /// 登录成功
    LoginSucceeded,
    /// CHP仍在检查，分类器需要继续监控
    ChpInspecting,
    /// 已记录过乱序通知
    TpiOooLogged,
    /// 客户端应用已确定
    ClientDetected,
    /// 服务应用已确定
    ServiceDetected,
    /// 宿主需要继续自身的发现过程
    Continue,
}

impl FlagBit for SessionFlag {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// 扫描标志，告诉下游匹配器哪些字段有了新值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanFlag {
    /// 主机或URL
    HostUrl,
    /// Via
    Via,
    /// User-Agent
    UserAgent,
    /// Content-Type
    ContentType,
    /// Server（厂商）
    Vendor,
    /// X-Working-With
    XWorkingWith,
    /// SSL主机名
    SslHost,
}

impl FlagBit for ScanFlag {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// 会话标志集合
pub type SessionFlags = FlagSet<SessionFlag>;
/// 扫描标志集合
pub type ScanFlags = FlagSet<ScanFlag>;

/// 流会话记录
#[derive(Debug, Default)]
pub struct FlowSession {
    flags: SessionFlags,
    /// 扫描标志
    pub scan_flags: ScanFlags,

    /// 第三方识别出的应用
    pub tp_app_id: AppId,
    /// 第三方识别出的负载应用
    pub tp_payload_app_id: AppId,
    /// 负载应用
    pub payload_app_id: AppId,
    /// 被引用的负载应用
    pub referred_payload_app_id: AppId,
    /// 客户端应用
    pub client_app_id: AppId,
    /// 服务应用
    pub service_app_id: AppId,
    /// 按端口推导的服务
    pub port_service_id: AppId,
    /// 同步给宿主的协议
    pub host_protocol: AppId,

    tp_session: Option<TpSession>,
    tp_done: bool,
    /// 重新检查由发起方触发的锁存
    pub tp_reinspect_by_initiator: bool,

    http: Option<HttpSession>,
    tls: Option<TlsSession>,

    /// 发起方向自接入分类器以来的包数
    pub init_tp_packets: u16,
    /// 响应方向自接入分类器以来的包数
    pub resp_tp_packets: u16,
    /// 流上的总包数
    pub session_packet_count: u32,

    /// 是否为HTTP/2
    pub is_http2: bool,
    /// 登录用户
    pub client_user: Option<(AppId, String)>,
    /// 服务端端点
    pub service_endpoint: Option<(IpAddr, u16)>,
}

impl FlowSession {
    /// 创建新流记录
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置标志
    pub fn set_flag(&mut self, flag: SessionFlag) {
        self.flags.set(flag);
    }

    /// 清除标志
    pub fn clear_flag(&mut self, flag: SessionFlag) {
        self.flags.clear(flag);
    }

    /// 查询标志
    pub fn has_flag(&self, flag: SessionFlag) -> bool {
        self.flags.contains(flag)
    }

    /// 全部标志
    pub fn flags(&self) -> &SessionFlags {
        &self.flags
    }

    /// 分类器会话
    pub fn tp_session(&self) -> Option<&TpSession> {
        self.tp_session.as_ref()
    }

    /// 可变的分类器会话
    pub fn tp_session_mut(&mut self) -> Option<&mut TpSession> {
        self.tp_session.as_mut()
    }

    /// 是否持有分类器会话
    pub fn has_tp_session(&self) -> bool {
        self.tp_session.is_some()
    }

    /// 安装新的分类器会话，返回被替换的旧会话
    pub fn install_tp_session(&mut self, session: TpSession) -> Option<TpSession> {
        self.tp_session.replace(session)
    }

    /// 取走分类器会话，之后流上不再持有它
    pub fn take_tp_session(&mut self) -> Option<TpSession> {
        self.tp_session.take()
    }

    /// 本轮接入是否已经结束
    pub fn is_tp_done(&self) -> bool {
        self.tp_done
    }

    /// 标记本轮接入结束
    pub fn set_tp_done(&mut self) {
        self.tp_done = true;
    }

    /// 开始新一轮接入
    pub fn begin_engagement(&mut self) {
        self.tp_done = false;
        self.init_tp_packets = 0;
        self.resp_tp_packets = 0;
    }

    /// HTTP会话
    pub fn http_session(&self) -> Option<&HttpSession> {
        self.http.as_ref()
    }

    /// HTTP会话，不存在时创建
    pub fn http_session_mut(&mut self) -> &mut HttpSession {
        self.http.get_or_insert_with(HttpSession::new)
    }

    /// TLS会话
    pub fn tls_session(&self) -> Option<&TlsSession> {
        self.tls.as_ref()
    }

    /// TLS会话，不存在时创建
    pub fn tls_session_mut(&mut self) -> &mut TlsSession {
        self.tls.get_or_insert_with(TlsSession::new)
    }

    /// 设置负载应用
    pub fn set_payload_app_id(&mut self, app: AppId) {
        self.payload_app_id = app;
    }

    /// 设置客户端应用
    pub fn set_client_app_id(&mut self, app: AppId) {
        self.client_app_id = app;
    }

    /// 设置服务应用
    pub fn set_service_app_id(&mut self, app: AppId) {
        self.service_app_id = app;
    }

    /// 记录登录用户
    pub fn update_user(&mut self, app: AppId, user: String) {
        self.client_user = Some((app, user));
    }

    /// 同步宿主协议
    pub fn sync_host_protocol(&mut self, app: AppId) {
        self.host_protocol = app;
    }

    /// 清空分类器累积的数据，已提交的流身份保持不变
    pub fn reset_session_data(&mut self) {
        self.tp_app_id = AppId::None;
        self.tp_payload_app_id = AppId::None;
        self.scan_flags.clear_all();
        if let Some(http) = self.http.as_mut() {
            http.reset();
        }
        self.tls = None;
        self.begin_engagement();
    }
}
