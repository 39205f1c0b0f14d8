//! 模块入口表
//!
//! 外部加载器把解析出的符号填入一张入口表，缺失的入口保持为 `None`。
//! 入口表本身实现 [`ThirdPartyModule`]，是否完整由管理器在装载时校验。

use super::{
    EntryPoint, HostUtils, ProcessOutput, ThirdPartyModule, TpAttr, TpSession, TpSessionFlags,
    TpState,
};
use crate::config::ThirdPartyConfig;
use crate::core::app_id::AppId;
use crate::core::packet::{Direction, Packet};
use crate::error::{AppIdError, Result};

type InitFn = Box<dyn FnMut(&ThirdPartyConfig, &HostUtils) -> anyhow::Result<()> + Send>;
type FiniFn = Box<dyn FnMut() -> anyhow::Result<()> + Send>;
type ReconfigureFn = Box<dyn FnMut(&ThirdPartyConfig) -> anyhow::Result<()> + Send>;
type CreateFn = Box<dyn Fn() -> Option<TpSession> + Send>;
type DeleteFn = Box<dyn Fn(TpSession, bool) + Send>;
type ProcessFn = Box<dyn Fn(&mut TpSession, &Packet<'_>, Direction) -> ProcessOutput + Send>;
type AttrSetFn = Box<dyn Fn(&mut TpSession, TpAttr) + Send>;
type StateGetFn = Box<dyn Fn(&TpSession) -> TpState + Send>;
type AppIdGetFn = Box<dyn Fn(&TpSession) -> AppId + Send>;
type DisableFlagsFn = Box<dyn Fn(&mut TpSession, TpSessionFlags) + Send>;
type StatsFn = Box<dyn Fn() + Send>;

/// 由加载器填充的模块入口表
pub struct ModuleTable {
    api_version: u32,
    name: String,
    init: Option<InitFn>,
    fini: Option<FiniFn>,
    reconfigure: Option<ReconfigureFn>,
    session_create: Option<CreateFn>,
    session_delete: Option<DeleteFn>,
    session_process: Option<ProcessFn>,
    session_attr_set: Option<AttrSetFn>,
    session_state_get: Option<StateGetFn>,
    session_appid_get: Option<AppIdGetFn>,
    disable_flags: Option<DisableFlagsFn>,
    print_stats: Option<StatsFn>,
    reset_stats: Option<StatsFn>,
}

impl ModuleTable {
    /// 创建空入口表
    pub fn new<S: Into<String>>(api_version: u32, name: S) -> Self {
        Self {
            api_version,
            name: name.into(),
            init: None,
            fini: None,
            reconfigure: None,
            session_create: None,
            session_delete: None,
            session_process: None,
            session_attr_set: None,
            session_state_get: None,
            session_appid_get: None,
            disable_flags: None,
            print_stats: None,
            reset_stats: None,
        }
    }

    /// 设置初始化入口
    pub fn with_init<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ThirdPartyConfig, &HostUtils) -> anyhow::Result<()> + Send + 'static,
    {
        self.init = Some(Box::new(f));
        self
    }

    /// 设置终止入口
    pub fn with_fini<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        self.fini = Some(Box::new(f));
        self
    }

    /// 设置重配置入口
    pub fn with_reconfigure<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ThirdPartyConfig) -> anyhow::Result<()> + Send + 'static,
    {
        self.reconfigure = Some(Box::new(f));
        self
    }

    /// 设置会话创建入口
    pub fn with_session_create<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<TpSession> + Send + 'static,
    {
        self.session_create = Some(Box::new(f));
        self
    }

    /// 设置会话删除入口
    pub fn with_session_delete<F>(mut self, f: F) -> Self
    where
        F: Fn(TpSession, bool) + Send + 'static,
    {
        self.session_delete = Some(Box::new(f));
        self
    }

    /// 设置包处理入口
    pub fn with_session_process<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TpSession, &Packet<'_>, Direction) -> ProcessOutput + Send + 'static,
    {
        self.session_process = Some(Box::new(f));
        self
    }

    /// 设置属性入口
    pub fn with_session_attr_set<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TpSession, TpAttr) + Send + 'static,
    {
        self.session_attr_set = Some(Box::new(f));
        self
    }

    /// 设置状态查询入口
    pub fn with_session_state_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&TpSession) -> TpState + Send + 'static,
    {
        self.session_state_get = Some(Box::new(f));
        self
    }

    /// 设置应用查询入口
    pub fn with_session_appid_get<F>(mut self, f: F) -> Self
    where
        F: Fn(&TpSession) -> AppId + Send + 'static,
    {
        self.session_appid_get = Some(Box::new(f));
        self
    }

    /// 设置能力关闭入口
    pub fn with_disable_flags<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut TpSession, TpSessionFlags) + Send + 'static,
    {
        self.disable_flags = Some(Box::new(f));
        self
    }

    /// 设置统计入口
    pub fn with_stats<P, R>(mut self, print: P, reset: R) -> Self
    where
        P: Fn() + Send + 'static,
        R: Fn() + Send + 'static,
    {
        self.print_stats = Some(Box::new(print));
        self.reset_stats = Some(Box::new(reset));
        self
    }

    /// 缺失的入口
    pub fn missing_entry_points(&self) -> Vec<EntryPoint> {
        let present = self.entry_points();
        EntryPoint::ALL
            .iter()
            .copied()
            .filter(|ep| !present.contains(ep))
            .collect()
    }

    fn status(code_hint: fn(i32) -> AppIdError, err: anyhow::Error) -> AppIdError {
        // 模块可以通过 AppIdError 直接给出状态码
        match err.downcast::<AppIdError>() {
            Ok(inner) => inner,
            Err(other) => {
                tracing::debug!("module status: {:#}", other);
                code_hint(-1)
            }
        }
    }
}

impl ThirdPartyModule for ModuleTable {
    fn api_version(&self) -> u32 {
        self.api_version
    }

    fn module_name(&self) -> &str {
        &self.name
    }

    fn entry_points(&self) -> Vec<EntryPoint> {
        let slots = [
            (EntryPoint::Init, self.init.is_some()),
            (EntryPoint::Fini, self.fini.is_some()),
            (EntryPoint::Reconfigure, self.reconfigure.is_some()),
            (EntryPoint::SessionCreate, self.session_create.is_some()),
            (EntryPoint::SessionDelete, self.session_delete.is_some()),
            (EntryPoint::SessionProcess, self.session_process.is_some()),
            (EntryPoint::SessionAttrSet, self.session_attr_set.is_some()),
            (EntryPoint::SessionStateGet, self.session_state_get.is_some()),
            (EntryPoint::SessionAppIdGet, self.session_appid_get.is_some()),
            (EntryPoint::DisableFlags, self.disable_flags.is_some()),
            (EntryPoint::PrintStats, self.print_stats.is_some()),
            (EntryPoint::ResetStats, self.reset_stats.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(ep, present)| present.then_some(ep))
            .collect()
    }

    fn init(&mut self, config: &ThirdPartyConfig, host: &HostUtils) -> Result<()> {
        match self.init.as_mut() {
            Some(f) => f(config, host).map_err(|e| {
                Self::status(|code| AppIdError::ModuleInit { code }, e)
            }),
            None => Err(AppIdError::ModuleNotLoaded),
        }
    }

    fn fini(&mut self) -> Result<()> {
        match self.fini.as_mut() {
            Some(f) => f().map_err(|e| Self::status(|code| AppIdError::ModuleFini { code }, e)),
            None => Err(AppIdError::ModuleNotLoaded),
        }
    }

    fn reconfigure(&mut self, config: &ThirdPartyConfig) -> Result<()> {
        match self.reconfigure.as_mut() {
            Some(f) => f(config).map_err(|e| {
                Self::status(|code| AppIdError::ModuleReconfigure { code }, e)
            }),
            None => Err(AppIdError::ModuleNotLoaded),
        }
    }

    fn session_create(&self) -> Option<TpSession> {
        self.session_create.as_ref().and_then(|f| f())
    }

    fn session_delete(&self, session: TpSession, core_only: bool) {
        if let Some(f) = self.session_delete.as_ref() {
            f(session, core_only);
        }
    }

    fn session_process(
        &self,
        session: &mut TpSession,
        packet: &Packet<'_>,
        direction: Direction,
    ) -> ProcessOutput {
        match self.session_process.as_ref() {
            Some(f) => f(session, packet, direction),
            None => ProcessOutput::none(),
        }
    }

    fn session_attr_set(&self, session: &mut TpSession, attr: TpAttr) {
        if let Some(f) = self.session_attr_set.as_ref() {
            f(session, attr);
        }
    }

    fn session_state_get(&self, session: &TpSession) -> TpState {
        self.session_state_get
            .as_ref()
            .map_or(TpState::Uninitialized, |f| f(session))
    }

    fn session_appid_get(&self, session: &TpSession) -> AppId {
        self.session_appid_get
            .as_ref()
            .map_or(AppId::None, |f| f(session))
    }

    fn disable_flags(&self, session: &mut TpSession, flags: TpSessionFlags) {
        if let Some(f) = self.disable_flags.as_ref() {
            f(session, flags);
        }
    }

    fn print_stats(&self) {
        if let Some(f) = self.print_stats.as_ref() {
            f();
        }
    }

    fn reset_stats(&self) {
        if let Some(f) = self.reset_stats.as_ref() {
            f();
        }
    }
}
