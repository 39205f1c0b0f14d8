//! 集成测试共用的脚本化分类模块

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tp_appid::classifier::{
    HostUtils, ProcessOutput, ThirdPartyModule, TpAttr, TpSession, TpSessionFlags, TpState,
    MAX_CONFIDENCE, THIRD_PARTY_APP_ID_API_VERSION,
};
use tp_appid::config::{AppIdConfig, ThirdPartyConfig};
use tp_appid::core::http_session::FieldValue;
use tp_appid::error::{AppIdError, Result};
use tp_appid::{AppId, AttributeData, Direction, DiscoveryBuilder, DiscoveryContext, Packet};

/// 模块调用计数
#[derive(Debug, Default)]
pub struct Counters {
    pub inits: AtomicUsize,
    pub finis: AtomicUsize,
    pub reconfigures: AtomicUsize,
    pub created: AtomicUsize,
    pub deleted: AtomicUsize,
    pub processed: AtomicUsize,
    pub continue_monitoring: AtomicUsize,
    pub disabled: AtomicUsize,
    pub stats_resets: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// 按脚本返回结果的分类模块
pub struct ScriptedModule {
    name: String,
    version: u32,
    script: Mutex<VecDeque<ProcessOutput>>,
    fallback: ProcessOutput,
    state: TpState,
    counters: Arc<Counters>,
    fail_init: bool,
    fail_reconfigure: bool,
    fail_create: bool,
}

impl ScriptedModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: THIRD_PARTY_APP_ID_API_VERSION,
            script: Mutex::new(VecDeque::new()),
            fallback: ProcessOutput::none(),
            state: TpState::Inspecting,
            counters: Arc::new(Counters::default()),
            fail_init: false,
            fail_reconfigure: false,
            fail_create: false,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_state(mut self, state: TpState) -> Self {
        self.state = state;
        self
    }

    /// 下一次调用返回的结果
    pub fn then(self, output: ProcessOutput) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(output);
        }
        self
    }

    /// 脚本用完后一直返回的结果
    pub fn always(mut self, output: ProcessOutput) -> Self {
        self.fallback = output;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_reconfigure(mut self) -> Self {
        self.fail_reconfigure = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }
}

impl ThirdPartyModule for ScriptedModule {
    fn api_version(&self) -> u32 {
        self.version
    }

    fn module_name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, _config: &ThirdPartyConfig, _host: &HostUtils) -> Result<()> {
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(AppIdError::ModuleInit { code: -2 });
        }
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        self.counters.finis.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reconfigure(&mut self, _config: &ThirdPartyConfig) -> Result<()> {
        self.counters.reconfigures.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconfigure {
            return Err(AppIdError::ModuleReconfigure { code: -3 });
        }
        Ok(())
    }

    fn session_create(&self) -> Option<TpSession> {
        if self.fail_create {
            return None;
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Some(TpSession::new(AppId::None))
    }

    fn session_delete(&self, _session: TpSession, _core_only: bool) {
        self.counters.deleted.fetch_add(1, Ordering::SeqCst);
    }

    fn session_process(
        &self,
        session: &mut TpSession,
        _packet: &Packet<'_>,
        _direction: Direction,
    ) -> ProcessOutput {
        self.counters.processed.fetch_add(1, Ordering::SeqCst);
        let output = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.fallback.clone());
        if let Some(app_id) = session.downcast_mut::<AppId>() {
            *app_id = output.app_id;
        }
        output
    }

    fn session_attr_set(&self, _session: &mut TpSession, attr: TpAttr) {
        if attr == TpAttr::ContinueMonitoring {
            self.counters.continue_monitoring.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn session_state_get(&self, _session: &TpSession) -> TpState {
        self.state
    }

    fn session_appid_get(&self, session: &TpSession) -> AppId {
        session.downcast_ref::<AppId>().copied().unwrap_or_default()
    }

    fn disable_flags(&self, _session: &mut TpSession, _flags: TpSessionFlags) {
        self.counters.disabled.fetch_add(1, Ordering::SeqCst);
    }

    fn print_stats(&self) {}

    fn reset_stats(&self) {
        self.counters.stats_resets.fetch_add(1, Ordering::SeqCst);
    }
}

/// 用脚本模块创建上下文，模块必须初始化成功
pub fn context_with(module: ScriptedModule, config: AppIdConfig) -> DiscoveryContext {
    DiscoveryBuilder::new()
        .with_config(config)
        .with_module(Box::new(module))
        .strict()
        .build()
        .expect("scripted module loads")
}

/// 带主机和URI的HTTP结果
pub fn http_output(host: &str, uri: &str) -> ProcessOutput {
    ProcessOutput {
        app_id: AppId::HTTP,
        confidence: MAX_CONFIDENCE,
        proto_list: vec![AppId::HTTP],
        attributes: AttributeData {
            http_request_host: Some(FieldValue::text(host)),
            http_request_uri: Some(FieldValue::text(uri)),
            ..Default::default()
        },
    }
}

/// 带TLS主机的SSL结果
pub fn tls_output(host: &str) -> ProcessOutput {
    ProcessOutput {
        app_id: AppId::SSL,
        confidence: MAX_CONFIDENCE,
        proto_list: vec![AppId::SSL],
        attributes: AttributeData {
            tls_host: Some(host.to_string()),
            ..Default::default()
        },
    }
}

/// 有负载、顺序正常的TCP包
pub fn tcp(data: &[u8], src_port: u16, dst_port: u16) -> Packet<'_> {
    Packet::tcp(data, src_port, dst_port)
}
