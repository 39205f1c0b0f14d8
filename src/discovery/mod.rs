//! 第三方应用发现
//!
//! 每个数据包调用一次 [`DiscoveryContext::discover`]：决定是否把包交给
//! 第三方分类器，融合它返回的证据，提交流身份，并在需要时终止接入。

pub mod fusion;
pub mod stats;
pub mod termination;
pub mod url_matcher;

pub use fusion::{fuse_attributes, FusionContext, FusionOutcome};
pub use stats::DiscoveryStats;
pub use termination::{check_terminate, release_tp_session, should_terminate, Termination};
pub use url_matcher::{NoUrlMatcher, UrlMatch, UrlMatcher, UrlPattern, UrlPatternTable};

use crate::appid_debug;
use crate::classifier::{
    monitoring_disable_flags, ClassifierManager, ThirdPartyModule, TpState, MAX_CONFIDENCE,
};
use crate::config::{AppIdConfig, ThirdPartyConfig};
use crate::core::app_id::AppId;
use crate::core::app_info::{AppInfoFlag, AppInfoTable};
use crate::core::packet::{Direction, FlowService, IpProtocol, Packet, StreamOrder};
use crate::core::session::{FlowSession, SessionFlag};
use crate::error::{AppIdError, Result};
use crate::utils::logger::AppIdDebug;
use std::fmt;
use uuid::Uuid;

/// 一个工作线程的发现上下文
///
/// 拥有分类器管理器和配置。流记录由调用者持有，并且只交给拥有它的工作线程。
pub struct DiscoveryContext {
    instance_id: Uuid,
    config: AppIdConfig,
    tp_config: ThirdPartyConfig,
    manager: ClassifierManager,
    app_info: AppInfoTable,
    url_matcher: Box<dyn UrlMatcher>,
    debug: AppIdDebug,
    stats: DiscoveryStats,
}

impl DiscoveryContext {
    /// 创建上下文
    ///
    /// 已装载但尚未初始化的模块在这里用上下文的配置初始化；
    /// 初始化失败时模块被卸载，第三方分类保持禁用。
    pub fn new(config: AppIdConfig, mut manager: ClassifierManager) -> Result<Self> {
        config.validate()?;
        let tp_config = config.thirdparty_config()?;
        if manager.is_loaded() && !manager.is_initialized() {
            manager.initialize(&config).ok();
        }
        Ok(Self {
            instance_id: Uuid::new_v4(),
            config,
            tp_config,
            manager,
            app_info: AppInfoTable::new(),
            url_matcher: Box::new(NoUrlMatcher),
            debug: AppIdDebug::new(),
            stats: DiscoveryStats::new(),
        })
    }

    /// 指定实例ID
    pub fn with_instance_id(mut self, id: Uuid) -> Self {
        self.instance_id = id;
        self
    }

    /// 指定应用信息表
    pub fn with_app_info(mut self, app_info: AppInfoTable) -> Self {
        self.app_info = app_info;
        self
    }

    /// 指定URL匹配器
    pub fn with_url_matcher<M: UrlMatcher + 'static>(mut self, matcher: M) -> Self {
        self.url_matcher = Box::new(matcher);
        self
    }

    /// 指定调试开关
    pub fn with_debug(mut self, debug: AppIdDebug) -> Self {
        self.debug = debug;
        self
    }

    /// 统计一个数据包，然后执行发现
    pub fn process_packet(
        &mut self,
        flow: &mut FlowSession,
        packet: &Packet<'_>,
        direction: Direction,
    ) -> Result<bool> {
        flow.session_packet_count = flow.session_packet_count.saturating_add(1);
        self.stats.packets += 1;
        self.discover(flow, packet, direction)
    }

    /// 对一个数据包执行第三方发现
    ///
    /// 返回本次是否真正调用了分类器。分类器会话分配失败是致命错误，
    /// 调用者应当停止该工作线程而不是丢弃这条流。
    pub fn discover(
        &mut self,
        flow: &mut FlowSession,
        packet: &Packet<'_>,
        direction: Direction,
    ) -> Result<bool> {
        let tag = self.debug.session_tag(packet);
        let tag = tag.as_deref();

        let Self {
            config,
            tp_config,
            manager,
            app_info,
            url_matcher,
            stats,
            ..
        } = self;
        let module = manager.module();

        if !flow.tp_reinspect_by_initiator
            && direction.is_initiator()
            && reinspect_ready(flow, packet, module)
        {
            appid_debug!(tag, "3rd party allow reinspect http");
            flow.tp_reinspect_by_initiator = true;
            flow.set_flag(SessionFlag::AppReinspect);
            flow.reset_session_data();
            stats.reinspections += 1;
        }

        if flow.tp_app_id == AppId::SSH
            && flow.payload_app_id != AppId::SFTP
            && (config.sftp_min_packets..config.sftp_max_packets).contains(&flow.session_packet_count)
            && packet.tos == 8
        {
            appid_debug!(tag, "Payload is SFTP");
            flow.set_payload_app_id(AppId::SFTP);
        }

        let mut ran = false;
        if let Some(module) = module {
            if gate_open(flow, module) {
                if flow.has_flag(SessionFlag::AppReinspectSsl) {
                    flow.clear_flag(SessionFlag::AppReinspectSsl);
                    if flow.is_tp_done() {
                        flow.begin_engagement();
                    }
                }

                if packet.dsize() > 0 || config.tp_allow_probes {
                    let mut pass = Pass {
                        config,
                        tp_config,
                        app_info,
                        url_matcher: &**url_matcher,
                        module,
                        tag,
                        stats,
                    };
                    ran = pass.run(flow, packet, direction)?;
                }
            }
        }

        if flow.tp_reinspect_by_initiator && reinspect_ready(flow, packet, module) {
            flow.clear_flag(SessionFlag::AppReinspect);
            if direction == Direction::FromResponder {
                flow.tp_reinspect_by_initiator = false;
            }
        }

        Ok(ran)
    }

    /// 流结束时释放分类器会话
    pub fn teardown(&mut self, flow: &mut FlowSession) {
        if release_tp_session(flow, self.manager.module(), false) {
            self.stats.handles_released += 1;
        }
    }

    /// 输出统计
    pub fn print_stats(&self) {
        tracing::info!(
            instance = %self.instance_id,
            packets = self.stats.packets,
            tp_passes = self.stats.tp_passes,
            out_of_order = self.stats.out_of_order,
            handles_created = self.stats.handles_created,
            handles_released = self.stats.handles_released,
            terminations = self.stats.terminations,
            reinspections = self.stats.reinspections,
            rtmp_resolutions = self.stats.rtmp_resolutions,
            "3rd party discovery stats since {}",
            self.stats.since
        );
        if let Some(module) = self.manager.module() {
            module.print_stats();
        }
    }

    /// 清零统计
    pub fn reset_stats(&mut self) {
        self.stats.reset();
        if let Some(module) = self.manager.module() {
            module.reset_stats();
        }
    }

    /// 替换配置
    ///
    /// 新配置无效或模块拒绝时保留原配置。
    pub fn reconfigure(&mut self, config: AppIdConfig) -> Result<()> {
        config.validate()?;
        let tp_config = config.thirdparty_config()?;
        self.manager.reconfigure(&config)?;
        self.config = config;
        self.tp_config = tp_config;
        Ok(())
    }

    /// 实例ID
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// 统计
    pub fn stats(&self) -> &DiscoveryStats {
        &self.stats
    }

    /// 配置
    pub fn config(&self) -> &AppIdConfig {
        &self.config
    }

    /// 分类器管理器
    pub fn manager(&self) -> &ClassifierManager {
        &self.manager
    }

    /// 可变的分类器管理器
    pub fn manager_mut(&mut self) -> &mut ClassifierManager {
        &mut self.manager
    }

    /// 应用信息表
    pub fn app_info(&self) -> &AppInfoTable {
        &self.app_info
    }

    /// 可变的应用信息表
    pub fn app_info_mut(&mut self) -> &mut AppInfoTable {
        &mut self.app_info
    }

    /// 替换URL匹配器
    pub fn set_url_matcher(&mut self, matcher: Box<dyn UrlMatcher>) {
        self.url_matcher = matcher;
    }

    /// 调试开关
    pub fn debug_mut(&mut self) -> &mut AppIdDebug {
        &mut self.debug
    }
}

impl fmt::Debug for DiscoveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscoveryContext")
            .field("instance_id", &self.instance_id)
            .field("manager", &self.manager)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// 本轮接入是否已经结束：被终止过，或分类器报告已完成分类
fn engagement_done(flow: &FlowSession, module: Option<&dyn ThirdPartyModule>) -> bool {
    if flow.is_tp_done() {
        return true;
    }
    match (module, flow.tp_session()) {
        (Some(module), Some(session)) => module.session_state_get(session) == TpState::Classified,
        _ => false,
    }
}

fn reinspect_ready(
    flow: &FlowSession,
    packet: &Packet<'_>,
    module: Option<&dyn ThirdPartyModule>,
) -> bool {
    packet.dsize() > 0
        && !flow.has_flag(SessionFlag::NoTpi)
        && flow.has_flag(SessionFlag::HttpSession)
        && engagement_done(flow, module)
}

fn gate_open(flow: &FlowSession, module: &dyn ThirdPartyModule) -> bool {
    if flow.has_flag(SessionFlag::NoTpi) {
        return false;
    }
    !engagement_done(flow, Some(module))
        || flow.has_flag(SessionFlag::AppReinspectSsl)
        || (flow.has_flag(SessionFlag::AppReinspect) && !flow.is_tp_done())
}

/// 一次分类器接入用到的状态
struct Pass<'a> {
    config: &'a AppIdConfig,
    tp_config: &'a ThirdPartyConfig,
    app_info: &'a AppInfoTable,
    url_matcher: &'a dyn UrlMatcher,
    module: &'a dyn ThirdPartyModule,
    tag: Option<&'a str>,
    stats: &'a mut DiscoveryStats,
}

impl Pass<'_> {
    fn run(&mut self, flow: &mut FlowSession, packet: &Packet<'_>, direction: Direction) -> Result<bool> {
        let in_order = packet.protocol != IpProtocol::Tcp
            || packet.order == StreamOrder::Ok
            || self.config.tp_allow_probes;

        let ran = if in_order {
            self.classify(flow, packet, direction)?;
            true
        } else {
            flow.tp_app_id = AppId::None;
            if !flow.has_flag(SessionFlag::TpiOooLogged) {
                flow.set_flag(SessionFlag::TpiOooLogged);
                tracing::info!("3rd party packet out-of-order: {}", packet);
            }
            self.stats.out_of_order += 1;
            false
        };

        if let Some(session) = flow.tp_session_mut() {
            if self.module.session_state_get(session) == TpState::Monitoring {
                self.module.disable_flags(session, monitoring_disable_flags());
            }
        }

        if flow.tp_app_id == AppId::SSL && packet.flow_service == FlowService::FtpData {
            flow.tp_app_id = AppId::None;
        }

        let reinspecting = flow.has_flag(SessionFlag::AppReinspect);
        if !flow.tp_app_id.is_none() && (!reinspecting || flow.payload_app_id.is_concrete()) {
            self.commit(flow, packet, direction);
        } else if packet.protocol != IpProtocol::Tcp || packet.order != StreamOrder::Unknown {
            let tp_packets = match direction {
                Direction::FromInitiator => {
                    flow.init_tp_packets = flow.init_tp_packets.saturating_add(1);
                    flow.init_tp_packets
                }
                Direction::FromResponder => {
                    flow.resp_tp_packets = flow.resp_tp_packets.saturating_add(1);
                    flow.resp_tp_packets
                }
            };

            if let Some(done) =
                check_terminate(flow, tp_packets, self.config.max_tp_flow_depth, Some(self.module))
            {
                appid_debug!(self.tag, "3rd party engagement terminated after {} packets", tp_packets);
                self.stats.terminations += 1;
                if done.released {
                    self.stats.handles_released += 1;
                }
            }
        }

        Ok(ran)
    }

    fn classify(&mut self, flow: &mut FlowSession, packet: &Packet<'_>, direction: Direction) -> Result<()> {
        if !flow.has_tp_session() {
            let session = self.module.session_create().ok_or(AppIdError::SessionAllocation)?;
            flow.install_tp_session(session);
            self.stats.handles_created += 1;
        }
        let Some(session) = flow.tp_session_mut() else {
            return Err(AppIdError::SessionAllocation);
        };

        let mut output = self.module.session_process(session, packet, direction);
        let state = self.module.session_state_get(session);
        self.stats.tp_passes += 1;

        appid_debug!(
            self.tag,
            "3rd party returned {} (confidence {}, state {:?})",
            output.app_id,
            output.confidence,
            state
        );

        flow.tp_app_id = output.app_id;
        if state == TpState::Classified {
            flow.clear_flag(SessionFlag::AppReinspect);
        }

        if flow.tp_app_id == AppId::HTTP2 && output.confidence == MAX_CONFIDENCE {
            appid_debug!(self.tag, "3rd party is HTTP2");
            flow.tp_app_id = AppId::HTTP;
            flow.is_http2 = true;
        }

        if self.app_info.has_flag(flow.tp_app_id, AppInfoFlag::TpClient) {
            flow.set_client_app_id(flow.tp_app_id);
        }

        let ctx = FusionContext {
            config: self.config,
            tp_config: self.tp_config,
            app_info: self.app_info,
            url_matcher: self.url_matcher,
            module: Some(self.module),
            debug_tag: self.tag,
        };
        let outcome = fuse_attributes(
            &ctx,
            flow,
            output.confidence,
            &output.proto_list,
            &mut output.attributes,
        );
        if outcome.rtmp_resolved {
            self.stats.rtmp_resolutions += 1;
        }
        if outcome.handle_released {
            self.stats.handles_released += 1;
        }

        if self.app_info.has_flag(flow.tp_app_id, AppInfoFlag::Ignore) {
            appid_debug!(self.tag, "3rd party ignored {}", flow.tp_app_id);
            flow.tp_app_id = if flow.has_flag(SessionFlag::HttpSession) {
                AppId::HTTP
            } else {
                AppId::None
            };
        }
        Ok(())
    }

    fn commit(&mut self, flow: &mut FlowSession, packet: &Packet<'_>, direction: Direction) {
        let tp_app_id = flow.tp_app_id;

        if flow.has_flag(SessionFlag::HttpSession) {
            if tp_app_id != AppId::HTTP && tp_app_id.is_concrete() {
                flow.tp_payload_app_id = tp_app_id;
            }
            flow.tp_app_id = AppId::HTTP;
            flow.set_service_app_id(AppId::HTTP);

            // 隧道内出现SSL时负载升级为SSL隧道
            if tp_app_id == AppId::HTTP_TUNNEL {
                flow.set_payload_app_id(AppId::HTTP_TUNNEL);
            }
            if flow.payload_app_id == AppId::HTTP_TUNNEL && tp_app_id == AppId::SSL {
                flow.set_payload_app_id(AppId::HTTP_SSL_TUNNEL);
            }
            flow.http_session_mut().process_http_packet(direction);

            if flow.has_tp_session() && !flow.has_flag(SessionFlag::AppReinspect) {
                flow.set_flag(SessionFlag::ClientDetected);
                flow.set_flag(SessionFlag::ServiceDetected);
                flow.clear_flag(SessionFlag::Continue);
                flow.service_endpoint = Some(packet.server_endpoint(direction));
            }

            let host_protocol = if flow.payload_app_id == AppId::HTTP_SSL_TUNNEL
                || tp_app_id == AppId::HTTP_SSL_TUNNEL
            {
                AppId::SSL
            } else {
                AppId::HTTP
            };
            flow.sync_host_protocol(host_protocol);
            appid_debug!(self.tag, "3rd party committed HTTP, payload {}", flow.tp_payload_app_id);
        } else if flow.has_flag(SessionFlag::SslSession) && flow.tls_session().is_some() {
            let (_, port) = packet.server_endpoint(direction);
            let service = self.app_info.tls_service_for_port(port);
            if tp_app_id == AppId::SSL {
                flow.tp_app_id = service;
                flow.port_service_id = service;
            } else {
                if tp_app_id.is_concrete() {
                    flow.tp_payload_app_id = tp_app_id;
                }
                flow.tp_app_id = service;
            }
            flow.set_service_app_id(flow.tp_app_id);
            flow.sync_host_protocol(AppId::SSL);
            appid_debug!(self.tag, "3rd party committed TLS service {}", flow.tp_app_id);
        } else {
            flow.set_service_app_id(tp_app_id);
            flow.sync_host_protocol(tp_app_id);
            appid_debug!(self.tag, "3rd party committed service {}", tp_app_id);
        }
    }
}
