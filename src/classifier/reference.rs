//! 内置参考分类器
//!
//! 基于特征字节的轻量分类器：HTTP/1 请求与响应、HTTP/2 连接前言、
//! TLS ClientHello、SSH 标识串和 FTP 控制命令。它完整实现模块契约，
//! 使发现流程不依赖外部模块即可端到端运行。

use super::tls_hello::{is_handshake_record, is_server_hello, parse_client_hello};
use super::{
    HostUtils, ProcessOutput, ThirdPartyModule, TpAttr, TpSession, TpSessionFlag, TpSessionFlags,
    TpState, MAX_CONFIDENCE, THIRD_PARTY_APP_ID_API_VERSION,
};
use crate::config::ThirdPartyConfig;
use crate::core::app_id::AppId;
use crate::core::attributes::{AttributeData, XffField};
use crate::core::header::{find_header, HeaderOption};
use crate::core::http_session::FieldValue;
use crate::core::packet::{Direction, Packet};
use crate::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};

/// 模块名称
pub const MODULE_NAME: &str = "ref-impl";

const HTTP2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const HTTP_METHODS: [&[u8]; 9] = [
    b"GET ",
    b"POST ",
    b"PUT ",
    b"DELETE ",
    b"HEAD ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
];

/// 单条流上的分类状态
#[derive(Debug)]
struct RefSession {
    state: TpState,
    app_id: AppId,
    disabled: TpSessionFlags,
    continue_monitoring: bool,
}

impl RefSession {
    fn new() -> Self {
        Self {
            state: TpState::Uninitialized,
            app_id: AppId::None,
            disabled: TpSessionFlags::new(),
            continue_monitoring: false,
        }
    }

    fn settle(&self) -> TpState {
        if self.continue_monitoring {
            TpState::Inspecting
        } else {
            TpState::Classified
        }
    }
}

#[derive(Debug, Default)]
struct RefStats {
    sessions_created: AtomicU64,
    sessions_deleted: AtomicU64,
    packets: AtomicU64,
    classified: AtomicU64,
}

/// 参考分类器
#[derive(Debug)]
pub struct ReferenceClassifier {
    config: ThirdPartyConfig,
    host: Option<HostUtils>,
    stats: RefStats,
}

impl Default for ReferenceClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceClassifier {
    /// 创建分类器
    pub fn new() -> Self {
        Self {
            config: ThirdPartyConfig::default(),
            host: None,
            stats: RefStats::default(),
        }
    }

    /// 生效中的配置
    pub fn config(&self) -> &ThirdPartyConfig {
        &self.config
    }

    fn log(&self, message: &str) {
        match &self.host {
            Some(host) => host.log_message(MODULE_NAME, message),
            None => tracing::info!(module = MODULE_NAME, "{}", message),
        }
    }

    fn inspect(&self, session: &mut RefSession, data: &[u8], direction: Direction) -> ProcessOutput {
        if data.starts_with(HTTP2_PREFACE) {
            session.state = TpState::Classified;
            return ProcessOutput {
                app_id: AppId::HTTP2,
                confidence: MAX_CONFIDENCE,
                ..Default::default()
            };
        }

        if direction.is_initiator() && HTTP_METHODS.iter().any(|m| data.starts_with(m)) {
            session.state = TpState::Inspecting;
            return ProcessOutput {
                app_id: AppId::HTTP,
                confidence: MAX_CONFIDENCE,
                proto_list: vec![AppId::HTTP],
                attributes: self.parse_request(data),
            };
        }

        if !direction.is_initiator() && data.starts_with(b"HTTP/") {
            session.state = session.settle();
            return ProcessOutput {
                app_id: AppId::HTTP,
                confidence: MAX_CONFIDENCE,
                proto_list: vec![AppId::HTTP],
                attributes: self.parse_response(data),
            };
        }

        if is_handshake_record(data) {
            if let Some(hello) = parse_client_hello(data) {
                session.state = TpState::Inspecting;
                return ProcessOutput {
                    app_id: AppId::SSL,
                    confidence: MAX_CONFIDENCE,
                    proto_list: vec![AppId::SSL],
                    attributes: AttributeData {
                        tls_host: hello.server_name,
                        ..Default::default()
                    },
                };
            }
            if is_server_hello(data) {
                session.state = session.settle();
                return ProcessOutput {
                    app_id: AppId::SSL,
                    confidence: MAX_CONFIDENCE,
                    proto_list: vec![AppId::SSL],
                    ..Default::default()
                };
            }
        }

        if data.starts_with(b"SSH-") {
            session.state = TpState::Classified;
            return ProcessOutput {
                app_id: AppId::SSH,
                confidence: MAX_CONFIDENCE,
                ..Default::default()
            };
        }

        if !direction.is_initiator() && data.starts_with(b"220") {
            session.state = TpState::Inspecting;
            return ProcessOutput {
                app_id: AppId::FTP_CONTROL,
                confidence: 80,
                proto_list: vec![AppId::FTP_CONTROL],
                ..Default::default()
            };
        }

        if direction.is_initiator() && data.len() > 5 && data[..5].eq_ignore_ascii_case(b"USER ") {
            session.state = session.settle();
            let user = first_line(&data[5..]);
            let ftp_command_user = (!self.config.ftp_userid_disabled && !user.is_empty())
                .then(|| String::from_utf8_lossy(user).into_owned());
            return ProcessOutput {
                app_id: AppId::FTP_CONTROL,
                confidence: MAX_CONFIDENCE,
                proto_list: vec![AppId::FTP_CONTROL],
                attributes: AttributeData {
                    ftp_command_user,
                    ..Default::default()
                },
            };
        }

        ProcessOutput {
            app_id: session.app_id,
            ..Default::default()
        }
    }

    fn parse_request(&self, data: &[u8]) -> AttributeData {
        let mut attrs = AttributeData::new();
        let (head, body) = split_message(data);
        let request_line = first_line(head);

        let mut parts = request_line.splitn(3, |&b| b == b' ');
        let _method = parts.next();
        if let Some(uri) = parts.next().filter(|uri| !uri.is_empty()) {
            attrs.http_request_uri = Some(field_at(data, uri));
        }

        attrs.http_request_host = find_header(head, "Host").map(|v| field_at(data, v));
        attrs.http_request_user_agent = find_header(head, "User-Agent").map(|v| field_at(data, v));
        attrs.http_request_referer = find_header(head, "Referer").map(|v| field_at(data, v));
        attrs.http_request_cookie = find_header(head, "Cookie").map(|v| field_at(data, v));
        attrs.http_request_via = find_header(head, "Via").map(|v| field_at(data, v));
        attrs.http_request_x_working_with =
            find_header(head, "X-Working-With").map(|v| field_at(data, v));

        attrs.xff_fields = self
            .config
            .xff_fields
            .iter()
            .filter_map(|name| {
                HeaderOption::named(name.as_str())
                    .eval(head)
                    .map(|value| XffField::new(name.as_str(), String::from_utf8_lossy(value)))
            })
            .collect();

        if !self.config.chp_body_collection_disabled && !body.is_empty() {
            attrs.http_request_body = Some(field_at(data, body));
        }
        attrs
    }

    fn parse_response(&self, data: &[u8]) -> AttributeData {
        let mut attrs = AttributeData::new();
        let (head, body) = split_message(data);
        let status_line = first_line(head);

        let mut parts = status_line.splitn(3, |&b| b == b' ');
        if let Some(version) = parts.next() {
            attrs.http_response_version = Some(String::from_utf8_lossy(version).into_owned());
        }
        if let Some(code) = parts.next().filter(|code| !code.is_empty()) {
            attrs.http_response_code = Some(field_at(data, code));
        }

        attrs.http_response_server = find_header(head, "Server").map(|v| field_at(data, v));
        attrs.http_response_content = find_header(head, "Content-Type").map(|v| field_at(data, v));
        attrs.http_response_location = find_header(head, "Location").map(|v| field_at(data, v));
        attrs.http_response_via = find_header(head, "Via").map(|v| field_at(data, v));
        if self.config.http_upgrade_reporting_enabled {
            attrs.http_response_upgrade =
                find_header(head, "Upgrade").map(|v| String::from_utf8_lossy(v).into_owned());
        }

        if !self.config.chp_body_collection_disabled && !body.is_empty() {
            attrs.http_response_body = Some(field_at(data, body));
        }
        attrs
    }
}

impl ThirdPartyModule for ReferenceClassifier {
    fn api_version(&self) -> u32 {
        THIRD_PARTY_APP_ID_API_VERSION
    }

    fn module_name(&self) -> &str {
        MODULE_NAME
    }

    fn init(&mut self, config: &ThirdPartyConfig, host: &HostUtils) -> Result<()> {
        self.config = config.clone();
        self.host = Some(host.clone());
        self.log("initialized");
        Ok(())
    }

    fn fini(&mut self) -> Result<()> {
        self.log("finalized");
        self.host = None;
        Ok(())
    }

    fn reconfigure(&mut self, config: &ThirdPartyConfig) -> Result<()> {
        self.config = config.clone();
        self.log("reconfigured");
        Ok(())
    }

    fn session_create(&self) -> Option<TpSession> {
        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        Some(TpSession::new(RefSession::new()))
    }

    fn session_delete(&self, session: TpSession, _core_only: bool) {
        self.stats.sessions_deleted.fetch_add(1, Ordering::Relaxed);
        drop(session);
    }

    fn session_process(
        &self,
        session: &mut TpSession,
        packet: &Packet<'_>,
        direction: Direction,
    ) -> ProcessOutput {
        self.stats.packets.fetch_add(1, Ordering::Relaxed);
        let Some(state) = session.downcast_mut::<RefSession>() else {
            return ProcessOutput::none();
        };
        let mut output = self.inspect(state, packet.data, direction);
        if !output.app_id.is_none() {
            state.app_id = output.app_id;
        }
        if state.state == TpState::Classified {
            self.stats.classified.fetch_add(1, Ordering::Relaxed);
        }
        if state.disabled.contains(TpSessionFlag::Attribute) {
            output.attributes = AttributeData::new();
        }
        output
    }

    fn session_attr_set(&self, session: &mut TpSession, attr: TpAttr) {
        let Some(state) = session.downcast_mut::<RefSession>() else {
            return;
        };
        match attr {
            TpAttr::ContinueMonitoring => {
                state.continue_monitoring = true;
                if state.state == TpState::Classified {
                    state.state = TpState::Inspecting;
                }
            }
        }
    }

    fn session_state_get(&self, session: &TpSession) -> TpState {
        session
            .downcast_ref::<RefSession>()
            .map_or(TpState::Uninitialized, |s| s.state)
    }

    fn session_appid_get(&self, session: &TpSession) -> AppId {
        session
            .downcast_ref::<RefSession>()
            .map_or(AppId::None, |s| s.app_id)
    }

    fn disable_flags(&self, session: &mut TpSession, flags: TpSessionFlags) {
        let Some(state) = session.downcast_mut::<RefSession>() else {
            return;
        };
        for flag in [
            TpSessionFlag::Attribute,
            TpSessionFlag::Tunneling,
            TpSessionFlag::FutureFlow,
        ] {
            if flags.contains(flag) {
                state.disabled.set(flag);
            }
        }
    }

    fn print_stats(&self) {
        tracing::info!(
            module = MODULE_NAME,
            sessions_created = self.stats.sessions_created.load(Ordering::Relaxed),
            sessions_deleted = self.stats.sessions_deleted.load(Ordering::Relaxed),
            packets = self.stats.packets.load(Ordering::Relaxed),
            classified = self.stats.classified.load(Ordering::Relaxed),
            "reference classifier stats"
        );
    }

    fn reset_stats(&self) {
        self.stats.sessions_created.store(0, Ordering::Relaxed);
        self.stats.sessions_deleted.store(0, Ordering::Relaxed);
        self.stats.packets.store(0, Ordering::Relaxed);
        self.stats.classified.store(0, Ordering::Relaxed);
    }
}

/// 拆分头部和消息体，没有空行时整个缓冲区都是头部
fn split_message(data: &[u8]) -> (&[u8], &[u8]) {
    match data.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(idx) => (&data[..idx + 2], &data[idx + 4..]),
        None => (data, &data[data.len()..]),
    }
}

fn first_line(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(data.len());
    &data[..end]
}

/// 带偏移的字段值，`part` 必须是 `data` 的子切片
fn field_at(data: &[u8], part: &[u8]) -> FieldValue {
    let start = (part.as_ptr() as usize).saturating_sub(data.as_ptr() as usize);
    FieldValue::new(bytes::Bytes::copy_from_slice(part))
        .with_range(start as u32, (start + part.len()) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::monitoring_disable_flags;
    use crate::classifier::tls_hello::build_client_hello;
    use crate::config::AppIdConfig;

    fn init_classifier(config: AppIdConfig) -> ReferenceClassifier {
        let mut classifier = ReferenceClassifier::new();
        classifier
            .init(&config.thirdparty_config().unwrap(), &HostUtils::new("test"))
            .unwrap();
        classifier
    }

    fn process(
        classifier: &ReferenceClassifier,
        session: &mut TpSession,
        data: &[u8],
        direction: Direction,
    ) -> ProcessOutput {
        classifier.session_process(session, &Packet::tcp(data, 40000, 80), direction)
    }

    #[test]
    fn test_http_request_attributes() {
        let classifier = init_classifier(AppIdConfig::default());
        let mut session = classifier.session_create().unwrap();
        let request = b"GET /a HTTP/1.1\r\nHost: example.com\r\nUser-Agent: curl/8.0\r\nX-Forwarded-For: 203.0.113.5\r\n\r\n";
        let out = process(&classifier, &mut session, request, Direction::FromInitiator);

        assert_eq!(out.app_id, AppId::HTTP);
        assert!(out.has_proto(AppId::HTTP));
        let host = out.attributes.http_request_host.unwrap();
        assert_eq!(host.as_str(), Some("example.com"));
        let range = host.range.unwrap();
        assert_eq!(&request[range.start as usize..range.end as usize], b"example.com");
        assert_eq!(out.attributes.http_request_uri.unwrap().as_str(), Some("/a"));
        assert_eq!(out.attributes.xff_fields.len(), 1);
        assert!(out.attributes.http_request_body.is_none());
        assert_eq!(classifier.session_state_get(&session), TpState::Inspecting);
    }

    #[test]
    fn test_http_response_classifies_unless_monitoring() {
        let classifier = init_classifier(AppIdConfig::default().enable_http2_detection());
        let mut session = classifier.session_create().unwrap();
        let response = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\nServer: nginx\r\n\r\n";
        let out = process(&classifier, &mut session, response, Direction::FromResponder);
        assert_eq!(out.attributes.http_response_version.as_deref(), Some("HTTP/1.1"));
        assert_eq!(out.attributes.http_response_code.unwrap().as_str(), Some("101"));
        assert_eq!(out.attributes.http_response_upgrade.as_deref(), Some("h2c"));
        assert_eq!(classifier.session_state_get(&session), TpState::Classified);

        classifier.session_attr_set(&mut session, TpAttr::ContinueMonitoring);
        assert_eq!(classifier.session_state_get(&session), TpState::Inspecting);
        process(&classifier, &mut session, response, Direction::FromResponder);
        assert_eq!(classifier.session_state_get(&session), TpState::Inspecting);
    }

    #[test]
    fn test_tls_client_hello() {
        let classifier = init_classifier(AppIdConfig::default());
        let mut session = classifier.session_create().unwrap();
        let hello = build_client_hello(Some("Example.COM"), &["h2"]);
        let out = process(&classifier, &mut session, &hello, Direction::FromInitiator);
        assert_eq!(out.app_id, AppId::SSL);
        assert_eq!(out.attributes.tls_host.as_deref(), Some("example.com"));
        assert_eq!(classifier.session_appid_get(&session), AppId::SSL);
    }

    #[test]
    fn test_ssh_and_ftp() {
        let classifier = init_classifier(AppIdConfig::default());
        let mut session = classifier.session_create().unwrap();
        let out = process(&classifier, &mut session, b"SSH-2.0-OpenSSH_9.0\r\n", Direction::FromResponder);
        assert_eq!(out.app_id, AppId::SSH);
        assert_eq!(classifier.session_state_get(&session), TpState::Classified);

        let mut session = classifier.session_create().unwrap();
        let out = process(&classifier, &mut session, b"USER alice\r\n", Direction::FromInitiator);
        assert_eq!(out.app_id, AppId::FTP_CONTROL);
        assert_eq!(out.attributes.ftp_command_user.as_deref(), Some("alice"));

        let classifier = init_classifier(AppIdConfig::default().disable_ftp_userid());
        let mut session = classifier.session_create().unwrap();
        let out = process(&classifier, &mut session, b"USER alice\r\n", Direction::FromInitiator);
        assert!(out.attributes.ftp_command_user.is_none());
    }

    #[test]
    fn test_disabled_attributes_suppressed() {
        let classifier = init_classifier(AppIdConfig::default());
        let mut session = classifier.session_create().unwrap();
        classifier.disable_flags(&mut session, monitoring_disable_flags());
        let out = process(
            &classifier,
            &mut session,
            b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n",
            Direction::FromInitiator,
        );
        assert_eq!(out.app_id, AppId::HTTP);
        assert!(out.attributes.is_drained());
    }

    #[test]
    fn test_unknown_payload_keeps_identity() {
        let classifier = init_classifier(AppIdConfig::default());
        let mut session = classifier.session_create().unwrap();
        let out = process(&classifier, &mut session, b"\x00\x01binary", Direction::FromInitiator);
        assert_eq!(out.app_id, AppId::None);
        assert_eq!(out.confidence, 0);
        classifier.session_delete(session, true);
    }
}
