//! 属性融合
//!
//! 把一次分类器调用得到的属性合并进流会话记录。每个属性都从结果中
//! 取走（`Option::take`），所有权随之转移到会话记录，同一个值不会被读取两次。
//!
//! HTTP字段的融合顺序是固定的：主机、URL/URI、Via、User-Agent、响应元数据、
//! Referer、Cookie、Content-Type、Location、消息体、Server、X-Working-With。
//! 后面字段的"过期"判断读取的是前面字段已经更新过的状态。

use super::termination::release_tp_session;
use super::url_matcher::UrlMatcher;
use crate::appid_debug;
use crate::classifier::{monitoring_disable_flags, ThirdPartyModule, TpAttr, MAX_CONFIDENCE};
use crate::config::{AppIdConfig, ThirdPartyConfig};
use crate::core::app_id::AppId;
use crate::core::app_info::AppInfoTable;
use crate::core::attributes::AttributeData;
use crate::core::http_session::{FieldValue, HttpField};
use crate::core::session::{FlowSession, ScanFlag, SessionFlag};

/// 融合时用到的宿主状态
pub struct FusionContext<'a> {
    /// 宿主配置
    pub config: &'a AppIdConfig,
    /// 模块配置视图
    pub tp_config: &'a ThirdPartyConfig,
    /// 应用信息表
    pub app_info: &'a AppInfoTable,
    /// URL匹配器
    pub url_matcher: &'a dyn UrlMatcher,
    /// 当前模块
    pub module: Option<&'a dyn ThirdPartyModule>,
    /// 调试会话标签
    pub debug_tag: Option<&'a str>,
}

/// 一次融合的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionOutcome {
    /// RTMP/RTSP流已经终结解析
    pub rtmp_resolved: bool,
    /// 分类器会话已被释放
    pub handle_released: bool,
}

/// 融合一次分类器结果
///
/// 每次只处理一个协议族，优先级为 HTTP/SPDY、RTMP/RTSP、SSL、FTP控制。
/// 流一旦被标记为HTTP会话，后续结果都走HTTP路径。
pub fn fuse_attributes(
    ctx: &FusionContext<'_>,
    flow: &mut FlowSession,
    confidence: u8,
    proto_list: &[AppId],
    attrs: &mut AttributeData,
) -> FusionOutcome {
    if proto_list.contains(&AppId::HTTP) {
        appid_debug!(ctx.debug_tag, "HTTP flow");
        flow.set_flag(SessionFlag::HttpSession);
    }
    if proto_list.contains(&AppId::SPDY) {
        appid_debug!(ctx.debug_tag, "SPDY flow");
        flow.set_flag(SessionFlag::HttpSession);
        flow.set_flag(SessionFlag::SpdySession);
    }

    if flow.has_flag(SessionFlag::HttpSession) {
        fuse_http(ctx, flow, attrs);
        FusionOutcome::default()
    } else if proto_list.contains(&AppId::RTMP) || proto_list.contains(&AppId::RTSP) {
        fuse_rtmp(ctx, flow, confidence, attrs)
    } else if proto_list.contains(&AppId::SSL) {
        fuse_tls(ctx, flow, attrs);
        FusionOutcome::default()
    } else if proto_list.contains(&AppId::FTP_CONTROL) {
        fuse_ftp(ctx, flow, attrs);
        FusionOutcome::default()
    } else {
        FusionOutcome::default()
    }
}

/// 写入一个HTTP字段
///
/// 字段已有值且流不在重新检查周期内时，CHP评估被标记为未完成。
pub fn store_http_field(flow: &mut FlowSession, field: HttpField, value: FieldValue) {
    let reinspecting = flow.has_flag(SessionFlag::AppReinspect);
    let http = flow.http_session_mut();
    if http.has(field) && !reinspecting {
        http.mark_chp_stale();
    }
    http.set_field(field, value);
}

fn fuse_http(ctx: &FusionContext<'_>, flow: &mut FlowSession, attrs: &mut AttributeData) {
    let decrypted = flow.has_flag(SessionFlag::Decrypted);
    flow.http_session_mut().reset_ptype_scan_counts();

    if flow.has_flag(SessionFlag::SpdySession) {
        fuse_spdy_request(ctx, flow, attrs, decrypted);
    } else {
        fuse_http_request(ctx, flow, attrs, decrypted);
    }

    let via = attrs
        .http_request_via
        .take()
        .or_else(|| attrs.http_response_via.take());
    if let Some(via) = via {
        store_http_field(flow, HttpField::Via, via);
        flow.scan_flags.set(ScanFlag::Via);
    }

    if let Some(agent) = attrs.http_request_user_agent.take() {
        store_http_field(flow, HttpField::UserAgent, agent);
        appid_debug!(ctx.debug_tag, "User Agent is {:?}", flow.http_session().and_then(|h| h.field_str(HttpField::UserAgent)));
        flow.scan_flags.set(ScanFlag::UserAgent);
    }

    fuse_http_response_meta(ctx, flow, attrs);

    if let Some(referer) = attrs.http_request_referer.take() {
        store_http_field(flow, HttpField::Referer, referer);
    }

    if let Some(cookie) = attrs.http_request_cookie.take() {
        store_http_field(flow, HttpField::Cookie, cookie);
    }

    if let Some(content) = attrs.http_response_content.take() {
        store_http_field(flow, HttpField::ContentType, content);
        flow.scan_flags.set(ScanFlag::ContentType);
    }

    if has_ptype_interest(flow, HttpField::Location) {
        if let Some(location) = attrs.http_response_location.take() {
            store_http_field(flow, HttpField::Location, location);
        }
    }

    if let Some(body) = attrs.http_request_body.take() {
        appid_debug!(ctx.debug_tag, "Got a request body ({} bytes)", body.len());
        if let Some(body) = collect_body(ctx.config, body) {
            store_http_field(flow, HttpField::RequestBody, body);
        }
    }

    if has_ptype_interest(flow, HttpField::ResponseBody) {
        if let Some(body) = attrs.http_response_body.take() {
            if let Some(body) = collect_body(ctx.config, body) {
                store_http_field(flow, HttpField::ResponseBody, body);
            }
        }
    }

    if !attrs.xff_fields.is_empty() {
        let fields = std::mem::take(&mut attrs.xff_fields);
        let addr = flow
            .http_session_mut()
            .update_xff_address(&fields, &ctx.tp_config.xff_fields);
        if let Some(addr) = addr {
            appid_debug!(ctx.debug_tag, "XFF client address is {}", addr);
        }
    }

    if let Some(server) = attrs.http_response_server.take() {
        store_http_field(flow, HttpField::Server, server);
        flow.scan_flags.set(ScanFlag::Vendor);
    }

    if let Some(xww) = attrs.http_request_x_working_with.take() {
        store_http_field(flow, HttpField::XWorkingWith, xww);
        flow.scan_flags.set(ScanFlag::XWorkingWith);
    }

    if flow.http_session().is_some_and(|h| h.needs_monitoring()) {
        flow.set_flag(SessionFlag::ChpInspecting);
        if let (Some(module), Some(session)) = (ctx.module, flow.tp_session_mut()) {
            module.session_attr_set(session, TpAttr::ContinueMonitoring);
        }
    }
}

fn fuse_spdy_request(
    ctx: &FusionContext<'_>,
    flow: &mut FlowSession,
    attrs: &mut AttributeData,
    decrypted: bool,
) {
    if let Some(scheme) = attrs.spdy_request_scheme.take() {
        if let (Some(host), Some(path)) = (&attrs.spdy_request_host, &attrs.spdy_request_path) {
            let scheme = if decrypted && scheme == "http" {
                "https"
            } else {
                scheme.as_str()
            };
            let url = format!(
                "{}://{}{}",
                scheme,
                String::from_utf8_lossy(&host.data),
                String::from_utf8_lossy(&path.data)
            );
            store_http_field(flow, HttpField::Url, FieldValue::new(url.into_bytes()));
            flow.scan_flags.set(ScanFlag::HostUrl);
        }
    }

    if let Some(host) = attrs.spdy_request_host.take() {
        store_http_field(flow, HttpField::Host, host);
        appid_debug!(ctx.debug_tag, "SPDY host is {:?}", flow.http_session().and_then(|h| h.host()));
        flow.scan_flags.set(ScanFlag::HostUrl);
    }

    if let Some(path) = attrs.spdy_request_path.take() {
        store_http_field(flow, HttpField::Uri, path);
        appid_debug!(ctx.debug_tag, "SPDY URI is {:?}", flow.http_session().and_then(|h| h.uri()));
    }
}

fn fuse_http_request(
    ctx: &FusionContext<'_>,
    flow: &mut FlowSession,
    attrs: &mut AttributeData,
    decrypted: bool,
) {
    let mut url_given = false;
    let mut host_or_uri = false;

    if let Some(host) = attrs.http_request_host.take() {
        store_http_field(flow, HttpField::Host, host);
        appid_debug!(ctx.debug_tag, "HTTP host is {:?}", flow.http_session().and_then(|h| h.host()));
        flow.scan_flags.set(ScanFlag::HostUrl);
        host_or_uri = true;
    }

    if let Some(url) = attrs.http_request_url.take() {
        let url = match url.strip_prefix("http://") {
            Some(rest) if decrypted => format!("https://{}", rest),
            _ => url,
        };
        store_http_field(flow, HttpField::Url, FieldValue::new(url.into_bytes()));
        flow.scan_flags.set(ScanFlag::HostUrl);
        url_given = true;
    }

    if let Some(uri) = attrs.http_request_uri.take() {
        store_http_field(flow, HttpField::Uri, uri);
        appid_debug!(ctx.debug_tag, "URI is {:?}", flow.http_session().and_then(|h| h.uri()));
        host_or_uri = true;
    }

    if !url_given && host_or_uri {
        compose_url(flow, decrypted);
    }
}

/// 由主机和URI拼出URL
fn compose_url(flow: &mut FlowSession, decrypted: bool) {
    let http = flow.http_session_mut();
    let url = match (http.host(), http.uri()) {
        (Some(host), Some(uri)) => {
            let scheme = if decrypted { "https" } else { "http" };
            format!("{}://{}{}", scheme, host, uri)
        }
        _ => return,
    };
    http.set_field(HttpField::Url, FieldValue::new(url.into_bytes()));
    flow.scan_flags.set(ScanFlag::HostUrl);
}

fn fuse_http_response_meta(ctx: &FusionContext<'_>, flow: &mut FlowSession, attrs: &mut AttributeData) {
    if let Some(version) = attrs.http_response_version.take() {
        appid_debug!(ctx.debug_tag, "HTTP response version is {}", version);
        if version.starts_with("HTTP/2") {
            appid_debug!(ctx.debug_tag, "3rd party detected and parsed HTTP/2");
            flow.is_http2 = true;
        }
    }

    if let Some(code) = attrs.http_response_code.take() {
        store_http_field(flow, HttpField::ResponseCode, code);
    }

    if let Some(upgrade) = attrs.http_response_upgrade.take() {
        appid_debug!(ctx.debug_tag, "HTTP response upgrade is {}", upgrade);
        let switching = flow
            .http_session()
            .and_then(|h| h.field_str(HttpField::ResponseCode))
            .is_some_and(|code| code.starts_with("101"));
        if ctx.config.http2_detection_enabled && switching && upgrade.starts_with("h2c") {
            appid_debug!(ctx.debug_tag, "Got an upgrade to HTTP/2");
            flow.is_http2 = true;
        }
    }
}

fn has_ptype_interest(flow: &mut FlowSession, field: HttpField) -> bool {
    flow.http_session_mut().ptype_scan_count(field) != 0
}

fn collect_body(config: &AppIdConfig, mut body: FieldValue) -> Option<FieldValue> {
    if config.chp_body_collection_disabled {
        return None;
    }
    body.truncate(config.chp_body_collection_max);
    Some(body)
}

fn fuse_rtmp(
    ctx: &FusionContext<'_>,
    flow: &mut FlowSession,
    confidence: u8,
    attrs: &mut AttributeData,
) -> FusionOutcome {
    let mut outcome = FusionOutcome::default();

    if flow.http_session_mut().url().is_none() {
        if let Some(url) = attrs.http_request_url.take() {
            flow.http_session_mut()
                .set_field(HttpField::Url, FieldValue::new(url.into_bytes()));
            flow.scan_flags.set(ScanFlag::HostUrl);
        }
    }

    if !ctx.config.referred_appid_disabled && flow.http_session_mut().referer().is_none() {
        if let Some(referer) = attrs.http_request_referer.take() {
            flow.http_session_mut().set_field(HttpField::Referer, referer);
        }
    }

    let url = flow.http_session().and_then(|h| h.url()).map(str::to_owned);
    let over_budget = confidence == MAX_CONFIDENCE
        && flow.session_packet_count > ctx.config.rtmp_max_packets;
    if url.is_none() && !over_budget {
        return outcome;
    }

    if let Some(url) = url {
        let referer = flow.http_session().and_then(|h| h.referer()).map(str::to_owned);
        let found = ctx
            .url_matcher
            .lookup(&url, referer.as_deref())
            .or_else(|| ctx.url_matcher.lookup(&url, None));

        if let Some(found) = found {
            appid_debug!(ctx.debug_tag, "RTMP URL {} matched {:?}", url, found);
            if flow.client_app_id.is_unset() {
                flow.set_client_app_id(found.client);
            }
            if flow.service_app_id.is_unset() {
                flow.set_service_app_id(found.service);
            }
            flow.set_payload_app_id(found.payload);
            flow.referred_payload_app_id = found.referred_payload;
        }
    }

    if let (Some(module), Some(session)) = (ctx.module, flow.tp_session_mut()) {
        module.disable_flags(session, monitoring_disable_flags());
    }
    outcome.handle_released = release_tp_session(flow, ctx.module, true);
    outcome.rtmp_resolved = true;
    flow.set_tp_done();
    flow.clear_flag(SessionFlag::AppReinspect);
    outcome
}

fn fuse_tls(ctx: &FusionContext<'_>, flow: &mut FlowSession, attrs: &mut AttributeData) {
    let current = match (ctx.module, flow.tp_session()) {
        (Some(module), Some(session)) => module.session_appid_get(session),
        _ => AppId::None,
    };
    let eligible = ctx.app_info.is_ssl_reinspect_eligible(current);

    flow.set_flag(SessionFlag::SslSession);
    if !flow.client_app_id.is_concrete() {
        flow.set_client_app_id(AppId::SSL_CLIENT);
    }

    let tls = flow.tls_session_mut();
    let host_seen = match attrs.tls_host.take() {
        Some(host) => {
            tls.set_host(host);
            true
        }
        None => false,
    };

    if eligible {
        if let Some(cname) = attrs.tls_cname.take() {
            tls.set_common_name(cname);
        }
        if let Some(org_unit) = attrs.tls_org_unit.take() {
            tls.set_org_unit(org_unit);
        }
        if host_seen {
            flow.scan_flags.set(ScanFlag::SslHost);
        }
    }
}

fn fuse_ftp(ctx: &FusionContext<'_>, flow: &mut FlowSession, attrs: &mut AttributeData) {
    if ctx.config.ftp_userid_disabled {
        return;
    }
    if let Some(user) = attrs.ftp_command_user.take() {
        appid_debug!(ctx.debug_tag, "FTP user is {}", user);
        flow.update_user(AppId::FTP_CONTROL, user);
        flow.set_flag(SessionFlag::LoginSucceeded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::attributes::XffField;
    use crate::discovery::url_matcher::{NoUrlMatcher, UrlMatch, UrlPattern, UrlPatternTable};

    struct Fixture {
        config: AppIdConfig,
        tp_config: ThirdPartyConfig,
        app_info: AppInfoTable,
    }

    impl Fixture {
        fn new(config: AppIdConfig) -> Self {
            let tp_config = config.thirdparty_config().unwrap();
            Self {
                config,
                tp_config,
                app_info: AppInfoTable::new(),
            }
        }

        fn ctx<'a>(&'a self, matcher: &'a dyn UrlMatcher) -> FusionContext<'a> {
            FusionContext {
                config: &self.config,
                tp_config: &self.tp_config,
                app_info: &self.app_info,
                url_matcher: matcher,
                module: None,
                debug_tag: None,
            }
        }
    }

    #[test]
    fn test_http_url_composed_from_host_and_uri() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_request_host: Some(FieldValue::text("example.com").with_range(22, 33)),
            http_request_uri: Some(FieldValue::text("/a").with_range(4, 6)),
            ..Default::default()
        };

        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);

        assert!(flow.has_flag(SessionFlag::HttpSession));
        let http = flow.http_session().unwrap();
        assert_eq!(http.url(), Some("http://example.com/a"));
        assert_eq!(http.field_range(HttpField::Host).map(|r| r.start), Some(22));
        assert!(flow.scan_flags.contains(ScanFlag::HostUrl));
        assert!(flow.has_flag(SessionFlag::ChpInspecting));
        assert!(attrs.is_drained());
    }

    #[test]
    fn test_decrypted_url_rewritten() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        flow.set_flag(SessionFlag::Decrypted);
        let mut attrs = AttributeData {
            http_request_url: Some("http://example.com/x".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        assert_eq!(flow.http_session().unwrap().url(), Some("https://example.com/x"));
    }

    #[test]
    fn test_overwrite_marks_chp_stale_unless_reinspecting() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        flow.set_flag(SessionFlag::HttpSession);
        flow.http_session_mut()
            .set_field(HttpField::UserAgent, FieldValue::text("a"));
        flow.http_session_mut().finish_chp(false);

        let mut attrs = AttributeData {
            http_request_user_agent: Some(FieldValue::text("b")),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 50, &[], &mut attrs);
        assert!(!flow.http_session().unwrap().is_chp_finished());

        flow.http_session_mut().finish_chp(false);
        flow.set_flag(SessionFlag::AppReinspect);
        let mut attrs = AttributeData {
            http_request_user_agent: Some(FieldValue::text("c")),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 50, &[], &mut attrs);
        assert!(flow.http_session().unwrap().is_chp_finished());
        assert_eq!(
            flow.http_session().unwrap().field_str(HttpField::UserAgent),
            Some("c")
        );
    }

    #[test]
    fn test_via_prefers_request() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_request_via: Some(FieldValue::text("1.1 req")),
            http_response_via: Some(FieldValue::text("1.1 resp")),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        assert_eq!(
            flow.http_session().unwrap().field_str(HttpField::Via),
            Some("1.1 req")
        );
        assert!(attrs.http_response_via.is_some());
    }

    #[test]
    fn test_location_and_body_need_interest() {
        let fixture = Fixture::new(AppIdConfig::default().with_body_collection_max(4));
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_response_location: Some(FieldValue::text("/next")),
            http_response_body: Some(FieldValue::text("hello world")),
            http_request_body: Some(FieldValue::text("user=me")),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        let http = flow.http_session().unwrap();
        assert!(!http.has(HttpField::Location));
        assert!(!http.has(HttpField::ResponseBody));
        assert_eq!(http.field_str(HttpField::RequestBody), Some("user"));

        flow.http_session_mut().set_ptype_interest(HttpField::Location, 1);
        flow.http_session_mut().set_ptype_interest(HttpField::ResponseBody, 1);
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        let http = flow.http_session().unwrap();
        assert_eq!(http.field_str(HttpField::Location), Some("/next"));
        assert_eq!(http.field_str(HttpField::ResponseBody), Some("hell"));
    }

    #[test]
    fn test_body_collection_disabled() {
        let fixture = Fixture::new(AppIdConfig::default().disable_body_collection());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_request_body: Some(FieldValue::text("user=me")),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        assert!(!flow.http_session().unwrap().has(HttpField::RequestBody));
        assert!(attrs.http_request_body.is_none());
    }

    #[test]
    fn test_h2c_upgrade() {
        let fixture = Fixture::new(AppIdConfig::default().enable_http2_detection());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_response_code: Some(FieldValue::text("101")),
            http_response_upgrade: Some("h2c".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        assert!(flow.is_http2);

        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_response_code: Some(FieldValue::text("101")),
            http_response_upgrade: Some("h2c".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        assert!(!flow.is_http2);
    }

    #[test]
    fn test_xff_updates_client_address() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            xff_fields: vec![XffField::new("X-Forwarded-For", "203.0.113.5")],
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::HTTP], &mut attrs);
        assert_eq!(
            flow.http_session().unwrap().xff_addr(),
            Some("203.0.113.5".parse().unwrap())
        );
    }

    #[test]
    fn test_spdy_url() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        flow.set_flag(SessionFlag::Decrypted);
        let mut attrs = AttributeData {
            spdy_request_scheme: Some("http".into()),
            spdy_request_host: Some(FieldValue::text("example.com")),
            spdy_request_path: Some(FieldValue::text("/s")),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::SPDY], &mut attrs);
        assert!(flow.has_flag(SessionFlag::SpdySession));
        let http = flow.http_session().unwrap();
        assert_eq!(http.url(), Some("https://example.com/s"));
        assert_eq!(http.uri(), Some("/s"));
    }

    #[test]
    fn test_tls_sets_client_sentinel() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            tls_host: Some("example.com".into()),
            tls_cname: Some("cn".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::SSL], &mut attrs);
        assert!(flow.has_flag(SessionFlag::SslSession));
        assert_eq!(flow.client_app_id, AppId::SSL_CLIENT);
        assert_eq!(flow.tls_session().unwrap().host(), Some("example.com"));
        // 没有分类器会话时不是可重新检查的SSL应用
        assert!(flow.tls_session().unwrap().common_name().is_none());
        assert!(!flow.scan_flags.contains(ScanFlag::SslHost));

        flow.client_app_id = AppId::Id(77);
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::SSL], &mut AttributeData::new());
        assert_eq!(flow.client_app_id, AppId::Id(77));
    }

    #[test]
    fn test_ftp_user() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            ftp_command_user: Some("alice".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::FTP_CONTROL], &mut attrs);
        assert!(flow.has_flag(SessionFlag::LoginSucceeded));
        assert_eq!(
            flow.client_user,
            Some((AppId::FTP_CONTROL, "alice".to_string()))
        );

        let fixture = Fixture::new(AppIdConfig::default().disable_ftp_userid());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            ftp_command_user: Some("alice".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::FTP_CONTROL], &mut attrs);
        assert!(flow.client_user.is_none());
    }

    #[test]
    fn test_rtmp_resolution() {
        let fixture = Fixture::new(AppIdConfig::default());
        let table = UrlPatternTable::new().with_pattern(UrlPattern::new(
            "video.example",
            UrlMatch {
                client: AppId::Id(3001),
                service: AppId::RTMP,
                payload: AppId::Id(3002),
                referred_payload: AppId::None,
            },
        ));
        let ctx = fixture.ctx(&table);
        let mut flow = FlowSession::new();
        flow.service_app_id = AppId::Id(55);
        flow.payload_app_id = AppId::Id(1);
        flow.install_tp_session(crate::classifier::TpSession::new(()));

        let mut attrs = AttributeData {
            http_request_url: Some("rtmp://video.example/live".into()),
            ..Default::default()
        };
        let outcome = fuse_attributes(&ctx, &mut flow, 80, &[AppId::RTMP], &mut attrs);

        assert!(outcome.rtmp_resolved);
        assert!(outcome.handle_released);
        assert!(!flow.has_tp_session());
        assert!(flow.is_tp_done());
        assert_eq!(flow.client_app_id, AppId::Id(3001));
        assert_eq!(flow.service_app_id, AppId::Id(55));
        assert_eq!(flow.payload_app_id, AppId::Id(3002));
    }

    /// 只接受不带referer的查找，并记录每次调用是否带了referer
    struct UrlOnlyMatcher {
        calls: std::cell::RefCell<Vec<bool>>,
    }

    impl UrlMatcher for UrlOnlyMatcher {
        fn lookup(&self, _url: &str, referer: Option<&str>) -> Option<UrlMatch> {
            self.calls.borrow_mut().push(referer.is_some());
            referer.is_none().then_some(UrlMatch {
                client: AppId::None,
                service: AppId::RTMP,
                payload: AppId::Id(3003),
                referred_payload: AppId::None,
            })
        }
    }

    #[test]
    fn test_rtmp_lookup_prefers_referer() {
        let fixture = Fixture::new(AppIdConfig::default());
        let table = UrlPatternTable::new()
            .with_pattern(UrlPattern::new(
                "video.example",
                UrlMatch {
                    client: AppId::Id(3001),
                    service: AppId::RTMP,
                    payload: AppId::Id(3002),
                    referred_payload: AppId::None,
                },
            ))
            .with_pattern(UrlPattern::new(
                "portal.example",
                UrlMatch {
                    client: AppId::None,
                    service: AppId::None,
                    payload: AppId::Id(4001),
                    referred_payload: AppId::None,
                },
            ));
        let ctx = fixture.ctx(&table);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_request_url: Some("rtmp://video.example/live".into()),
            http_request_referer: Some(FieldValue::text("http://portal.example/watch")),
            ..Default::default()
        };

        fuse_attributes(&ctx, &mut flow, 80, &[AppId::RTMP], &mut attrs);

        assert_eq!(flow.payload_app_id, AppId::Id(3002));
        assert_eq!(flow.referred_payload_app_id, AppId::Id(4001));

        // 带referer的查找失败时退回只用URL
        let matcher = UrlOnlyMatcher {
            calls: std::cell::RefCell::new(Vec::new()),
        };
        let ctx = fixture.ctx(&matcher);
        let mut flow = FlowSession::new();
        let mut attrs = AttributeData {
            http_request_url: Some("rtmp://video.example/live".into()),
            http_request_referer: Some(FieldValue::text("http://portal.example/watch")),
            ..Default::default()
        };

        fuse_attributes(&ctx, &mut flow, 80, &[AppId::RTMP], &mut attrs);

        assert_eq!(*matcher.calls.borrow(), vec![true, false]);
        assert_eq!(flow.payload_app_id, AppId::Id(3003));
    }

    #[test]
    fn test_rtmp_waits_for_url_or_budget() {
        let fixture = Fixture::new(AppIdConfig::default().with_rtmp_max_packets(3));
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        flow.session_packet_count = 2;
        let outcome = fuse_attributes(&ctx, &mut flow, 100, &[AppId::RTSP], &mut AttributeData::new());
        assert!(!outcome.rtmp_resolved);

        flow.session_packet_count = 4;
        let outcome = fuse_attributes(&ctx, &mut flow, 90, &[AppId::RTSP], &mut AttributeData::new());
        assert!(!outcome.rtmp_resolved);

        let outcome = fuse_attributes(&ctx, &mut flow, 100, &[AppId::RTSP], &mut AttributeData::new());
        assert!(outcome.rtmp_resolved);
        assert!(!outcome.handle_released);
    }

    #[test]
    fn test_rtmp_first_url_kept() {
        let fixture = Fixture::new(AppIdConfig::default());
        let ctx = fixture.ctx(&NoUrlMatcher);
        let mut flow = FlowSession::new();
        flow.http_session_mut()
            .set_field(HttpField::Url, FieldValue::text("rtmp://first/"));
        let mut attrs = AttributeData {
            http_request_url: Some("rtmp://second/".into()),
            ..Default::default()
        };
        fuse_attributes(&ctx, &mut flow, 100, &[AppId::RTMP], &mut attrs);
        assert_eq!(flow.http_session().unwrap().url(), Some("rtmp://first/"));
        assert!(attrs.http_request_url.is_some());
    }
}
