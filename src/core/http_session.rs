//! HTTP会话属性
//!
//! 流上累积的HTTP元数据，以及复合主机模式（CHP）评估的状态。

use crate::core::app_id::AppId;
use crate::core::attributes::XffField;
use crate::core::packet::Direction;
use bytes::Bytes;
use http::HeaderName;
use std::net::IpAddr;

/// HTTP字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpField {
    /// 请求主机
    Host,
    /// 完整URL
    Url,
    /// 请求URI
    Uri,
    /// Via
    Via,
    /// User-Agent
    UserAgent,
    /// 响应码
    ResponseCode,
    /// Referer
    Referer,
    /// Cookie
    Cookie,
    /// Content-Type
    ContentType,
    /// Location
    Location,
    /// 请求体
    RequestBody,
    /// 响应体
    ResponseBody,
    /// Server
    Server,
    /// X-Working-With
    XWorkingWith,
}

impl HttpField {
    /// 字段数量
    pub const COUNT: usize = 14;

    fn index(self) -> usize {
        self as usize
    }
}

/// 字段在原始数据包中的字节范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldRange {
    /// 起始偏移
    pub start: u32,
    /// 结束偏移
    pub end: u32,
}

/// 一个字段值，偏移随值一起移动
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    /// 内容
    pub data: Bytes,
    /// 字节范围
    pub range: Option<FieldRange>,
}

impl FieldValue {
    /// 从字节创建
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        Self {
            data: data.into(),
            range: None,
        }
    }

    /// 从文本创建
    pub fn text(text: &str) -> Self {
        Self::new(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// 附带偏移
    pub fn with_range(mut self, start: u32, end: u32) -> Self {
        self.range = Some(FieldRange { start, end });
        self
    }

    /// 按UTF-8读取
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// 长度
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 截断到指定长度
    pub fn truncate(&mut self, max: usize) {
        self.data.truncate(max);
    }
}

/// CHP评估状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChpState {
    /// 仍在收集字段，已累积的模式状态可能过期
    #[default]
    Collecting,
    /// 评估完成
    Finished,
    /// 评估完成但要求保持流继续监控
    Held,
}

/// HTTP会话
#[derive(Debug, Clone, Default)]
pub struct HttpSession {
    fields: [Option<FieldValue>; HttpField::COUNT],
    chp_state: ChpState,
    chp_candidate: Option<AppId>,
    ptype_required: [u8; HttpField::COUNT],
    ptype_scan_counts: [u8; HttpField::COUNT],
    xff_addr: Option<IpAddr>,
    initiator_packets: u32,
    responder_packets: u32,
}

impl HttpSession {
    /// 创建空会话
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取字段
    pub fn field(&self, field: HttpField) -> Option<&FieldValue> {
        self.fields[field.index()].as_ref()
    }

    /// 以文本读取字段
    pub fn field_str(&self, field: HttpField) -> Option<&str> {
        self.field(field).and_then(FieldValue::as_str)
    }

    /// 字段是否存在
    pub fn has(&self, field: HttpField) -> bool {
        self.fields[field.index()].is_some()
    }

    /// 写入字段，返回被替换的旧值
    pub fn set_field(&mut self, field: HttpField, value: FieldValue) -> Option<FieldValue> {
        self.fields[field.index()].replace(value)
    }

    /// 字段偏移
    pub fn field_range(&self, field: HttpField) -> Option<FieldRange> {
        self.field(field).and_then(|v| v.range)
    }

    /// 完整URL
    pub fn url(&self) -> Option<&str> {
        self.field_str(HttpField::Url)
    }

    /// 请求主机
    pub fn host(&self) -> Option<&str> {
        self.field_str(HttpField::Host)
    }

    /// 请求URI
    pub fn uri(&self) -> Option<&str> {
        self.field_str(HttpField::Uri)
    }

    /// Referer
    pub fn referer(&self) -> Option<&str> {
        self.field_str(HttpField::Referer)
    }

    /// CHP状态
    pub fn chp_state(&self) -> ChpState {
        self.chp_state
    }

    /// CHP评估是否完成
    pub fn is_chp_finished(&self) -> bool {
        matches!(self.chp_state, ChpState::Finished | ChpState::Held)
    }

    /// 是否要求保持流
    pub fn is_chp_hold_flow(&self) -> bool {
        self.chp_state == ChpState::Held
    }

    /// 是否需要分类器继续监控
    pub fn needs_monitoring(&self) -> bool {
        matches!(self.chp_state, ChpState::Collecting | ChpState::Held)
    }

    /// 新证据到达，累积状态过期
    pub fn mark_chp_stale(&mut self) {
        self.chp_state = ChpState::Collecting;
    }

    /// 评估结束
    pub fn finish_chp(&mut self, hold_flow: bool) {
        self.chp_state = if hold_flow {
            ChpState::Held
        } else {
            ChpState::Finished
        };
    }

    /// 当前候选应用
    pub fn chp_candidate(&self) -> Option<AppId> {
        self.chp_candidate
    }

    /// 设置候选应用
    pub fn set_chp_candidate(&mut self, candidate: Option<AppId>) {
        self.chp_candidate = candidate;
    }

    /// 设置某字段需要被多少个模式扫描
    pub fn set_ptype_interest(&mut self, field: HttpField, count: u8) {
        self.ptype_required[field.index()] = count;
        self.ptype_scan_counts[field.index()] = count;
    }

    /// 重新装载模式扫描计数
    pub fn reset_ptype_scan_counts(&mut self) {
        self.ptype_scan_counts = self.ptype_required;
    }

    /// 某字段剩余的模式扫描计数
    pub fn ptype_scan_count(&self, field: HttpField) -> u8 {
        self.ptype_scan_counts[field.index()]
    }

    /// 客户端地址
    pub fn xff_addr(&self) -> Option<IpAddr> {
        self.xff_addr
    }

    /// 用XFF类头部更新客户端地址
    ///
    /// 按配置顺序取第一个出现的头部，使用其中第一个可解析的地址。
    pub fn update_xff_address(&mut self, fields: &[XffField], names: &[HeaderName]) -> Option<IpAddr> {
        for name in names {
            let Some(field) = fields
                .iter()
                .find(|f| f.name.eq_ignore_ascii_case(name.as_str()))
            else {
                continue;
            };

            let addr = field
                .value
                .split(',')
                .filter_map(|part| part.trim().parse::<IpAddr>().ok())
                .next();
            if addr.is_some() {
                self.xff_addr = addr;
                return addr;
            }
        }
        None
    }

    /// 记录一个已处理的HTTP数据包
    pub fn process_http_packet(&mut self, direction: Direction) {
        match direction {
            Direction::FromInitiator => self.initiator_packets += 1,
            Direction::FromResponder => self.responder_packets += 1,
        }
    }

    /// 某方向已处理的数据包数
    pub fn processed_packets(&self, direction: Direction) -> u32 {
        match direction {
            Direction::FromInitiator => self.initiator_packets,
            Direction::FromResponder => self.responder_packets,
        }
    }

    /// 清空累积的元数据，开始新的检查周期
    pub fn reset(&mut self) {
        self.fields = Default::default();
        self.chp_state = ChpState::Collecting;
        self.chp_candidate = None;
        self.ptype_scan_counts = self.ptype_required;
        self.initiator_packets = 0;
        self.responder_packets = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_field_returns_previous() {
        let mut session = HttpSession::new();
        assert!(session.set_field(HttpField::Host, FieldValue::text("a.com")).is_none());
        let old = session.set_field(HttpField::Host, FieldValue::text("b.com").with_range(6, 11));
        assert_eq!(old.unwrap().as_str(), Some("a.com"));
        assert_eq!(session.host(), Some("b.com"));
        assert_eq!(session.field_range(HttpField::Host), Some(FieldRange { start: 6, end: 11 }));
    }

    #[test]
    fn test_chp_transitions() {
        let mut session = HttpSession::new();
        assert_eq!(session.chp_state(), ChpState::Collecting);
        assert!(session.needs_monitoring());

        session.finish_chp(false);
        assert!(session.is_chp_finished());
        assert!(!session.needs_monitoring());

        session.finish_chp(true);
        assert!(session.is_chp_finished());
        assert!(session.is_chp_hold_flow());
        assert!(session.needs_monitoring());

        session.mark_chp_stale();
        assert!(!session.is_chp_finished());
    }

    #[test]
    fn test_xff_priority_and_list() {
        let mut session = HttpSession::new();
        let names = vec![
            HeaderName::from_static("x-forwarded-for"),
            HeaderName::from_static("true-client-ip"),
        ];
        let fields = vec![
            XffField::new("True-Client-IP", "192.0.2.9"),
            XffField::new("X-Forwarded-For", "garbage, 198.51.100.7, 10.0.0.1"),
        ];
        let addr = session.update_xff_address(&fields, &names);
        assert_eq!(addr, Some("198.51.100.7".parse().unwrap()));
        assert_eq!(session.xff_addr(), addr);
    }

    #[test]
    fn test_ptype_counts_rearm() {
        let mut session = HttpSession::new();
        assert_eq!(session.ptype_scan_count(HttpField::Location), 0);
        session.set_ptype_interest(HttpField::Location, 2);
        session.reset_ptype_scan_counts();
        assert_eq!(session.ptype_scan_count(HttpField::Location), 2);
    }

    #[test]
    fn test_reset_clears_fields() {
        let mut session = HttpSession::new();
        session.set_field(HttpField::Uri, FieldValue::text("/a"));
        session.set_chp_candidate(Some(AppId::Id(7)));
        session.finish_chp(false);
        session.reset();
        assert!(!session.has(HttpField::Uri));
        assert!(session.chp_candidate().is_none());
        assert_eq!(session.chp_state(), ChpState::Collecting);
    }
}
