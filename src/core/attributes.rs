//! 分类器属性结果
//!
//! 一次分类器调用产生的新证据。每个字段都由结果持有，
//! 融合阶段通过 `Option::take` 取走，取走后槽位即为空。

use crate::core::http_session::FieldValue;

/// XFF类头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XffField {
    /// 头部名称
    pub name: String,
    /// 头部值
    pub value: String,
}

impl XffField {
    /// 创建XFF头部
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// 分类器报告的属性
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct AttributeData {
    pub spdy_request_scheme: Option<String>,
    pub spdy_request_host: Option<FieldValue>,
    pub spdy_request_path: Option<FieldValue>,

    pub http_request_host: Option<FieldValue>,
    pub http_request_url: Option<String>,
    pub http_request_uri: Option<FieldValue>,
    pub http_request_via: Option<FieldValue>,
    pub http_response_via: Option<FieldValue>,
    pub http_request_user_agent: Option<FieldValue>,
    pub http_response_version: Option<String>,
    pub http_response_code: Option<FieldValue>,
    pub http_response_upgrade: Option<String>,
    pub http_request_referer: Option<FieldValue>,
    pub http_request_cookie: Option<FieldValue>,
    pub http_response_content: Option<FieldValue>,
    pub http_response_location: Option<FieldValue>,
    pub http_request_body: Option<FieldValue>,
    pub http_response_body: Option<FieldValue>,
    pub http_response_server: Option<FieldValue>,
    pub http_request_x_working_with: Option<FieldValue>,
    pub xff_fields: Vec<XffField>,

    pub tls_host: Option<String>,
    pub tls_cname: Option<String>,
    pub tls_org_unit: Option<String>,

    pub ftp_command_user: Option<String>,
}

impl AttributeData {
    /// 创建空结果
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否已经被完全取走
    pub fn is_drained(&self) -> bool {
        *self == Self::default()
    }
}
