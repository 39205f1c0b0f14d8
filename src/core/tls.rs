//! TLS会话属性

/// TLS会话
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSession {
    host: Option<String>,
    common_name: Option<String>,
    org_unit: Option<String>,
}

impl TlsSession {
    /// 创建空会话
    pub fn new() -> Self {
        Self::default()
    }

    /// 服务器名称
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// 证书通用名
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// 证书组织单位
    pub fn org_unit(&self) -> Option<&str> {
        self.org_unit.as_deref()
    }

    /// 替换服务器名称，旧值随返回值释放
    pub fn set_host(&mut self, host: String) -> Option<String> {
        self.host.replace(host)
    }

    /// 替换证书通用名
    pub fn set_common_name(&mut self, cname: String) -> Option<String> {
        self.common_name.replace(cname)
    }

    /// 替换证书组织单位
    pub fn set_org_unit(&mut self, org_unit: String) -> Option<String> {
        self.org_unit.replace(org_unit)
    }
}
