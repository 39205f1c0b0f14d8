//! 应用信息表
//!
//! 记录每个应用的附加属性，决定融合与提交阶段的特殊处理。

use crate::core::app_id::AppId;
use std::collections::HashMap;

/// 应用属性标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppInfoFlag {
    /// 承载SSL，可按主机名重新分类
    SslInspect,
    /// 第三方结果应当作为客户端应用
    TpClient,
    /// 忽略第三方结果
    Ignore,
}

#[derive(Debug, Clone, Copy, Default)]
struct AppFlags {
    ssl_inspect: bool,
    tp_client: bool,
    ignore: bool,
}

impl AppFlags {
    fn get(&self, flag: AppInfoFlag) -> bool {
        match flag {
            AppInfoFlag::SslInspect => self.ssl_inspect,
            AppInfoFlag::TpClient => self.tp_client,
            AppInfoFlag::Ignore => self.ignore,
        }
    }

    fn set(&mut self, flag: AppInfoFlag) {
        match flag {
            AppInfoFlag::SslInspect => self.ssl_inspect = true,
            AppInfoFlag::TpClient => self.tp_client = true,
            AppInfoFlag::Ignore => self.ignore = true,
        }
    }
}

/// 应用信息表
#[derive(Debug, Clone)]
pub struct AppInfoTable {
    flags: HashMap<AppId, AppFlags>,
    tls_ports: HashMap<u16, AppId>,
}

impl AppInfoTable {
    /// 创建空表
    pub fn empty() -> Self {
        Self {
            flags: HashMap::new(),
            tls_ports: HashMap::new(),
        }
    }

    /// 创建带有默认条目的表
    pub fn new() -> Self {
        let mut table = Self::empty();
        table.set_flag(AppId::HTTPS, AppInfoFlag::SslInspect);
        table.set_flag(AppId::SPDY, AppInfoFlag::SslInspect);

        for (port, app) in [
            (443, AppId::HTTPS),
            (465, AppId::SMTPS),
            (563, AppId::NNTPS),
            (636, AppId::LDAPS),
            (989, AppId::FTPS),
            (990, AppId::FTPS),
            (993, AppId::IMAPS),
            (995, AppId::POP3S),
        ] {
            table.set_tls_port(port, app);
        }
        table
    }

    /// 设置应用标志
    pub fn set_flag(&mut self, app: AppId, flag: AppInfoFlag) -> &mut Self {
        if app.is_concrete() {
            self.flags.entry(app).or_default().set(flag);
        }
        self
    }

    /// 查询应用标志
    pub fn has_flag(&self, app: AppId, flag: AppInfoFlag) -> bool {
        self.flags.get(&app).map(|f| f.get(flag)).unwrap_or(false)
    }

    /// 设置TLS端口对应的服务
    pub fn set_tls_port(&mut self, port: u16, app: AppId) -> &mut Self {
        self.tls_ports.insert(port, app);
        self
    }

    /// 根据服务端端口推导TLS上的服务
    pub fn tls_service_for_port(&self, port: u16) -> AppId {
        self.tls_ports.get(&port).copied().unwrap_or(AppId::SSL)
    }

    /// 应用是否允许在SSL会话上重新检查
    pub fn is_ssl_reinspect_eligible(&self, app: AppId) -> bool {
        app == AppId::SSL || self.has_flag(app, AppInfoFlag::SslInspect)
    }
}

impl Default for AppInfoTable {
    fn default() -> Self {
        Self::new()
    }
}
