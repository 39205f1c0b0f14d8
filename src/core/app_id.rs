//! 应用标识定义模块
//!
//! 定义流上各个身份槽位使用的应用标识以及常用的应用编号。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 应用标识
///
/// 每个槽位要么是"无"（从未识别），要么是"未知"（已检查但没有结论），
/// 要么是一个具体的应用编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AppId {
    /// 尚未识别
    #[default]
    None,
    /// 已检查但无结论
    Unknown,
    /// 具体应用
    Id(u32),
}

impl AppId {
    /// FTP控制连接
    pub const FTP_CONTROL: AppId = AppId::Id(165);
    /// HTTP
    pub const HTTP: AppId = AppId::Id(676);
    /// HTTPS
    pub const HTTPS: AppId = AppId::Id(1122);
    /// SSH
    pub const SSH: AppId = AppId::Id(846);
    /// SFTP
    pub const SFTP: AppId = AppId::Id(508);
    /// SSL/TLS
    pub const SSL: AppId = AppId::Id(1296);
    /// SSL客户端哨兵值
    pub const SSL_CLIENT: AppId = AppId::Id(1297);
    /// SPDY
    pub const SPDY: AppId = AppId::Id(1445);
    /// HTTP/2
    pub const HTTP2: AppId = AppId::Id(2100);
    /// RTMP
    pub const RTMP: AppId = AppId::Id(1232);
    /// RTSP
    pub const RTSP: AppId = AppId::Id(1233);
    /// Microsoft Exchange
    pub const EXCHANGE: AppId = AppId::Id(142);
    /// HTTP隧道
    pub const HTTP_TUNNEL: AppId = AppId::Id(1100);
    /// HTTP隧道内的SSL
    pub const HTTP_SSL_TUNNEL: AppId = AppId::Id(1101);
    /// SMTPS
    pub const SMTPS: AppId = AppId::Id(1320);
    /// NNTPS
    pub const NNTPS: AppId = AppId::Id(1321);
    /// LDAPS
    pub const LDAPS: AppId = AppId::Id(1322);
    /// FTPS
    pub const FTPS: AppId = AppId::Id(1323);
    /// IMAPS
    pub const IMAPS: AppId = AppId::Id(1324);
    /// POP3S
    pub const POP3S: AppId = AppId::Id(1325);

    /// 是否为具体应用
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Id(_))
    }

    /// 是否为"无"或"未知"（不强于未知）
    pub fn is_unset(&self) -> bool {
        !self.is_concrete()
    }

    /// 是否从未被设置
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// 获取应用编号
    pub fn code(&self) -> Option<u32> {
        match self {
            Self::Id(code) => Some(*code),
            _ => None,
        }
    }

    /// 已知应用的名称
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::FTP_CONTROL => "FTP",
            Self::HTTP => "HTTP",
            Self::HTTPS => "HTTPS",
            Self::SSH => "SSH",
            Self::SFTP => "SFTP",
            Self::SSL => "SSL",
            Self::SSL_CLIENT => "SSL client",
            Self::SPDY => "SPDY",
            Self::HTTP2 => "HTTP/2",
            Self::RTMP => "RTMP",
            Self::RTSP => "RTSP",
            Self::EXCHANGE => "Exchange",
            Self::HTTP_TUNNEL => "HTTP tunnel",
            Self::HTTP_SSL_TUNNEL => "SSL over HTTP tunnel",
            Self::SMTPS => "SMTPS",
            Self::NNTPS => "NNTPS",
            Self::LDAPS => "LDAPS",
            Self::FTPS => "FTPS",
            Self::IMAPS => "IMAPS",
            Self::POP3S => "POP3S",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Unknown => write!(f, "unknown"),
            Self::Id(code) => match self.name() {
                Some(name) => write!(f, "{} ({})", name, code),
                None => write!(f, "{}", code),
            },
        }
    }
}

impl From<u32> for AppId {
    fn from(code: u32) -> Self {
        if code == 0 {
            Self::None
        } else {
            Self::Id(code)
        }
    }
}
