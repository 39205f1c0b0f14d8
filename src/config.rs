//! 配置模块
//!
//! 宿主侧的应用识别配置，以及交给第三方模块的配置视图。

use crate::error::{AppIdError, Result};
use http::HeaderName;
use serde::{Deserialize, Serialize};

/// 默认的XFF头部
pub const DEFAULT_XFF_FIELDS: [&str; 2] = ["X-Forwarded-For", "True-Client-IP"];

/// 应用识别配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppIdConfig {
    /// 要加载的第三方模块名称，为空则禁用第三方分类
    pub thirdparty_module: Option<String>,
    /// 每个方向最多交给分类器的包数
    pub max_tp_flow_depth: u16,
    /// 禁用FTP用户名采集
    pub ftp_userid_disabled: bool,
    /// 启用HTTP/2检测
    pub http2_detection_enabled: bool,
    /// HTTP消息体采集上限（字节）
    pub chp_body_collection_max: usize,
    /// 禁用HTTP消息体采集
    pub chp_body_collection_disabled: bool,
    /// 允许无负载或乱序的探测流量进入分类器
    pub tp_allow_probes: bool,
    /// 禁用引用应用归因
    pub referred_appid_disabled: bool,
    /// RTMP/RTSP在没有URL时最多等待的包数
    pub rtmp_max_packets: u32,
    /// 用于客户端地址归因的头部名称
    pub xff_fields: Vec<String>,
    /// SSH升级为SFTP的包数窗口下限
    pub sftp_min_packets: u32,
    /// SSH升级为SFTP的包数窗口上限（不含）
    pub sftp_max_packets: u32,
}

impl Default for AppIdConfig {
    fn default() -> Self {
        Self {
            thirdparty_module: None,
            max_tp_flow_depth: 5,
            ftp_userid_disabled: false,
            http2_detection_enabled: false,
            chp_body_collection_max: 4096,
            chp_body_collection_disabled: false,
            tp_allow_probes: false,
            referred_appid_disabled: false,
            rtmp_max_packets: 15,
            xff_fields: Vec::new(),
            sftp_min_packets: 35,
            sftp_max_packets: 80,
        }
    }
}

impl AppIdConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从JSON解析并校验
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 设置第三方模块
    pub fn with_module<S: Into<String>>(mut self, name: S) -> Self {
        self.thirdparty_module = Some(name.into());
        self
    }

    /// 设置最大流深度
    pub fn with_max_tp_flow_depth(mut self, depth: u16) -> Self {
        self.max_tp_flow_depth = depth;
        self
    }

    /// 设置RTMP包数预算
    pub fn with_rtmp_max_packets(mut self, packets: u32) -> Self {
        self.rtmp_max_packets = packets;
        self
    }

    /// 允许探测流量
    pub fn allow_probes(mut self) -> Self {
        self.tp_allow_probes = true;
        self
    }

    /// 启用HTTP/2检测
    pub fn enable_http2_detection(mut self) -> Self {
        self.http2_detection_enabled = true;
        self
    }

    /// 禁用FTP用户名采集
    pub fn disable_ftp_userid(mut self) -> Self {
        self.ftp_userid_disabled = true;
        self
    }

    /// 禁用引用应用归因
    pub fn disable_referred_appid(mut self) -> Self {
        self.referred_appid_disabled = true;
        self
    }

    /// 设置消息体采集上限
    pub fn with_body_collection_max(mut self, max: usize) -> Self {
        self.chp_body_collection_max = max;
        self
    }

    /// 禁用消息体采集
    pub fn disable_body_collection(mut self) -> Self {
        self.chp_body_collection_disabled = true;
        self
    }

    /// 设置XFF头部
    pub fn with_xff_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.xff_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// 配置的模块名称，空字符串视为未配置
    pub fn module_name(&self) -> Option<&str> {
        self.thirdparty_module.as_deref().filter(|name| !name.is_empty())
    }

    /// 解析后的XFF头部名称
    pub fn resolved_xff_fields(&self) -> Result<Vec<HeaderName>> {
        let names: Vec<&str> = if self.xff_fields.is_empty() {
            DEFAULT_XFF_FIELDS.to_vec()
        } else {
            self.xff_fields.iter().map(String::as_str).collect()
        };

        names
            .into_iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    AppIdError::config_error(format!("invalid xff header name: {:?}", name))
                })
            })
            .collect()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.max_tp_flow_depth == 0 {
            return Err(AppIdError::config_error(
                "max_tp_flow_depth must be greater than 0",
            ));
        }

        if self.sftp_min_packets >= self.sftp_max_packets {
            return Err(AppIdError::config_error(format!(
                "sftp packet window is empty: {}..{}",
                self.sftp_min_packets, self.sftp_max_packets
            )));
        }

        self.resolved_xff_fields()?;
        Ok(())
    }

    /// 生成交给第三方模块的配置
    pub fn thirdparty_config(&self) -> Result<ThirdPartyConfig> {
        Ok(ThirdPartyConfig {
            chp_body_collection_max: self.chp_body_collection_max,
            chp_body_collection_disabled: self.chp_body_collection_disabled,
            ftp_userid_disabled: self.ftp_userid_disabled,
            tp_allow_probes: self.tp_allow_probes,
            http_upgrade_reporting_enabled: self.http2_detection_enabled,
            xff_fields: self.resolved_xff_fields()?,
        })
    }
}

/// 第三方模块看到的配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThirdPartyConfig {
    /// 消息体采集上限
    pub chp_body_collection_max: usize,
    /// 禁用消息体采集
    pub chp_body_collection_disabled: bool,
    /// 禁用FTP用户名采集
    pub ftp_userid_disabled: bool,
    /// 允许探测流量
    pub tp_allow_probes: bool,
    /// 报告HTTP升级
    pub http_upgrade_reporting_enabled: bool,
    /// XFF头部名称
    pub xff_fields: Vec<HeaderName>,
}

impl Default for ThirdPartyConfig {
    fn default() -> Self {
        // 默认配置一定能通过解析
        AppIdConfig::default()
            .thirdparty_config()
            .unwrap_or_else(|_| Self {
                chp_body_collection_max: 0,
                chp_body_collection_disabled: false,
                ftp_userid_disabled: false,
                tp_allow_probes: false,
                http_upgrade_reporting_enabled: false,
                xff_fields: Vec::new(),
            })
    }
}
