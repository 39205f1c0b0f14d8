//! 错误处理模块
//!
//! 定义第三方应用识别框架中使用的所有错误类型。

use thiserror::Error;

/// 应用识别的结果类型
pub type Result<T> = std::result::Result<T, AppIdError>;

/// 应用识别错误类型
#[derive(Error, Debug)]
pub enum AppIdError {
    /// 已经加载了一个第三方模块
    #[error("Ignoring additional 3rd party AppID module ({name})")]
    ModuleAlreadyLoaded {
        /// 被忽略的模块名称
        name: String,
    },

    /// 模块未通过加载校验
    #[error("Ignoring incomplete 3rd party AppID module ({name}): {reason}")]
    ModuleRejected {
        /// 模块名称
        name: String,
        /// 拒绝原因
        reason: String,
    },

    /// 模块目录中不存在该模块
    #[error("Unknown 3rd party AppID module: {name}")]
    ModuleNotFound {
        /// 模块名称
        name: String,
    },

    /// 模块初始化失败
    #[error("Unable to initialize 3rd party AppID module ({code})")]
    ModuleInit {
        /// 模块返回的状态码
        code: i32,
    },

    /// 模块重新配置失败
    #[error("Unable to reconfigure 3rd party AppID module ({code})")]
    ModuleReconfigure {
        /// 模块返回的状态码
        code: i32,
    },

    /// 模块终止失败
    #[error("Could not finalize 3rd party AppID module ({code})")]
    ModuleFini {
        /// 模块返回的状态码
        code: i32,
    },

    /// 没有已加载的模块
    #[error("No 3rd party AppID module is loaded")]
    ModuleNotLoaded,

    /// 无法为流分配分类器会话
    #[error("Could not allocate 3rd party session data")]
    SessionAllocation,

    /// 配置错误
    #[error("Configuration error: {message}")]
    ConfigError {
        /// 错误消息
        message: String,
    },

    /// 地址解析错误
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// 内部错误
    #[error("Internal error: {message}")]
    InternalError {
        /// 错误消息
        message: String,
    },
}

impl AppIdError {
    /// 创建模块拒绝错误
    pub fn module_rejected<S1, S2>(name: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::ModuleRejected {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// 创建模块重复加载错误
    pub fn module_already_loaded<S: Into<String>>(name: S) -> Self {
        Self::ModuleAlreadyLoaded { name: name.into() }
    }

    /// 创建模块不存在错误
    pub fn module_not_found<S: Into<String>>(name: S) -> Self {
        Self::ModuleNotFound { name: name.into() }
    }

    /// 创建配置错误
    pub fn config_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// 创建内部错误
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// 检查是否为致命错误
    ///
    /// 流会话分配失败意味着资源耗尽，宿主不应该掩盖它，
    /// 其余错误都只让第三方分类失效而不影响流量处理。
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SessionAllocation)
    }

    /// 检查是否为可恢复错误
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ModuleReconfigure { .. } | Self::ModuleAlreadyLoaded { .. } | Self::AddrParse(_)
        )
    }

    /// 检查是否为配置相关错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError { .. } | Self::ModuleNotFound { .. })
    }

    /// 获取错误代码
    pub fn error_code(&self) -> u32 {
        match self {
            Self::ModuleAlreadyLoaded { .. } => 2001,
            Self::ModuleRejected { .. } => 2002,
            Self::ModuleNotFound { .. } => 2003,
            Self::ModuleInit { .. } => 2004,
            Self::ModuleReconfigure { .. } => 2005,
            Self::ModuleFini { .. } => 2006,
            Self::ModuleNotLoaded => 2007,
            Self::SessionAllocation => 2101,
            Self::ConfigError { .. } => 2201,
            Self::AddrParse(_) => 2202,
            Self::InternalError { .. } => 2999,
        }
    }
}

/// 从anyhow::Error转换
impl From<anyhow::Error> for AppIdError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_error(err.to_string())
    }
}

/// 从serde_json::Error转换
impl From<serde_json::Error> for AppIdError {
    fn from(err: serde_json::Error) -> Self {
        Self::config_error(format!("JSON error: {}", err))
    }
}
