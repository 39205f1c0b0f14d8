//! 日志模块
//!
//! 基于 tracing 的统一日志配置，以及按流过滤的应用识别调试开关。

use crate::core::packet::Packet;
use crate::error::{AppIdError, Result};
use once_cell::sync::OnceCell;
use std::net::IpAddr;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 是否启用日志
    pub enabled: bool,
    /// 日志级别
    pub level: LogLevel,
    /// 是否显示目标模块
    pub show_target: bool,
    /// 是否显示行号
    pub show_line_number: bool,
    /// 是否使用彩色输出
    pub use_colors: bool,
    /// 额外的过滤指令，例如 `tp_appid::discovery=trace`
    pub directives: Vec<String>,
    /// 输出目标
    pub target: LogTarget,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// 错误
    Error,
    /// 警告
    Warn,
    /// 信息
    Info,
    /// 调试
    Debug,
    /// 跟踪
    Trace,
}

impl LogLevel {
    /// 过滤指令中的级别名称
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// 日志输出目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// 标准输出
    Stdout,
    /// 标准错误
    Stderr,
    /// 无输出（禁用）
    None,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: LogLevel::Info,
            show_target: true,
            show_line_number: false,
            use_colors: true,
            directives: Vec::new(),
            target: LogTarget::Stdout,
        }
    }
}

impl LoggerConfig {
    /// 构造过滤器，环境变量 `RUST_LOG` 优先
    pub fn env_filter(&self) -> Result<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }

        let mut filter = EnvFilter::new(self.level.as_directive());
        for directive in &self.directives {
            let directive = directive
                .parse()
                .map_err(|e| AppIdError::config_error(format!("invalid log directive {:?}: {}", directive, e)))?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// 初始化全局日志，每个进程只生效一次
///
/// 已有其他全局订阅者时返回错误，但不会影响已安装的订阅者。
pub fn init_logger(config: LoggerConfig) -> Result<()> {
    LOGGER_INIT
        .get_or_try_init(|| {
            if !config.enabled || config.target == LogTarget::None {
                return Ok(());
            }

            let builder = tracing_subscriber::fmt()
                .with_env_filter(config.env_filter()?)
                .with_target(config.show_target)
                .with_line_number(config.show_line_number)
                .with_ansi(config.use_colors);

            let installed = match config.target {
                LogTarget::Stderr => builder.with_writer(std::io::stderr).try_init(),
                _ => builder.with_writer(std::io::stdout).try_init(),
            };
            installed.map_err(|e| AppIdError::internal_error(format!("logger: {}", e)))
        })
        .map(|_| ())
}

/// 日志是否已经初始化
pub fn is_initialized() -> bool {
    LOGGER_INIT.get().is_some()
}

/// 构建器模式的日志配置
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 创建新的配置构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置是否启用日志
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    /// 设置日志级别
    pub fn level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// 设置是否显示目标模块
    pub fn show_target(mut self, show: bool) -> Self {
        self.config.show_target = show;
        self
    }

    /// 设置是否显示行号
    pub fn show_line_number(mut self, show: bool) -> Self {
        self.config.show_line_number = show;
        self
    }

    /// 设置是否使用彩色输出
    pub fn use_colors(mut self, use_colors: bool) -> Self {
        self.config.use_colors = use_colors;
        self
    }

    /// 添加过滤指令
    pub fn directive<S: Into<String>>(mut self, directive: S) -> Self {
        self.config.directives.push(directive.into());
        self
    }

    /// 设置输出目标
    pub fn target(mut self, target: LogTarget) -> Self {
        self.config.target = target;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }

    /// 构建并初始化日志
    pub fn init(self) -> Result<()> {
        init_logger(self.config)
    }
}

/// 创建禁用日志的配置
pub fn disabled_config() -> LoggerConfig {
    LoggerConfig {
        enabled: false,
        ..Default::default()
    }
}

/// 创建开发环境的日志配置
pub fn dev_config() -> LoggerConfig {
    LoggerConfigBuilder::new()
        .level(LogLevel::Debug)
        .show_line_number(true)
        .build()
}

/// 创建生产环境的日志配置
pub fn prod_config() -> LoggerConfig {
    LoggerConfigBuilder::new()
        .level(LogLevel::Info)
        .show_target(false)
        .use_colors(false)
        .build()
}

/// 调试会话的流过滤条件，未设置的字段匹配任意值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugConstraints {
    /// 源地址
    pub src_ip: Option<IpAddr>,
    /// 源端口
    pub src_port: Option<u16>,
    /// 目的地址
    pub dst_ip: Option<IpAddr>,
    /// 目的端口
    pub dst_port: Option<u16>,
    /// 协议号
    pub protocol: Option<u8>,
}

impl DebugConstraints {
    fn matches_one_way(&self, packet: &Packet<'_>, reversed: bool) -> bool {
        let (sip, sport, dip, dport) = if reversed {
            (packet.dst_ip, packet.dst_port, packet.src_ip, packet.src_port)
        } else {
            (packet.src_ip, packet.src_port, packet.dst_ip, packet.dst_port)
        };
        self.src_ip.map_or(true, |ip| ip == sip)
            && self.src_port.map_or(true, |p| p == sport)
            && self.dst_ip.map_or(true, |ip| ip == dip)
            && self.dst_port.map_or(true, |p| p == dport)
    }

    /// 数据包是否属于被调试的流（两个方向都算）
    pub fn matches(&self, packet: &Packet<'_>) -> bool {
        self.protocol.map_or(true, |p| p == packet.protocol.number())
            && (self.matches_one_way(packet, false) || self.matches_one_way(packet, true))
    }
}

/// 应用识别调试开关
///
/// 打开后，匹配条件的流会以 `debug` 级别输出逐包决策，
/// 每行带有 `源地址 源端口 -> 目的地址 目的端口 协议` 形式的会话标签。
#[derive(Debug, Clone, Default)]
pub struct AppIdDebug {
    enabled: bool,
    constraints: DebugConstraints,
}

impl AppIdDebug {
    /// 关闭状态
    pub fn new() -> Self {
        Self::default()
    }

    /// 对所有流打开
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// 只对匹配条件的流打开
    pub fn enable_for(&mut self, constraints: DebugConstraints) {
        self.enabled = true;
        self.constraints = constraints;
    }

    /// 关闭
    pub fn disable(&mut self) {
        self.enabled = false;
        self.constraints = DebugConstraints::default();
    }

    /// 是否打开
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 数据包的会话标签，不需要调试时返回 `None`
    pub fn session_tag(&self, packet: &Packet<'_>) -> Option<String> {
        (self.enabled && self.constraints.matches(packet)).then(|| packet.to_string())
    }
}

/// 带会话标签的调试日志
#[macro_export]
macro_rules! appid_debug {
    ($tag:expr, $($arg:tt)*) => {
        if let Some(tag) = $tag {
            $crate::__tracing::debug!("AppIdDbg {} {}", tag, format_args!($($arg)*));
        }
    };
}
