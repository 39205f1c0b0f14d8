//! 工具模块

pub mod logger;

pub use logger::{init_logger, AppIdDebug, DebugConstraints, LogLevel, LogTarget, LoggerConfig};
