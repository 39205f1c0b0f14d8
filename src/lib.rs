//! # tp_appid: 第三方应用识别
//!
//! 把可插拔的第三方分类引擎接入按流的应用识别流程：
//! 管理分类模块的生命周期，逐包决定是否调用分类器，把分类器返回的
//! 协议证据融合进流会话记录，并在合适的时候终止对一条流的检查。
//!
//! ## 特性
//!
//! - **单一活动模块**: 装载时校验接口版本、名称和全部入口，失败时自动降级为不分类
//! - **所有权安全**: 分类器会话按值交还，不会被释放两次
//! - **字段融合**: HTTP/SPDY、RTMP/RTSP、TLS、FTP 证据按固定顺序合并
//! - **终止策略**: 按检查深度或HTTP重新检查结果停止接入
//! - **内置参考分类器**: `ref-impl`，无需外部模块即可端到端运行
//!
//! ## 快速开始
//!
//! 用 [`DiscoveryBuilder`] 创建上下文，然后对每个数据包调用
//! [`DiscoveryContext::process_packet`]。

#![deny(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

// 核心模块
pub mod core;
pub mod error;

// 配置
pub mod config;

// 工具模块
pub mod utils;

// 功能模块
pub mod classifier;
pub mod discovery;

// 构造器
pub mod builder;

// 重新导出核心类型
pub use crate::core::{
    app_id::AppId,
    attributes::AttributeData,
    packet::{Direction, IpProtocol, Packet, StreamOrder},
    session::{FlowSession, SessionFlag},
};

pub use crate::builder::DiscoveryBuilder;
pub use crate::classifier::{ClassifierManager, ModuleCatalog, ThirdPartyModule};
pub use crate::config::AppIdConfig;
pub use crate::discovery::{DiscoveryContext, DiscoveryStats};
pub use crate::error::{AppIdError, Result};

#[cfg(feature = "reference-classifier")]
pub use crate::classifier::reference::ReferenceClassifier;

#[doc(hidden)]
pub use tracing as __tracing;

/// 库版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 库描述
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
