//! 发现上下文构造器
//!
//! 提供流畅的链式API来配置并创建 [`DiscoveryContext`]。

use crate::classifier::{ClassifierManager, HostUtils, ModuleCatalog, ThirdPartyModule};
use crate::config::AppIdConfig;
use crate::core::app_info::AppInfoTable;
use crate::discovery::{DiscoveryContext, UrlMatcher};
use crate::error::{AppIdError, Result};
use crate::utils::logger::AppIdDebug;
use uuid::Uuid;

/// 发现上下文构造器
///
/// # 示例
///
/// ```rust
/// use tp_appid::DiscoveryBuilder;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let context = DiscoveryBuilder::new()
///     .with_module_name("ref-impl")
///     .with_max_tp_flow_depth(8)
///     .enable_http2_detection()
///     .build()?;
/// assert!(context.manager().is_initialized());
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryBuilder {
    config: AppIdConfig,
    catalog: ModuleCatalog,
    module: Option<Box<dyn ThirdPartyModule>>,
    app_info: Option<AppInfoTable>,
    url_matcher: Option<Box<dyn UrlMatcher>>,
    debug: AppIdDebug,
    instance_id: Option<Uuid>,
    strict: bool,
}

impl Default for DiscoveryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryBuilder {
    /// 创建构造器，目录中包含内置模块
    pub fn new() -> Self {
        Self {
            config: AppIdConfig::default(),
            catalog: ModuleCatalog::with_builtin(),
            module: None,
            app_info: None,
            url_matcher: None,
            debug: AppIdDebug::new(),
            instance_id: None,
            strict: false,
        }
    }

    /// 使用完整配置
    pub fn with_config(mut self, config: AppIdConfig) -> Self {
        self.config = config;
        self
    }

    /// 按名称从目录装载模块
    pub fn with_module_name<S: Into<String>>(mut self, name: S) -> Self {
        self.config.thirdparty_module = Some(name.into());
        self
    }

    /// 直接装载一个模块，优先于目录
    pub fn with_module(mut self, module: Box<dyn ThirdPartyModule>) -> Self {
        self.module = Some(module);
        self
    }

    /// 使用自定义模块目录
    pub fn with_catalog(mut self, catalog: ModuleCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// 向目录登记模块工厂
    pub fn register_module<S, F>(mut self, name: S, factory: F) -> Self
    where
        S: Into<String>,
        F: Fn() -> Box<dyn ThirdPartyModule> + Send + Sync + 'static,
    {
        self.catalog.register(name, factory);
        self
    }

    /// 设置每个方向交给分类器的最大包数
    pub fn with_max_tp_flow_depth(mut self, depth: u16) -> Self {
        self.config.max_tp_flow_depth = depth;
        self
    }

    /// 设置RTMP/RTSP等待URL的包数
    pub fn with_rtmp_max_packets(mut self, packets: u32) -> Self {
        self.config.rtmp_max_packets = packets;
        self
    }

    /// 允许探测流量
    pub fn allow_probes(mut self) -> Self {
        self.config.tp_allow_probes = true;
        self
    }

    /// 启用HTTP/2检测
    pub fn enable_http2_detection(mut self) -> Self {
        self.config.http2_detection_enabled = true;
        self
    }

    /// 禁用FTP用户名采集
    pub fn disable_ftp_userid(mut self) -> Self {
        self.config.ftp_userid_disabled = true;
        self
    }

    /// 禁用引用应用归因
    pub fn disable_referred_appid(mut self) -> Self {
        self.config.referred_appid_disabled = true;
        self
    }

    /// 设置消息体采集上限
    pub fn with_body_collection_max(mut self, max: usize) -> Self {
        self.config.chp_body_collection_max = max;
        self
    }

    /// 禁用消息体采集
    pub fn disable_body_collection(mut self) -> Self {
        self.config.chp_body_collection_disabled = true;
        self
    }

    /// 设置XFF头部名称
    pub fn with_xff_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.xff_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// 使用自定义应用信息表
    pub fn with_app_info(mut self, app_info: AppInfoTable) -> Self {
        self.app_info = Some(app_info);
        self
    }

    /// 使用URL匹配器
    pub fn with_url_matcher<M: UrlMatcher + 'static>(mut self, matcher: M) -> Self {
        self.url_matcher = Some(Box::new(matcher));
        self
    }

    /// 使用调试开关
    pub fn with_debug(mut self, debug: AppIdDebug) -> Self {
        self.debug = debug;
        self
    }

    /// 设置实例ID，未设置时随机生成
    pub fn with_instance_id(mut self, id: Uuid) -> Self {
        self.instance_id = Some(id);
        self
    }

    /// 要求配置的模块必须成功初始化
    ///
    /// 默认情况下装载失败只会让第三方分类失效。
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// 隐私优先配置
    ///
    /// - 不采集FTP用户名
    /// - 不采集HTTP消息体
    /// - 不做引用应用归因
    pub fn privacy_first(self) -> Self {
        self.disable_ftp_userid()
            .disable_body_collection()
            .disable_referred_appid()
    }

    /// 深度检查配置
    ///
    /// 允许探测流量，启用HTTP/2检测，并加大每个方向的检查深度。
    pub fn deep_inspection(self) -> Self {
        self.allow_probes()
            .enable_http2_detection()
            .with_max_tp_flow_depth(16)
    }

    /// 构建发现上下文
    pub fn build(self) -> Result<DiscoveryContext> {
        self.config.validate()?;

        let instance_id = self.instance_id.unwrap_or_else(Uuid::new_v4);
        let host = HostUtils::new(instance_id.to_string());
        let module_requested = self.module.is_some() || self.config.module_name().is_some();

        let manager = match self.module {
            Some(module) => {
                let mut manager = ClassifierManager::with_host(host);
                if manager.load(module).is_ok() {
                    manager.initialize(&self.config).ok();
                }
                manager
            }
            None => ClassifierManager::from_config(&self.config, &self.catalog, host),
        };

        if self.strict && module_requested && !manager.is_initialized() {
            return Err(match self.config.module_name() {
                Some(name) if !self.catalog.contains(name) => AppIdError::module_not_found(name),
                _ => AppIdError::ModuleNotLoaded,
            });
        }

        let mut context = DiscoveryContext::new(self.config, manager)?
            .with_instance_id(instance_id)
            .with_debug(self.debug);
        if let Some(app_info) = self.app_info {
            context = context.with_app_info(app_info);
        }
        if let Some(matcher) = self.url_matcher {
            context.set_url_matcher(matcher);
        }
        Ok(context)
    }
}
