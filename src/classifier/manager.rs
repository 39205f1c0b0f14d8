//! 分类器生命周期管理
//!
//! 同一时刻最多只有一个第三方模块处于活动状态。装载、初始化、
//! 重配置和终止都从这里发起，任何失败都只让第三方分类失效。

use super::{
    EntryPoint, HostUtils, ModuleCatalog, ThirdPartyModule, THIRD_PARTY_APP_ID_API_VERSION,
};
use crate::config::{AppIdConfig, ThirdPartyConfig};
use crate::error::{AppIdError, Result};
use std::fmt;

/// 分类器管理器
pub struct ClassifierManager {
    module: Option<Box<dyn ThirdPartyModule>>,
    tp_config: Option<ThirdPartyConfig>,
    initialized: bool,
    host: HostUtils,
}

impl Default for ClassifierManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassifierManager {
    /// 创建未装载模块的管理器
    pub fn new() -> Self {
        Self::with_host(HostUtils::new("default"))
    }

    /// 使用指定的宿主工具创建管理器
    pub fn with_host(host: HostUtils) -> Self {
        Self {
            module: None,
            tp_config: None,
            initialized: false,
            host,
        }
    }

    /// 按配置从目录装载并初始化模块
    ///
    /// 未配置模块时第三方分类保持禁用；其余失败都已记录日志，
    /// 返回的管理器同样处于禁用状态。
    pub fn from_config(config: &AppIdConfig, catalog: &ModuleCatalog, host: HostUtils) -> Self {
        let mut manager = Self::with_host(host);

        let Some(name) = config.module_name() else {
            tracing::debug!("no 3rd party AppID module configured");
            return manager;
        };

        let Some(module) = catalog.create(name) else {
            tracing::error!("{}", AppIdError::module_not_found(name));
            return manager;
        };

        if manager.load(module).is_ok() {
            manager.initialize(config).ok();
        }
        manager
    }

    /// 装载模块
    ///
    /// 校验接口版本、模块名称和全部必需入口。被拒绝的模块随即被释放。
    pub fn load(&mut self, module: Box<dyn ThirdPartyModule>) -> Result<()> {
        let name = module.module_name().to_string();

        if self.module.is_some() {
            let err = AppIdError::module_already_loaded(name);
            tracing::error!("{}", err);
            return Err(err);
        }

        if let Err(err) = Self::validate(module.as_ref()) {
            tracing::error!("{}", err);
            return Err(err);
        }

        tracing::info!(module = %name, "3rd party AppID module loaded");
        self.module = Some(module);
        self.initialized = false;
        Ok(())
    }

    fn validate(module: &dyn ThirdPartyModule) -> Result<()> {
        let name = module.module_name();

        if module.api_version() != THIRD_PARTY_APP_ID_API_VERSION {
            return Err(AppIdError::module_rejected(
                name,
                format!(
                    "api version {} does not match {}",
                    module.api_version(),
                    THIRD_PARTY_APP_ID_API_VERSION
                ),
            ));
        }

        if name.is_empty() {
            return Err(AppIdError::module_rejected("", "module name is empty"));
        }

        let present = module.entry_points();
        let missing: Vec<EntryPoint> = EntryPoint::ALL
            .iter()
            .copied()
            .filter(|ep| !present.contains(ep))
            .collect();
        if !missing.is_empty() {
            return Err(AppIdError::module_rejected(
                name,
                format!("missing entry points {:?}", missing),
            ));
        }

        Ok(())
    }

    /// 初始化已装载的模块
    ///
    /// 没有模块或已经初始化时什么也不做。失败时模块被卸载。
    pub fn initialize(&mut self, config: &AppIdConfig) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        let Some(module) = self.module.as_mut() else {
            return Ok(());
        };

        let tp_config = match config.thirdparty_config() {
            Ok(tp_config) => tp_config,
            Err(err) => {
                tracing::error!("{}", err);
                self.module = None;
                return Err(err);
            }
        };

        match module.init(&tp_config, &self.host) {
            Ok(()) => {
                tracing::info!(module = module.module_name(), "3rd party AppID module initialized");
                self.tp_config = Some(tp_config);
                self.initialized = true;
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    AppIdError::ModuleInit { .. } => err,
                    other => {
                        tracing::debug!("init status: {}", other);
                        AppIdError::ModuleInit { code: -1 }
                    }
                };
                tracing::error!("{}", err);
                self.module = None;
                Err(err)
            }
        }
    }

    /// 替换模块的运行参数
    ///
    /// 失败时记录日志并保留原配置，模块保持装载。
    pub fn reconfigure(&mut self, config: &AppIdConfig) -> Result<()> {
        let Some(module) = self.module.as_mut() else {
            return Ok(());
        };

        let tp_config = config.thirdparty_config().map_err(|err| {
            tracing::error!("{}", err);
            err
        })?;

        match module.reconfigure(&tp_config) {
            Ok(()) => {
                tracing::info!(module = module.module_name(), "3rd party AppID module reconfigured");
                self.tp_config = Some(tp_config);
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    AppIdError::ModuleReconfigure { .. } => err,
                    _ => AppIdError::ModuleReconfigure { code: -1 },
                };
                tracing::error!("{}", err);
                Err(err)
            }
        }
    }

    /// 终止并卸载模块，只生效一次
    pub fn finalize(&mut self) -> Result<()> {
        let Some(mut module) = self.module.take() else {
            return Ok(());
        };
        self.tp_config = None;
        self.initialized = false;

        let result = module.fini().map_err(|err| match err {
            AppIdError::ModuleFini { .. } => err,
            _ => AppIdError::ModuleFini { code: -1 },
        });
        match &result {
            Ok(()) => tracing::info!(module = module.module_name(), "3rd party AppID module finalized"),
            Err(err) => tracing::error!("{}", err),
        }
        result
    }

    /// 处于活动状态的模块
    ///
    /// 只有初始化成功的模块才是活动的；已装载但未初始化时返回 `None`。
    pub fn module(&self) -> Option<&dyn ThirdPartyModule> {
        if self.initialized {
            self.module.as_deref()
        } else {
            None
        }
    }

    /// 是否有已装载的模块
    pub fn is_loaded(&self) -> bool {
        self.module.is_some()
    }

    /// 模块是否已初始化
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// 模块名称
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_deref().map(|m| m.module_name())
    }

    /// 生效中的模块配置
    pub fn tp_config(&self) -> Option<&ThirdPartyConfig> {
        self.tp_config.as_ref()
    }

    /// 宿主工具
    pub fn host(&self) -> &HostUtils {
        &self.host
    }
}

impl Drop for ClassifierManager {
    fn drop(&mut self) {
        if self.module.is_some() {
            let _ = self.finalize();
        }
    }
}

impl fmt::Debug for ClassifierManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierManager")
            .field("module", &self.module_name())
            .field("initialized", &self.initialized)
            .field("host", &self.host)
            .finish()
    }
}
