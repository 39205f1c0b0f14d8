//! 模块目录
//!
//! 按名称登记可装载的分类模块工厂，配置中的模块名称在这里解析。

use super::ThirdPartyModule;
use std::collections::HashMap;
use std::fmt;

type ModuleFactory = Box<dyn Fn() -> Box<dyn ThirdPartyModule> + Send + Sync>;

/// 模块目录
#[derive(Default)]
pub struct ModuleCatalog {
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    /// 创建空目录
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建包含内置模块的目录
    pub fn with_builtin() -> Self {
        #[allow(unused_mut)]
        let mut catalog = Self::new();
        #[cfg(feature = "reference-classifier")]
        catalog.register(super::reference::MODULE_NAME, || {
            Box::new(super::reference::ReferenceClassifier::new())
        });
        catalog
    }

    /// 登记模块工厂，同名登记会覆盖旧的工厂
    pub fn register<S, F>(&mut self, name: S, factory: F)
    where
        S: Into<String>,
        F: Fn() -> Box<dyn ThirdPartyModule> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// 按名称创建模块
    pub fn create(&self, name: &str) -> Option<Box<dyn ThirdPartyModule>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// 是否登记了该名称
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 已登记的名称
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("modules", &self.names())
            .finish()
    }
}
