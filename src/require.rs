//! Dual synchronous/asynchronous require
//!
//! [`Require::require`] only reads the registry and never performs I/O.
//! [`Require::require_async`] routes a specifier to the local loader, the
//! dynamic (CDN) loader or a plain registry lookup, and is what preloading
//! uses before a module body runs.

use boa_engine::JsValue;
use futures_util::future::LocalBoxFuture;
use std::rc::Rc;

use crate::config::{DynamicModuleRule, find_dynamic_rule};
use crate::error::{LoaderError, LoaderResult};
use crate::loader::LocalModuleLoader;
use crate::paths::{is_local_module, make_alias_key, normalize_dir};
use crate::registry::ModuleRegistry;

/// Loads specifiers matched by a dynamic-module prefix rule.
pub trait DynamicModuleLoader {
    fn load_dynamic_module(
        &self,
        name: &str,
        rules: &[DynamicModuleRule],
        registry: &ModuleRegistry,
    ) -> LocalBoxFuture<'static, LoaderResult<JsValue>>;
}

/// Inputs to [`RequireBuilder::create`]
#[derive(Clone, Default)]
pub struct RequireOptions {
    pub registry: ModuleRegistry,
    pub dynamic_modules: Vec<DynamicModuleRule>,
    pub entry_dir: String,
    pub local_module_loader: Option<Rc<LocalModuleLoader>>,
    pub dynamic_module_loader: Option<Rc<dyn DynamicModuleLoader>>,
}

pub struct RequireBuilder;

impl RequireBuilder {
    pub fn create(options: RequireOptions) -> Require {
        let entry_dir = normalize_dir(&options.entry_dir);
        Require {
            registry: options.registry,
            dynamic_modules: Rc::new(options.dynamic_modules),
            bound_dir: entry_dir.clone(),
            entry_dir,
            owner: None,
            local_loader: options.local_module_loader,
            dynamic_loader: options.dynamic_module_loader,
        }
    }
}

/// A require function bound to a registry and a directory.
///
/// Cloning is cheap; clones share the registry and loaders.
#[derive(Clone)]
pub struct Require {
    registry: ModuleRegistry,
    dynamic_modules: Rc<Vec<DynamicModuleRule>>,
    entry_dir: String,
    bound_dir: String,
    /// Loader node on whose behalf requests are made (cycle detection)
    owner: Option<String>,
    local_loader: Option<Rc<LocalModuleLoader>>,
    dynamic_loader: Option<Rc<dyn DynamicModuleLoader>>,
}

impl Require {
    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn entry_dir(&self) -> &str {
        &self.entry_dir
    }

    pub fn bound_dir(&self) -> &str {
        &self.bound_dir
    }

    pub fn dynamic_modules(&self) -> &[DynamicModuleRule] {
        &self.dynamic_modules
    }

    pub(crate) fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Same require with relative lookups defaulting to `dir`.
    pub fn bound_to(&self, dir: &str) -> Require {
        Require {
            bound_dir: normalize_dir(dir),
            ..self.clone()
        }
    }

    pub(crate) fn owned_by(&self, owner: &str) -> Require {
        Require {
            owner: Some(owner.to_string()),
            ..self.clone()
        }
    }

    /// Synchronous lookup.
    ///
    /// Local names are only looked up by their alias key for the bound
    /// directory, so `./button` from two directories never collide.
    pub fn require(&self, name: &str) -> LoaderResult<JsValue> {
        let key = if is_local_module(name) {
            make_alias_key(name, &self.bound_dir)
        } else {
            name.to_string()
        };
        self.registry
            .get(&key)
            .ok_or_else(|| LoaderError::NotYetLoaded(name.to_string()))
    }

    /// Load `name`, relative to `base_dir` (or the bound directory) when local.
    pub async fn require_async(&self, name: &str, base_dir: Option<&str>) -> LoaderResult<JsValue> {
        let base_dir = base_dir.map(normalize_dir).unwrap_or_else(|| self.bound_dir.clone());

        if is_local_module(name) {
            if let Some(value) = self.registry.get(&make_alias_key(name, &base_dir)) {
                return Ok(value);
            }
            return match &self.local_loader {
                Some(loader) => loader.load(name, &base_dir, self).await,
                None => Err(LoaderError::ModuleNotRegistered(name.to_string())),
            };
        }

        if let Some(value) = self.registry.get(name) {
            return Ok(value);
        }

        if find_dynamic_rule(&self.dynamic_modules, name).is_some() {
            if let Some(loader) = &self.dynamic_loader {
                return loader
                    .load_dynamic_module(name, &self.dynamic_modules, &self.registry)
                    .await;
            }
        }

        Err(LoaderError::ModuleNotRegistered(name.to_string()))
    }
}
