//! Prefix-routed CDN modules
//!
//! A specifier such as `icons/Home` matches the rule with prefix `icons/`;
//! `Home` is substituted into the rule's file and global patterns, the
//! candidates are probed across the rule's providers and the first hit is
//! loaded. Concurrent requests for one specifier share a single load.

use boa_engine::JsValue;
use futures_util::FutureExt;
use futures_util::future::{LocalBoxFuture, Shared};
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::provider::NetworkProviderService;
use super::tools::ToolsService;
use crate::config::{DynamicModuleRule, ModuleFormat, find_dynamic_rule};
use crate::error::{LoaderError, LoaderResult};
use crate::logging::LogClient;
use crate::registry::ModuleRegistry;
use crate::require::DynamicModuleLoader;

type SharedDynamicLoad = Shared<LocalBoxFuture<'static, LoaderResult<JsValue>>>;

#[derive(Clone)]
pub struct DynamicModulesService {
    providers: Rc<NetworkProviderService>,
    tools: Rc<ToolsService>,
    pending: Rc<RefCell<HashMap<String, SharedDynamicLoad>>>,
    log: Rc<dyn LogClient>,
}

impl DynamicModulesService {
    pub fn new(providers: Rc<NetworkProviderService>, tools: Rc<ToolsService>, log: Rc<dyn LogClient>) -> Self {
        Self {
            providers,
            tools,
            pending: Rc::new(RefCell::new(HashMap::new())),
            log,
        }
    }

    /// Candidate URLs for `icon` under each base.
    pub fn build_candidates(&self, rule: &DynamicModuleRule, icon: &str, bases: &[String]) -> Vec<String> {
        let package = rule.package_name();
        let version = rule
            .version
            .as_deref()
            .map(|v| format!("@{}", v))
            .unwrap_or_default();
        let file = rule.file_for(icon);
        let path_prefix = rule.path_prefix.as_deref().unwrap_or_default().trim_matches('/');
        let combined = [path_prefix, file.as_str()]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");

        let mut candidates: Vec<String> = Vec::new();
        for base in bases {
            let root = format!("{}{}{}", base, package, version);
            let urls = if combined.is_empty() {
                vec![root]
            } else {
                vec![
                    format!("{}/{}", root, combined),
                    format!("{}/umd/{}", root, combined),
                    format!("{}/dist/{}", root, combined),
                ]
            };
            for url in urls {
                if !candidates.contains(&url) {
                    candidates.push(url);
                }
            }
        }
        candidates
    }

    /// Load `name` through its matching rule and register the namespace under
    /// both the full specifier and the bare icon name.
    pub async fn load_dynamic_module(
        &self,
        name: &str,
        rules: &[DynamicModuleRule],
        registry: &ModuleRegistry,
    ) -> LoaderResult<JsValue> {
        let rule = find_dynamic_rule(rules, name)
            .ok_or_else(|| LoaderError::NoDynamicRule(name.to_string()))?
            .clone();

        let existing = self.pending.borrow().get(name).cloned();
        let shared = match existing {
            Some(shared) => shared,
            None => {
                let service = self.clone();
                let registry = registry.clone();
                let key = name.to_string();
                let shared = async move {
                    let result = service.fetch_namespace(&key, &rule, &registry).await;
                    service.pending.borrow_mut().remove(&key);
                    result
                }
                .boxed_local()
                .shared();
                self.pending
                    .borrow_mut()
                    .insert(name.to_string(), shared.clone());
                shared
            }
        };
        shared.await
    }

    async fn fetch_namespace(
        &self,
        name: &str,
        rule: &DynamicModuleRule,
        registry: &ModuleRegistry,
    ) -> LoaderResult<JsValue> {
        let icon = &name[rule.prefix.len()..];
        let bases = self.providers.rule_bases(rule);
        let candidates = self.build_candidates(rule, icon, &bases);

        let mut found = None;
        for url in &candidates {
            if self.tools.probe().probe_url(url).await {
                found = Some(url.clone());
                break;
            }
        }
        let url = found.ok_or_else(|| LoaderError::LoadFailed {
            module: name.to_string(),
            candidates: candidates.clone(),
        })?;

        let format = rule.module_format();
        let (namespace, global) = match format {
            ModuleFormat::Esm => {
                let exports = self.tools.import_esm(&url, registry).await?;
                (self.tools.create_namespace(&exports)?, None)
            }
            ModuleFormat::Global => {
                self.tools.probe().load_script(&url).await?;
                let global = rule.global_for(icon);
                let value = self
                    .tools
                    .engine()
                    .get_global(&global)
                    .ok_or_else(|| LoaderError::GlobalNotFound {
                        module: name.to_string(),
                        url: url.clone(),
                        global: global.clone(),
                    })?;
                (self.tools.create_namespace(&value)?, Some(global))
            }
        };

        registry.insert(icon, namespace.clone());
        registry.insert(name, namespace.clone());
        self.log.info(
            "dynamic-module:loaded",
            json!({ "name": icon, "url": url, "global": global, "format": format.as_str() }),
        );
        Ok(namespace)
    }
}

impl DynamicModuleLoader for DynamicModulesService {
    fn load_dynamic_module(
        &self,
        name: &str,
        rules: &[DynamicModuleRule],
        registry: &ModuleRegistry,
    ) -> LocalBoxFuture<'static, LoaderResult<JsValue>> {
        let service = self.clone();
        let name = name.to_string();
        let rules = rules.to_vec();
        let registry = registry.clone();
        async move {
            DynamicModulesService::load_dynamic_module(&service, &name, &rules, &registry).await
        }
        .boxed_local()
    }
}
