//! CDN URL resolution for `modules` and `tools` entries

use serde_json::json;
use std::rc::Rc;

use super::probe::NetworkProbeService;
use super::provider::NetworkProviderService;
use crate::config::ModuleSpec;
use crate::error::{LoaderError, LoaderResult};
use crate::logging::LogClient;

pub struct NetworkModuleResolver {
    providers: Rc<NetworkProviderService>,
    probe: Rc<NetworkProbeService>,
    log: Rc<dyn LogClient>,
}

impl NetworkModuleResolver {
    pub fn new(
        providers: Rc<NetworkProviderService>,
        probe: Rc<NetworkProbeService>,
        log: Rc<dyn LogClient>,
    ) -> Self {
        Self {
            providers,
            probe,
            log,
        }
    }

    pub fn providers(&self) -> &Rc<NetworkProviderService> {
        &self.providers
    }

    pub fn probe(&self) -> &Rc<NetworkProbeService> {
        &self.probe
    }

    /// Every URL worth probing for `module`, best first.
    ///
    /// Per base: `pkg@version/path` when a path is given, otherwise the
    /// `pathPrefix/file` combination at the package root, under `umd/` and
    /// under `dist/`; the bare package root when neither is given.
    pub fn module_candidates(&self, module: &ModuleSpec) -> Vec<String> {
        let package = module.package_name();
        let version = module
            .version
            .as_deref()
            .map(|v| format!("@{}", v))
            .unwrap_or_default();
        let file = module.file.as_deref().unwrap_or_default().trim_start_matches('/');
        let path_prefix = module.path_prefix.as_deref().unwrap_or_default().trim_matches('/');
        let explicit_path = module.path.as_deref().unwrap_or_default().trim_start_matches('/');
        let combined = [path_prefix, file]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/");

        let mut candidates: Vec<String> = Vec::new();
        let mut push = |url: String| {
            if !candidates.contains(&url) {
                candidates.push(url);
            }
        };
        for base in self.providers.collect_bases(module) {
            let root = format!("{}{}{}", base, package, version);
            if !explicit_path.is_empty() {
                push(format!("{}/{}", root, explicit_path));
            } else if !combined.is_empty() {
                push(format!("{}/{}", root, combined));
                push(format!("{}/umd/{}", root, combined));
                push(format!("{}/dist/{}", root, combined));
            } else {
                push(root);
            }
        }
        candidates
    }

    /// The module's fixed `url`, or the first candidate that probes OK.
    pub async fn resolve_module_url(&self, module: &ModuleSpec) -> LoaderResult<String> {
        if let Some(url) = module.url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }

        let candidates = self.module_candidates(module);
        for url in &candidates {
            if self.probe.probe_url(url).await {
                self.log
                    .info("resolve:success", json!({ "name": module.name, "url": url }));
                return Ok(url.clone());
            }
        }

        self.log
            .warn("resolve:fail", json!({ "name": module.name, "tried": candidates }));
        Err(LoaderError::LoadFailed {
            module: module.name.clone(),
            candidates,
        })
    }
}
