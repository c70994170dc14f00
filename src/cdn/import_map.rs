//! Import map for the configured CDN modules

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::resolver::NetworkModuleResolver;
use crate::config::{BootstrapConfig, ModuleSpec};
use crate::document::{Document, ElementId};
use crate::error::{LoaderError, LoaderResult};
use crate::logging::LogClient;

/// Attribute marking the page's import map element.
pub const IMPORT_MAP_ATTRIBUTE: &str = "data-rwtra-importmap";

/// `{"imports": {specifier: url}}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMap {
    pub imports: BTreeMap<String, String>,
}

impl ImportMap {
    /// Map every import specifier of each module to its resolved URL.
    pub fn from_modules<'a>(modules: impl IntoIterator<Item = (&'a ModuleSpec, &'a str)>) -> Self {
        let mut imports = BTreeMap::new();
        for (module, url) in modules {
            for specifier in module.specifiers() {
                imports.insert(specifier.to_string(), url.to_string());
            }
        }
        Self { imports }
    }

    pub fn get(&self, specifier: &str) -> Option<&str> {
        self.imports.get(specifier).map(String::as_str)
    }

    pub fn to_json_pretty(&self) -> LoaderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Write `map` into `script[data-rwtra-importmap]`, creating the element
/// when the head has none.
pub fn write_import_map(document: Option<&dyn Document>, map: &ImportMap) -> LoaderResult<ElementId> {
    let document = document
        .ok_or_else(|| LoaderError::DocumentUnavailable("writing the import map".to_string()))?;
    let selector = format!("script[{}]", IMPORT_MAP_ATTRIBUTE);
    let element = match document.query_selector(&selector) {
        Some(element) => element,
        None => {
            let element = document.create_element("script");
            document.set_attribute(element, "type", "importmap");
            document.set_attribute(element, IMPORT_MAP_ATTRIBUTE, "");
            document.append_to_head(element);
            element
        }
    };
    document.set_text_content(element, &map.to_json_pretty()?);
    Ok(element)
}

pub struct ImportMapService {
    resolver: Rc<NetworkModuleResolver>,
    log: Rc<dyn LogClient>,
}

impl ImportMapService {
    pub fn new(resolver: Rc<NetworkModuleResolver>, log: Rc<dyn LogClient>) -> Self {
        Self { resolver, log }
    }

    /// Apply the config's providers, resolve every module URL and build the
    /// map. Resolved URLs are stored back on the modules so later loads skip
    /// probing.
    pub async fn build_import_map(&self, config: &mut BootstrapConfig) -> LoaderResult<ImportMap> {
        self.resolver.providers().apply_config(config);
        for module in config.modules.iter_mut() {
            let url = self.resolver.resolve_module_url(module).await?;
            module.url = Some(url);
        }
        let map = ImportMap::from_modules(
            config
                .modules
                .iter()
                .map(|m| (m, m.url.as_deref().unwrap_or_default())),
        );
        self.log
            .info("importmap:ready", json!({ "imports": map.imports.len() }));
        Ok(map)
    }

    /// Build the map and write it into the document.
    pub async fn initialize(
        &self,
        config: &mut BootstrapConfig,
        document: Option<&dyn Document>,
    ) -> LoaderResult<ImportMap> {
        let map = self.build_import_map(config).await?;
        write_import_map(document, &map)?;
        Ok(map)
    }
}
