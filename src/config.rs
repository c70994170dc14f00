//! `config.json` model
//!
//! Everything the bootstrap reads from the page's configuration document:
//! provider bases and aliases, CDN modules and tools, dynamic-module prefix
//! rules and the entry file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{LoaderError, LoaderResult};
use crate::fetch::{Fetch, FetchOptions};

/// Name of the configuration document relative to the origin.
pub const CONFIG_FILE: &str = "config.json";

/// Root configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootstrapConfig {
    /// Entry module compiled by the bootstrap (e.g. `main.tsx`)
    pub entry: Option<String>,
    /// Stylesheet compiled and injected before the entry runs
    pub styles: Option<String>,
    pub providers: ProvidersConfig,
    pub fallback_providers: Vec<String>,
    /// Packages exposed through the import map and loaded as modules
    pub modules: Vec<ModuleSpec>,
    /// Packages loaded only for their globals
    pub tools: Vec<ModuleSpec>,
    pub dynamic_modules: Vec<DynamicModuleRule>,
    pub ci_logging: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub default: Option<String>,
    pub aliases: BTreeMap<String, String>,
}

/// How a CDN package exposes itself once loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleFormat {
    /// A script that assigns a global
    #[default]
    Global,
    /// A module whose exports are read directly
    Esm,
}

impl ModuleFormat {
    fn parse(format: Option<&str>, kind: Option<&str>) -> Self {
        match format
            .or(kind)
            .map(|f| f.trim().to_ascii_lowercase())
            .as_deref()
        {
            Some("esm") | Some("module") => ModuleFormat::Esm,
            _ => ModuleFormat::Global,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleFormat::Global => "global",
            ModuleFormat::Esm => "esm",
        }
    }
}

/// A CDN package entry from `modules` or `tools`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleSpec {
    pub name: String,
    pub package: Option<String>,
    pub version: Option<String>,
    pub file: Option<String>,
    pub path: Option<String>,
    pub path_prefix: Option<String>,
    /// Fixed URL; skips provider resolution entirely
    pub url: Option<String>,
    pub global: Option<String>,
    pub format: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub provider: Option<String>,
    #[serde(rename = "ci_provider")]
    pub ci_provider: Option<String>,
    #[serde(rename = "production_provider")]
    pub production_provider: Option<String>,
    pub allow_js_delivr: Option<bool>,
    pub import_specifiers: Vec<String>,
}

impl ModuleSpec {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn module_format(&self) -> ModuleFormat {
        ModuleFormat::parse(self.format.as_deref(), self.kind.as_deref())
    }

    pub fn package_name(&self) -> &str {
        self.package.as_deref().unwrap_or(&self.name)
    }

    /// Fallback providers are appended unless `allowJsDelivr` is `false`.
    pub fn allows_fallbacks(&self) -> bool {
        self.allow_js_delivr != Some(false)
    }

    /// Import-map keys for this module; `[name]` when none are declared.
    pub fn specifiers(&self) -> Vec<&str> {
        if self.import_specifiers.is_empty() {
            vec![self.name.as_str()]
        } else {
            self.import_specifiers
                .iter()
                .map(|s| s.as_str())
                .filter(|s| !s.is_empty())
                .collect()
        }
    }
}

/// Prefix rule routing specifiers such as `icons/Home` to a CDN package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DynamicModuleRule {
    pub prefix: String,
    pub package: Option<String>,
    pub version: Option<String>,
    /// File inside the package, `{icon}` is replaced by the requested name
    pub file_pattern: Option<String>,
    pub path_prefix: Option<String>,
    /// Global holding the loaded value, `{icon}` is replaced as above
    pub global_pattern: Option<String>,
    pub format: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub provider: Option<String>,
    #[serde(rename = "ci_provider")]
    pub ci_provider: Option<String>,
    #[serde(rename = "production_provider")]
    pub production_provider: Option<String>,
    pub allow_js_delivr: Option<bool>,
}

impl DynamicModuleRule {
    pub fn matches(&self, name: &str) -> bool {
        !self.prefix.is_empty() && name.starts_with(&self.prefix)
    }

    pub fn module_format(&self) -> ModuleFormat {
        ModuleFormat::parse(self.format.as_deref(), self.kind.as_deref())
    }

    pub fn allows_fallbacks(&self) -> bool {
        self.allow_js_delivr != Some(false)
    }

    /// Package name: explicit, or the prefix without its trailing `/` or `/*`.
    pub fn package_name(&self) -> String {
        match &self.package {
            Some(package) => package.clone(),
            None => self
                .prefix
                .trim_end_matches('*')
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn file_for(&self, icon: &str) -> String {
        self.file_pattern
            .as_deref()
            .unwrap_or("{icon}.js")
            .replace("{icon}", icon)
    }

    pub fn global_for(&self, icon: &str) -> String {
        self.global_pattern
            .as_deref()
            .unwrap_or("{icon}")
            .replace("{icon}", icon)
    }
}

/// First rule whose prefix matches `name`.
pub fn find_dynamic_rule<'a>(rules: &'a [DynamicModuleRule], name: &str) -> Option<&'a DynamicModuleRule> {
    rules.iter().find(|rule| rule.matches(name))
}

impl BootstrapConfig {
    pub fn from_json(text: &str) -> LoaderResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Fetch and parse the configuration document.
    pub async fn load(fetch: &dyn Fetch, path: &str) -> LoaderResult<Self> {
        let response = fetch
            .fetch(path, FetchOptions::get())
            .await
            .map_err(|e| LoaderError::Config(format!("failed to fetch {}: {}", path, e)))?;
        if !response.ok() {
            return Err(LoaderError::FetchFailed {
                path: path.to_string(),
                status: response.status,
            });
        }
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetch;

    const SAMPLE: &str = r#"{
        "entry": "main.tsx",
        "styles": "styles.scss",
        "providers": {
            "default": "https://unpkg.com/",
            "aliases": { "esm": "esm.sh" }
        },
        "fallbackProviders": ["cdn.jsdelivr.net/npm"],
        "modules": [
            {
                "name": "react",
                "version": "18.3.1",
                "file": "react.development.js",
                "pathPrefix": "umd",
                "global": "React",
                "importSpecifiers": ["react", "react/jsx-runtime"]
            },
            { "name": "lodash", "url": "https://cdn.example/lodash.js", "type": "module" }
        ],
        "tools": [{ "name": "marked", "global": "marked", "ci_provider": "/proxy/" }],
        "dynamicModules": [
            { "prefix": "icons/", "package": "@icons/set", "filePattern": "{icon}.js", "allowJsDelivr": false }
        ],
        "ciLogging": true
    }"#;

    #[test]
    fn test_parse_sample_config() {
        let config = BootstrapConfig::from_json(SAMPLE).unwrap();
        assert_eq!(config.entry.as_deref(), Some("main.tsx"));
        assert_eq!(config.styles.as_deref(), Some("styles.scss"));
        assert_eq!(config.providers.aliases["esm"], "esm.sh");
        assert_eq!(config.fallback_providers, vec!["cdn.jsdelivr.net/npm"]);
        assert_eq!(config.modules[0].specifiers(), vec!["react", "react/jsx-runtime"]);
        assert_eq!(config.modules[0].path_prefix.as_deref(), Some("umd"));
        assert_eq!(config.modules[1].module_format(), ModuleFormat::Esm);
        assert_eq!(config.modules[1].specifiers(), vec!["lodash"]);
        assert_eq!(config.tools[0].ci_provider.as_deref(), Some("/proxy/"));
        assert!(!config.dynamic_modules[0].allows_fallbacks());
        assert!(config.ci_logging);
    }

    #[test]
    fn test_empty_config_defaults() {
        let config = BootstrapConfig::from_json("{}").unwrap();
        assert!(config.modules.is_empty());
        assert!(!config.ci_logging);
        assert!(BootstrapConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_dynamic_rule_patterns() {
        let rule = DynamicModuleRule {
            prefix: "icons/*".to_string(),
            global_pattern: Some("Icons.{icon}".to_string()),
            ..Default::default()
        };
        assert!(rule.matches("icons/*Home"));
        assert_eq!(rule.package_name(), "icons");
        assert_eq!(rule.file_for("Home"), "Home.js");
        assert_eq!(rule.global_for("Home"), "Icons.Home");
        assert_eq!(rule.module_format(), ModuleFormat::Global);

        let rules = vec![rule];
        assert!(find_dynamic_rule(&rules, "react").is_none());
    }

    #[tokio::test]
    async fn test_load_from_fetch() {
        let fetch = MemoryFetch::new();
        fetch.insert(CONFIG_FILE, SAMPLE);
        let config = BootstrapConfig::load(&fetch, CONFIG_FILE).await.unwrap();
        assert_eq!(config.modules.len(), 2);

        let missing = BootstrapConfig::load(&fetch, "other.json").await;
        assert!(matches!(missing, Err(LoaderError::FetchFailed { status: 404, .. })));
    }
}
