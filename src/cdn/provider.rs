//! CDN provider bases
//!
//! Turns provider names, aliases and the ci/production provider pair of a
//! module entry into an ordered list of base URLs to probe.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use url::Url;

use crate::config::{BootstrapConfig, DynamicModuleRule, ModuleSpec};

pub const DEFAULT_PROVIDER_BASE: &str = "https://unpkg.com/";
pub const DEFAULT_FALLBACK_PROVIDERS: [&str; 2] = ["https://unpkg.com/", "https://cdn.jsdelivr.net/npm/"];

/// Environment override for [`ProxyMode`].
pub const PROXY_MODE_ENV: &str = "RWTRA_PROXY_MODE";

/// Which of a module's dual providers to prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// `ci_provider` on localhost, `production_provider` elsewhere
    #[default]
    Auto,
    Proxy,
    Direct,
}

impl ProxyMode {
    pub fn parse(mode: Option<&str>) -> Self {
        match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            Some("proxy") => ProxyMode::Proxy,
            Some("direct") => ProxyMode::Direct,
            _ => ProxyMode::Auto,
        }
    }
}

/// Provider fields shared by CDN module entries and dynamic-module rules.
pub trait ProviderFields {
    fn provider(&self) -> Option<&str>;
    fn ci_provider(&self) -> Option<&str>;
    fn production_provider(&self) -> Option<&str>;
    fn allows_fallbacks(&self) -> bool;
}

impl ProviderFields for ModuleSpec {
    fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    fn ci_provider(&self) -> Option<&str> {
        self.ci_provider.as_deref()
    }

    fn production_provider(&self) -> Option<&str> {
        self.production_provider.as_deref()
    }

    fn allows_fallbacks(&self) -> bool {
        ModuleSpec::allows_fallbacks(self)
    }
}

impl ProviderFields for DynamicModuleRule {
    fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    fn ci_provider(&self) -> Option<&str> {
        self.ci_provider.as_deref()
    }

    fn production_provider(&self) -> Option<&str> {
        self.production_provider.as_deref()
    }

    fn allows_fallbacks(&self) -> bool {
        DynamicModuleRule::allows_fallbacks(self)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Normalize a provider without alias lookup.
///
/// Rooted paths and full URLs keep their form; bare names such as
/// `cdn.jsdelivr.net/npm` get `https://`. The result always ends in `/`.
pub fn normalize_provider_base_raw(provider: &str) -> String {
    let provider = provider.trim();
    if provider.is_empty() {
        return String::new();
    }
    let base = if provider.starts_with('/')
        || provider.starts_with("http://")
        || provider.starts_with("https://")
    {
        provider.to_string()
    } else {
        format!("https://{}", provider.trim_end_matches('/'))
    };
    if base.ends_with('/') {
        base
    } else {
        format!("{}/", base)
    }
}

pub struct NetworkProviderService {
    origin: Url,
    default_base: RefCell<String>,
    fallback_providers: RefCell<Vec<String>>,
    aliases: RefCell<BTreeMap<String, String>>,
    proxy_mode: Cell<ProxyMode>,
}

impl NetworkProviderService {
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            default_base: RefCell::new(DEFAULT_PROVIDER_BASE.to_string()),
            fallback_providers: RefCell::new(default_fallbacks()),
            aliases: RefCell::new(BTreeMap::new()),
            proxy_mode: Cell::new(ProxyMode::Auto),
        }
    }

    /// Apply `fallbackProviders`, `providers.default` and `providers.aliases`.
    pub fn apply_config(&self, config: &BootstrapConfig) {
        self.set_provider_aliases(&config.providers.aliases);
        self.set_fallback_providers(&config.fallback_providers);
        if let Some(default) = &config.providers.default {
            self.set_default_provider_base(default);
        }
    }

    /// Replace the fallback list; an empty list restores the defaults.
    pub fn set_fallback_providers(&self, providers: &[String]) {
        let normalized: Vec<String> = providers
            .iter()
            .map(|p| self.normalize_provider_base(p))
            .filter(|p| !p.is_empty())
            .collect();
        *self.fallback_providers.borrow_mut() = if normalized.is_empty() {
            default_fallbacks()
        } else {
            normalized
        };
    }

    pub fn fallback_providers(&self) -> Vec<String> {
        self.fallback_providers.borrow().clone()
    }

    pub fn set_default_provider_base(&self, provider: &str) {
        let normalized = normalize_provider_base_raw(provider);
        if !normalized.is_empty() {
            *self.default_base.borrow_mut() = normalized;
        }
    }

    pub fn default_provider_base(&self) -> String {
        self.default_base.borrow().clone()
    }

    pub fn set_provider_aliases(&self, aliases: &BTreeMap<String, String>) {
        *self.aliases.borrow_mut() = aliases
            .iter()
            .filter(|(alias, value)| !alias.is_empty() && !value.is_empty())
            .map(|(alias, value)| (alias.clone(), normalize_provider_base_raw(value)))
            .collect();
    }

    pub fn set_proxy_mode(&self, mode: ProxyMode) {
        self.proxy_mode.set(mode);
    }

    /// Explicit mode first, then `RWTRA_PROXY_MODE`, else `Auto`.
    pub fn proxy_mode(&self) -> ProxyMode {
        match self.proxy_mode.get() {
            ProxyMode::Auto => ProxyMode::parse(std::env::var(PROXY_MODE_ENV).ok().as_deref()),
            explicit => explicit,
        }
    }

    pub fn is_ci_like_host(&self) -> bool {
        matches!(self.origin.host_str(), Some("localhost") | Some("127.0.0.1"))
    }

    /// Alias lookup, then raw normalization.
    pub fn normalize_provider_base(&self, provider: &str) -> String {
        if let Some(alias) = self.aliases.borrow().get(provider.trim()) {
            return alias.clone();
        }
        normalize_provider_base_raw(provider)
    }

    /// Primary provider for a module entry.
    pub fn resolve_provider(&self, module: &dyn ProviderFields) -> String {
        let ci = non_empty(module.ci_provider());
        let production = non_empty(module.production_provider());
        if ci.is_some() || production.is_some() {
            let prefer_proxy = match self.proxy_mode() {
                ProxyMode::Proxy => true,
                ProxyMode::Direct => false,
                ProxyMode::Auto => self.is_ci_like_host(),
            };
            let choice = if prefer_proxy {
                ci.or(production)
            } else {
                production.or(ci)
            };
            return choice.unwrap_or_default().to_string();
        }
        non_empty(module.provider())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_provider_base())
    }

    /// Ordered, de-duplicated bases for a CDN module entry.
    pub fn collect_bases(&self, module: &dyn ProviderFields) -> Vec<String> {
        let mut bases = Vec::new();
        let primary = self.resolve_provider(module);
        self.add_base(&mut bases, Some(&primary));
        self.add_base(&mut bases, module.provider());
        self.add_base(&mut bases, module.ci_provider());
        self.add_base(&mut bases, module.production_provider());
        if module.allows_fallbacks() {
            for fallback in self.fallback_providers() {
                self.add_base(&mut bases, Some(&fallback));
            }
        }
        bases
    }

    /// Bases for a dynamic-module rule; localhost origins try `ci_provider`
    /// first, others `production_provider`.
    pub fn rule_bases(&self, rule: &dyn ProviderFields) -> Vec<String> {
        let mut bases = Vec::new();
        let order = if self.is_ci_like_host() {
            [rule.ci_provider(), rule.provider(), rule.production_provider()]
        } else {
            [rule.production_provider(), rule.provider(), rule.ci_provider()]
        };
        for provider in order {
            self.add_base(&mut bases, provider);
        }
        if bases.is_empty() {
            let default = self.default_provider_base();
            self.add_base(&mut bases, Some(&default));
        }
        if rule.allows_fallbacks() {
            for fallback in self.fallback_providers() {
                self.add_base(&mut bases, Some(&fallback));
            }
        }
        bases
    }

    fn add_base(&self, bases: &mut Vec<String>, provider: Option<&str>) {
        let Some(provider) = non_empty(provider) else {
            return;
        };
        let normalized = self.normalize_provider_base(provider);
        if !normalized.is_empty() && !bases.contains(&normalized) {
            bases.push(normalized);
        }
    }
}

fn default_fallbacks() -> Vec<String> {
    DEFAULT_FALLBACK_PROVIDERS.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(origin: &str) -> NetworkProviderService {
        NetworkProviderService::new(Url::parse(origin).unwrap())
    }

    #[test]
    fn test_normalize_provider_base_raw() {
        assert_eq!(normalize_provider_base_raw("esm.sh"), "https://esm.sh/");
        assert_eq!(normalize_provider_base_raw("cdn.jsdelivr.net/npm/"), "https://cdn.jsdelivr.net/npm/");
        assert_eq!(normalize_provider_base_raw("http://local:8080"), "http://local:8080/");
        assert_eq!(normalize_provider_base_raw("/proxy/unpkg"), "/proxy/unpkg/");
        assert_eq!(normalize_provider_base_raw("  "), "");
    }

    #[test]
    fn test_aliases_and_fallbacks() {
        let providers = service("https://app.example/");
        let mut aliases = BTreeMap::new();
        aliases.insert("jsd".to_string(), "cdn.jsdelivr.net/npm".to_string());
        providers.set_provider_aliases(&aliases);

        assert_eq!(providers.normalize_provider_base("jsd"), "https://cdn.jsdelivr.net/npm/");
        providers.set_fallback_providers(&["jsd".to_string(), "".to_string()]);
        assert_eq!(providers.fallback_providers(), vec!["https://cdn.jsdelivr.net/npm/"]);

        providers.set_fallback_providers(&[]);
        assert_eq!(providers.fallback_providers().len(), DEFAULT_FALLBACK_PROVIDERS.len());
    }

    #[test]
    fn test_apply_config() {
        let providers = service("https://app.example/");
        let config = BootstrapConfig::from_json(
            r#"{
                "providers": { "default": "esm.sh", "aliases": { "jsd": "cdn.jsdelivr.net/npm" } },
                "fallbackProviders": ["jsd"]
            }"#,
        )
        .unwrap();
        providers.apply_config(&config);
        assert_eq!(providers.default_provider_base(), "https://esm.sh/");
        assert_eq!(providers.fallback_providers(), vec!["https://cdn.jsdelivr.net/npm/"]);
    }

    #[test]
    fn test_collect_bases_order() {
        let providers = service("https://app.example/");
        providers.set_proxy_mode(ProxyMode::Direct);
        let module = ModuleSpec {
            name: "react".to_string(),
            ci_provider: Some("/proxy/".to_string()),
            production_provider: Some("esm.sh".to_string()),
            ..Default::default()
        };
        assert_eq!(
            providers.collect_bases(&module),
            vec![
                "https://esm.sh/",
                "/proxy/",
                "https://unpkg.com/",
                "https://cdn.jsdelivr.net/npm/"
            ]
        );

        providers.set_proxy_mode(ProxyMode::Proxy);
        assert_eq!(providers.resolve_provider(&module), "/proxy/");

        let no_fallbacks = ModuleSpec {
            name: "x".to_string(),
            allow_js_delivr: Some(false),
            ..Default::default()
        };
        assert_eq!(providers.collect_bases(&no_fallbacks), vec!["https://unpkg.com/"]);
    }

    #[test]
    fn test_rule_bases_prefer_ci_on_localhost() {
        let rule = DynamicModuleRule {
            prefix: "icons/".to_string(),
            ci_provider: Some("/proxy/".to_string()),
            production_provider: Some("esm.sh".to_string()),
            allow_js_delivr: Some(false),
            ..Default::default()
        };
        let local = service("http://localhost:4173/");
        assert!(local.is_ci_like_host());
        assert_eq!(local.rule_bases(&rule), vec!["/proxy/", "https://esm.sh/"]);

        let remote = service("https://app.example/");
        assert_eq!(remote.rule_bases(&rule), vec!["https://esm.sh/", "/proxy/"]);
    }
}
