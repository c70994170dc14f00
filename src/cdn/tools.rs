//! CDN `tools` and `modules`
//!
//! Tools are classic scripts loaded for the global they define. Modules are
//! either classic scripts read back from their global, or ES modules whose
//! exports are used directly. Both end up as namespace objects in the
//! [`ModuleRegistry`].

use boa_engine::JsValue;
use futures_util::future::try_join_all;
use serde_json::json;
use std::collections::HashMap;
use std::rc::Rc;

use super::probe::NetworkProbeService;
use super::resolver::NetworkModuleResolver;
use super::script_filename;
use crate::compiler::TsxCompiler;
use crate::config::{ModuleFormat, ModuleSpec};
use crate::engine::{same_value, ScriptEngine};
use crate::error::{LoaderError, LoaderResult};
use crate::logging::LogClient;
use crate::registry::ModuleRegistry;
use crate::require::{RequireBuilder, RequireOptions};

pub struct ToolsService {
    resolver: Rc<NetworkModuleResolver>,
    compiler: Rc<TsxCompiler>,
    log: Rc<dyn LogClient>,
}

impl ToolsService {
    pub fn new(
        resolver: Rc<NetworkModuleResolver>,
        compiler: Rc<TsxCompiler>,
        log: Rc<dyn LogClient>,
    ) -> Self {
        Self {
            resolver,
            compiler,
            log,
        }
    }

    pub(crate) fn probe(&self) -> &Rc<NetworkProbeService> {
        self.resolver.probe()
    }

    pub(crate) fn engine(&self) -> &Rc<ScriptEngine> {
        self.compiler.engine()
    }

    /// Wrap a value as `{__esModule, default, ...props}`.
    pub fn create_namespace(&self, value: &JsValue) -> LoaderResult<JsValue> {
        self.engine().create_namespace(value)
    }

    /// Expose `namespace.default` as `global` unless something else already
    /// owns that name.
    pub fn ensure_global_from_namespace(&self, global: Option<&str>, namespace: &JsValue) -> LoaderResult<()> {
        let Some(global) = global.filter(|g| !g.is_empty()) else {
            return Ok(());
        };
        let default = self
            .engine()
            .get_property(namespace, "default")
            .unwrap_or_else(JsValue::undefined);
        let vacant = match self.engine().get_global(global) {
            None => true,
            Some(existing) => same_value(&existing, &default),
        };
        if vacant {
            self.engine().set_global(global, default)?;
        }
        Ok(())
    }

    fn read_global(&self, module: &ModuleSpec, url: &str) -> LoaderResult<JsValue> {
        let global = module.global.as_deref().unwrap_or_default();
        let not_found = || LoaderError::GlobalNotFound {
            module: module.name.clone(),
            url: url.to_string(),
            global: global.to_string(),
        };
        if global.is_empty() {
            return Err(not_found());
        }
        self.engine().get_global(global).ok_or_else(not_found)
    }

    /// Load every tool concurrently; the first failure fails the batch.
    pub async fn load_tools(&self, tools: &[ModuleSpec]) -> LoaderResult<()> {
        try_join_all(tools.iter().map(|tool| self.load_tool(tool))).await?;
        Ok(())
    }

    async fn load_tool(&self, tool: &ModuleSpec) -> LoaderResult<()> {
        let url = self.resolver.resolve_module_url(tool).await?;
        self.probe().load_script(&url).await?;
        self.read_global(tool, &url)?;
        self.log.info(
            "tool:loaded",
            json!({ "name": tool.name, "url": url, "global": tool.global }),
        );
        Ok(())
    }

    /// Load modules in order, registering each namespace under its name and
    /// every import specifier as soon as it is ready.
    pub async fn load_modules(
        &self,
        modules: &[ModuleSpec],
        registry: &ModuleRegistry,
    ) -> LoaderResult<HashMap<String, JsValue>> {
        let mut loaded = HashMap::new();
        for module in modules {
            let url = self.resolver.resolve_module_url(module).await?;
            let format = module.module_format();
            let namespace = match format {
                ModuleFormat::Esm => {
                    let exports = self.import_esm(&url, registry).await?;
                    let namespace = self.create_namespace(&exports)?;
                    self.ensure_global_from_namespace(module.global.as_deref(), &namespace)?;
                    namespace
                }
                ModuleFormat::Global => {
                    self.probe().load_script(&url).await?;
                    let value = self.read_global(module, &url)?;
                    self.create_namespace(&value)?
                }
            };

            registry.insert(&module.name, namespace.clone());
            for specifier in module.specifiers() {
                registry.insert(specifier, namespace.clone());
            }
            self.log.info(
                "module:loaded",
                json!({
                    "name": module.name,
                    "url": url,
                    "global": module.global,
                    "format": format.as_str(),
                }),
            );
            loaded.insert(module.name.clone(), namespace);
        }
        Ok(loaded)
    }

    /// Fetch an ES module and run it with bare imports answered from the
    /// registry.
    pub(crate) async fn import_esm(&self, url: &str, registry: &ModuleRegistry) -> LoaderResult<JsValue> {
        let source = self.probe().fetch_source(url).await?;
        let require = RequireBuilder::create(RequireOptions {
            registry: registry.clone(),
            ..Default::default()
        });
        self.compiler
            .execute_module_exports(&source, &script_filename(url), "", &require)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdn::probe::ProbeOptions;
    use crate::cdn::provider::NetworkProviderService;
    use crate::fetch::{Fetch, MemoryFetch};
    use crate::logging::RecordingLogClient;
    use crate::transpiler::Transpiler;
    use std::time::Duration;
    use url::Url;

    struct Harness {
        fetch: MemoryFetch,
        log: Rc<RecordingLogClient>,
        engine: Rc<ScriptEngine>,
        tools: ToolsService,
    }

    fn harness() -> Harness {
        let fetch = MemoryFetch::new();
        let log = Rc::new(RecordingLogClient::new());
        let engine = Rc::new(ScriptEngine::new().unwrap());
        let shared_fetch: Rc<dyn Fetch> = Rc::new(fetch.clone());
        let providers = Rc::new(NetworkProviderService::new(
            Url::parse("https://app.test/").unwrap(),
        ));
        let probe = Rc::new(NetworkProbeService::new(
            Some(shared_fetch.clone()),
            engine.clone(),
            ProbeOptions {
                backoff: Duration::ZERO,
                ..Default::default()
            },
            log.clone(),
        ));
        let resolver = Rc::new(NetworkModuleResolver::new(providers, probe, log.clone()));
        let compiler = Rc::new(TsxCompiler::new(
            engine.clone(),
            Some(Rc::new(Transpiler::new())),
            Some(shared_fetch),
            log.clone(),
        ));
        let tools = ToolsService::new(resolver, compiler, log.clone());
        Harness {
            fetch,
            log,
            engine,
            tools,
        }
    }

    fn global_module(name: &str, url: &str, global: &str) -> ModuleSpec {
        ModuleSpec {
            name: name.to_string(),
            url: Some(url.to_string()),
            global: Some(global.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_tools() {
        let h = harness();
        h.fetch.insert("https://cdn.test/marked.js", "globalThis.marked = { parse: (s) => s };");
        h.fetch.insert("https://cdn.test/dayjs.js", "globalThis.dayjs = function dayjs() {};");

        let tools = vec![
            global_module("marked", "https://cdn.test/marked.js", "marked"),
            global_module("dayjs", "https://cdn.test/dayjs.js", "dayjs"),
        ];
        h.tools.load_tools(&tools).await.unwrap();
        assert_eq!(h.log.named("tool:loaded").len(), 2);
        assert!(h.engine.get_global("marked.parse").is_some());
    }

    #[tokio::test]
    async fn test_tool_without_global_fails() {
        let h = harness();
        h.fetch.insert("https://cdn.test/quiet.js", "var unrelated = 1;");

        let tools = vec![global_module("quiet", "https://cdn.test/quiet.js", "Quiet")];
        let err = h.tools.load_tools(&tools).await.unwrap_err();
        assert_eq!(
            err,
            LoaderError::GlobalNotFound {
                module: "quiet".to_string(),
                url: "https://cdn.test/quiet.js".to_string(),
                global: "Quiet".to_string(),
            }
        );
        assert!(!h.log.has_event("tool:loaded"));
    }

    #[tokio::test]
    async fn test_load_global_module_registers_specifiers() {
        let h = harness();
        h.fetch.insert(
            "https://cdn.test/react.js",
            "globalThis.React = { version: '18', createElement() {} };",
        );
        let registry = ModuleRegistry::new();
        let mut react = global_module("react", "https://cdn.test/react.js", "React");
        react.import_specifiers = vec!["react".to_string(), "react/jsx-runtime".to_string()];

        let loaded = h.tools.load_modules(&[react], &registry).await.unwrap();
        let namespace = &loaded["react"];
        assert!(same_value(&registry.get("react/jsx-runtime").unwrap(), namespace));
        assert_eq!(
            h.engine.value_to_string(&h.engine.get_property(namespace, "version").unwrap()),
            "18"
        );
        let default = h.engine.get_property(namespace, "default").unwrap();
        assert!(same_value(&default, &h.engine.get_global("React").unwrap()));

        let event = &h.log.named("module:loaded")[0];
        assert_eq!(event.detail["format"], "global");
        assert_eq!(event.detail["global"], "React");
    }

    #[tokio::test]
    async fn test_load_esm_module_sets_global() {
        let h = harness();
        h.fetch.insert(
            "https://cdn.test/util.mjs",
            "export const twice = (n) => n * 2;\nexport default { name: 'util' };",
        );
        let registry = ModuleRegistry::new();
        let util = ModuleSpec {
            name: "util".to_string(),
            url: Some("https://cdn.test/util.mjs".to_string()),
            global: Some("Util".to_string()),
            format: Some("esm".to_string()),
            ..Default::default()
        };

        let loaded = h.tools.load_modules(&[util], &registry).await.unwrap();
        let namespace = &loaded["util"];
        assert!(h.engine.get_property(namespace, "twice").is_some());
        assert!(h.engine.get_global("Util.name").is_some());
        assert_eq!(h.log.named("module:loaded")[0].detail["format"], "esm");
    }

    #[tokio::test]
    async fn test_ensure_global_keeps_foreign_value() {
        let h = harness();
        h.engine.eval("globalThis.Taken = 'mine';").unwrap();
        let namespace = h.engine.eval("({ __esModule: true, default: 1 })").unwrap();

        h.tools
            .ensure_global_from_namespace(Some("Taken"), &namespace)
            .unwrap();
        assert_eq!(h.engine.value_to_string(&h.engine.get_global("Taken").unwrap()), "mine");

        h.tools
            .ensure_global_from_namespace(Some("Fresh"), &namespace)
            .unwrap();
        assert_eq!(h.engine.value_to_string(&h.engine.get_global("Fresh").unwrap()), "1");
    }
}
