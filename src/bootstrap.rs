//! Bootstrap
//!
//! Assembles the engine, compilers, loaders and CDN services around one
//! registry and drives the startup sequence:
//!
//! 1. apply `config.json` provider settings and CI logging
//! 2. resolve module URLs and write the import map
//! 3. load tools, then the configured stylesheet, then modules
//! 4. compile the entry module with a require bound to its directory

use boa_engine::JsValue;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use url::Url;

use crate::cdn::{
    DynamicModulesService, ImportMap, ImportMapService, NetworkModuleResolver, NetworkProbeService,
    NetworkProviderService, ProbeOptions, ToolsService,
};
use crate::compiler::{SassEngine, ScssCompiler, TsxCompiler};
use crate::config::{BootstrapConfig, CONFIG_FILE};
use crate::document::{Document, HeadDocument};
use crate::engine::ScriptEngine;
use crate::error::{LoaderError, LoaderResult};
use crate::fetch::{DirFetch, Fetch, HttpFetch};
use crate::loader::LocalModuleService;
use crate::logging::{LogClient, LogCrateClient, detect_ci_logging};
use crate::registry::ModuleRegistry;
use crate::require::{Require, RequireBuilder, RequireOptions};
use crate::transpiler::{Transpile, Transpiler, TranspilerConfig};

/// Entry file used when `config.json` names none.
pub const DEFAULT_ENTRY: &str = "main.tsx";

/// Everything the bootstrap needs from its host
#[derive(Clone)]
pub struct RuntimeOptions {
    /// Page origin; relative fetches and CI host detection use it
    pub origin: Url,
    pub fetch: Option<Rc<dyn Fetch>>,
    pub document: Option<Rc<dyn Document>>,
    /// `None` leaves the TSX backend without a transpiler
    pub transpiler_config: Option<TranspilerConfig>,
    /// `None` leaves the SCSS backend without a compiler
    pub sass_engine: Option<SassEngine>,
    pub probe: ProbeOptions,
    /// Forces CI logging on or off instead of detecting it
    pub ci_logging: Option<bool>,
    /// Event sink; defaults to a [`LogCrateClient`]
    pub log: Option<Rc<dyn LogClient>>,
}

impl RuntimeOptions {
    /// HTTP fetch against `origin`, an in-memory head, oxc and grass.
    pub fn new(origin: Url) -> Self {
        Self {
            fetch: Some(Rc::new(HttpFetch::new(origin.clone()))),
            document: Some(Rc::new(HeadDocument::new())),
            transpiler_config: Some(TranspilerConfig::default()),
            sass_engine: Some(SassEngine::grass()),
            probe: ProbeOptions::default(),
            ci_logging: None,
            log: None,
            origin,
        }
    }

    /// Serve local files from `root`; absolute CDN URLs still go over HTTP.
    pub fn for_directory(root: impl AsRef<Path>, origin: Url) -> Self {
        let fetch = DirFetch::new(root).with_remote(HttpFetch::new(origin.clone()));
        Self::new(origin).with_fetch(Rc::new(fetch))
    }

    pub fn with_fetch(mut self, fetch: Rc<dyn Fetch>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn with_document(mut self, document: Rc<dyn Document>) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_log(mut self, log: Rc<dyn LogClient>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_probe_options(mut self, probe: ProbeOptions) -> Self {
        self.probe = probe;
        self
    }
}

/// Result of a completed bootstrap
#[derive(Debug)]
pub struct BootstrapOutput {
    /// The configuration with every module URL resolved
    pub config: BootstrapConfig,
    pub import_map: ImportMap,
    pub modules: HashMap<String, JsValue>,
    /// The entry module's default export, or its exports object
    pub exports: JsValue,
}

/// Directory part of an entry path, `""` for files at the root.
pub fn determine_entry_dir(entry_file: &str) -> String {
    match entry_file.rfind('/') {
        Some(idx) => entry_file[..idx].trim_start_matches('/').to_string(),
        None => String::new(),
    }
}

pub struct Bootstrap {
    origin: Url,
    fetch: Option<Rc<dyn Fetch>>,
    document: Option<Rc<dyn Document>>,
    log: Rc<dyn LogClient>,
    ci_switch: Option<Rc<LogCrateClient>>,
    ci_override: Option<bool>,
    registry: ModuleRegistry,
    engine: Rc<ScriptEngine>,
    compiler: Rc<TsxCompiler>,
    styles: Rc<ScssCompiler>,
    local: LocalModuleService,
    providers: Rc<NetworkProviderService>,
    tools: Rc<ToolsService>,
    dynamic: DynamicModulesService,
    import_maps: ImportMapService,
}

impl Bootstrap {
    pub fn new(options: RuntimeOptions) -> LoaderResult<Self> {
        let (log, ci_switch): (Rc<dyn LogClient>, Option<Rc<LogCrateClient>>) = match options.log {
            Some(log) => (log, None),
            None => {
                let client = Rc::new(LogCrateClient::new(false));
                (client.clone(), Some(client))
            }
        };

        let engine = Rc::new(ScriptEngine::new()?);
        let transpiler = options
            .transpiler_config
            .map(|config| Rc::new(Transpiler::with_config(config)) as Rc<dyn Transpile>);
        let compiler = Rc::new(TsxCompiler::new(
            engine.clone(),
            transpiler,
            options.fetch.clone(),
            log.clone(),
        ));
        let styles = Rc::new(ScssCompiler::new(
            options.fetch.clone(),
            options.document.clone(),
            options.sass_engine,
            log.clone(),
        ));
        let local = LocalModuleService::new(
            options.origin.clone(),
            options.fetch.clone(),
            compiler.clone(),
            Some(styles.clone()),
            log.clone(),
        );

        let providers = Rc::new(NetworkProviderService::new(options.origin.clone()));
        let probe = Rc::new(NetworkProbeService::new(
            options.fetch.clone(),
            engine.clone(),
            options.probe,
            log.clone(),
        ));
        let resolver = Rc::new(NetworkModuleResolver::new(
            providers.clone(),
            probe,
            log.clone(),
        ));
        let tools = Rc::new(ToolsService::new(resolver.clone(), compiler.clone(), log.clone()));
        let dynamic = DynamicModulesService::new(providers.clone(), tools.clone(), log.clone());
        let import_maps = ImportMapService::new(resolver, log.clone());

        Ok(Self {
            origin: options.origin,
            fetch: options.fetch,
            document: options.document,
            log,
            ci_switch,
            ci_override: options.ci_logging,
            registry: ModuleRegistry::new(),
            engine,
            compiler,
            styles,
            local,
            providers,
            tools,
            dynamic,
            import_maps,
        })
    }

    pub fn engine(&self) -> &Rc<ScriptEngine> {
        &self.engine
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn compiler(&self) -> &Rc<TsxCompiler> {
        &self.compiler
    }

    pub fn styles(&self) -> &Rc<ScssCompiler> {
        &self.styles
    }

    pub fn tools(&self) -> &Rc<ToolsService> {
        &self.tools
    }

    pub fn providers(&self) -> &Rc<NetworkProviderService> {
        &self.providers
    }

    pub fn import_maps(&self) -> &ImportMapService {
        &self.import_maps
    }

    pub fn document(&self) -> Option<&Rc<dyn Document>> {
        self.document.as_ref()
    }

    /// Fetch and parse `config.json` from the origin.
    pub async fn load_config(&self) -> LoaderResult<BootstrapConfig> {
        let fetch = self
            .fetch
            .as_ref()
            .ok_or_else(|| LoaderError::FetchUnavailable(CONFIG_FILE.to_string()))?;
        BootstrapConfig::load(fetch.as_ref(), CONFIG_FILE).await
    }

    /// Apply provider settings and decide whether info events are emitted.
    pub fn configure(&self, config: &BootstrapConfig) -> bool {
        self.providers.apply_config(config);
        let enabled = self
            .ci_override
            .unwrap_or_else(|| detect_ci_logging(config.ci_logging, &self.origin));
        if let Some(client) = &self.ci_switch {
            client.set_ci_logging_enabled(enabled);
        }
        if enabled {
            self.log
                .info("ci:enabled", json!({ "config": true, "href": self.origin.as_str() }));
        }
        enabled
    }

    /// A require bound to `entry_dir`, with a fresh local loader and the
    /// config's dynamic-module rules.
    pub fn create_require(&self, config: &BootstrapConfig, entry_dir: &str) -> Require {
        RequireBuilder::create(RequireOptions {
            registry: self.registry.clone(),
            dynamic_modules: config.dynamic_modules.clone(),
            entry_dir: entry_dir.to_string(),
            local_module_loader: Some(self.local.create_local_module_loader(entry_dir)),
            dynamic_module_loader: Some(Rc::new(self.dynamic.clone())),
        })
    }

    /// Run the whole startup sequence; failures are logged as
    /// `bootstrap:error` and returned.
    pub async fn run(&self, config: BootstrapConfig) -> LoaderResult<BootstrapOutput> {
        match self.run_steps(config).await {
            Ok(output) => Ok(output),
            Err(e) => {
                self.log
                    .error("bootstrap:error", json!({ "message": e.to_string() }));
                Err(e)
            }
        }
    }

    async fn run_steps(&self, mut config: BootstrapConfig) -> LoaderResult<BootstrapOutput> {
        self.configure(&config);

        let import_map = match &self.document {
            Some(document) => {
                self.import_maps
                    .initialize(&mut config, Some(document.as_ref()))
                    .await?
            }
            None => self.import_maps.build_import_map(&mut config).await?,
        };

        self.tools.load_tools(&config.tools).await?;
        if let Some(styles) = &config.styles {
            self.styles.load_scss(styles).await?;
        }
        let modules = self.tools.load_modules(&config.modules, &self.registry).await?;

        let entry_file = config
            .entry
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTRY.to_string());
        let entry_dir = determine_entry_dir(&entry_file);
        let require = self.create_require(&config, &entry_dir);
        let exports = self
            .compiler
            .compile_tsx(&entry_file, &require, &entry_dir)
            .await?;

        self.log.info(
            "bootstrap:success",
            json!({ "entryFile": entry_file, "styles": config.styles }),
        );
        Ok(BootstrapOutput {
            config,
            import_map,
            modules,
            exports,
        })
    }
}
