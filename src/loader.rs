//! Local module loading
//!
//! A [`LocalModuleLoader`] turns a relative specifier into executed exports:
//! resolve against the caller's directory, try candidate files in order,
//! hand the first hit to the matching compiler backend and record the result
//! in the shared [`ModuleRegistry`].
//!
//! Loads are single-flight at three levels. Concurrent requests for the same
//! resolved target share one load; every candidate URL has at most one GET in
//! flight; and a file that is already compiled or compiling is reused by any
//! target that lists it as a candidate, without another GET. Failures are
//! never cached.
//!
//! Every in-flight request also records which load it is waiting on. A request
//! that would wait on its own ancestor fails with
//! [`LoaderError::CircularImport`] instead of hanging.

use boa_engine::{JsString, JsValue};
use futures_util::future::{FutureExt, LocalBoxFuture, Shared};
use serde_json::json;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use url::Url;

use crate::compiler::{ScssCompiler, TsxCompiler, is_stylesheet};
use crate::error::{LoaderError, LoaderResult};
use crate::fetch::{Fetch, FetchOptions};
use crate::logging::LogClient;
use crate::paths::{get_candidate_local_paths, make_alias_key, normalize_dir, resolve_local_module_base};
use crate::require::Require;

const LOAD_PREFIX: &str = "load:";
const COMPILE_PREFIX: &str = "compile:";

/// Wait-graph node for the compile of `path`.
pub(crate) fn compile_node(path: &str) -> String {
    format!("{}{}", COMPILE_PREFIX, path)
}

fn load_node(target: &str) -> String {
    format!("{}{}", LOAD_PREFIX, target)
}

/// Source text of the first candidate that answered 2xx
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    pub source: String,
    pub resolved_path: String,
}

#[derive(Clone)]
struct Loaded {
    path: String,
    exports: JsValue,
}

type SharedLoad = Shared<LocalBoxFuture<'static, LoaderResult<Loaded>>>;
type SharedCompile = Shared<LocalBoxFuture<'static, LoaderResult<JsValue>>>;
/// Body of a 2xx answer, `None` for anything else
type SharedFetch = Shared<LocalBoxFuture<'static, Option<String>>>;

/// Creates loaders that share one origin, fetch and set of compilers.
pub struct LocalModuleService {
    origin: Url,
    fetch: Option<Rc<dyn Fetch>>,
    compiler: Rc<TsxCompiler>,
    styles: Option<Rc<ScssCompiler>>,
    log: Rc<dyn LogClient>,
}

impl LocalModuleService {
    pub fn new(
        origin: Url,
        fetch: Option<Rc<dyn Fetch>>,
        compiler: Rc<TsxCompiler>,
        styles: Option<Rc<ScssCompiler>>,
        log: Rc<dyn LogClient>,
    ) -> Self {
        Self {
            origin,
            fetch,
            compiler,
            styles,
            log,
        }
    }

    pub fn create_local_module_loader(&self, entry_dir: &str) -> Rc<LocalModuleLoader> {
        Rc::new(LocalModuleLoader {
            entry_dir: normalize_dir(entry_dir),
            origin: self.origin.clone(),
            fetch: self.fetch.clone(),
            compiler: Rc::clone(&self.compiler),
            styles: self.styles.clone(),
            log: Rc::clone(&self.log),
            alias_cache: RefCell::new(HashMap::new()),
            pending_loads: RefCell::new(HashMap::new()),
            pending_fetches: RefCell::new(HashMap::new()),
            pending_compiles: RefCell::new(HashMap::new()),
            compiled: RefCell::new(HashSet::new()),
            waits: RefCell::new(HashMap::new()),
        })
    }
}

pub struct LocalModuleLoader {
    entry_dir: String,
    origin: Url,
    fetch: Option<Rc<dyn Fetch>>,
    compiler: Rc<TsxCompiler>,
    styles: Option<Rc<ScssCompiler>>,
    log: Rc<dyn LogClient>,
    /// alias key -> canonical path
    alias_cache: RefCell<HashMap<String, String>>,
    /// resolved target -> in-flight fetch and compile
    pending_loads: RefCell<HashMap<String, SharedLoad>>,
    /// candidate URL -> in-flight GET
    pending_fetches: RefCell<HashMap<String, SharedFetch>>,
    /// canonical path -> in-flight compile
    pending_compiles: RefCell<HashMap<String, SharedCompile>>,
    /// canonical paths compiled by this loader
    compiled: RefCell<HashSet<String>>,
    /// wait-graph edges between load and compile nodes
    waits: RefCell<HashMap<String, Vec<String>>>,
}

impl LocalModuleLoader {
    pub fn entry_dir(&self) -> &str {
        &self.entry_dir
    }

    /// Canonical path cached for `name` requested from `base_dir`.
    pub fn cached_alias(&self, name: &str, base_dir: &str) -> Option<String> {
        self.alias_cache
            .borrow()
            .get(&make_alias_key(name, base_dir))
            .cloned()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_loads.borrow().len()
            + self.pending_fetches.borrow().len()
            + self.pending_compiles.borrow().len()
    }

    /// Load `name` relative to `base_dir` (the entry directory when empty).
    pub fn load(
        self: &Rc<Self>,
        name: &str,
        base_dir: &str,
        require: &Require,
    ) -> LocalBoxFuture<'static, LoaderResult<JsValue>> {
        let this = Rc::clone(self);
        let name = name.to_string();
        let base_dir = if base_dir.is_empty() {
            self.entry_dir.clone()
        } else {
            normalize_dir(base_dir)
        };
        let require = require.clone();

        async move {
            let registry = require.registry().clone();
            let alias_key = make_alias_key(&name, &base_dir);

            let cached = this.alias_cache.borrow().get(&alias_key).cloned();
            if let Some(canonical) = cached {
                if let Some(exports) = registry.get(&canonical) {
                    registry.insert(&alias_key, exports.clone());
                    return Ok(exports);
                }
            }

            let target = resolve_local_module_base(&name, &base_dir, &this.origin)?;
            let node = load_node(&target);
            let owner = require.owner().map(str::to_string);
            this.enter_wait(owner.as_deref(), &node)?;

            let result = this.pending_load(&target, &require).await;
            this.leave_wait(owner.as_deref(), &node);
            let loaded = result?;

            registry.insert(&loaded.path, loaded.exports.clone());
            registry.insert(&alias_key, loaded.exports.clone());
            this.alias_cache.borrow_mut().insert(alias_key, loaded.path);
            Ok(loaded.exports)
        }
        .boxed_local()
    }

    /// Fetch the first candidate of `base_path` that answers 2xx.
    pub async fn fetch_local_module_source(self: &Rc<Self>, base_path: &str) -> LoaderResult<FetchedSource> {
        if self.fetch.is_none() {
            return Err(LoaderError::FetchUnavailable(base_path.to_string()));
        }

        let candidates = get_candidate_local_paths(base_path);
        for candidate in &candidates {
            if let Some(source) = self.pending_fetch(candidate).await {
                self.pending_fetches.borrow_mut().remove(candidate);
                return Ok(FetchedSource {
                    source,
                    resolved_path: candidate.clone(),
                });
            }
        }
        Err(self.load_failed(base_path, candidates))
    }

    fn load_failed(&self, base_path: &str, candidates: Vec<String>) -> LoaderError {
        self.log.warn(
            "local-module:failed",
            json!({ "basePath": base_path, "candidates": candidates }),
        );
        LoaderError::LoadFailed {
            module: base_path.to_string(),
            candidates,
        }
    }

    /// One GET per URL at a time. A failed GET removes its own entry; a
    /// successful one stays until a consumer has started the compile.
    fn pending_fetch(self: &Rc<Self>, url: &str) -> SharedFetch {
        if let Some(existing) = self.pending_fetches.borrow().get(url).cloned() {
            return existing;
        }
        let this = Rc::clone(self);
        let owned = url.to_string();
        let future = async move {
            let source = match &this.fetch {
                Some(fetch) => match fetch.fetch(&owned, FetchOptions::get()).await {
                    Ok(response) if response.ok() => Some(response.body),
                    Ok(_) => None,
                    Err(e) => {
                        log::debug!(target: "rwtra::loader", "fetch {} failed: {}", owned, e);
                        None
                    }
                },
                None => None,
            };
            if source.is_none() {
                this.pending_fetches.borrow_mut().remove(&owned);
            }
            source
        }
        .boxed_local()
        .shared();
        self.pending_fetches
            .borrow_mut()
            .insert(url.to_string(), future.clone());
        future
    }

    fn pending_load(self: &Rc<Self>, target: &str, require: &Require) -> SharedLoad {
        if let Some(existing) = self.pending_loads.borrow().get(target).cloned() {
            return existing;
        }
        let future = Rc::clone(self)
            .fetch_and_compile(target.to_string(), require.clone())
            .boxed_local()
            .shared();
        self.pending_loads
            .borrow_mut()
            .insert(target.to_string(), future.clone());
        future
    }

    /// Exports of `path` when this loader has already compiled it.
    fn compiled_exports(&self, path: &str, require: &Require) -> Option<JsValue> {
        if !self.compiled.borrow().contains(path) {
            return None;
        }
        require.registry().get(path)
    }

    async fn fetch_and_compile(self: Rc<Self>, target: String, require: Require) -> LoaderResult<Loaded> {
        let result = self.compile_first_candidate(&target, &require).await;
        self.pending_loads.borrow_mut().remove(&target);
        result
    }

    /// Walk the candidates of `target` in order. A candidate that is already
    /// compiled or compiling is taken as is; otherwise it is fetched and the
    /// first 2xx answer is compiled.
    async fn compile_first_candidate(self: &Rc<Self>, target: &str, require: &Require) -> LoaderResult<Loaded> {
        if self.fetch.is_none() {
            return Err(LoaderError::FetchUnavailable(target.to_string()));
        }

        let candidates = get_candidate_local_paths(target);
        for candidate in &candidates {
            if let Some(exports) = self.compiled_exports(candidate, require) {
                return Ok(Loaded {
                    path: candidate.clone(),
                    exports,
                });
            }

            let in_flight = self.pending_compiles.borrow().get(candidate).cloned();
            let compile = match in_flight {
                Some(compile) => compile,
                None => {
                    let Some(source) = self.pending_fetch(candidate).await else {
                        continue;
                    };
                    // another waiter on the same GET may have compiled it already
                    if let Some(exports) = self.compiled_exports(candidate, require) {
                        self.pending_fetches.borrow_mut().remove(candidate);
                        return Ok(Loaded {
                            path: candidate.clone(),
                            exports,
                        });
                    }
                    let compile = self.pending_compile(candidate, source, require);
                    self.pending_fetches.borrow_mut().remove(candidate);
                    compile
                }
            };

            let node = load_node(target);
            let compile_wait = compile_node(candidate);
            self.enter_wait(Some(&node), &compile_wait)?;
            let result = compile.await;
            self.leave_wait(Some(&node), &compile_wait);
            return result.map(|exports| Loaded {
                path: candidate.clone(),
                exports,
            });
        }

        Err(self.load_failed(target, candidates))
    }

    fn pending_compile(self: &Rc<Self>, canonical: &str, source: String, require: &Require) -> SharedCompile {
        if let Some(existing) = self.pending_compiles.borrow().get(canonical).cloned() {
            return existing;
        }
        let future = Rc::clone(self)
            .compile(
                canonical.to_string(),
                source,
                require.owned_by(&compile_node(canonical)),
            )
            .boxed_local()
            .shared();
        self.pending_compiles
            .borrow_mut()
            .insert(canonical.to_string(), future.clone());
        future
    }

    async fn compile(self: Rc<Self>, canonical: String, source: String, require: Require) -> LoaderResult<JsValue> {
        let result = if is_stylesheet(&canonical) {
            match &self.styles {
                Some(styles) => styles
                    .load_source(&canonical, source)
                    .await
                    .map(|css| JsValue::from(JsString::from(css.as_str()))),
                None => Err(LoaderError::CompilerMissing(canonical.clone())),
            }
        } else {
            self.compiler
                .compile_module(&source, &canonical, &require)
                .await
        };

        match &result {
            Ok(exports) => {
                require.registry().insert(&canonical, exports.clone());
                self.compiled.borrow_mut().insert(canonical.clone());
                self.log
                    .info("local-module:loaded", json!({ "path": canonical }));
            }
            Err(e) => self.log.warn(
                "local-module:compile-failed",
                json!({ "path": canonical, "error": e.to_string() }),
            ),
        }

        self.pending_compiles.borrow_mut().remove(&canonical);
        result
    }

    /// Record that `owner` is about to wait on `node`, failing when `node`
    /// already (transitively) waits on `owner`.
    fn enter_wait(&self, owner: Option<&str>, node: &str) -> LoaderResult<()> {
        let Some(owner) = owner else {
            return Ok(());
        };
        if let Some(path) = self.wait_path(node, owner) {
            return Err(LoaderError::CircularImport(cycle_chain(&path)));
        }
        self.waits
            .borrow_mut()
            .entry(owner.to_string())
            .or_default()
            .push(node.to_string());
        Ok(())
    }

    fn leave_wait(&self, owner: Option<&str>, node: &str) {
        let Some(owner) = owner else {
            return;
        };
        let mut waits = self.waits.borrow_mut();
        if let Some(edges) = waits.get_mut(owner) {
            if let Some(idx) = edges.iter().position(|n| n == node) {
                edges.remove(idx);
            }
            if edges.is_empty() {
                waits.remove(owner);
            }
        }
    }

    /// Path of wait edges from `from` to `to`, both ends included.
    fn wait_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let waits = self.waits.borrow();
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue = VecDeque::from([from.to_string()]);
        seen.insert(from.to_string());

        while let Some(current) = queue.pop_front() {
            if current == to {
                let mut path = vec![current.clone()];
                let mut cursor = current;
                while let Some(parent) = parents.get(&cursor) {
                    path.push(parent.clone());
                    cursor = parent.clone();
                }
                path.reverse();
                return Some(path);
            }
            for next in waits.get(&current).into_iter().flatten() {
                if seen.insert(next.clone()) {
                    parents.insert(next.clone(), current.clone());
                    queue.push_back(next.clone());
                }
            }
        }
        None
    }
}

/// Module paths along a wait cycle, closed back onto the first one.
fn cycle_chain(path: &[String]) -> Vec<String> {
    let mut chain: Vec<String> = path
        .iter()
        .filter_map(|node| node.strip_prefix(COMPILE_PREFIX))
        .map(str::to_string)
        .collect();
    if chain.is_empty() {
        chain = path
            .iter()
            .filter_map(|node| node.strip_prefix(LOAD_PREFIX))
            .map(str::to_string)
            .collect();
    }
    if let Some(first) = chain.first().cloned() {
        chain.push(first);
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::SassEngine;
    use crate::document::HeadDocument;
    use crate::engine::{ScriptEngine, same_value};
    use crate::fetch::MemoryFetch;
    use crate::logging::RecordingLogClient;
    use crate::require::{RequireBuilder, RequireOptions};
    use crate::transpiler::Transpiler;
    use futures_util::future::join;

    struct Harness {
        fetch: MemoryFetch,
        engine: Rc<ScriptEngine>,
        document: Rc<HeadDocument>,
        log: Rc<RecordingLogClient>,
        loader: Rc<LocalModuleLoader>,
        require: Require,
    }

    fn harness() -> Harness {
        let fetch = MemoryFetch::new();
        let shared_fetch: Rc<dyn Fetch> = Rc::new(fetch.clone());
        let engine = Rc::new(ScriptEngine::new().unwrap());
        let log = Rc::new(RecordingLogClient::new());
        let document = Rc::new(HeadDocument::new());

        let compiler = Rc::new(TsxCompiler::new(
            Rc::clone(&engine),
            Some(Rc::new(Transpiler::new())),
            Some(Rc::clone(&shared_fetch)),
            log.clone(),
        ));
        let styles = Rc::new(ScssCompiler::new(
            Some(Rc::clone(&shared_fetch)),
            Some(document.clone()),
            Some(SassEngine::grass()),
            log.clone(),
        ));
        let service = LocalModuleService::new(
            Url::parse("https://app.test/").unwrap(),
            Some(shared_fetch),
            compiler,
            Some(styles),
            log.clone(),
        );
        let loader = service.create_local_module_loader("");
        let require = RequireBuilder::create(RequireOptions {
            local_module_loader: Some(Rc::clone(&loader)),
            ..Default::default()
        });

        Harness {
            fetch,
            engine,
            document,
            log,
            loader,
            require,
        }
    }

    const BUTTON: &str = r#"
        globalThis.__buttonRuns = (globalThis.__buttonRuns || 0) + 1;
        export default function Button(): string {
            return "btn";
        }
    "#;

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let h = harness();
        h.fetch.insert("button.tsx", BUTTON);

        let (a, b) = join(
            h.require.require_async("./button", None),
            h.require.require_async("./button", None),
        )
        .await;
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(same_value(&a, &b));
        assert_eq!(h.fetch.fetch_count("button.tsx"), 1);
        assert_eq!(h.fetch.fetch_count("button"), 1);
        assert_eq!(h.loader.pending_count(), 0);
        assert_eq!(h.loader.cached_alias("./button", "").as_deref(), Some("button.tsx"));

        // cached alias: no further requests
        let before = h.fetch.requests().len();
        let c = h.require.require_async("./button", None).await.unwrap();
        assert!(same_value(&a, &c));
        assert_eq!(h.fetch.requests().len(), before);
    }

    #[tokio::test]
    async fn test_converging_aliases_execute_once() {
        let h = harness();
        h.fetch.insert("button.tsx", BUTTON);

        let (a, b) = join(
            h.require.require_async("./button", None),
            h.require.require_async("./button.tsx", None),
        )
        .await;
        assert!(same_value(&a.unwrap(), &b.unwrap()));

        let runs = h.engine.get_global("__buttonRuns").unwrap();
        assert_eq!(h.engine.value_to_string(&runs), "1");
        assert_eq!(h.fetch.fetch_count("button.tsx"), 1);
        assert_eq!(h.loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_compiled_candidate_is_reused_without_refetch() {
        let h = harness();
        h.fetch.insert("button.tsx", BUTTON);

        let first = h.require.require_async("./button.tsx", None).await.unwrap();
        let second = h.require.require_async("./button", None).await.unwrap();
        assert!(same_value(&first, &second));

        assert_eq!(h.fetch.fetch_count("button.tsx"), 1);
        let runs = h.engine.get_global("__buttonRuns").unwrap();
        assert_eq!(h.engine.value_to_string(&runs), "1");
        assert_eq!(h.loader.cached_alias("./button", "").as_deref(), Some("button.tsx"));
    }

    #[tokio::test]
    async fn test_async_require_in_body_loads_on_demand() {
        let h = harness();
        h.fetch.insert(
            "app.ts",
            "require._async('./la' + 'zy').then((v) => { globalThis.__lazy = v; });\nexport default 1;\n",
        );
        h.fetch.insert("lazy.ts", "export default \"lazy\";\n");

        h.require.require_async("./app", None).await.unwrap();

        let lazy = h.engine.get_global("__lazy").unwrap();
        assert_eq!(h.engine.value_to_string(&lazy), "lazy");
        assert_eq!(h.fetch.fetch_count("lazy.ts"), 1);
        assert!(h.require.require("./lazy").is_ok());
        assert_eq!(h.loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let h = harness();

        let err = h.require.require_async("./late", None).await.unwrap_err();
        match err {
            LoaderError::LoadFailed { module, candidates } => {
                assert_eq!(module, "late");
                assert_eq!(candidates.len(), 9);
                assert_eq!(candidates[0], "late");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(h.log.has_event("local-module:failed"));
        assert_eq!(h.loader.pending_count(), 0);
        assert!(h.loader.cached_alias("./late", "").is_none());

        h.fetch.insert("late.ts", "const value: number = 5;\nexport default value;\n");
        let value = h.require.require_async("./late", None).await.unwrap();
        assert_eq!(h.engine.value_to_string(&value), "5");
    }

    #[tokio::test]
    async fn test_nested_relative_imports() {
        let h = harness();
        h.fetch.insert(
            "components/card.tsx",
            "import Button from \"./button\";\nexport default function Card() { return \"card:\" + Button(); }\n",
        );
        h.fetch.insert(
            "components/button.tsx",
            "export default function Button() { return \"btn\"; }\n",
        );

        let card = h.require.require_async("./components/card", None).await.unwrap();
        h.engine.set_global("__card", card).unwrap();
        let rendered = h.engine.eval("__card()").unwrap();
        assert_eq!(h.engine.value_to_string(&rendered), "card:btn");

        let registry = h.require.registry();
        assert!(registry.contains("components/button.tsx"));
        assert!(registry.contains(&make_alias_key("./button", "components")));
        assert!(h.require.bound_to("components").require("./button").is_ok());

        // the bare name belongs to no directory
        assert!(!registry.contains("./button"));
        assert!(h.require.require("./button").is_err());
        assert!(h.require.bound_to("pages").require("./button").is_err());
    }

    #[tokio::test]
    async fn test_circular_import_is_reported() {
        let h = harness();
        h.fetch.insert("a.tsx", "import b from \"./b\";\nexport default \"a\" + b;\n");
        h.fetch.insert("b.tsx", "import a from \"./a\";\nexport default \"b\";\n");

        let err = h.require.require_async("./a", None).await.unwrap_err();
        assert!(
            err.to_string()
                .contains("Circular import detected: a.tsx -> b.tsx -> a.tsx"),
            "{}",
            err
        );
        assert_eq!(h.loader.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stylesheet_import_is_injected() {
        let h = harness();
        h.fetch.insert("app.tsx", "import \"./styles.scss\";\nexport default 1;\n");
        h.fetch.insert("styles.scss", "$c: blue;\nbody { color: $c; }\n");

        h.require.require_async("./app", None).await.unwrap();

        let styles = h.document.texts_of("style");
        assert_eq!(styles.len(), 1);
        assert!(styles[0].contains("color: blue"));
        assert!(h.log.has_event("scss:injected"));
    }

    #[tokio::test]
    async fn test_fetch_unavailable() {
        let engine = Rc::new(ScriptEngine::new().unwrap());
        let log: Rc<dyn LogClient> = Rc::new(RecordingLogClient::new());
        let compiler = Rc::new(TsxCompiler::new(engine, None, None, log.clone()));
        let service = LocalModuleService::new(
            Url::parse("https://app.test/").unwrap(),
            None,
            compiler,
            None,
            log,
        );
        let loader = service.create_local_module_loader("src");
        assert_eq!(loader.entry_dir(), "src");
        let err = loader.fetch_local_module_source("src/a").await.unwrap_err();
        assert_eq!(err, LoaderError::FetchUnavailable("src/a".to_string()));
    }

    #[test]
    fn test_cycle_chain() {
        let path = vec![
            "load:a".to_string(),
            "compile:a.tsx".to_string(),
            "load:b".to_string(),
            "compile:b.tsx".to_string(),
        ];
        assert_eq!(cycle_chain(&path), vec!["a.tsx", "b.tsx", "a.tsx"]);
    }
}
