//! TSX/JS backend
//!
//! Transforms module sources to a CommonJS body, then runs the body with
//! `require`, `exports` and `module` in scope. While a body runs, its path and
//! directory sit on top of the [`ModuleContextStack`]. The `require` it sees
//! resolves relative names against the module's own directory, including
//! calls made later from callbacks.
//!
//! `require._async` inside a body loads on demand: the load is driven after
//! the body returns and before execution is reported complete.

use boa_engine::JsValue;
use futures_util::future::{FutureExt, LocalBoxFuture};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{DeferredRequires, RequireHook, ScriptEngine};
use crate::error::{LoaderError, LoaderResult};
use crate::fetch::{Fetch, FetchOptions};
use crate::loader::compile_node;
use crate::logging::LogClient;
use crate::paths::{get_module_dir, normalize_dir};
use crate::require::Require;
use crate::source::preload_modules_from_source;
use crate::transpiler::Transpile;

/// A module whose body is currently executing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFrame {
    pub path: String,
    pub dir: String,
}

/// Stack of executing module frames
#[derive(Debug, Clone, Default)]
pub struct ModuleContextStack {
    frames: Rc<RefCell<Vec<ModuleFrame>>>,
}

impl ModuleContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `frame`; it is popped when the returned guard drops.
    pub fn push(&self, frame: ModuleFrame) -> ModuleContextGuard {
        let mut frames = self.frames.borrow_mut();
        let depth = frames.len();
        frames.push(frame);
        ModuleContextGuard {
            frames: Rc::clone(&self.frames),
            depth,
        }
    }

    pub fn current(&self) -> Option<ModuleFrame> {
        self.frames.borrow().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    pub fn frames(&self) -> Vec<ModuleFrame> {
        self.frames.borrow().clone()
    }
}

/// Restores the stack to its depth before the push.
pub struct ModuleContextGuard {
    frames: Rc<RefCell<Vec<ModuleFrame>>>,
    depth: usize,
}

impl Drop for ModuleContextGuard {
    fn drop(&mut self) {
        self.frames.borrow_mut().truncate(self.depth);
    }
}

/// `require` as seen from inside a module body, bound to its directory.
struct ContextRequire {
    require: Require,
}

impl RequireHook for ContextRequire {
    fn require(&self, name: &str) -> LoaderResult<JsValue> {
        self.require.require(name)
    }

    fn require_async(&self, name: &str) -> LocalBoxFuture<'static, LoaderResult<JsValue>> {
        let require = self.require.clone();
        let name = name.to_string();
        async move { require.require_async(&name, None).await }.boxed_local()
    }
}

pub struct TsxCompiler {
    engine: Rc<ScriptEngine>,
    transpiler: Option<Rc<dyn Transpile>>,
    fetch: Option<Rc<dyn Fetch>>,
    context_stack: ModuleContextStack,
    log: Rc<dyn LogClient>,
}

impl TsxCompiler {
    pub fn new(
        engine: Rc<ScriptEngine>,
        transpiler: Option<Rc<dyn Transpile>>,
        fetch: Option<Rc<dyn Fetch>>,
        log: Rc<dyn LogClient>,
    ) -> Self {
        Self {
            engine,
            transpiler,
            fetch,
            context_stack: ModuleContextStack::new(),
            log,
        }
    }

    pub fn engine(&self) -> &Rc<ScriptEngine> {
        &self.engine
    }

    pub fn context_stack(&self) -> &ModuleContextStack {
        &self.context_stack
    }

    /// Transpile `source` into a CommonJS body.
    pub fn transform_source(&self, source: &str, filename: &str) -> LoaderResult<String> {
        let transpiler = self
            .transpiler
            .as_ref()
            .ok_or_else(|| LoaderError::TranspilerUnavailable(filename.to_string()))?;
        transpiler
            .transform(source, filename)
            .map_err(|e| LoaderError::CompileError {
                path: filename.to_string(),
                message: e.to_string(),
            })
    }

    /// Transform and run a module body.
    ///
    /// Returns `module.exports.default` when the module defines one, else
    /// `module.exports`.
    pub async fn execute_module_source(
        &self,
        source: &str,
        filename: &str,
        dir: &str,
        require: &Require,
    ) -> LoaderResult<JsValue> {
        let exports = self
            .execute_module_exports(source, filename, dir, require)
            .await?;
        Ok(self
            .engine
            .get_property(&exports, "default")
            .unwrap_or(exports))
    }

    /// Transform and run a module body, returning `module.exports` as is.
    ///
    /// `require._async` loads started by the body are driven to completion
    /// before this returns.
    pub async fn execute_module_exports(
        &self,
        source: &str,
        filename: &str,
        dir: &str,
        require: &Require,
    ) -> LoaderResult<JsValue> {
        let code = self.transform_source(source, filename)?;
        let dir = normalize_dir(dir);
        let hook: Rc<dyn RequireHook> = Rc::new(ContextRequire {
            require: require.bound_to(&dir),
        });
        let deferred = DeferredRequires::default();

        let exports = {
            let _frame = self.context_stack.push(ModuleFrame {
                path: filename.to_string(),
                dir,
            });
            self.engine
                .execute_commonjs(&code, filename, hook, &deferred)?
        };

        if !deferred.is_empty() {
            log::debug!(
                target: "rwtra::compiler",
                "{}: driving {} on-demand require(s)",
                filename,
                deferred.len()
            );
            deferred.settle(&self.engine).await?;
        }
        Ok(exports)
    }

    /// Preload a fetched module's imports, then execute it.
    pub async fn compile_module(
        &self,
        source: &str,
        path: &str,
        require: &Require,
    ) -> LoaderResult<JsValue> {
        let dir = get_module_dir(path);
        let bound = require.bound_to(&dir);
        preload_modules_from_source(source, &bound, &dir).await?;
        self.execute_module_source(source, path, &dir, &bound).await
    }

    /// Fetch, preload and execute the application entry file.
    pub async fn compile_tsx(
        &self,
        entry_file: &str,
        require: &Require,
        entry_dir: &str,
    ) -> LoaderResult<JsValue> {
        let fetch = self
            .fetch
            .as_ref()
            .ok_or_else(|| LoaderError::FetchUnavailable(entry_file.to_string()))?;

        let response = fetch
            .fetch(entry_file, FetchOptions::get())
            .await
            .map_err(|_| LoaderError::FetchFailed {
                path: entry_file.to_string(),
                status: 0,
            })?;
        if !response.ok() {
            return Err(LoaderError::FetchFailed {
                path: entry_file.to_string(),
                status: response.status,
            });
        }
        let source = response.body;

        let entry_dir = normalize_dir(entry_dir);
        let bound = require
            .bound_to(&entry_dir)
            .owned_by(&compile_node(entry_file.trim_start_matches('/')));
        preload_modules_from_source(&source, &bound, &entry_dir).await?;

        let compiled = self
            .execute_module_source(&source, entry_file, &entry_dir, &bound)
            .await?;
        self.log.info(
            "tsx:compiled",
            json!({ "entryFile": entry_file, "entryDir": entry_dir }),
        );
        Ok(compiled)
    }
}
