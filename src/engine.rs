//! JavaScript engine powered by Boa
//!
//! Owns the single Boa [`Context`] every module body, CDN script and helper
//! runs in. WebAPI support comes from boa_runtime (console, timers, URL,
//! text encoding, structuredClone, queueMicrotask). Network access stays on
//! the Rust side behind [`crate::fetch::Fetch`].
//!
//! Module bodies run in a CommonJS-style function scope; their `require` calls
//! land in a native function that forwards to a [`RequireHook`].
//! `require._async` answers from the hook's synchronous side when it can and
//! otherwise queues the hook's async load in a [`DeferredRequires`], whose
//! promises settle when the queue is driven.

use boa_engine::{
    Context, JsArgs, JsData, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction, Source, builtins::promise::ResolvingFunctions, context::ContextBuilder,
    object::builtins::JsPromise,
};
use boa_gc::{Finalize, Trace};
use boa_runtime::{
    ConsoleState, Logger,
    extensions::{
        ConsoleExtension, EncodingExtension, MicrotaskExtension, StructuredCloneExtension,
        TimeoutExtension, UrlExtension,
    },
    register_extensions,
};
use futures_util::future::{LocalBoxFuture, join_all};
use std::cell::{RefCell, RefMut};
use std::rc::Rc;

use crate::error::{LoaderError, LoaderResult};

/// Console backend that forwards to the `log` facade
#[derive(Debug, Clone, Default, Trace, Finalize)]
pub struct ConsoleLogger;

impl Logger for ConsoleLogger {
    fn log(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        log::info!(target: "rwtra::console", "{}", msg);
        Ok(())
    }

    fn info(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        log::info!(target: "rwtra::console", "{}", msg);
        Ok(())
    }

    fn warn(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        log::warn!(target: "rwtra::console", "{}", msg);
        Ok(())
    }

    fn error(&self, msg: String, _state: &ConsoleState, _context: &mut Context) -> JsResult<()> {
        log::error!(target: "rwtra::console", "{}", msg);
        Ok(())
    }
}

/// Resolves `require(name)` and `require._async(name)` calls made by a
/// running module body.
pub trait RequireHook {
    fn require(&self, name: &str) -> LoaderResult<JsValue>;

    /// Load `name` on demand. The future is only polled when the owning
    /// [`DeferredRequires`] is settled.
    fn require_async(&self, name: &str) -> LocalBoxFuture<'static, LoaderResult<JsValue>>;
}

struct DeferredRequire {
    future: LocalBoxFuture<'static, LoaderResult<JsValue>>,
    resolvers: ResolvingFunctions,
}

/// `require._async` calls waiting on a load
#[derive(Clone, Default)]
pub struct DeferredRequires {
    queue: Rc<RefCell<Vec<DeferredRequire>>>,
}

impl DeferredRequires {
    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    fn push(&self, deferred: DeferredRequire) {
        self.queue.borrow_mut().push(deferred);
    }

    /// Drive every queued load and settle its promise, then run the promise
    /// jobs. Requests queued by those jobs are driven in the next round.
    pub async fn settle(&self, engine: &ScriptEngine) -> LoaderResult<()> {
        loop {
            let batch = std::mem::take(&mut *self.queue.borrow_mut());
            if batch.is_empty() {
                return Ok(());
            }

            let outcomes = join_all(batch.into_iter().map(|deferred| async move {
                let DeferredRequire { future, resolvers } = deferred;
                (resolvers, future.await)
            }))
            .await;

            let mut context = engine.context()?;
            for (resolvers, outcome) in outcomes {
                let settled = match outcome {
                    Ok(value) => resolvers
                        .resolve
                        .call(&JsValue::undefined(), &[value], &mut context),
                    Err(e) => {
                        let reason = JsError::from_native(JsNativeError::typ().with_message(e.to_string()))
                            .to_opaque(&mut context);
                        resolvers
                            .reject
                            .call(&JsValue::undefined(), &[reason], &mut context)
                    }
                };
                if let Err(e) = settled {
                    log::warn!(target: "rwtra::engine", "failed to settle require._async: {}", e);
                }
            }
            let _ = context.run_jobs();
        }
    }
}

#[derive(Trace, Finalize, JsData)]
struct RequireHost {
    #[unsafe_ignore_trace]
    hook: Rc<dyn RequireHook>,
    #[unsafe_ignore_trace]
    deferred: DeferredRequires,
}

fn module_host(this: &JsValue) -> JsResult<(Rc<dyn RequireHook>, DeferredRequires)> {
    let missing = || JsNativeError::typ().with_message("require called without a module host");
    let host = this.as_object().ok_or_else(missing)?;
    let parts = {
        let data = host.downcast_ref::<RequireHost>().ok_or_else(missing)?;
        (Rc::clone(&data.hook), data.deferred.clone())
    };
    Ok(parts)
}

fn specifier(args: &[JsValue], context: &mut Context) -> JsResult<String> {
    Ok(args
        .get_or_undefined(0)
        .to_string(context)?
        .to_std_string_escaped())
}

/// Native side of `require`; `this` is the [`RequireHost`].
fn native_require(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let name = specifier(args, context)?;
    let (hook, _) = module_host(this)?;
    hook.require(&name)
        .map_err(|e| JsNativeError::typ().with_message(e.to_string()).into())
}

/// Native side of `require._async`: resolves at once from the registry, or
/// queues the hook's load behind a pending promise.
fn native_require_async(this: &JsValue, args: &[JsValue], context: &mut Context) -> JsResult<JsValue> {
    let name = specifier(args, context)?;
    let (hook, deferred) = module_host(this)?;
    let (promise, resolvers) = JsPromise::new_pending(context);
    match hook.require(&name) {
        Ok(value) => {
            resolvers
                .resolve
                .call(&JsValue::undefined(), &[value], context)?;
        }
        Err(_) => deferred.push(DeferredRequire {
            future: hook.require_async(&name),
            resolvers,
        }),
    }
    Ok(promise.into())
}

const MODULE_WRAPPER_HEAD: &str = r#"(function (__rwtraHost, __rwtraNativeRequire, __rwtraNativeRequireAsync) {
  const require = function (name) { return __rwtraNativeRequire.call(__rwtraHost, name); };
  require._async = function (name) { return __rwtraNativeRequireAsync.call(__rwtraHost, name); };
  const module = { exports: {} };
  (function (require, exports, module) {
"#;

const MODULE_WRAPPER_TAIL: &str = r#"
  }).call(module.exports, require, module.exports, module);
  return module.exports;
})"#;

/// Helpers installed on the global object at startup.
const ENGINE_PRELUDE: &str = r#"
globalThis.window = globalThis;
globalThis.self = globalThis;
globalThis.global = globalThis;
Object.defineProperty(globalThis, "__rwtraCreateNamespace", {
  enumerable: false,
  value: function (value) {
    if (value && typeof value === "object" && value.__esModule) return value;
    const ns = { __esModule: true };
    if (value && typeof value === "object") {
      for (const key in value) {
        if (Object.prototype.hasOwnProperty.call(value, key)) ns[key] = value[key];
      }
    }
    if (!Object.prototype.hasOwnProperty.call(ns, "default")) ns.default = value;
    const base = ns.default;
    if (base && (typeof base === "object" || typeof base === "function")) {
      for (const key of Object.getOwnPropertyNames(base)) {
        if (key === "default" || key === "__esModule" || Object.prototype.hasOwnProperty.call(ns, key)) continue;
        ns[key] = base[key];
      }
    }
    return ns;
  },
});
Object.defineProperty(globalThis, "__rwtraDescribe", {
  enumerable: false,
  value: function (value) {
    const fn = (v) => "[Function " + (v.name || "anonymous") + "]";
    if (typeof value === "function") return fn(value);
    try {
      const text = JSON.stringify(value, (k, v) => (typeof v === "function" ? fn(v) : v), 2);
      return text === undefined ? String(value) : text;
    } catch (err) {
      return String(value);
    }
  },
});
"#;

/// The shared Boa context
pub struct ScriptEngine {
    context: RefCell<Context>,
}

impl ScriptEngine {
    pub fn new() -> LoaderResult<Self> {
        let mut context = ContextBuilder::default()
            .build()
            .map_err(|e| LoaderError::Config(e.to_string()))?;

        context.runtime_limits_mut().set_recursion_limit(16384);
        context
            .runtime_limits_mut()
            .set_stack_size_limit(1024 * 1024);

        register_extensions(
            (
                ConsoleExtension(ConsoleLogger),
                TimeoutExtension,
                UrlExtension,
                EncodingExtension,
                StructuredCloneExtension,
                MicrotaskExtension,
            ),
            None,
            &mut context,
        )
        .map_err(|e| LoaderError::Config(e.to_string()))?;

        context
            .eval(Source::from_bytes(ENGINE_PRELUDE.as_bytes()))
            .map_err(|e| LoaderError::Config(e.to_string()))?;

        Ok(Self {
            context: RefCell::new(context),
        })
    }

    /// Exclusive access to the context; fails instead of panicking when a
    /// native callback re-enters the engine mid-script.
    fn context(&self) -> LoaderResult<RefMut<'_, Context>> {
        self.context
            .try_borrow_mut()
            .map_err(|_| LoaderError::EngineBusy)
    }

    /// Evaluate a classic script (e.g. a UMD bundle) in global scope.
    pub fn eval_script(&self, code: &str, url: &str) -> LoaderResult<JsValue> {
        let mut context = self.context()?;
        let result = context.eval(Source::from_bytes(code.as_bytes()));
        let _ = context.run_jobs();
        result.map_err(|e| LoaderError::Script {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Run a CommonJS body and return its `module.exports`.
    ///
    /// The body sees `require`, `exports` and `module`; `require` calls are
    /// answered by `hook`. `require._async` calls the hook cannot answer
    /// synchronously are queued on `deferred`.
    pub fn execute_commonjs(
        &self,
        code: &str,
        filename: &str,
        hook: Rc<dyn RequireHook>,
        deferred: &DeferredRequires,
    ) -> LoaderResult<JsValue> {
        let wrapper = format!("{}{}{}", MODULE_WRAPPER_HEAD, code, MODULE_WRAPPER_TAIL);
        let mut context = self.context()?;

        let factory = context
            .eval(Source::from_bytes(wrapper.as_bytes()))
            .map_err(|e| LoaderError::CompileError {
                path: filename.to_string(),
                message: e.to_string(),
            })?;
        let factory = factory.as_callable().ok_or_else(|| LoaderError::CompileError {
            path: filename.to_string(),
            message: "module wrapper did not evaluate to a function".to_string(),
        })?;

        let host = JsObject::from_proto_and_data(
            None,
            RequireHost {
                hook,
                deferred: deferred.clone(),
            },
        );
        let native = NativeFunction::from_fn_ptr(native_require).to_js_function(context.realm());
        let native_async =
            NativeFunction::from_fn_ptr(native_require_async).to_js_function(context.realm());

        let result = factory.call(
            &JsValue::undefined(),
            &[JsValue::from(host), JsValue::from(native), JsValue::from(native_async)],
            &mut context,
        );
        let _ = context.run_jobs();

        result.map_err(|e| LoaderError::ExecutionFailed {
            path: filename.to_string(),
            message: e.to_string(),
        })
    }

    /// Evaluate an expression and return its value.
    pub fn eval(&self, code: &str) -> LoaderResult<JsValue> {
        self.eval_script(code, "<eval>")
    }

    /// `value[key]`, or `None` when the value is not an object or the
    /// property is undefined.
    pub fn get_property(&self, value: &JsValue, key: &str) -> Option<JsValue> {
        let object = value.as_object()?;
        let mut context = self.context().ok()?;
        let property = object.get(JsString::from(key), &mut context).ok()?;
        (!property.is_undefined()).then_some(property)
    }

    /// Look up a global by name; dotted names walk nested properties
    /// (`Icons.Home`). Missing, `undefined` and `null` all give `None`.
    pub fn get_global(&self, path: &str) -> Option<JsValue> {
        let mut context = self.context().ok()?;
        let mut current = JsValue::from(context.global_object());
        for part in path.split('.').filter(|p| !p.is_empty()) {
            let object = current.as_object()?;
            let next = object.get(JsString::from(part), &mut context).ok()?;
            current = next;
        }
        (!current.is_null_or_undefined()).then_some(current)
    }

    pub fn set_global(&self, name: &str, value: JsValue) -> LoaderResult<()> {
        let mut context = self.context()?;
        let global = context.global_object();
        global
            .set(JsString::from(name), value, false, &mut context)
            .map(|_| ())
            .map_err(|e| LoaderError::Script {
                url: "<global>".to_string(),
                message: e.to_string(),
            })
    }

    fn call_helper(&self, name: &str, args: &[JsValue]) -> LoaderResult<JsValue> {
        let mut context = self.context()?;
        let global = context.global_object();
        let result = global
            .get(JsString::from(name), &mut context)
            .and_then(|helper| {
                let callable = helper.as_callable().ok_or_else(|| {
                    JsNativeError::typ().with_message(format!("{} is not installed", name))
                })?;
                callable.call(&JsValue::undefined(), args, &mut context)
            });
        result.map_err(|e| LoaderError::Script {
            url: format!("<{}>", name),
            message: e.to_string(),
        })
    }

    /// Wrap a CommonJS or global value into `{__esModule, default, ...props}`.
    /// Values already marked `__esModule` are returned unchanged.
    pub fn create_namespace(&self, value: &JsValue) -> LoaderResult<JsValue> {
        self.call_helper("__rwtraCreateNamespace", std::slice::from_ref(value))
    }

    /// Convert a JsValue to a displayable string
    pub fn value_to_string(&self, value: &JsValue) -> String {
        let Ok(mut context) = self.context() else {
            return "[engine busy]".to_string();
        };
        value
            .to_string(&mut context)
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_else(|_| "[error converting value]".to_string())
    }

    /// JSON-ish rendering for the CLI; functions show as `[Function name]`.
    pub fn describe(&self, value: &JsValue) -> String {
        match self.call_helper("__rwtraDescribe", std::slice::from_ref(value)) {
            Ok(text) => self.value_to_string(&text),
            Err(_) => self.value_to_string(value),
        }
    }
}

/// Reference identity for module values: same object, or equal primitives.
pub fn same_value(a: &JsValue, b: &JsValue) -> bool {
    match (a.as_object(), b.as_object()) {
        (Some(a), Some(b)) => JsObject::equals(&a, &b),
        (None, None) => a.strict_equals(b),
        _ => false,
    }
}
