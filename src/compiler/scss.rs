//! SCSS backend
//!
//! Sass engines come in four call shapes. The shape is fixed when the
//! [`SassEngine`] is built and adapted once into a [`CompileFn`]; nothing is
//! probed per call. The default engine is `grass`.

use futures_util::future::{FutureExt, LocalBoxFuture};
use serde_json::json;
use std::rc::Rc;

use crate::document::{Document, ElementId};
use crate::error::{LoaderError, LoaderResult};
use crate::fetch::{Fetch, FetchOptions};
use crate::logging::LogClient;

/// Callback payload of callback-style engines (`status == 0` is success).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SassCompileResult {
    pub status: i32,
    pub text: String,
    /// Human-readable error, when `status != 0`
    pub formatted: Option<String>,
}

/// Object result of synchronous engines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SassOutput {
    pub css: String,
}

pub type SassCallback = Box<dyn FnOnce(SassCompileResult)>;

/// An engine instance built per compilation by [`SassEngine::Constructed`].
pub trait SassInstance {
    fn compile(&self, source: &str, done: SassCallback);
}

/// Compile source text to CSS, or fail with the engine's message.
pub type CompileFn = Rc<dyn Fn(String) -> LocalBoxFuture<'static, Result<String, String>>>;

#[derive(Clone)]
pub enum SassEngine {
    /// `new Engine().compile(src, cb)`
    Constructed(Rc<dyn Fn() -> Box<dyn SassInstance>>),
    /// `compile(src, cb)`
    Callback(Rc<dyn Fn(&str, SassCallback)>),
    /// `compile(src) -> { css }`
    Sync(Rc<dyn Fn(&str) -> Result<SassOutput, String>>),
    /// `compile(src) -> css`
    Raw(Rc<dyn Fn(&str) -> Result<String, String>>),
}

fn callback_future(start: impl FnOnce(SassCallback)) -> LocalBoxFuture<'static, Result<String, String>> {
    let (tx, rx) = tokio::sync::oneshot::channel::<SassCompileResult>();
    start(Box::new(move |result| {
        let _ = tx.send(result);
    }));
    async move {
        match rx.await {
            Ok(result) if result.status == 0 => Ok(result.text),
            Ok(result) => Err(result
                .formatted
                .unwrap_or_else(|| format!("Sass compile error (status {})", result.status))),
            Err(_) => Err("Sass compiler dropped its callback".to_string()),
        }
    }
    .boxed_local()
}

impl SassEngine {
    /// `grass`, in the synchronous shape.
    pub fn grass() -> Self {
        SassEngine::Sync(Rc::new(|source: &str| {
            grass::from_string(source.to_string(), &grass::Options::default())
                .map(|css| SassOutput { css })
                .map_err(|e| e.to_string())
        }))
    }

    pub fn shape(&self) -> &'static str {
        match self {
            SassEngine::Constructed(_) => "constructed",
            SassEngine::Callback(_) => "callback",
            SassEngine::Sync(_) => "sync",
            SassEngine::Raw(_) => "raw",
        }
    }

    pub fn into_compile_fn(self) -> CompileFn {
        match self {
            SassEngine::Constructed(factory) => Rc::new(move |source: String| {
                let instance = factory();
                callback_future(move |done| instance.compile(&source, done))
            }),
            SassEngine::Callback(compile) => Rc::new(move |source: String| {
                callback_future(|done| compile(&source, done))
            }),
            SassEngine::Sync(compile) => Rc::new(move |source: String| {
                let result = compile(&source).map(|output| output.css);
                async move { result }.boxed_local()
            }),
            SassEngine::Raw(compile) => Rc::new(move |source: String| {
                let result = compile(&source);
                async move { result }.boxed_local()
            }),
        }
    }
}

impl std::fmt::Debug for SassEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SassEngine::{}", self.shape())
    }
}

pub struct ScssCompiler {
    fetch: Option<Rc<dyn Fetch>>,
    document: Option<Rc<dyn Document>>,
    compile: Option<CompileFn>,
    log: Rc<dyn LogClient>,
}

impl ScssCompiler {
    pub fn new(
        fetch: Option<Rc<dyn Fetch>>,
        document: Option<Rc<dyn Document>>,
        engine: Option<SassEngine>,
        log: Rc<dyn LogClient>,
    ) -> Self {
        Self {
            fetch,
            document,
            compile: engine.map(SassEngine::into_compile_fn),
            log,
        }
    }

    /// Fetch and compile a stylesheet.
    pub async fn compile_scss(&self, path: &str) -> LoaderResult<String> {
        let fetch = self
            .fetch
            .as_ref()
            .ok_or_else(|| LoaderError::FetchUnavailable(path.to_string()))?;
        if self.document.is_none() {
            return Err(LoaderError::DocumentUnavailable(path.to_string()));
        }

        let load_failed = || LoaderError::LoadFailed {
            module: path.to_string(),
            candidates: vec![path.to_string()],
        };
        let response = fetch
            .fetch(path, FetchOptions::get())
            .await
            .map_err(|_| load_failed())?;
        if !response.ok() {
            return Err(load_failed());
        }

        self.compile_source(path, response.body).await
    }

    /// Compile already-fetched stylesheet text. Plain `.css` passes through.
    pub async fn compile_source(&self, path: &str, source: String) -> LoaderResult<String> {
        if path.ends_with(".css") {
            return Ok(source);
        }
        let compile = self
            .compile
            .as_ref()
            .ok_or_else(|| LoaderError::CompilerMissing(path.to_string()))?;
        compile(source)
            .await
            .map_err(|message| LoaderError::CompileError {
                path: path.to_string(),
                message,
            })
    }

    /// Append a `<style>` element holding `css` to the document head.
    pub fn inject_css(&self, css: &str) -> LoaderResult<ElementId> {
        let document = self
            .document
            .as_ref()
            .ok_or_else(|| LoaderError::DocumentUnavailable("inject_css".to_string()))?;
        let style = document.create_element("style");
        document.set_text_content(style, css);
        document.append_to_head(style);
        Ok(style)
    }

    /// Compile `path` and inject the result.
    pub async fn load_scss(&self, path: &str) -> LoaderResult<String> {
        let css = self.compile_scss(path).await?;
        self.inject(path, &css)?;
        Ok(css)
    }

    /// Compile and inject a stylesheet the loader has already fetched.
    pub async fn load_source(&self, path: &str, source: String) -> LoaderResult<String> {
        if self.document.is_none() {
            return Err(LoaderError::DocumentUnavailable(path.to_string()));
        }
        let css = self.compile_source(path, source).await?;
        self.inject(path, &css)?;
        Ok(css)
    }

    fn inject(&self, path: &str, css: &str) -> LoaderResult<()> {
        self.inject_css(css)?;
        self.log
            .info("scss:injected", json!({ "path": path, "bytes": css.len() }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::HeadDocument;
    use crate::fetch::MemoryFetch;
    use crate::logging::RecordingLogClient;

    const SOURCE: &str = "$c: red;\n.a { color: $c; }\n";

    struct EchoInstance;

    impl SassInstance for EchoInstance {
        fn compile(&self, source: &str, done: SassCallback) {
            done(SassCompileResult {
                status: 0,
                text: format!("/* constructed */ {}", source.len()),
                formatted: None,
            });
        }
    }

    fn scss(engine: Option<SassEngine>) -> (ScssCompiler, Rc<HeadDocument>, Rc<RecordingLogClient>) {
        let fetch = MemoryFetch::new();
        fetch.insert("styles/app.scss", SOURCE);
        fetch.insert("styles/broken.scss", ".a { color: ");
        let document = Rc::new(HeadDocument::new());
        let log = Rc::new(RecordingLogClient::new());
        let compiler = ScssCompiler::new(
            Some(Rc::new(fetch)),
            Some(document.clone()),
            engine,
            log.clone(),
        );
        (compiler, document, log)
    }

    #[tokio::test]
    async fn test_grass_default_engine() {
        let (compiler, _, _) = scss(Some(SassEngine::grass()));
        let css = compiler.compile_scss("styles/app.scss").await.unwrap();
        assert!(css.contains("color: red"));
    }

    #[tokio::test]
    async fn test_all_shapes_adapt() {
        let callback = SassEngine::Callback(Rc::new(|source: &str, done: SassCallback| {
            done(SassCompileResult {
                status: 0,
                text: source.to_uppercase(),
                formatted: None,
            })
        }));
        let sync = SassEngine::Sync(Rc::new(|_: &str| -> Result<SassOutput, String> {
            Ok(SassOutput {
                css: ".sync{}".to_string(),
            })
        }));
        let raw = SassEngine::Raw(Rc::new(|_: &str| -> Result<String, String> {
            Ok(".raw{}".to_string())
        }));
        let constructed = SassEngine::Constructed(Rc::new(|| Box::new(EchoInstance) as Box<dyn SassInstance>));

        let (c, _, _) = scss(Some(callback));
        assert!(c.compile_scss("styles/app.scss").await.unwrap().contains("$C: RED"));
        let (c, _, _) = scss(Some(sync));
        assert_eq!(c.compile_scss("styles/app.scss").await.unwrap(), ".sync{}");
        let (c, _, _) = scss(Some(raw));
        assert_eq!(c.compile_scss("styles/app.scss").await.unwrap(), ".raw{}");
        let (c, _, _) = scss(Some(constructed));
        assert!(c.compile_scss("styles/app.scss").await.unwrap().starts_with("/* constructed */"));
    }

    #[tokio::test]
    async fn test_engine_error_message_passes_through() {
        let failing = SassEngine::Callback(Rc::new(|_: &str, done: SassCallback| {
            done(SassCompileResult {
                status: 1,
                text: String::new(),
                formatted: Some("Error: expected \";\" on line 1".to_string()),
            })
        }));
        let (compiler, _, _) = scss(Some(failing));
        let err = compiler.compile_scss("styles/app.scss").await.unwrap_err();
        assert_eq!(
            err,
            LoaderError::CompileError {
                path: "styles/app.scss".to_string(),
                message: "Error: expected \";\" on line 1".to_string(),
            }
        );

        let (grass, _, _) = scss(Some(SassEngine::grass()));
        let err = grass.compile_scss("styles/broken.scss").await.unwrap_err();
        assert!(matches!(err, LoaderError::CompileError { .. }));
    }

    #[tokio::test]
    async fn test_missing_dependencies() {
        let log: Rc<dyn LogClient> = Rc::new(RecordingLogClient::new());
        let no_fetch = ScssCompiler::new(None, Some(Rc::new(HeadDocument::new())), None, log.clone());
        assert!(matches!(
            no_fetch.compile_scss("a.scss").await,
            Err(LoaderError::FetchUnavailable(_))
        ));

        let no_document = ScssCompiler::new(Some(Rc::new(MemoryFetch::new())), None, None, log);
        assert!(matches!(
            no_document.compile_scss("a.scss").await,
            Err(LoaderError::DocumentUnavailable(_))
        ));
        assert!(matches!(
            no_document.inject_css("a {}"),
            Err(LoaderError::DocumentUnavailable(_))
        ));

        let (no_engine, _, _) = scss(None);
        assert_eq!(
            no_engine.compile_scss("styles/app.scss").await.unwrap_err(),
            LoaderError::CompilerMissing("styles/app.scss".to_string())
        );
        let (with_engine, _, _) = scss(Some(SassEngine::grass()));
        assert!(matches!(
            with_engine.compile_scss("styles/missing.scss").await,
            Err(LoaderError::LoadFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_scss_injects_each_time() {
        let (compiler, document, log) = scss(Some(SassEngine::grass()));
        compiler.load_scss("styles/app.scss").await.unwrap();
        compiler.load_scss("styles/app.scss").await.unwrap();

        let styles = document.texts_of("style");
        assert_eq!(styles.len(), 2);
        assert!(styles[0].contains("color: red"));
        assert_eq!(log.named("scss:injected").len(), 2);
    }
}
