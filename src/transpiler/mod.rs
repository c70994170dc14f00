//! TypeScript/JSX to CommonJS transpiler using OXC
//!
//! Module sources are compiled in two passes:
//! 1. parse, strip TypeScript and lower JSX (parser, transformer, codegen)
//! 2. rewrite `import`/`export` statements into `require`/`exports` form so
//!    the body can run inside a `(require, exports, module)` function scope
//!
//! Supports:
//! - TypeScript (.ts)
//! - TSX (.tsx)
//! - JavaScript (.js)
//! - JSX (.jsx)

mod commonjs;

pub use commonjs::to_commonjs;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{JsxOptions, JsxRuntime, TransformOptions, Transformer};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during transpilation
#[derive(Error, Debug)]
pub enum TranspileError {
    #[error("Failed to parse {0}")]
    ParseError(String),

    #[error("Failed to transform {0}")]
    TransformError(String),

    #[error("Unsupported module type {0}")]
    InvalidSourceType(String),

    #[error("Failed to rewrite module syntax: {0}")]
    ModuleSyntax(String),
}

/// Result type for transpilation operations
pub type TranspileResult<T> = Result<T, TranspileError>;

/// JSX lowering and output options
#[derive(Debug, Clone)]
pub struct TranspilerConfig {
    pub minify: bool,
    pub jsx_runtime: JsxRuntimeMode,
    /// Element factory in classic mode; modules see it as a global
    pub jsx_pragma: Option<String>,
    pub jsx_pragma_frag: Option<String>,
    /// Package providing `jsx-runtime` in automatic mode
    pub jsx_import_source: Option<String>,
}

/// JSX runtime mode
#[derive(Debug, Clone, Default)]
pub enum JsxRuntimeMode {
    /// Classic mode: React.createElement calls
    #[default]
    Classic,
    /// Automatic mode: imports `jsx` from `<source>/jsx-runtime`
    Automatic,
}

impl Default for TranspilerConfig {
    fn default() -> Self {
        Self {
            minify: false,
            jsx_runtime: JsxRuntimeMode::Classic,
            jsx_pragma: Some("React.createElement".to_string()),
            jsx_pragma_frag: Some("React.Fragment".to_string()),
            jsx_import_source: None,
        }
    }
}

/// Anything that can turn a module source into a CommonJS-shaped body.
pub trait Transpile {
    fn transform(&self, source: &str, filename: &str) -> TranspileResult<String>;
}

/// OXC-backed transpiler
pub struct Transpiler {
    config: TranspilerConfig,
}

/// `file: first\nsecond` for a batch of OXC diagnostics
pub(crate) fn describe_errors<E: std::fmt::Display>(filename: &str, errors: &[E]) -> String {
    let lines: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("{}: {}", filename, lines.join("\n"))
}

impl Transpiler {
    pub fn new() -> Self {
        Self::with_config(TranspilerConfig::default())
    }

    pub fn with_config(config: TranspilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranspilerConfig {
        &self.config
    }

    fn transform_options(&self) -> TransformOptions {
        let mut jsx = JsxOptions::default();
        jsx.jsx_plugin = true;
        jsx.runtime = match self.config.jsx_runtime {
            JsxRuntimeMode::Classic => JsxRuntime::Classic,
            JsxRuntimeMode::Automatic => JsxRuntime::Automatic,
        };
        jsx.pragma = self.config.jsx_pragma.clone().map(Into::into);
        jsx.pragma_frag = self.config.jsx_pragma_frag.clone().map(Into::into);
        jsx.import_source = self.config.jsx_import_source.clone().map(Into::into);

        let mut options = TransformOptions::default();
        options.jsx = jsx;
        options
    }

    /// Source type for a module file. Plain `.js` files may contain JSX.
    fn source_type(filename: &str) -> TranspileResult<SourceType> {
        let source_type = SourceType::from_path(filename)
            .map_err(|e| TranspileError::InvalidSourceType(format!("{}: {:?}", filename, e)))?
            .with_module(true);
        Ok(if source_type.is_javascript() {
            source_type.with_jsx(true)
        } else {
            source_type
        })
    }

    /// Strip TypeScript and lower JSX, keeping ES module syntax.
    ///
    /// `filename` only picks the source type and labels errors.
    pub fn transpile(&self, source: &str, filename: &str) -> TranspileResult<String> {
        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, source, Self::source_type(filename)?).parse();
        if !parsed.errors.is_empty() {
            return Err(TranspileError::ParseError(describe_errors(filename, &parsed.errors)));
        }
        let mut program = parsed.program;

        // Semantic errors are reported but do not stop compilation
        let semantic = SemanticBuilder::new().build(&program);
        for error in &semantic.errors {
            log::warn!(target: "rwtra::transpiler", "{}: {}", filename, error);
        }

        let transformed = Transformer::new(&allocator, Path::new(filename), &self.transform_options())
            .build_with_scoping(semantic.semantic.into_scoping(), &mut program);
        if !transformed.errors.is_empty() {
            return Err(TranspileError::TransformError(describe_errors(
                filename,
                &transformed.errors,
            )));
        }

        let code = Codegen::new()
            .with_options(CodegenOptions {
                minify: self.config.minify,
                ..Default::default()
            })
            .build(&program)
            .code;
        Ok(code)
    }
}

impl Default for Transpiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Transpile for Transpiler {
    fn transform(&self, source: &str, filename: &str) -> TranspileResult<String> {
        let esm = self.transpile(source, filename)?;
        to_commonjs(&esm)
    }
}
