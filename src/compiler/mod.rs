//! Per-format compiler backends
//!
//! - [`tsx`]: TypeScript/JSX/JavaScript modules, transpiled and executed in
//!   the script engine
//! - [`scss`]: Sass stylesheets, compiled to CSS and injected into the
//!   document head

pub mod scss;
pub mod tsx;

pub use scss::{CompileFn, SassCompileResult, SassEngine, SassInstance, SassOutput, ScssCompiler};
pub use tsx::{ModuleContextGuard, ModuleContextStack, ModuleFrame, TsxCompiler};

/// Extensions handled by the stylesheet backend.
pub const STYLE_EXTENSIONS: [&str; 2] = [".scss", ".css"];

pub fn is_stylesheet(path: &str) -> bool {
    STYLE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
