//! rwtra - runtime module loading and compilation on Boa and OXC
//!
//! Resolves, fetches, compiles and executes an application's imports at run
//! time, with no bundling step:
//! - local TSX/TS/JSX/JS modules, transpiled with OXC and executed in Boa
//! - SCSS stylesheets compiled with grass and injected into the document head
//! - CDN packages resolved across providers with fallback, plus an import map
//! - a synchronous `require` backed by an asynchronous, single-flight preload

pub mod bootstrap;
pub mod cdn;
pub mod compiler;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod paths;
pub mod registry;
pub mod require;
pub mod source;
pub mod transpiler;

// Re-export commonly used types
pub use bootstrap::{Bootstrap, BootstrapOutput, RuntimeOptions};
pub use cdn::{ImportMap, ImportMapService, ToolsService};
pub use compiler::{SassEngine, ScssCompiler, TsxCompiler};
pub use config::{BootstrapConfig, DynamicModuleRule, ModuleSpec};
pub use document::{Document, HeadDocument};
pub use engine::ScriptEngine;
pub use error::{LoaderError, LoaderResult};
pub use fetch::{DirFetch, Fetch, FetchResponse, HttpFetch, MemoryFetch};
pub use loader::{LocalModuleLoader, LocalModuleService};
pub use logging::{LogClient, LogCrateClient, RecordingLogClient};
pub use registry::ModuleRegistry;
pub use require::{Require, RequireBuilder, RequireOptions};
pub use transpiler::{TranspileError, Transpiler, TranspilerConfig};
