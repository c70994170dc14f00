//! Loader error types
//!
//! Every failure the loader can surface. The enum is `Clone` because a single
//! in-flight load is awaited by many callers through a shared future, and each
//! of them receives the same error.

use thiserror::Error;

/// Loader error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Fetch is unavailable: {0}")]
    FetchUnavailable(String),

    #[error("Document is unavailable: {0}")]
    DocumentUnavailable(String),

    #[error("Transpiler is unavailable when transforming {0}")]
    TranspilerUnavailable(String),

    #[error("Sass compiler missing when compiling {0}")]
    CompilerMissing(String),

    #[error("Failed to load module: {module} (tried: {})", .candidates.join(", "))]
    LoadFailed {
        module: String,
        candidates: Vec<String>,
    },

    #[error("Failed to load {path} (status {status})")]
    FetchFailed { path: String, status: u16 },

    #[error("Module not yet loaded: {0} (use a preload step via require_async for dynamic modules)")]
    NotYetLoaded(String),

    #[error("Module not registered: {0}")]
    ModuleNotRegistered(String),

    #[error("Global not found after loading {url}: {global} (module {module})")]
    GlobalNotFound {
        module: String,
        url: String,
        global: String,
    },

    #[error("Failed to compile {path}: {message}")]
    CompileError { path: String, message: String },

    #[error("Module {path} threw during execution: {message}")]
    ExecutionFailed { path: String, message: String },

    #[error("Failed to preload module(s): {}. Check file paths and dynamic module rules.", format_failures(.0))]
    PreloadFailed(Vec<(String, String)>),

    #[error("Circular import detected: {}", .0.join(" -> "))]
    CircularImport(Vec<String>),

    #[error("No dynamic rule for module: {0}")]
    NoDynamicRule(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Script error in {url}: {message}")]
    Script { url: String, message: String },

    #[error("Script engine is busy running another script")]
    EngineBusy,
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, error)| format!("{}: {}", name, error))
        .collect::<Vec<_>>()
        .join(", ")
}

impl LoaderError {
    /// Whether a later retry of the same request can succeed without a
    /// configuration change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoaderError::LoadFailed { .. }
                | LoaderError::FetchFailed { .. }
                | LoaderError::GlobalNotFound { .. }
                | LoaderError::NotYetLoaded(_)
                | LoaderError::Script { .. }
        )
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        LoaderError::Config(err.to_string())
    }
}

/// Result type for loader operations
pub type LoaderResult<T> = Result<T, LoaderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_failed_lists_every_candidate() {
        let err = LoaderError::LoadFailed {
            module: "dir/mod".to_string(),
            candidates: vec!["dir/mod".to_string(), "dir/mod.js".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Failed to load module: dir/mod (tried: dir/mod, dir/mod.js)"
        );
    }

    #[test]
    fn test_preload_failed_message() {
        let err = LoaderError::PreloadFailed(vec![
            ("./a".to_string(), "boom".to_string()),
            ("./b".to_string(), "bang".to_string()),
        ]);
        let message = err.to_string();
        assert!(message.contains("./a: boom, ./b: bang"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(LoaderError::NotYetLoaded("x".into()).is_retryable());
        assert!(!LoaderError::ModuleNotRegistered("x".into()).is_retryable());
        assert!(!LoaderError::FetchUnavailable("x".into()).is_retryable());
    }
}
