//! Path helpers for local module resolution
//!
//! Pure functions: specifier classification, directory normalization, alias
//! keys and the ordered list of candidate files a specifier may map to.

use url::Url;

use crate::error::{LoaderError, LoaderResult};

/// Extensions probed for extension-less specifiers, in priority order.
pub const LOCAL_MODULE_EXTENSIONS: [&str; 4] = [".js", ".ts", ".jsx", ".tsx"];

/// Extensions treated as already resolved.
const KNOWN_EXTENSIONS: [&str; 4] = [".tsx", ".ts", ".jsx", ".js"];

/// A specifier is local when it is relative (`./`, `../`) or rooted (`/`).
pub fn is_local_module(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('/')
}

/// Strip leading and trailing slashes.
pub fn normalize_dir(dir: &str) -> String {
    dir.trim_matches('/').to_string()
}

/// Key under which a specifier requested from `base_dir` is cached.
pub fn make_alias_key(name: &str, base_dir: &str) -> String {
    format!("{}|{}", normalize_dir(base_dir), name)
}

/// Resolve `name` relative to `base_dir` on `origin`, returning the path
/// without its leading slash (e.g. `components/button`).
pub fn resolve_local_module_base(name: &str, base_dir: &str, origin: &Url) -> LoaderResult<String> {
    let base_dir = normalize_dir(base_dir);
    let base = if base_dir.is_empty() {
        origin.join(".")
    } else {
        origin.join(&format!("{}/", base_dir))
    }
    .map_err(|e| LoaderError::Config(format!("invalid base directory {}: {}", base_dir, e)))?;

    let resolved = base
        .join(name)
        .map_err(|e| LoaderError::Config(format!("invalid module specifier {}: {}", name, e)))?;

    Ok(resolved.path().trim_start_matches('/').to_string())
}

/// Directory part of a path, or `""` when it has none.
pub fn get_module_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

pub fn has_known_extension(path: &str) -> bool {
    KNOWN_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Ordered, de-duplicated list of files `base_path` may refer to.
///
/// The path itself comes first, then the path with each extension appended
/// (only when it lacks one), then `index` files inside it as a directory.
pub fn get_candidate_local_paths(base_path: &str) -> Vec<String> {
    let normalized = base_path.trim_end_matches('/');
    let mut candidates: Vec<String> = Vec::new();
    let mut push = |candidate: String| {
        if !candidate.is_empty() && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    };

    push(normalized.to_string());

    if !has_known_extension(normalized) {
        for ext in LOCAL_MODULE_EXTENSIONS {
            push(format!("{}{}", normalized, ext));
        }
    }

    for ext in LOCAL_MODULE_EXTENSIONS {
        let index = if normalized.is_empty() {
            format!("index{}", ext)
        } else {
            format!("{}/index{}", normalized, ext)
        };
        push(index);
    }

    candidates
}
