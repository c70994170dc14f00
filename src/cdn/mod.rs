//! CDN packages
//!
//! - [`provider`]: provider bases, aliases and fallbacks
//! - [`probe`]: reachability checks with retry, classic-script loading
//! - [`resolver`]: first reachable URL for a `modules`/`tools` entry
//! - [`tools`]: globals and namespaces for `tools` and `modules`
//! - [`dynamic`]: prefix-routed modules such as `icons/Home`
//! - [`import_map`]: `{"imports": ...}` for the configured modules

pub mod dynamic;
pub mod import_map;
pub mod probe;
pub mod provider;
pub mod resolver;
pub mod tools;

pub use dynamic::DynamicModulesService;
pub use import_map::{ImportMap, ImportMapService, write_import_map};
pub use probe::{NetworkProbeService, ProbeOptions};
pub use provider::{NetworkProviderService, ProviderFields, ProxyMode};
pub use resolver::NetworkModuleResolver;
pub use tools::ToolsService;

use crate::paths::has_known_extension;

/// Filename handed to the transpiler for a CDN URL: query and fragment
/// dropped, `.js` appended when the path has no script extension.
pub(crate) fn script_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    if has_known_extension(path) || path.ends_with(".mjs") || path.ends_with(".cjs") {
        path.to_string()
    } else {
        format!("{}.js", path.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_filename() {
        assert_eq!(script_filename("https://esm.sh/react@18?dev"), "https://esm.sh/react@18.js");
        assert_eq!(script_filename("https://cdn.test/x.mjs#a"), "https://cdn.test/x.mjs");
        assert_eq!(script_filename("https://cdn.test/lib.ts"), "https://cdn.test/lib.ts");
    }
}
