//! Static import scanning and preload helpers
//!
//! A regex pass over module source finds `import ... from "x"`, `import "x"`
//! and `require("x")` specifiers so they can be loaded before the module body
//! runs. The scan is a heuristic: anything it misses surfaces later as a
//! `NotYetLoaded` error from the synchronous `require`.

use futures_util::future::join_all;
use regex::Regex;
use serde_json::json;

use crate::config::DynamicModuleRule;
use crate::error::{LoaderError, LoaderResult};
use crate::logging::LogClient;
use crate::require::Require;

lazy_static::lazy_static! {
    static ref IMPORT_RE: Regex =
        Regex::new(r#"import\s+(?:[^'"]+from\s+)?["']([^"']+)["']"#).expect("import pattern is valid");
    static ref REQUIRE_RE: Regex =
        Regex::new(r#"require\(\s*["']([^"']+)["']\s*\)"#).expect("require pattern is valid");
}

/// Every specifier referenced by `source`, in first-seen order, without
/// duplicates. Imports are listed before `require` calls.
pub fn collect_module_specifiers(source: &str) -> Vec<String> {
    let mut specs: Vec<String> = Vec::new();
    let captures = IMPORT_RE
        .captures_iter(source)
        .chain(REQUIRE_RE.captures_iter(source));
    for capture in captures {
        if let Some(spec) = capture.get(1) {
            let spec = spec.as_str();
            if !specs.iter().any(|s| s == spec) {
                specs.push(spec.to_string());
            }
        }
    }
    specs
}

/// Specifiers from `source` that match one of the dynamic-module prefixes.
pub fn collect_dynamic_module_imports(source: &str, rules: &[DynamicModuleRule]) -> Vec<String> {
    if rules.is_empty() {
        return Vec::new();
    }
    collect_module_specifiers(source)
        .into_iter()
        .filter(|spec| rules.iter().any(|rule| rule.matches(spec)))
        .collect()
}

/// Load every specifier in `source` through `require_async`, relative to
/// `base_dir`. All loads run concurrently; failures are collected into a
/// single [`LoaderError::PreloadFailed`].
pub async fn preload_modules_from_source(
    source: &str,
    require: &Require,
    base_dir: &str,
) -> LoaderResult<()> {
    let specs = collect_module_specifiers(source);
    if specs.is_empty() {
        return Ok(());
    }

    let results = join_all(
        specs
            .iter()
            .map(|name| require.require_async(name, Some(base_dir))),
    )
    .await;

    let failures: Vec<(String, String)> = specs
        .into_iter()
        .zip(results)
        .filter_map(|(name, result)| result.err().map(|e| (name, e.to_string())))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(LoaderError::PreloadFailed(failures))
    }
}

/// Load the dynamic-module specifiers found in `source`. Failures are only
/// logged.
pub async fn preload_dynamic_modules_from_source(
    source: &str,
    require: &Require,
    rules: &[DynamicModuleRule],
    log: &dyn LogClient,
) {
    let specs = collect_dynamic_module_imports(source, rules);
    if specs.is_empty() {
        return;
    }

    let results = join_all(specs.iter().map(|name| require.require_async(name, None))).await;
    for (name, result) in specs.iter().zip(results) {
        if let Err(e) = result {
            log.warn(
                "preload:failed",
                json!({ "name": name, "error": e.to_string() }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_module_specifiers() {
        let source = r#"
            import React from "react";
            import { Button,
                     Card } from './components/ui';
            import "./styles.scss";
            import type { Props } from "./types";
            const lazy = require("./lazy");
            const again = require( 'react' );
        "#;
        assert_eq!(
            collect_module_specifiers(source),
            vec!["react", "./components/ui", "./styles.scss", "./types", "./lazy"]
        );
    }

    #[test]
    fn test_collect_nothing() {
        assert!(collect_module_specifiers("const a = 1;").is_empty());
    }

    #[test]
    fn test_collect_dynamic_module_imports() {
        let rules = vec![DynamicModuleRule {
            prefix: "icons/".to_string(),
            ..Default::default()
        }];
        let source = r#"
            import Home from "icons/Home";
            import React from "react";
            const Star = require("icons/Star");
        "#;
        assert_eq!(
            collect_dynamic_module_imports(source, &rules),
            vec!["icons/Home", "icons/Star"]
        );
        assert!(collect_dynamic_module_imports(source, &[]).is_empty());
    }
}
