//! Resolved module registry
//!
//! Maps module names (canonical paths, requested names, alias keys and CDN
//! package names) to their exported values. Every loader created from one
//! bootstrap shares a single registry through cheap clones of this handle.

use boa_engine::JsValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: Rc<RefCell<HashMap<String, JsValue>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<JsValue> {
        self.modules.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.borrow().contains_key(name)
    }

    /// Store `value` under `name`, replacing any previous entry.
    pub fn insert(&self, name: &str, value: JsValue) {
        self.modules.borrow_mut().insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.modules.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.borrow().is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.borrow().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_entries() {
        let registry = ModuleRegistry::new();
        let other = registry.clone();
        registry.insert("react", JsValue::from(1));

        assert!(other.contains("react"));
        assert_eq!(other.len(), 1);
        assert_eq!(other.names(), vec!["react".to_string()]);
        assert!(other.get("missing").is_none());
    }
}
