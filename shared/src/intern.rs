//! Intern tables
//!
//! Aggregation works on integer ids and shared strings instead of owned
//! strings. The label-set cache is the only structure shared across
//! requests; the function table is rebuilt for every response batch.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::labels::LabelSet;

/// Cross-request cache canonicalizing label sets by their 64-bit hash.
///
/// Readers hold the shared lock; a miss drops it, takes the exclusive lock
/// and re-checks before inserting, so a racing insert of the same key
/// returns the already-present value.
#[derive(Debug, Default)]
pub struct LabelSetCache {
    inner: RwLock<HashMap<u64, Arc<LabelSet>>>,
}

impl LabelSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical shared instance for `labels`.
    pub fn canonical(&self, labels: LabelSet) -> Arc<LabelSet> {
        let key = labels.hash();
        {
            let cache = self.inner.read().unwrap();
            if let Some(hit) = cache.get(&key) {
                return Arc::clone(hit);
            }
        }
        let mut cache = self.inner.write().unwrap();
        if let Some(hit) = cache.get(&key) {
            return Arc::clone(hit);
        }
        let entry = Arc::new(labels);
        cache.insert(key, Arc::clone(&entry));
        entry
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves interned function ids against one response's name table.
#[derive(Debug, Default)]
pub struct FunctionTable {
    names: Vec<Arc<str>>,
}

impl FunctionTable {
    pub fn new(names: &[String]) -> Self {
        Self {
            names: names.iter().map(|n| Arc::from(n.as_str())).collect(),
        }
    }

    /// The shared name for `id`, or `None` when the id is out of range.
    pub fn resolve(&self, id: u64) -> Option<Arc<str>> {
        self.names.get(id as usize).map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::labels::LabelSetBuilder;

    fn labels(app: &str) -> LabelSet {
        let mut b = LabelSetBuilder::new();
        b.set("app", app);
        b.build()
    }

    #[test]
    fn test_canonical_returns_shared_instance() {
        let cache = LabelSetCache::new();
        let a = cache.canonical(labels("web"));
        let b = cache.canonical(labels("web"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_canonical_distinct_sets() {
        let cache = LabelSetCache::new();
        let a = cache.canonical(labels("web"));
        let b = cache.canonical(labels("api"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_canonical_under_contention() {
        let cache = Arc::new(LabelSetCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.canonical(labels("web")))
            })
            .collect();
        let canonical: Vec<Arc<LabelSet>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(cache.len(), 1);
        for entry in &canonical[1..] {
            assert!(Arc::ptr_eq(&canonical[0], entry));
        }
    }

    #[test]
    fn test_function_table_resolve() {
        let table = FunctionTable::new(&["foo".to_string(), "bar".to_string()]);
        assert_eq!(table.resolve(0).as_deref(), Some("foo"));
        assert_eq!(table.resolve(1).as_deref(), Some("bar"));
        assert_eq!(table.resolve(2), None);
    }

    #[test]
    fn test_function_table_shares_identity() {
        let table = FunctionTable::new(&["foo".to_string()]);
        let a = table.resolve(0).unwrap();
        let b = table.resolve(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
