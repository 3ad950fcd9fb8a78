//! The per-type in-memory cache fed by an internal watch (spec §4.6):
//! single-writer (the watch-feeding task), many-reader, explicitly
//! warning or erroring on reads of a kind that was never declared
//! cacheable (spec §5: "the cache is single-writer ... and many-reader").

use corestate_api::label_query::{self, LabelQuery};
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::{CoreError, Result};
use dashmap::DashMap;
use std::sync::Arc;

/// What happens when a caller asks the cache for a kind that was never
/// registered: whether that warns-and-falls-through or errors outright is
/// a runtime setting rather than a compile-time one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncachedReadPolicy {
    /// Log a warning and let the caller fall through to the live store.
    Warn,
    /// Reject the read outright with `CoreError::Unsupported`.
    Error,
}

/// The in-memory contents for one `(namespace, kind)` pair. Writes go
/// through `apply_*`, called only by the controller runtime's watch-feed
/// task; reads via `DashMap` are safe from any number of concurrent
/// readers.
#[derive(Default)]
struct KindCache {
    items: DashMap<ResourcePointer, Resource>,
}

impl KindCache {
    fn apply_created(&self, res: Resource) {
        self.items.insert(res.ptr.clone(), res);
    }

    fn apply_updated(&self, res: Resource) {
        self.items.insert(res.ptr.clone(), res);
    }

    fn apply_destroyed(&self, ptr: &ResourcePointer) {
        self.items.remove(ptr);
    }

    fn get(&self, ptr: &ResourcePointer) -> Option<Resource> {
        self.items.get(ptr).map(|e| e.value().clone())
    }

    fn list(&self, namespace: &str, kind: &str, queries: &[LabelQuery]) -> Vec<Resource> {
        self.items
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.ptr.namespace == namespace && r.ptr.kind == kind)
            .filter(|r| label_query::matches_all(queries, &r.labels))
            .collect()
    }
}

/// Holds one [`KindCache`] per declared-cacheable kind. A kind absent
/// from `kinds` was never declared and always falls through per
/// `policy`.
pub struct CacheRegistry {
    kinds: DashMap<String, Arc<KindCache>>,
    policy: UncachedReadPolicy,
}

impl CacheRegistry {
    /// Builds an empty registry with the given uncached-read policy.
    pub fn new(policy: UncachedReadPolicy) -> Self {
        Self { kinds: DashMap::new(), policy }
    }

    /// Declares `kind` cacheable, creating its (initially empty) cache if
    /// it doesn't already exist. Idempotent.
    pub fn declare(&self, kind: &str) {
        self.kinds.entry(kind.to_string()).or_insert_with(|| Arc::new(KindCache::default()));
    }

    /// True if `kind` was declared cacheable.
    pub fn is_cacheable(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    fn kind_cache(&self, kind: &str) -> Option<Arc<KindCache>> {
        self.kinds.get(kind).map(|e| e.value().clone())
    }

    /// Reads a single resource from the cache.
    ///
    /// Returns `Ok(None)` both when the kind is cacheable but the
    /// resource is absent, and (under [`UncachedReadPolicy::Warn`]) when
    /// the kind was never declared — the caller is expected to fall
    /// through to the live store in the latter case. Returns `Err` under
    /// [`UncachedReadPolicy::Error`] for an undeclared kind.
    pub fn get(&self, ptr: &ResourcePointer) -> Result<Option<Resource>> {
        match self.kind_cache(&ptr.kind) {
            Some(cache) => Ok(cache.get(ptr)),
            None => self.uncached(&ptr.kind).map(|()| None),
        }
    }

    /// Lists resources from the cache for a declared kind.
    pub fn list(&self, namespace: &str, kind: &str, queries: &[LabelQuery]) -> Result<Option<Vec<Resource>>> {
        match self.kind_cache(kind) {
            Some(cache) => Ok(Some(cache.list(namespace, kind, queries))),
            None => self.uncached(kind).map(|()| None),
        }
    }

    fn uncached(&self, kind: &str) -> Result<()> {
        match self.policy {
            UncachedReadPolicy::Warn => {
                tracing::warn!(kind, "read against a kind not declared cacheable; falling through to live store");
                Ok(())
            }
            UncachedReadPolicy::Error => Err(CoreError::Unsupported(format!(
                "kind {kind:?} is not declared cacheable"
            ))),
        }
    }

    /// Applies a `Created` event from the feeding watch. Panics-free: an
    /// event for an undeclared kind is ignored, since the watch-feed task
    /// only ever watches declared kinds.
    pub(crate) fn apply_created(&self, res: Resource) {
        if let Some(cache) = self.kind_cache(&res.ptr.kind) {
            cache.apply_created(res);
        }
    }

    pub(crate) fn apply_updated(&self, res: Resource) {
        if let Some(cache) = self.kind_cache(&res.ptr.kind) {
            cache.apply_updated(res);
        }
    }

    pub(crate) fn apply_destroyed(&self, ptr: &ResourcePointer) {
        if let Some(cache) = self.kind_cache(&ptr.kind) {
            cache.apply_destroyed(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res(ns: &str, kind: &str, id: &str) -> Resource {
        Resource::new(ResourcePointer::new(ns, kind, id), vec![])
    }

    #[test]
    fn undeclared_kind_warns_and_returns_none() {
        let cache = CacheRegistry::new(UncachedReadPolicy::Warn);
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        assert_eq!(cache.get(&ptr).unwrap(), None);
    }

    #[test]
    fn undeclared_kind_errors_under_error_policy() {
        let cache = CacheRegistry::new(UncachedReadPolicy::Error);
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        assert!(cache.get(&ptr).unwrap_err().is_unsupported());
    }

    #[test]
    fn declared_kind_serves_applied_writes() {
        let cache = CacheRegistry::new(UncachedReadPolicy::Error);
        cache.declare("Cluster");
        cache.apply_created(res("default", "Cluster", "c1"));
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        assert!(cache.get(&ptr).unwrap().is_some());

        cache.apply_destroyed(&ptr);
        assert!(cache.get(&ptr).unwrap().is_none());
    }

    #[test]
    fn list_filters_by_namespace_kind_and_labels() {
        let cache = CacheRegistry::new(UncachedReadPolicy::Error);
        cache.declare("Cluster");
        let mut r1 = res("default", "Cluster", "c1");
        r1.labels.insert("role".into(), "cp".into());
        let mut r2 = res("default", "Cluster", "c2");
        r2.labels.insert("role".into(), "worker".into());
        cache.apply_created(r1);
        cache.apply_created(r2);

        let queries = vec![LabelQuery::equal("role", "cp")];
        let got = cache.list("default", "Cluster", &queries).unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ptr.id, "c1");
    }
}
