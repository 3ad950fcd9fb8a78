//! The in-memory driver (spec §4.2): "Pure memory store with a bounded
//! history buffer (gap 20 versions, capacity 10 000) so slow watchers get
//! a chance to catch up; used for ephemeral and meta namespaces and as a
//! cache front."

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_api::label_query::matches_all;
use corestate_types::event::Event;
use corestate_types::resource::{Phase, Resource, ResourcePointer};
use corestate_types::{CoreError, Result};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::subscription::WatchRegistry;

/// Number of past versions kept per resource so a watcher that briefly
/// falls behind can still be caught up from the buffer instead of losing
/// events outright.
const HISTORY_GAP: usize = 20;
/// Total historical entries kept across the whole store before the
/// oldest are evicted.
const HISTORY_CAPACITY: usize = 10_000;

struct Store {
    live: HashMap<ResourcePointer, Resource>,
    history: HashMap<ResourcePointer, VecDeque<Resource>>,
    history_len: usize,
}

impl Store {
    fn record_history(&mut self, ptr: &ResourcePointer, snapshot: Resource) {
        let buf = self.history.entry(ptr.clone()).or_default();
        buf.push_back(snapshot);
        self.history_len += 1;
        while buf.len() > HISTORY_GAP {
            buf.pop_front();
            self.history_len -= 1;
        }
        while self.history_len > HISTORY_CAPACITY {
            // Evict from the oldest-touched resource's buffer; a store-wide
            // LRU isn't tracked, so fall back to evicting from whichever
            // buffer currently holds the most history.
            if let Some((_, buf)) = self.history.iter_mut().max_by_key(|(_, b)| b.len()) {
                if buf.pop_front().is_some() {
                    self.history_len -= 1;
                    continue;
                }
            }
            break;
        }
    }
}

/// A pure in-memory `CoreState` backend.
pub struct MemoryDriver {
    store: RwLock<Store>,
    watches: WatchRegistry,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    /// Builds an empty store.
    pub fn new() -> Self {
        Self {
            store: RwLock::new(Store { live: HashMap::new(), history: HashMap::new(), history_len: 0 }),
            watches: WatchRegistry::default(),
        }
    }

    /// Returns the buffered past versions of `ptr`, oldest first, kept so
    /// a watcher that falls behind by up to [`HISTORY_GAP`] versions can
    /// be caught up instead of missing events outright.
    pub async fn history_for(&self, ptr: &ResourcePointer) -> Vec<Resource> {
        self.store.read().await.history.get(ptr).map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl CoreState for MemoryDriver {
    async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
        self.store
            .read()
            .await
            .live
            .get(ptr)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(ptr.to_string()))
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        _ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        let store = self.store.read().await;
        Ok(store
            .live
            .values()
            .filter(|r| r.ptr.namespace == namespace && r.ptr.kind == kind)
            .filter(|r| matches_all(&opts.label_queries, &r.labels))
            .cloned()
            .collect())
    }

    async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
        let mut store = self.store.write().await;
        if store.live.contains_key(&res.ptr) {
            return Err(CoreError::AlreadyExists(res.ptr.to_string()));
        }
        let mut stored = res;
        stored.version = stored.version.next();
        store.live.insert(stored.ptr.clone(), stored.clone());
        store.record_history(&stored.ptr, stored.clone());
        drop(store);
        self.watches.publish(&stored.ptr, &stored.labels, Event::created(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
        let mut store = self.store.write().await;
        let current = store
            .live
            .get(&res.ptr)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(res.ptr.to_string()))?;
        if current.version != res.version {
            return Err(CoreError::VersionConflict(res.ptr.to_string()));
        }
        if current.phase == Phase::TearingDown && res.phase == Phase::Running {
            return Err(CoreError::validation(format!(
                "{} is tearing down and cannot return to running",
                res.ptr
            )));
        }
        let mut updated = res;
        updated.version = current.version.next();
        store.live.insert(updated.ptr.clone(), updated.clone());
        store.record_history(&updated.ptr, updated.clone());
        drop(store);
        self.watches.publish(&updated.ptr, &updated.labels, Event::updated(current, updated.clone()));
        Ok(updated)
    }

    async fn destroy(&self, ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
        let mut store = self.store.write().await;
        let current = store.live.get(ptr).cloned().ok_or_else(|| CoreError::NotFound(ptr.to_string()))?;
        if !current.finalizers.is_empty() {
            return Err(CoreError::FinalizerViolation(ptr.to_string()));
        }
        store.live.remove(ptr);
        drop(store);
        self.watches.publish(ptr, &current.labels, Event::destroyed(current));
        Ok(())
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
        let (rx, handle) = self.watches.subscribe_pointer(ptr.clone());
        if opts.bootstrap_contents {
            if let Some(r) = self.store.read().await.live.get(ptr).cloned() {
                handle.deliver(Event::created(r));
            }
            handle.deliver(Event::bootstrapped());
        }
        Ok(rx)
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        _ctx: &RequestContext,
    ) -> Result<EventStream> {
        let (rx, handle) = self.watches.subscribe_kind(namespace, kind, opts.label_queries.clone());
        if opts.bootstrap_contents {
            self.bootstrap_kind(namespace, kind, opts, &handle).await;
        }
        Ok(rx)
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        _ctx: &RequestContext,
    ) -> Result<BatchStream> {
        let (rx, handle) =
            self.watches.subscribe_kind_aggregated(namespace, kind, opts.label_queries.clone(), opts.max_batch);
        if opts.bootstrap_contents {
            self.bootstrap_kind(namespace, kind, opts, &handle).await;
        }
        Ok(rx)
    }
}

impl MemoryDriver {
    async fn bootstrap_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        handle: &crate::subscription::BootstrapHandle,
    ) {
        let matching: Vec<Resource> = {
            let store = self.store.read().await;
            store
                .live
                .values()
                .filter(|r| r.ptr.namespace == namespace && r.ptr.kind == kind)
                .filter(|r| matches_all(&opts.label_queries, &r.labels))
                .cloned()
                .collect()
        };
        for r in matching {
            handle.deliver(Event::created(r));
        }
        handle.deliver(Event::bootstrapped());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_api::context::RequestContext;

    fn ctx() -> RequestContext {
        RequestContext::internal("t1")
    }

    fn res(ns: &str, kind: &str, id: &str) -> Resource {
        Resource::new(ResourcePointer::new(ns, kind, id), b"payload".to_vec())
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let d = MemoryDriver::new();
        let created = d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();
        assert!(created.version > corestate_types::resource::Version::NONE);
        let got = d.get(&created.ptr, &GetOptions::default(), &ctx()).await.unwrap();
        assert_eq!(got.payload, b"payload");
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let d = MemoryDriver::new();
        d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();
        let err = d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_requires_matching_version() {
        let d = MemoryDriver::new();
        let created = d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();
        let mut stale = created.clone();
        stale.version = corestate_types::resource::Version::NONE;
        let err = d.update(stale, &UpdateOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_conflict());

        let mut good = created;
        good.payload = b"new".to_vec();
        let updated = d.update(good, &UpdateOptions::default(), &ctx()).await.unwrap();
        assert_eq!(updated.payload, b"new");
    }

    #[tokio::test]
    async fn destroy_gated_on_finalizers() {
        let d = MemoryDriver::new();
        let mut r = res("default", "Cluster", "c1");
        r.add_finalizer("cleanup");
        let created = d.create(r, &CreateOptions::default(), &ctx()).await.unwrap();
        let err = d.destroy(&created.ptr, &DestroyOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_finalizer_violation());

        let mut cleared = created.clone();
        cleared.remove_finalizer("cleanup");
        let cleared = d.update(cleared, &UpdateOptions::default(), &ctx()).await.unwrap();
        d.destroy(&cleared.ptr, &DestroyOptions::default(), &ctx()).await.unwrap();
        assert!(d.get(&created.ptr, &GetOptions::default(), &ctx()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn history_buffer_retains_recent_versions() {
        let d = MemoryDriver::new();
        let created = d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();
        let mut next = created;
        for i in 0..3 {
            next.payload = format!("v{i}").into_bytes();
            next = d.update(next, &UpdateOptions::default(), &ctx()).await.unwrap();
        }
        let history = d.history_for(&next.ptr).await;
        assert_eq!(history.len(), 4);
        assert_eq!(history.last().unwrap().payload, b"v2");
    }

    #[tokio::test]
    async fn watch_kind_bootstrap_replays_then_bootstrapped() {
        let d = MemoryDriver::new();
        d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();
        let mut rx = d
            .watch_kind(
                "default",
                "Cluster",
                &WatchOptions { bootstrap_contents: true, ..Default::default() },
                &ctx(),
            )
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, corestate_types::event::EventKind::Created);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, corestate_types::event::EventKind::Bootstrapped);
    }

    #[tokio::test]
    async fn a_second_watcher_bootstrapping_does_not_replay_into_the_first() {
        let d = MemoryDriver::new();
        d.create(res("default", "Cluster", "c1"), &CreateOptions::default(), &ctx()).await.unwrap();

        let opts = WatchOptions { bootstrap_contents: true, ..Default::default() };
        let mut first = d.watch_kind("default", "Cluster", &opts, &ctx()).await.unwrap();
        assert_eq!(first.recv().await.unwrap().kind, corestate_types::event::EventKind::Created);
        assert_eq!(first.recv().await.unwrap().kind, corestate_types::event::EventKind::Bootstrapped);

        // A second bootstrap watcher subscribing later must not cause the
        // first watcher to see another replay or a second `Bootstrapped`.
        let mut second = d.watch_kind("default", "Cluster", &opts, &ctx()).await.unwrap();
        assert_eq!(second.recv().await.unwrap().kind, corestate_types::event::EventKind::Created);
        assert_eq!(second.recv().await.unwrap().kind, corestate_types::event::EventKind::Bootstrapped);

        assert!(first.try_recv().is_err());
    }
}
