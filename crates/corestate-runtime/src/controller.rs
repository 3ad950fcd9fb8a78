//! Controller runtime glue (spec §4.6): two state views over the same
//! backend — `Live` (the full middleware stack) and `Cached` (the
//! per-type in-memory cache) — plus registration of cacheable types
//! before start, at which point a watch is opened and the cache
//! bootstrapped for each one.

use crate::cache::CacheRegistry;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{CoreState, GetOptions, ListOptions, WatchOptions};
use corestate_api::label_query::LabelQuery;
use corestate_types::event::EventKind;
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::{CoreError, Result};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Which backing store a read is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateView {
    /// The full middleware stack — always current, pays its full cost.
    Live,
    /// The in-memory cache, falling through to live for kinds that were
    /// never registered (subject to the cache's uncached-read policy).
    Cached,
}

/// Wires a `Live` backend to a [`CacheRegistry`], handling controller
/// registration and the watch-feed task that keeps the cache current.
pub struct ControllerRuntime {
    live: Arc<dyn CoreState>,
    cache: Arc<CacheRegistry>,
    registered: Mutex<HashSet<(String, String)>>,
}

impl ControllerRuntime {
    /// Wraps `live`, serving cached reads out of `cache`.
    pub fn new(live: Arc<dyn CoreState>, cache: Arc<CacheRegistry>) -> Self {
        Self { live, cache, registered: Mutex::new(HashSet::new()) }
    }

    /// Registers `(namespace, kind)` as cacheable. Must be called before
    /// [`Self::start`]; registering after start has no effect on an
    /// already-running watch-feed set.
    pub fn register(&self, namespace: impl Into<String>, kind: impl Into<String>) {
        let namespace = namespace.into();
        let kind = kind.into();
        self.cache.declare(&kind);
        self.registered.lock().unwrap_or_else(|e| e.into_inner()).insert((namespace, kind));
    }

    /// Opens a bootstrap-replaying watch for every registered type and
    /// spawns the single feeding task that applies its events to the
    /// cache, running until `cancellation` fires.
    pub async fn start(self: &Arc<Self>, ctx: &RequestContext, cancellation: CancellationToken) -> Result<()> {
        let registered: Vec<(String, String)> =
            self.registered.lock().unwrap_or_else(|e| e.into_inner()).iter().cloned().collect();
        for (namespace, kind) in registered {
            let opts = WatchOptions { bootstrap_contents: true, label_queries: vec![], max_batch: 0 };
            let mut stream = self.live.watch_kind(&namespace, &kind, &opts, ctx).await?;
            let cache = self.cache.clone();
            let token = cancellation.clone();
            let feed_namespace = namespace.clone();
            let feed_kind = kind.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        event = stream.recv() => {
                            let Some(event) = event else { return };
                            match event.kind {
                                EventKind::Created => {
                                    if let Some(res) = event.new {
                                        cache.apply_created(res);
                                    }
                                }
                                EventKind::Updated => {
                                    if let Some(res) = event.new {
                                        cache.apply_updated(res);
                                    }
                                }
                                EventKind::Destroyed => {
                                    if let Some(res) = event.old {
                                        cache.apply_destroyed(&res.ptr);
                                    }
                                }
                                EventKind::Bootstrapped => {
                                    tracing::info!(namespace = %feed_namespace, kind = %feed_kind, "controller cache bootstrapped");
                                }
                                EventKind::Errored => {
                                    tracing::warn!(namespace = %feed_namespace, kind = %feed_kind, "controller watch-feed ended in error");
                                    return;
                                }
                            }
                        }
                    }
                }
            });
        }
        Ok(())
    }

    /// Reads a resource through `view`.
    pub async fn get(&self, ptr: &ResourcePointer, view: StateView, ctx: &RequestContext) -> Result<Resource> {
        match view {
            StateView::Live => self.live.get(ptr, &GetOptions::default(), ctx).await,
            StateView::Cached => {
                if self.cache.is_cacheable(&ptr.kind) {
                    self.cache.get(ptr)?.ok_or_else(|| CoreError::NotFound(ptr.to_string()))
                } else {
                    self.cache.get(ptr)?;
                    self.live.get(ptr, &GetOptions::default(), ctx).await
                }
            }
        }
    }

    /// Lists resources through `view`.
    pub async fn list(
        &self,
        namespace: &str,
        kind: &str,
        queries: &[LabelQuery],
        view: StateView,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        match view {
            StateView::Live => {
                self.live.list(namespace, kind, &ListOptions { label_queries: queries.to_vec() }, ctx).await
            }
            StateView::Cached => {
                if self.cache.is_cacheable(kind) {
                    Ok(self.cache.list(namespace, kind, queries)?.unwrap_or_default())
                } else {
                    self.cache.list(namespace, kind, queries)?;
                    self.live.list(namespace, kind, &ListOptions { label_queries: queries.to_vec() }, ctx).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::UncachedReadPolicy;
    use async_trait::async_trait;
    use corestate_api::core_state::{BatchStream, CreateOptions, DestroyOptions, EventStream, UpdateOptions};
    use corestate_types::event::Event;
    use corestate_types::resource::Resource;
    use std::collections::HashMap;
    use tokio::sync::Mutex as AsyncMutex;

    struct Memory(AsyncMutex<HashMap<ResourcePointer, Resource>>);

    #[async_trait]
    impl CoreState for Memory {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            self.0.lock().await.get(ptr).cloned().ok_or_else(|| CoreError::NotFound(ptr.to_string()))
        }
        async fn list(&self, ns: &str, kind: &str, _opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
            Ok(self.0.lock().await.values().filter(|r| r.ptr.namespace == ns && r.ptr.kind == kind).cloned().collect())
        }
        async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
            self.0.lock().await.insert(res.ptr.clone(), res.clone());
            Ok(res)
        }
        async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
            self.0.lock().await.insert(res.ptr.clone(), res.clone());
            Ok(res)
        }
        async fn destroy(&self, ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
            self.0.lock().await.remove(ptr);
            Ok(())
        }
        async fn watch(&self, _ptr: &ResourcePointer, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn watch_kind(&self, ns: &str, kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            let items: Vec<Resource> =
                self.0.lock().await.values().filter(|r| r.ptr.namespace == ns && r.ptr.kind == kind).cloned().collect();
            let (tx, rx) = tokio::sync::mpsc::channel(items.len() + 1);
            for item in items {
                let _ = tx.send(Event::created(item)).await;
            }
            let _ = tx.send(Event::bootstrapped()).await;
            Ok(rx)
        }
        async fn watch_kind_aggregated(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<BatchStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn start_bootstraps_registered_kind_into_cache() {
        let live = Arc::new(Memory(AsyncMutex::new(Default::default())));
        let ctx = RequestContext::internal("t");
        live.create(Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![]), &CreateOptions::default(), &ctx)
            .await
            .unwrap();

        let cache = Arc::new(CacheRegistry::new(UncachedReadPolicy::Error));
        let runtime = Arc::new(ControllerRuntime::new(live.clone(), cache));
        runtime.register("default", "Cluster");
        let token = CancellationToken::new();
        runtime.start(&ctx, token.clone()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        let got = runtime.get(&ptr, StateView::Cached, &ctx).await.unwrap();
        assert_eq!(got.ptr.id, "c1");
    }

    #[tokio::test]
    async fn unregistered_kind_falls_through_to_live() {
        let live = Arc::new(Memory(AsyncMutex::new(Default::default())));
        let ctx = RequestContext::internal("t");
        live.create(Resource::new(ResourcePointer::new("default", "MachineSet", "m1"), vec![]), &CreateOptions::default(), &ctx)
            .await
            .unwrap();

        let cache = Arc::new(CacheRegistry::new(UncachedReadPolicy::Warn));
        let runtime = Arc::new(ControllerRuntime::new(live.clone(), cache));

        let ptr = ResourcePointer::new("default", "MachineSet", "m1");
        let got = runtime.get(&ptr, StateView::Cached, &ctx).await.unwrap();
        assert_eq!(got.ptr.id, "m1");
    }
}
