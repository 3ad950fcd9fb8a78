//! The metrics middleware (spec §4.4 item 4): per-op/per-kind counters,
//! plus throughput tallies for `list` and the watch family.

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::Result;
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Bound on the proxy channel used to tally watch throughput without
/// changing delivery semantics for the caller.
const PROXY_CHANNEL_CAPACITY: usize = 64;

/// Wraps an inner `CoreState`, recording Prometheus counters for every
/// call.
pub struct MetricsMiddleware {
    inner: Arc<dyn CoreState>,
    ops_total: IntCounterVec,
    list_items_total: IntCounterVec,
    watch_events_total: IntCounterVec,
}

impl MetricsMiddleware {
    /// Wraps `inner`, registering its counters into `registry`.
    pub fn new(inner: Arc<dyn CoreState>, registry: &Registry) -> Result<Self> {
        let ops_total = IntCounterVec::new(
            Opts::new("corestate_core_ops_total", "CoreState operations by verb and kind"),
            &["verb", "kind"],
        )
        .map_err(|e| corestate_types::CoreError::Internal(e.into()))?;
        let list_items_total = IntCounterVec::new(
            Opts::new("corestate_core_list_items_total", "Items returned by list, by kind"),
            &["kind"],
        )
        .map_err(|e| corestate_types::CoreError::Internal(e.into()))?;
        let watch_events_total = IntCounterVec::new(
            Opts::new("corestate_core_watch_events_total", "Events delivered by watch, by kind"),
            &["kind"],
        )
        .map_err(|e| corestate_types::CoreError::Internal(e.into()))?;

        registry
            .register(Box::new(ops_total.clone()))
            .map_err(|e| corestate_types::CoreError::Internal(e.into()))?;
        registry
            .register(Box::new(list_items_total.clone()))
            .map_err(|e| corestate_types::CoreError::Internal(e.into()))?;
        registry
            .register(Box::new(watch_events_total.clone()))
            .map_err(|e| corestate_types::CoreError::Internal(e.into()))?;

        Ok(Self { inner, ops_total, list_items_total, watch_events_total })
    }

    fn count_op(&self, verb: &str, kind: &str) {
        self.ops_total.with_label_values(&[verb, kind]).inc();
    }
}

#[async_trait]
impl CoreState for MetricsMiddleware {
    async fn get(&self, ptr: &ResourcePointer, opts: &GetOptions, ctx: &RequestContext) -> Result<Resource> {
        self.count_op("get", &ptr.kind);
        self.inner.get(ptr, opts, ctx).await
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        self.count_op("list", kind);
        let items = self.inner.list(namespace, kind, opts, ctx).await?;
        self.list_items_total.with_label_values(&[kind]).inc_by(items.len() as u64);
        Ok(items)
    }

    async fn create(&self, res: Resource, opts: &CreateOptions, ctx: &RequestContext) -> Result<Resource> {
        self.count_op("create", &res.ptr.kind);
        self.inner.create(res, opts, ctx).await
    }

    async fn update(&self, res: Resource, opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource> {
        self.count_op("update", &res.ptr.kind);
        self.inner.update(res, opts, ctx).await
    }

    async fn destroy(&self, ptr: &ResourcePointer, opts: &DestroyOptions, ctx: &RequestContext) -> Result<()> {
        self.count_op("destroy", &ptr.kind);
        self.inner.destroy(ptr, opts, ctx).await
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream> {
        self.count_op("watch", &ptr.kind);
        let upstream = self.inner.watch(ptr, opts, ctx).await?;
        Ok(proxy_events(upstream, ptr.kind.clone(), self.watch_events_total.clone()))
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream> {
        self.count_op("watch", kind);
        let upstream = self.inner.watch_kind(namespace, kind, opts, ctx).await?;
        Ok(proxy_events(upstream, kind.to_string(), self.watch_events_total.clone()))
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream> {
        self.count_op("watch", kind);
        let upstream = self.inner.watch_kind_aggregated(namespace, kind, opts, ctx).await?;
        Ok(proxy_batches(upstream, kind.to_string(), self.watch_events_total.clone()))
    }
}

fn proxy_events(mut upstream: EventStream, kind: String, counter: IntCounterVec) -> EventStream {
    let (tx, rx) = tokio::sync::mpsc::channel(PROXY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(event) = upstream.recv().await {
            counter.with_label_values(&[&kind]).inc();
            if tx.send(event).await.is_err() {
                break;
            }
        }
    });
    rx
}

fn proxy_batches(mut upstream: BatchStream, kind: String, counter: IntCounterVec) -> BatchStream {
    let (tx, rx) = tokio::sync::mpsc::channel(PROXY_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        while let Some(batch) = upstream.recv().await {
            counter.with_label_values(&[&kind]).inc_by(batch.len() as u64);
            if tx.send(batch).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_types::event::Event;

    struct Listing;

    #[async_trait]
    impl CoreState for Listing {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            Ok(Resource::new(ptr.clone(), vec![]))
        }
        async fn list(&self, ns: &str, kind: &str, _opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
            Ok(vec![
                Resource::new(ResourcePointer::new(ns, kind, "a"), vec![]),
                Resource::new(ResourcePointer::new(ns, kind, "b"), vec![]),
            ])
        }
        async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
            Ok(res)
        }
        async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
            Ok(res)
        }
        async fn destroy(&self, _ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
            Ok(())
        }
        async fn watch(&self, ptr: &ResourcePointer, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            let (tx, rx) = tokio::sync::mpsc::channel(4);
            let res = Resource::new(ptr.clone(), vec![]);
            tokio::spawn(async move {
                let _ = tx.send(Event::created(res)).await;
            });
            Ok(rx)
        }
        async fn watch_kind(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn watch_kind_aggregated(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<BatchStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::internal("t")
    }

    #[tokio::test]
    async fn list_tallies_item_count() {
        let registry = Registry::new();
        let mw = MetricsMiddleware::new(Arc::new(Listing), &registry).unwrap();
        let items = mw.list("default", "Cluster", &ListOptions::default(), &ctx()).await.unwrap();
        assert_eq!(items.len(), 2);
        let metric = mw.list_items_total.with_label_values(&["Cluster"]).get();
        assert_eq!(metric, 2);
    }

    #[tokio::test]
    async fn watch_proxy_preserves_events_and_counts_them() {
        let registry = Registry::new();
        let mw = MetricsMiddleware::new(Arc::new(Listing), &registry).unwrap();
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        let mut stream = mw.watch(&ptr, &WatchOptions::default(), &ctx()).await.unwrap();
        let event = stream.recv().await.unwrap();
        assert_eq!(event.kind, corestate_types::event::EventKind::Created);
    }
}
