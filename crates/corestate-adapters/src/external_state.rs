//! The external-state adapter (spec §4.5): synthesizes resource listings
//! from an object-storage-backed artifact inventory. `get`/`list` only;
//! every other verb returns `unsupported`. `watchKind` is a single
//! initial listing followed by `bootstrapped` and then no further events
//! — a bootstrap-only watch, documented as such rather than pretending
//! to track the underlying store live.

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_api::label_query::{LabelQuery, LabelTerm};
use corestate_types::event::Event;
use corestate_types::resource::{Labels, Resource, ResourcePointer};
use corestate_types::{CoreError, Result};
use std::sync::Arc;

/// A hard cap on items returned by a single listing call (spec §5:
/// "object-storage listing has a 1000-item hard cap per call to bound
/// memory").
pub const LISTING_HARD_CAP: usize = 1000;

/// One artifact surfaced by the inventory, synthesized into a `Resource`.
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    /// The artifact's id within its namespace/kind.
    pub id: String,
    /// Labels attached to the synthesized resource, including the
    /// correlating label (e.g. `cluster`).
    pub labels: Labels,
    /// The synthesized resource's opaque payload.
    pub payload: Vec<u8>,
}

/// Abstracts the object-storage-backed artifact inventory this adapter
/// fronts. A real implementation lists/reads a bucket; tests substitute
/// an in-memory fixture.
#[async_trait]
pub trait ArtifactInventory: Send + Sync {
    /// Lists every artifact whose correlating label equals `correlate_value`.
    async fn list(&self, correlate_value: &str) -> Result<Vec<ArtifactRecord>>;

    /// Reads a single artifact by id, if present.
    async fn get(&self, id: &str) -> Result<Option<ArtifactRecord>>;
}

fn to_resource(namespace: &str, kind: &str, record: ArtifactRecord) -> Resource {
    let mut res = Resource::new(ResourcePointer::new(namespace, kind, record.id), record.payload);
    res.labels = record.labels;
    res
}

/// Finds the single required equality term on `correlating_label` among
/// `queries`, rejecting absence or an empty value (spec §4.5).
fn required_equality<'a>(queries: &'a [LabelQuery], correlating_label: &str) -> Result<&'a str> {
    for query in queries {
        if query.negate {
            continue;
        }
        for term in &query.terms {
            if let LabelTerm::Equal { key, value } = term {
                if key == correlating_label {
                    if value.is_empty() {
                        return Err(CoreError::validation(format!(
                            "listing requires a non-empty value for label {correlating_label:?}"
                        )));
                    }
                    return Ok(value.as_str());
                }
            }
        }
    }
    Err(CoreError::validation(format!(
        "listing requires an equality label query on {correlating_label:?}"
    )))
}

/// A `CoreState` implementation backed by [`ArtifactInventory`], scoped
/// to one `(namespace, kind)` and one correlating label key.
pub struct ExternalStateAdapter {
    namespace: String,
    kind: String,
    correlating_label: String,
    inventory: Arc<dyn ArtifactInventory>,
}

impl ExternalStateAdapter {
    /// Builds an adapter for `(namespace, kind)`, requiring every `list`
    /// to carry an equality query on `correlating_label`.
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        correlating_label: impl Into<String>,
        inventory: Arc<dyn ArtifactInventory>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            correlating_label: correlating_label.into(),
            inventory,
        }
    }

    async fn listing(&self, opts: &ListOptions) -> Result<Vec<Resource>> {
        let correlate_value = required_equality(&opts.label_queries, &self.correlating_label)?;
        let records = self.inventory.list(correlate_value).await?;
        let truncated: Vec<Resource> = records
            .into_iter()
            .take(LISTING_HARD_CAP)
            .map(|r| to_resource(&self.namespace, &self.kind, r))
            .collect();
        Ok(truncated)
    }
}

#[async_trait]
impl CoreState for ExternalStateAdapter {
    async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
        match self.inventory.get(&ptr.id).await? {
            Some(record) => Ok(to_resource(&ptr.namespace, &ptr.kind, record)),
            None => Err(CoreError::NotFound(ptr.to_string())),
        }
    }

    async fn list(&self, _namespace: &str, _kind: &str, opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
        self.listing(opts).await
    }

    async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
        Err(CoreError::Unsupported(format!("create is unsupported on external state: {}", res.ptr)))
    }

    async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
        Err(CoreError::Unsupported(format!("update is unsupported on external state: {}", res.ptr)))
    }

    async fn destroy(&self, ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
        Err(CoreError::Unsupported(format!("destroy is unsupported on external state: {ptr}")))
    }

    async fn watch(&self, ptr: &ResourcePointer, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
        Err(CoreError::Unsupported(format!("watch is unsupported on external state: {ptr}")))
    }

    async fn watch_kind(
        &self,
        _namespace: &str,
        _kind: &str,
        opts: &WatchOptions,
        _ctx: &RequestContext,
    ) -> Result<EventStream> {
        let items = self.listing(&ListOptions { label_queries: opts.label_queries.clone() }).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(items.len() + 1);
        for item in items {
            let _ = tx.send(Event::created(item)).await;
        }
        let _ = tx.send(Event::bootstrapped()).await;
        Ok(rx)
    }

    async fn watch_kind_aggregated(
        &self,
        _namespace: &str,
        _kind: &str,
        opts: &WatchOptions,
        _ctx: &RequestContext,
    ) -> Result<BatchStream> {
        let items = self.listing(&ListOptions { label_queries: opts.label_queries.clone() }).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let mut batch: Vec<Event> = items.into_iter().map(Event::created).collect();
        batch.push(Event::bootstrapped());
        let _ = tx.send(batch).await;
        Ok(rx)
    }
}
