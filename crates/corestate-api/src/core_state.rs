//! The `CoreState` contract (spec §4.1).

use crate::context::RequestContext;
use crate::label_query::LabelQuery;
use async_trait::async_trait;
use corestate_types::event::Event;
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::Result;

/// Options recognized by `get`. Every field must be recognized by every
/// backend or rejected with `CoreError::Unsupported` (spec §4.1).
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Force a consistent (non-cached) read. Consulted by the controller
    /// runtime's cache wrapper (spec §4.6), ignored by backends that are
    /// always consistent.
    pub consistent: bool,
}

/// Options recognized by `list`.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// An ordered sequence of label queries, ANDed together.
    pub label_queries: Vec<LabelQuery>,
}

/// Options recognized by `create`.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {}

/// Options recognized by `update`.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {}

/// Options recognized by `destroy`.
#[derive(Debug, Clone, Default)]
pub struct DestroyOptions {}

/// Options recognized by `watch`/`watchKind`/`watchKindAggregated`.
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    /// Replay every currently-matching resource as `Created` before
    /// emitting `Bootstrapped` (spec §4.1 bootstrap ordering).
    pub bootstrap_contents: bool,
    /// Label queries restricting a kind-watch to matching resources.
    pub label_queries: Vec<LabelQuery>,
    /// For `watchKindAggregated`: the maximum number of events coalesced
    /// into one batch before it is flushed.
    pub max_batch: usize,
}

/// A subscription to ordered per-resource events.
///
/// Closing (dropping) this, or cancelling the [`RequestContext`] it was
/// opened with, removes the subscription on the backend side (spec §5).
pub type EventStream = tokio::sync::mpsc::Receiver<Event>;

/// A subscription to bounded batches of coalesced events
/// (`watchKindAggregated`, spec §4.1).
pub type BatchStream = tokio::sync::mpsc::Receiver<Vec<Event>>;

/// The uniform CRUD+watch surface every backend driver and middleware
/// wrapper implements (spec §4.1). Middleware composes by holding an
/// `Arc<dyn CoreState>` (or equivalent generic) and delegating after
/// doing its own work — plain function composition, not inheritance
/// (spec §9).
#[async_trait]
pub trait CoreState: Send + Sync {
    /// Reads a single resource. `CoreError::NotFound` if absent.
    async fn get(&self, ptr: &ResourcePointer, opts: &GetOptions, ctx: &RequestContext) -> Result<Resource>;

    /// Reads every resource of `(namespace, kind)` matching `opts.label_queries`.
    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>>;

    /// Creates a new resource. Fails `AlreadyExists` if the pointer is
    /// already stored, `OwnerConflict` if `res.owner` conflicts with an
    /// existing owner policy.
    async fn create(&self, res: Resource, opts: &CreateOptions, ctx: &RequestContext) -> Result<Resource>;

    /// Updates a resource. `res.version` must match the currently stored
    /// version or the call fails `VersionConflict`; if no resource
    /// exists, fails `NotFound`.
    async fn update(&self, res: Resource, opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource>;

    /// Destroys a resource. Fails `FinalizerViolation` if `finalizers` is
    /// non-empty.
    async fn destroy(&self, ptr: &ResourcePointer, opts: &DestroyOptions, ctx: &RequestContext) -> Result<()>;

    /// Subscribes to ordered events for a single resource.
    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream>;

    /// Subscribes to ordered events for every resource of a kind.
    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream>;

    /// Subscribes to bounded batches of coalesced kind-level events,
    /// preserving per-resource order within each batch (spec §5).
    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream>;
}
