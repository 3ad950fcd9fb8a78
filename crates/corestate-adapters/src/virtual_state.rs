//! The `run-computed` virtual-state entry point (spec §4.5): "register a
//! producer that periodically re-derives a synthetic resource from the
//! underlying state and publishes it to the virtual namespace. Consumers
//! see it like any other resource; producers are cancellable."

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{CoreState, CreateOptions, GetOptions, UpdateOptions};
use corestate_types::resource::Resource;
use corestate_types::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A producer of one synthetic, periodically-recomputed resource.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Derives the current value of the computed resource. Called once
    /// per tick; errors are logged and skipped rather than stopping the
    /// producer, since a transient failure to recompute should not take
    /// the previously-published value offline.
    async fn compute(&self, ctx: &RequestContext) -> Result<Resource>;

    /// How often this producer recomputes its resource.
    fn interval(&self) -> Duration;

    /// A human-readable name used in logs.
    fn name(&self) -> &str;
}

/// Runs registered [`Producer`]s against a `virtual`-namespace backend,
/// republishing their output on each tick until cancelled.
pub struct VirtualStateRunner {
    backend: Arc<dyn CoreState>,
}

impl VirtualStateRunner {
    /// Wraps the backend serving the `virtual` namespace.
    pub fn new(backend: Arc<dyn CoreState>) -> Self {
        Self { backend }
    }

    /// Spawns `producer`'s recomputation loop, stopping when
    /// `cancellation` fires. Returns the task handle so the caller can
    /// await a clean shutdown.
    pub fn run_computed(
        self: &Arc<Self>,
        producer: Arc<dyn Producer>,
        cancellation: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(producer.interval());
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        tracing::debug!(producer = producer.name(), "virtual state producer cancelled");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = this.publish_once(producer.as_ref(), &cancellation).await {
                            tracing::warn!(producer = producer.name(), error = %e, "virtual state recompute failed");
                        }
                    }
                }
            }
        })
    }

    async fn publish_once(&self, producer: &dyn Producer, cancellation: &CancellationToken) -> Result<()> {
        let ctx = RequestContext {
            actor: Default::default(),
            trace_id: format!("virtual-state:{}", producer.name()),
            internal: true,
            cancellation: cancellation.child_token(),
        };
        let computed = producer.compute(&ctx).await?;
        match self.backend.get(&computed.ptr, &GetOptions::default(), &ctx).await {
            Ok(current) => {
                let mut next = computed;
                next.version = current.version;
                self.backend.update(next, &UpdateOptions::default(), &ctx).await?;
            }
            Err(e) if e.is_not_found() => {
                self.backend.create(computed, &CreateOptions::default(), &ctx).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
