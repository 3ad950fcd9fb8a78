//! The pluggable validator seam (spec §4.4), keyed by resource kind.

use crate::context::RequestContext;
use async_trait::async_trait;
use corestate_types::resource::Resource;
use corestate_types::Result;

/// A validator registered for one resource kind.
///
/// Receives `(ctx, old?, new?)` for update and destroy so it can
/// distinguish not-found from rejected (spec §4.4: "oldRes looked up
/// first so validation distinguishes not-found from rejected"). A
/// rejection returns `Err(CoreError::Validation(_))`; the validation
/// middleware folds every registered validator's result for a kind into
/// one multi-error via `CoreError::merge`.
#[async_trait]
pub trait Validator: Send + Sync {
    /// The resource kind this validator applies to.
    fn kind(&self) -> &str;

    /// Validates a `create`. There is no `old` by definition.
    async fn validate_create(&self, new: &Resource, ctx: &RequestContext) -> Result<()>;

    /// Validates an `update`. `old` is the currently stored resource.
    async fn validate_update(&self, old: &Resource, new: &Resource, ctx: &RequestContext) -> Result<()>;

    /// Validates a `destroy`. `old` is the currently stored resource.
    async fn validate_destroy(&self, old: &Resource, ctx: &RequestContext) -> Result<()> {
        let _ = (old, ctx);
        Ok(())
    }
}
