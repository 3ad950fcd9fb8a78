//! The pluggable authorizer seam (spec §4.4 Authorization, §7).

use crate::context::RequestContext;
use async_trait::async_trait;
use corestate_types::access::Access;
use corestate_types::Result;

/// Evaluates the caller's ambient identity against an operation.
///
/// Implementations must not let `get`/`watch` on a non-existent resource
/// turn into a permission oracle (spec §7): authorization is evaluated
/// against the pointer alone, before the backend is consulted, so a
/// caller cannot distinguish "not found" from "forbidden" by timing or
/// error kind.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authorizes `access` for the caller described by `ctx`.
    /// `ctx.internal` callers always pass (spec §8).
    async fn authorize(&self, access: &Access, ctx: &RequestContext) -> Result<()>;

    /// For cluster-scoped resources, resolves the caller's per-cluster
    /// ACL-augmented role and substitutes it into a context used for the
    /// remainder of the operation (spec §7). The default implementation
    /// is a no-op for authorizers that don't model per-cluster grants.
    async fn resolve_scoped_role(&self, _cluster_id: &str, ctx: &mut RequestContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}
