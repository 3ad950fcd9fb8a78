//! The authorization middleware (spec §4.4 item 3, §7).

use async_trait::async_trait;
use corestate_api::authorizer::Authorizer;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_types::access::{Access, Verb};
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::Result;
use std::sync::Arc;

/// A resource's pointer alone determines its cluster scope for role
/// resolution (spec §7): only `Cluster` resources are addressed by their
/// own cluster id at the pointer level, so scoped-role resolution is only
/// attempted for them. Other kinds authorize against the caller's base
/// role; a controller wanting per-cluster ACLs on e.g. `MachineSet`
/// resolves the role itself before calling in with an already-scoped
/// context.
fn cluster_scope(ptr: &ResourcePointer) -> Option<&str> {
    (ptr.kind == "Cluster").then_some(ptr.id.as_str())
}

/// Wraps an inner `CoreState`, authorizing every operation against the
/// caller's ambient identity before delegating.
///
/// Authorization is evaluated against the pointer alone, before the
/// backend is consulted, so `get`/`watch` on a non-existent resource
/// cannot be used to probe existence by error kind or timing (spec §7).
/// `ctx.internal` contexts bypass authorization entirely (spec §8).
pub struct AuthorizationMiddleware {
    inner: Arc<dyn CoreState>,
    authorizer: Arc<dyn Authorizer>,
}

impl AuthorizationMiddleware {
    /// Wraps `inner`, authorizing through `authorizer`.
    pub fn new(inner: Arc<dyn CoreState>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { inner, authorizer }
    }

    async fn authorize(&self, ptr: &ResourcePointer, verb: Verb, ctx: &RequestContext) -> Result<RequestContext> {
        let mut scoped = ctx.child();
        if ctx.internal {
            return Ok(scoped);
        }
        if let Some(cluster_id) = cluster_scope(ptr) {
            self.authorizer.resolve_scoped_role(cluster_id, &mut scoped).await?;
        }
        let access = Access::new(ptr.clone(), verb);
        self.authorizer.authorize(&access, &scoped).await?;
        Ok(scoped)
    }
}

#[async_trait]
impl CoreState for AuthorizationMiddleware {
    async fn get(&self, ptr: &ResourcePointer, opts: &GetOptions, ctx: &RequestContext) -> Result<Resource> {
        let scoped = self.authorize(ptr, Verb::Get, ctx).await?;
        self.inner.get(ptr, opts, &scoped).await
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        let ptr = ResourcePointer::new(namespace, kind, "");
        let scoped = self.authorize(&ptr, Verb::List, ctx).await?;
        self.inner.list(namespace, kind, opts, &scoped).await
    }

    async fn create(&self, res: Resource, opts: &CreateOptions, ctx: &RequestContext) -> Result<Resource> {
        let scoped = self.authorize(&res.ptr, Verb::Create, ctx).await?;
        self.inner.create(res, opts, &scoped).await
    }

    async fn update(&self, res: Resource, opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource> {
        let scoped = self.authorize(&res.ptr, Verb::Update, ctx).await?;
        self.inner.update(res, opts, &scoped).await
    }

    async fn destroy(&self, ptr: &ResourcePointer, opts: &DestroyOptions, ctx: &RequestContext) -> Result<()> {
        let scoped = self.authorize(ptr, Verb::Destroy, ctx).await?;
        self.inner.destroy(ptr, opts, &scoped).await
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream> {
        let scoped = self.authorize(ptr, Verb::Watch, ctx).await?;
        self.inner.watch(ptr, opts, &scoped).await
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream> {
        let ptr = ResourcePointer::new(namespace, kind, "");
        let scoped = self.authorize(&ptr, Verb::Watch, ctx).await?;
        self.inner.watch_kind(namespace, kind, opts, &scoped).await
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream> {
        let ptr = ResourcePointer::new(namespace, kind, "");
        let scoped = self.authorize(&ptr, Verb::Watch, ctx).await?;
        self.inner.watch_kind_aggregated(namespace, kind, opts, &scoped).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_types::error::CoreError;

    struct AlwaysDeny;

    #[async_trait]
    impl Authorizer for AlwaysDeny {
        async fn authorize(&self, access: &Access, _ctx: &RequestContext) -> Result<()> {
            Err(CoreError::PermissionDenied(format!("role cannot {:?} {}", access.verb, access.ptr)))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl CoreState for Unreachable {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            panic!("backend should not be called for {ptr}")
        }
        async fn list(&self, _ns: &str, _kind: &str, _opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
            panic!("backend should not be called")
        }
        async fn create(&self, _res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
            panic!("backend should not be called")
        }
        async fn update(&self, _res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
            panic!("backend should not be called")
        }
        async fn destroy(&self, _ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
            panic!("backend should not be called")
        }
        async fn watch(&self, _ptr: &ResourcePointer, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            panic!("backend should not be called")
        }
        async fn watch_kind(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
            panic!("backend should not be called")
        }
        async fn watch_kind_aggregated(&self, _ns: &str, _kind: &str, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<BatchStream> {
            panic!("backend should not be called")
        }
    }

    #[tokio::test]
    async fn denied_caller_never_reaches_backend() {
        let mw = AuthorizationMiddleware::new(Arc::new(Unreachable), Arc::new(AlwaysDeny));
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        let ctx = RequestContext::new(corestate_api::Actor::default(), "t1");
        let err = mw.get(&ptr, &GetOptions::default(), &ctx).await.unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[tokio::test]
    async fn internal_context_bypasses_authorizer_and_reaches_backend() {
        struct Echo;
        #[async_trait]
        impl CoreState for Echo {
            async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
                Ok(Resource::new(ptr.clone(), vec![]))
            }
            async fn list(&self, _ns: &str, _kind: &str, _opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
                Ok(vec![])
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
            async fn watch(&self, _ptr: &ResourcePointer, _opts: &WatchOptions, _ctx: &RequestContext) -> Result<EventStream> {
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
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

        let mw = AuthorizationMiddleware::new(Arc::new(Echo), Arc::new(AlwaysDeny));
        let ptr = ResourcePointer::new("default", "Cluster", "c1");
        let ctx = RequestContext::internal("t1");
        mw.get(&ptr, &GetOptions::default(), &ctx).await.unwrap();
    }
}
