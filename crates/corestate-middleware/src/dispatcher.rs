//! The namespaced dispatcher (spec §4.4 item 5): "switches on namespace
//! prefix to the appropriate backend; unknown namespaces fall through to
//! the default backend."

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Routes every `CoreState` call to a backend chosen by longest registered
/// namespace prefix, falling through to `default` for anything unmatched
/// (spec §3: well-known namespaces `default`, `ephemeral`, `virtual`,
/// `external`, `metrics`, `meta`, plus any prefix-matched infra-provider
/// namespace).
pub struct NamespacedDispatcher {
    routes: HashMap<String, Arc<dyn CoreState>>,
    default: Arc<dyn CoreState>,
}

impl NamespacedDispatcher {
    /// Builds a dispatcher with `default` as the fallback backend and no
    /// namespace-specific routes yet.
    pub fn new(default: Arc<dyn CoreState>) -> Self {
        Self { routes: HashMap::new(), default }
    }

    /// Registers `backend` for `namespace`, overriding any prior
    /// registration for the same string. `namespace` may be a well-known
    /// namespace matched exactly or an infra-provider prefix matched
    /// against any namespace that starts with it.
    pub fn route(mut self, namespace: impl Into<String>, backend: Arc<dyn CoreState>) -> Self {
        self.routes.insert(namespace.into(), backend);
        self
    }

    /// Picks the registered route whose key is the longest prefix of
    /// `namespace` (an exact match is just the longest possible prefix),
    /// falling back to `default` when nothing matches.
    fn backend_for(&self, namespace: &str) -> &Arc<dyn CoreState> {
        self.routes
            .iter()
            .filter(|(prefix, _)| namespace.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, backend)| backend)
            .unwrap_or(&self.default)
    }
}

#[async_trait]
impl CoreState for NamespacedDispatcher {
    async fn get(&self, ptr: &ResourcePointer, opts: &GetOptions, ctx: &RequestContext) -> Result<Resource> {
        self.backend_for(&ptr.namespace).get(ptr, opts, ctx).await
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        self.backend_for(namespace).list(namespace, kind, opts, ctx).await
    }

    async fn create(&self, res: Resource, opts: &CreateOptions, ctx: &RequestContext) -> Result<Resource> {
        self.backend_for(&res.ptr.namespace).create(res, opts, ctx).await
    }

    async fn update(&self, res: Resource, opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource> {
        self.backend_for(&res.ptr.namespace).update(res, opts, ctx).await
    }

    async fn destroy(&self, ptr: &ResourcePointer, opts: &DestroyOptions, ctx: &RequestContext) -> Result<()> {
        self.backend_for(&ptr.namespace).destroy(ptr, opts, ctx).await
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream> {
        self.backend_for(&ptr.namespace).watch(ptr, opts, ctx).await
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream> {
        self.backend_for(namespace).watch_kind(namespace, kind, opts, ctx).await
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream> {
        self.backend_for(namespace).watch_kind_aggregated(namespace, kind, opts, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_api::core_state::{CreateOptions, GetOptions};
    use corestate_types::resource::Resource;

    struct Tagged(&'static str);

    #[async_trait]
    impl CoreState for Tagged {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            let mut r = Resource::new(ptr.clone(), vec![]);
            r.annotations.insert("backend".into(), self.0.into());
            Ok(r)
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

    fn ctx() -> RequestContext {
        RequestContext::internal("t1")
    }

    #[tokio::test]
    async fn routes_registered_namespace_and_falls_through_for_unknown() {
        let dispatcher = NamespacedDispatcher::new(Arc::new(Tagged("default")))
            .route("metrics", Arc::new(Tagged("metrics")));

        let metrics_ptr = ResourcePointer::new("metrics", "Counter", "c1");
        let got = dispatcher.get(&metrics_ptr, &GetOptions::default(), &ctx()).await.unwrap();
        assert_eq!(got.annotations.get("backend").unwrap(), "metrics");

        let unknown_ptr = ResourcePointer::new("some-infra-provider", "Thing", "t1");
        let got = dispatcher.get(&unknown_ptr, &GetOptions::default(), &ctx()).await.unwrap();
        assert_eq!(got.annotations.get("backend").unwrap(), "default");
    }

    #[tokio::test]
    async fn routes_by_longest_matching_namespace_prefix() {
        let dispatcher = NamespacedDispatcher::new(Arc::new(Tagged("default")))
            .route("infra-", Arc::new(Tagged("infra-generic")))
            .route("infra-aws", Arc::new(Tagged("infra-aws")));

        let generic_ptr = ResourcePointer::new("infra-gcp", "Thing", "t1");
        let got = dispatcher.get(&generic_ptr, &GetOptions::default(), &ctx()).await.unwrap();
        assert_eq!(got.annotations.get("backend").unwrap(), "infra-generic");

        let aws_ptr = ResourcePointer::new("infra-aws-east", "Thing", "t1");
        let got = dispatcher.get(&aws_ptr, &GetOptions::default(), &ctx()).await.unwrap();
        assert_eq!(got.annotations.get("backend").unwrap(), "infra-aws");
    }
}
