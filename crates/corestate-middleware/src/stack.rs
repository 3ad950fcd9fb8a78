//! Assembles the full middleware chain in the order fixed by spec §4.4:
//! audit (outermost) → validation → authorization → metrics →
//! namespaced dispatcher (innermost).

use crate::dispatcher::NamespacedDispatcher;
use crate::{AuditMiddleware, AuthorizationMiddleware, MetricsMiddleware, ValidationMiddleware};
use corestate_api::core_state::CoreState;
use corestate_api::Authorizer;
use corestate_types::Result;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Audit-layer configuration; `None` elsewhere in this module means the
/// audit middleware is entirely skipped (`logs.audit.enabled = false`).
pub struct AuditSettings {
    /// Directory holding daily `YYYY-MM-DD.jsonlog` files and `audit.db`.
    pub dir: PathBuf,
    /// Retention window in days (spec §4.7, default 30).
    pub retention_days: u32,
    /// How often the retention-cleanup loop runs.
    pub cleanup_interval: Duration,
}

/// Builds the full chain over `dispatcher`, registering validators via
/// `register_validators` and recording Prometheus counters into
/// `registry`. Returns the outermost layer as a `CoreState` trait object,
/// ready to hand to the controller runtime.
pub fn build(
    dispatcher: NamespacedDispatcher,
    registry: &Registry,
    authorizer: Arc<dyn Authorizer>,
    register_validators: impl FnOnce(ValidationMiddleware) -> ValidationMiddleware,
    audit: Option<AuditSettings>,
) -> Result<Arc<dyn CoreState>> {
    let dispatcher: Arc<dyn CoreState> = Arc::new(dispatcher);
    let metrics: Arc<dyn CoreState> = Arc::new(MetricsMiddleware::new(dispatcher, registry)?);
    let authorization: Arc<dyn CoreState> = Arc::new(AuthorizationMiddleware::new(metrics, authorizer));
    let validation: Arc<dyn CoreState> = Arc::new(register_validators(ValidationMiddleware::new(authorization)));

    match audit {
        Some(settings) => {
            let audit = Arc::new(AuditMiddleware::open(validation, settings.dir)?);
            audit.spawn_retention_loop(settings.retention_days, settings.cleanup_interval);
            Ok(audit as Arc<dyn CoreState>)
        }
        None => Ok(validation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_api::context::RequestContext;
    use corestate_api::core_state::{CreateOptions, GetOptions};
    use corestate_types::access::Access;
    use corestate_types::resource::{Resource, ResourcePointer};

    struct Memory(tokio::sync::Mutex<std::collections::HashMap<ResourcePointer, Resource>>);

    #[async_trait::async_trait]
    impl CoreState for Memory {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            self.0
                .lock()
                .await
                .get(ptr)
                .cloned()
                .ok_or_else(|| corestate_types::CoreError::NotFound(ptr.to_string()))
        }
        async fn list(
            &self,
            _ns: &str,
            _kind: &str,
            _opts: &corestate_api::core_state::ListOptions,
            _ctx: &RequestContext,
        ) -> Result<Vec<Resource>> {
            Ok(self.0.lock().await.values().cloned().collect())
        }
        async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
            let mut store = self.0.lock().await;
            if store.contains_key(&res.ptr) {
                return Err(corestate_types::CoreError::AlreadyExists(res.ptr.to_string()));
            }
            store.insert(res.ptr.clone(), res.clone());
            Ok(res)
        }
        async fn update(
            &self,
            res: Resource,
            _opts: &corestate_api::core_state::UpdateOptions,
            _ctx: &RequestContext,
        ) -> Result<Resource> {
            let mut store = self.0.lock().await;
            store.insert(res.ptr.clone(), res.clone());
            Ok(res)
        }
        async fn destroy(
            &self,
            ptr: &ResourcePointer,
            _opts: &corestate_api::core_state::DestroyOptions,
            _ctx: &RequestContext,
        ) -> Result<()> {
            self.0.lock().await.remove(ptr);
            Ok(())
        }
        async fn watch(
            &self,
            _ptr: &ResourcePointer,
            _opts: &corestate_api::core_state::WatchOptions,
            _ctx: &RequestContext,
        ) -> Result<corestate_api::core_state::EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn watch_kind(
            &self,
            _ns: &str,
            _kind: &str,
            _opts: &corestate_api::core_state::WatchOptions,
            _ctx: &RequestContext,
        ) -> Result<corestate_api::core_state::EventStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn watch_kind_aggregated(
            &self,
            _ns: &str,
            _kind: &str,
            _opts: &corestate_api::core_state::WatchOptions,
            _ctx: &RequestContext,
        ) -> Result<corestate_api::core_state::BatchStream> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    struct AllowAll;

    #[async_trait::async_trait]
    impl Authorizer for AllowAll {
        async fn authorize(&self, _access: &Access, _ctx: &RequestContext) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_chain_round_trips_a_create() {
        let dispatcher = NamespacedDispatcher::new(Arc::new(Memory(tokio::sync::Mutex::new(Default::default()))));
        let registry = Registry::new();
        let stack = build(dispatcher, &registry, Arc::new(AllowAll), |v| v, None).unwrap();

        let res = Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![1, 2, 3]);
        let ctx = RequestContext::internal("t1");
        stack.create(res.clone(), &CreateOptions::default(), &ctx).await.unwrap();

        let got = stack.get(&res.ptr, &GetOptions::default(), &ctx).await.unwrap();
        assert_eq!(got.payload, vec![1, 2, 3]);
    }
}
