//! The validation middleware (spec §4.4 item 2).

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::{Resource, ResourcePointer};
use corestate_types::Result;
use std::collections::HashMap;
use std::sync::Arc;

fn fold(results: impl Iterator<Item = Result<()>>) -> Result<()> {
    let mut acc: Option<CoreError> = None;
    for r in results {
        if let Err(e) = r {
            acc = Some(match acc {
                Some(a) => a.merge(e),
                None => e,
            });
        }
    }
    match acc {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Wraps an inner `CoreState`, running every registered validator for a
/// resource's kind before delegating `create`/`update`/`destroy`.
///
/// `update`/`destroy` look the current resource up through `inner` first,
/// so a `NotFound` is distinguishable from a validator rejection (spec
/// §4.4: "oldRes looked up first so validation distinguishes not-found
/// from rejected").
pub struct ValidationMiddleware {
    inner: Arc<dyn CoreState>,
    registry: HashMap<String, Vec<Arc<dyn Validator>>>,
}

impl ValidationMiddleware {
    /// Wraps `inner` with no validators registered.
    pub fn new(inner: Arc<dyn CoreState>) -> Self {
        Self { inner, registry: HashMap::new() }
    }

    /// Registers `validator` for its own `kind()`.
    pub fn register(mut self, validator: Arc<dyn Validator>) -> Self {
        self.registry.entry(validator.kind().to_string()).or_default().push(validator);
        self
    }

    fn validators_for(&self, kind: &str) -> &[Arc<dyn Validator>] {
        self.registry.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[async_trait]
impl CoreState for ValidationMiddleware {
    async fn get(&self, ptr: &ResourcePointer, opts: &GetOptions, ctx: &RequestContext) -> Result<Resource> {
        self.inner.get(ptr, opts, ctx).await
    }

    async fn list(
        &self,
        namespace: &str,
        kind: &str,
        opts: &ListOptions,
        ctx: &RequestContext,
    ) -> Result<Vec<Resource>> {
        self.inner.list(namespace, kind, opts, ctx).await
    }

    async fn create(&self, res: Resource, opts: &CreateOptions, ctx: &RequestContext) -> Result<Resource> {
        let validators = self.validators_for(&res.ptr.kind);
        let mut results = Vec::with_capacity(validators.len());
        for v in validators {
            results.push(v.validate_create(&res, ctx).await);
        }
        fold(results.into_iter())?;
        self.inner.create(res, opts, ctx).await
    }

    async fn update(&self, res: Resource, opts: &UpdateOptions, ctx: &RequestContext) -> Result<Resource> {
        let old = self.inner.get(&res.ptr, &GetOptions::default(), ctx).await?;
        let validators = self.validators_for(&res.ptr.kind);
        let mut results = Vec::with_capacity(validators.len());
        for v in validators {
            results.push(v.validate_update(&old, &res, ctx).await);
        }
        fold(results.into_iter())?;
        self.inner.update(res, opts, ctx).await
    }

    async fn destroy(&self, ptr: &ResourcePointer, opts: &DestroyOptions, ctx: &RequestContext) -> Result<()> {
        let old = self.inner.get(ptr, &GetOptions::default(), ctx).await?;
        let validators = self.validators_for(&ptr.kind);
        let mut results = Vec::with_capacity(validators.len());
        for v in validators {
            results.push(v.validate_destroy(&old, ctx).await);
        }
        fold(results.into_iter())?;
        self.inner.destroy(ptr, opts, ctx).await
    }

    async fn watch(&self, ptr: &ResourcePointer, opts: &WatchOptions, ctx: &RequestContext) -> Result<EventStream> {
        self.inner.watch(ptr, opts, ctx).await
    }

    async fn watch_kind(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<EventStream> {
        self.inner.watch_kind(namespace, kind, opts, ctx).await
    }

    async fn watch_kind_aggregated(
        &self,
        namespace: &str,
        kind: &str,
        opts: &WatchOptions,
        ctx: &RequestContext,
    ) -> Result<BatchStream> {
        self.inner.watch_kind_aggregated(namespace, kind, opts, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::RequiredLabelsValidator;
    use corestate_types::resource::ResourcePointer;

    struct Recording {
        stored: tokio::sync::Mutex<Option<Resource>>,
    }

    #[async_trait]
    impl CoreState for Recording {
        async fn get(&self, ptr: &ResourcePointer, _opts: &GetOptions, _ctx: &RequestContext) -> Result<Resource> {
            self.stored
                .lock()
                .await
                .clone()
                .filter(|r| &r.ptr == ptr)
                .ok_or_else(|| CoreError::NotFound(ptr.to_string()))
        }
        async fn list(&self, _ns: &str, _kind: &str, _opts: &ListOptions, _ctx: &RequestContext) -> Result<Vec<Resource>> {
            Ok(vec![])
        }
        async fn create(&self, res: Resource, _opts: &CreateOptions, _ctx: &RequestContext) -> Result<Resource> {
            *self.stored.lock().await = Some(res.clone());
            Ok(res)
        }
        async fn update(&self, res: Resource, _opts: &UpdateOptions, _ctx: &RequestContext) -> Result<Resource> {
            *self.stored.lock().await = Some(res.clone());
            Ok(res)
        }
        async fn destroy(&self, _ptr: &ResourcePointer, _opts: &DestroyOptions, _ctx: &RequestContext) -> Result<()> {
            *self.stored.lock().await = None;
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
        RequestContext::internal("t")
    }

    #[tokio::test]
    async fn rejected_create_never_reaches_backend() {
        let inner = Arc::new(Recording { stored: tokio::sync::Mutex::new(None) });
        let mw = ValidationMiddleware::new(inner.clone())
            .register(Arc::new(RequiredLabelsValidator::new("MachineSet", vec!["cluster".into()])));

        let res = Resource::new(ResourcePointer::new("default", "MachineSet", "ms1"), vec![]);
        let err = mw.create(res, &CreateOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_validation());
        assert!(inner.stored.lock().await.is_none());
    }

    #[tokio::test]
    async fn update_distinguishes_not_found_from_rejection() {
        let inner = Arc::new(Recording { stored: tokio::sync::Mutex::new(None) });
        let mw = ValidationMiddleware::new(inner)
            .register(Arc::new(RequiredLabelsValidator::new("MachineSet", vec!["cluster".into()])));

        let res = Resource::new(ResourcePointer::new("default", "MachineSet", "ms1"), vec![]);
        let err = mw.update(res, &UpdateOptions::default(), &ctx()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
