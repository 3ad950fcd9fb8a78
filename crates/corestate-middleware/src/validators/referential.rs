//! Referential checks (spec §4.4: "referential checks (the target of a
//! relation exists and is not tearing down)").

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::core_state::{CoreState, GetOptions};
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::{Phase, Resource, ResourcePointer};
use corestate_types::Result;
use std::sync::Arc;

/// Rejects `create`/`update` unless the resource named by a label points
/// at a resource that exists and is not `tearing-down`.
///
/// Looks the relation target up through `backend` directly rather than
/// through the full middleware stack, since authorization for the
/// relation target is not part of this check (spec §4.4 composes
/// validators purely over the resource being written).
pub struct ReferentialValidator {
    kind: String,
    relation_label_key: String,
    relation_namespace: String,
    relation_kind: String,
    backend: Arc<dyn CoreState>,
}

impl ReferentialValidator {
    /// Builds a validator for `kind`: the value stored at
    /// `relation_label_key` is looked up as `(relation_namespace,
    /// relation_kind, <value>)` against `backend`.
    pub fn new(
        kind: impl Into<String>,
        relation_label_key: impl Into<String>,
        relation_namespace: impl Into<String>,
        relation_kind: impl Into<String>,
        backend: Arc<dyn CoreState>,
    ) -> Self {
        Self {
            kind: kind.into(),
            relation_label_key: relation_label_key.into(),
            relation_namespace: relation_namespace.into(),
            relation_kind: relation_kind.into(),
            backend,
        }
    }

    async fn check(&self, res: &Resource, ctx: &RequestContext) -> Result<()> {
        let target_id = res.labels.get(&self.relation_label_key).ok_or_else(|| {
            CoreError::validation(format!(
                "{} missing relation label {:?}",
                res.ptr, self.relation_label_key
            ))
        })?;
        let target_ptr = ResourcePointer::new(self.relation_namespace.clone(), self.relation_kind.clone(), target_id.clone());
        match self.backend.get(&target_ptr, &GetOptions::default(), ctx).await {
            Ok(target) if target.phase == Phase::TearingDown => Err(CoreError::validation(format!(
                "{} relation target {target_ptr} is tearing down",
                res.ptr
            ))),
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(CoreError::validation(format!(
                "{} relation target {target_ptr} does not exist",
                res.ptr
            ))),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Validator for ReferentialValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, new: &Resource, ctx: &RequestContext) -> Result<()> {
        self.check(new, ctx).await
    }

    async fn validate_update(&self, _old: &Resource, new: &Resource, ctx: &RequestContext) -> Result<()> {
        self.check(new, ctx).await
    }
}
