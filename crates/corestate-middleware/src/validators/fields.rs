//! Mutable-field policy validators (spec §4.4: "policy on mutable fields
//! (bootstrap spec immutable post-creation; alias immutable; acceptance
//! state monotonic)").

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::Resource;
use corestate_types::Result;

/// Rejects `update` if any annotation in `fixed_keys` changes value once
/// set at creation (e.g. a bootstrap spec blob, a resource alias).
pub struct ImmutableAnnotationsValidator {
    kind: String,
    fixed_keys: Vec<String>,
}

impl ImmutableAnnotationsValidator {
    /// Builds a validator for `kind` treating every key in `fixed_keys` as
    /// fixed once present on the stored resource.
    pub fn new(kind: impl Into<String>, fixed_keys: Vec<String>) -> Self {
        Self { kind: kind.into(), fixed_keys }
    }
}

#[async_trait]
impl Validator for ImmutableAnnotationsValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, _new: &Resource, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn validate_update(&self, old: &Resource, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        let violations: Vec<String> = self
            .fixed_keys
            .iter()
            .filter_map(|key| {
                let before = old.annotations.get(key)?;
                let after = new.annotations.get(key);
                if after != Some(before) {
                    Some(format!("annotation {key:?} is immutable on {} once set", new.ptr))
                } else {
                    None
                }
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(violations))
        }
    }
}

/// Rejects `update` if an annotation modeling a state machine (e.g.
/// acceptance status) moves to an earlier position in `ordered_states`
/// than its current value.
pub struct MonotonicStateValidator {
    kind: String,
    annotation_key: String,
    ordered_states: Vec<String>,
}

impl MonotonicStateValidator {
    /// Builds a validator for `kind`, reading state out of `annotation_key`
    /// and accepting forward transitions through `ordered_states` only.
    pub fn new(kind: impl Into<String>, annotation_key: impl Into<String>, ordered_states: Vec<String>) -> Self {
        Self { kind: kind.into(), annotation_key: annotation_key.into(), ordered_states }
    }

    fn position(&self, value: &str) -> Option<usize> {
        self.ordered_states.iter().position(|s| s == value)
    }
}

#[async_trait]
impl Validator for MonotonicStateValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, _new: &Resource, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn validate_update(&self, old: &Resource, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        let (before, after) = (
            old.annotations.get(&self.annotation_key),
            new.annotations.get(&self.annotation_key),
        );
        match (before, after) {
            (Some(before), Some(after)) => {
                match (self.position(before), self.position(after)) {
                    (Some(bp), Some(ap)) if ap < bp => Err(CoreError::validation(format!(
                        "{} on {} cannot move from {before:?} back to {after:?}",
                        self.annotation_key, new.ptr
                    ))),
                    _ => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_types::resource::ResourcePointer;

    fn ctx() -> RequestContext {
        RequestContext::internal("t")
    }

    fn res(annotations: &[(&str, &str)]) -> Resource {
        let mut r = Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![]);
        for (k, v) in annotations {
            r.annotations.insert(k.to_string(), v.to_string());
        }
        r
    }

    #[tokio::test]
    async fn rejects_changing_bootstrap_spec() {
        let v = ImmutableAnnotationsValidator::new("Cluster", vec!["bootstrap-spec".into()]);
        let old = res(&[("bootstrap-spec", "a")]);
        let new = res(&[("bootstrap-spec", "b")]);
        let err = v.validate_update(&old, &new, &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn rejects_acceptance_state_regression() {
        let v = MonotonicStateValidator::new(
            "Cluster",
            "acceptance-state",
            vec!["pending".into(), "accepted".into(), "finalized".into()],
        );
        let old = res(&[("acceptance-state", "accepted")]);
        let new = res(&[("acceptance-state", "pending")]);
        let err = v.validate_update(&old, &new, &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn allows_forward_acceptance_transition() {
        let v = MonotonicStateValidator::new(
            "Cluster",
            "acceptance-state",
            vec!["pending".into(), "accepted".into(), "finalized".into()],
        );
        let old = res(&[("acceptance-state", "pending")]);
        let new = res(&[("acceptance-state", "finalized")]);
        v.validate_update(&old, &new, &ctx()).await.unwrap();
    }
}
