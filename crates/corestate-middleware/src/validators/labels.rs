//! Label-presence and label-immutability validators (spec §4.4: "presence
//! of required labels (and immutability of cluster/machine-set membership
//! labels)").

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::Resource;
use corestate_types::Result;

/// Rejects `create`/`update` unless every label in `required` is present.
pub struct RequiredLabelsValidator {
    kind: String,
    required: Vec<String>,
}

impl RequiredLabelsValidator {
    /// Builds a validator for `kind` requiring every label in `required`.
    pub fn new(kind: impl Into<String>, required: Vec<String>) -> Self {
        Self { kind: kind.into(), required }
    }

    fn check(&self, res: &Resource) -> Result<()> {
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|k| !res.labels.contains_key(*k))
            .map(|k| format!("missing required label {k:?} on {}", res.ptr))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(missing))
        }
    }
}

#[async_trait]
impl Validator for RequiredLabelsValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        self.check(new)
    }

    async fn validate_update(&self, _old: &Resource, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        self.check(new)
    }
}

/// Rejects `update` if any label in `immutable_keys` changes value from its
/// stored state (membership labels like `cluster`/`role` on a `MachineSet`).
pub struct ImmutableLabelsValidator {
    kind: String,
    immutable_keys: Vec<String>,
}

impl ImmutableLabelsValidator {
    /// Builds a validator for `kind` treating every key in `immutable_keys`
    /// as fixed once set.
    pub fn new(kind: impl Into<String>, immutable_keys: Vec<String>) -> Self {
        Self { kind: kind.into(), immutable_keys }
    }
}

#[async_trait]
impl Validator for ImmutableLabelsValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, _new: &Resource, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn validate_update(&self, old: &Resource, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        let violations: Vec<String> = self
            .immutable_keys
            .iter()
            .filter_map(|key| {
                let before = old.labels.get(key)?;
                let after = new.labels.get(key);
                if after != Some(before) {
                    Some(format!("label {key:?} is immutable on {} once set", new.ptr))
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

#[cfg(test)]
mod tests {
    use super::*;
    use corestate_types::resource::ResourcePointer;

    fn ctx() -> RequestContext {
        RequestContext::internal("t")
    }

    fn res(labels: &[(&str, &str)]) -> Resource {
        let mut r = Resource::new(ResourcePointer::new("default", "MachineSet", "ms1"), vec![]);
        for (k, v) in labels {
            r.labels.insert(k.to_string(), v.to_string());
        }
        r
    }

    #[tokio::test]
    async fn rejects_missing_required_label() {
        let v = RequiredLabelsValidator::new("MachineSet", vec!["cluster".into(), "role".into()]);
        let new = res(&[("cluster", "c1")]);
        let err = v.validate_create(&new, &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn rejects_changing_membership_label() {
        let v = ImmutableLabelsValidator::new("MachineSet", vec!["cluster".into()]);
        let old = res(&[("cluster", "c1")]);
        let new = res(&[("cluster", "c2")]);
        let err = v.validate_update(&old, &new, &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn allows_unrelated_label_changes() {
        let v = ImmutableLabelsValidator::new("MachineSet", vec!["cluster".into()]);
        let old = res(&[("cluster", "c1"), ("role", "cp")]);
        let new = res(&[("cluster", "c1"), ("role", "worker")]);
        v.validate_update(&old, &new, &ctx()).await.unwrap();
    }
}
