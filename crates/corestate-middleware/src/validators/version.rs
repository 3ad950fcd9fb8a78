//! Monotonic version-upgrade validation (spec §4.4: "monotonic version
//! upgrades (disallow downgrade across major/minor)").

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::Resource;
use corestate_types::Result;
use semver::Version as SemVer;

/// Disallows `update` from lowering the major/minor component of a
/// semver-like value stored in one of the resource's labels.
///
/// Patch-level changes and equal major/minor are always accepted; the
/// label's value must parse as `major.minor.patch`, otherwise the update
/// is rejected rather than silently accepted.
pub struct MonotonicVersionValidator {
    kind: String,
    label_key: String,
}

impl MonotonicVersionValidator {
    /// Builds a validator for `kind`, reading the version out of `label_key`.
    pub fn new(kind: impl Into<String>, label_key: impl Into<String>) -> Self {
        Self { kind: kind.into(), label_key: label_key.into() }
    }

    fn parse(res: &Resource, label_key: &str) -> Result<Option<SemVer>> {
        match res.labels.get(label_key) {
            None => Ok(None),
            Some(raw) => SemVer::parse(raw)
                .map(Some)
                .map_err(|e| CoreError::validation(format!("label {label_key:?} is not a valid version: {e}"))),
        }
    }
}

#[async_trait]
impl Validator for MonotonicVersionValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        Self::parse(new, &self.label_key).map(|_| ())
    }

    async fn validate_update(&self, old: &Resource, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        let (before, after) = (Self::parse(old, &self.label_key)?, Self::parse(new, &self.label_key)?);
        match (before, after) {
            (Some(before), Some(after)) if (after.major, after.minor) < (before.major, before.minor) => {
                Err(CoreError::validation(format!(
                    "version downgrade rejected on {}: {before} -> {after}",
                    new.ptr
                )))
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

    fn res(version: &str) -> Resource {
        let mut r = Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![]);
        r.labels.insert("kubernetes-version".into(), version.into());
        r
    }

    #[tokio::test]
    async fn rejects_minor_downgrade() {
        let v = MonotonicVersionValidator::new("Cluster", "kubernetes-version");
        let old = res("1.30.1");
        let new = res("1.28.0");
        let err = v.validate_update(&old, &new, &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn allows_patch_and_minor_upgrade() {
        let v = MonotonicVersionValidator::new("Cluster", "kubernetes-version");
        v.validate_update(&res("1.30.0"), &res("1.30.1"), &ctx()).await.unwrap();
        v.validate_update(&res("1.29.5"), &res("1.30.0"), &ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unparseable_version() {
        let v = MonotonicVersionValidator::new("Cluster", "kubernetes-version");
        let err = v.validate_create(&res("not-a-version"), &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }
}
