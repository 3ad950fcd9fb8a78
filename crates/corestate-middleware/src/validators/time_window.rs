//! Time-window checks (spec §4.4: "time-window checks (manual backup
//! ±60 s of now)").

use async_trait::async_trait;
use corestate_api::context::RequestContext;
use corestate_api::validator::Validator;
use corestate_types::error::CoreError;
use corestate_types::resource::Resource;
use corestate_types::Result;
use std::time::Duration;
use time::OffsetDateTime;

/// Rejects `create` unless the RFC 3339 timestamp stored at
/// `annotation_key` falls within `window` of the current time — used to
/// reject stale or clock-skewed manual backup requests.
pub struct TimeWindowValidator {
    kind: String,
    annotation_key: String,
    window: time::Duration,
}

impl TimeWindowValidator {
    /// Builds a validator for `kind` requiring `annotation_key` to be
    /// within `window` of now.
    pub fn new(kind: impl Into<String>, annotation_key: impl Into<String>, window: Duration) -> Self {
        Self {
            kind: kind.into(),
            annotation_key: annotation_key.into(),
            window: time::Duration::try_from(window).unwrap_or(time::Duration::ZERO),
        }
    }

    /// The default manual-backup window: ±60 seconds.
    pub fn manual_backup(kind: impl Into<String>) -> Self {
        Self::new(kind, "requested-at", Duration::from_secs(60))
    }
}

#[async_trait]
impl Validator for TimeWindowValidator {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn validate_create(&self, new: &Resource, _ctx: &RequestContext) -> Result<()> {
        let raw = new.annotations.get(&self.annotation_key).ok_or_else(|| {
            CoreError::validation(format!("{} missing annotation {:?}", new.ptr, self.annotation_key))
        })?;
        let requested = OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
            .map_err(|e| CoreError::validation(format!("{} has an unparseable timestamp: {e}", new.ptr)))?;
        let now = OffsetDateTime::now_utc();
        let delta = (now - requested).abs();
        if delta > self.window {
            Err(CoreError::validation(format!(
                "{} timestamp {raw} is outside the {:?} window around now",
                new.ptr, self.window
            )))
        } else {
            Ok(())
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

    fn res(requested_at: &str) -> Resource {
        let mut r = Resource::new(ResourcePointer::new("default", "ManualBackup", "b1"), vec![]);
        r.annotations.insert("requested-at".into(), requested_at.into());
        r
    }

    #[tokio::test]
    async fn accepts_timestamp_close_to_now() {
        let v = TimeWindowValidator::manual_backup("ManualBackup");
        let now = OffsetDateTime::now_utc();
        let formatted = now.format(&time::format_description::well_known::Rfc3339).unwrap();
        v.validate_create(&res(&formatted), &ctx()).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_timestamp_far_from_now() {
        let v = TimeWindowValidator::manual_backup("ManualBackup");
        let stale = OffsetDateTime::now_utc() - time::Duration::hours(2);
        let formatted = stale.format(&time::format_description::well_known::Rfc3339).unwrap();
        let err = v.validate_create(&res(&formatted), &ctx()).await.unwrap_err();
        assert!(err.is_validation());
    }
}
