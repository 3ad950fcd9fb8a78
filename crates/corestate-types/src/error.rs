//! The closed error taxonomy (spec §6 boundary errors, §7 ERROR HANDLING DESIGN).
//!
//! Classification is by predicate, not concrete type (`is_not_found` and
//! friends), so middleware can re-wrap an error from any backend while
//! preserving its kind.

use thiserror::Error;

/// A stable, machine-readable string identifier for an error variant,
/// independent of the human-readable message.
pub trait ErrorCode {
    /// Returns the unique code for this error, e.g. `"NOT_FOUND"`.
    fn code(&self) -> &'static str;
}

/// The closed set of error kinds surfaced at every boundary in the system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No resource matches the given pointer.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// `create` was called for a pointer that already has a resource.
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// `update` was called with a version that does not match the current
    /// stored version.
    #[error("version conflict for {0}")]
    VersionConflict(String),

    /// The caller is not the resource's `owner`.
    #[error("owner conflict for {0}: owned by {owner:?}")]
    OwnerConflict {
        /// The pointer in conflict, rendered as a string.
        ptr: String,
        /// The current owner, if any.
        owner: Option<String>,
    },

    /// `destroy` was rejected because `finalizers` is non-empty.
    #[error("cannot destroy {0}: finalizers are not empty")]
    FinalizerViolation(String),

    /// One or more registered validators rejected the operation. Carries
    /// every rejection message, since validators compose (spec §4.4).
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// The authorization middleware rejected the caller.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The backend does not recognize a requested option or operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The backend could not be reached or is not ready (e.g. election in
    /// progress, connection refused).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A catch-all for errors not classified into one of the above kinds
    /// (I/O failures, codec failures, programmer errors surfaced at a
    /// boundary). Always carries a source so the original cause is not
    /// lost.
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl CoreError {
    /// Builds a `Validation` error from a single message.
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(vec![msg.into()])
    }

    /// Merges this error with another, combining `Validation` messages and
    /// otherwise keeping the first non-validation error encountered. Used
    /// by the validation middleware to fold a list of validator results
    /// into a single multi-error (spec §4.4).
    pub fn merge(self, other: CoreError) -> CoreError {
        match (self, other) {
            (CoreError::Validation(mut a), CoreError::Validation(b)) => {
                a.extend(b);
                CoreError::Validation(a)
            }
            (a, _) => a,
        }
    }

    /// True if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }

    /// True if this is any kind of write conflict (`already-exists`,
    /// `version-conflict`, `owner-conflict`).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::AlreadyExists(_) | CoreError::VersionConflict(_) | CoreError::OwnerConflict { .. }
        )
    }

    /// True if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, CoreError::Validation(_))
    }

    /// True if the backend rejected an unrecognized option or operation.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, CoreError::Unsupported(_))
    }

    /// True if the authorization middleware rejected the caller.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CoreError::PermissionDenied(_))
    }

    /// True if `destroy` was rejected due to outstanding finalizers.
    pub fn is_finalizer_violation(&self) -> bool {
        matches!(self, CoreError::FinalizerViolation(_))
    }
}

impl ErrorCode for CoreError {
    fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::AlreadyExists(_) => "ALREADY_EXISTS",
            CoreError::VersionConflict(_) => "VERSION_CONFLICT",
            CoreError::OwnerConflict { .. } => "OWNER_CONFLICT",
            CoreError::FinalizerViolation(_) => "FINALIZER_VIOLATION",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::PermissionDenied(_) => "PERMISSION_DENIED",
            CoreError::Unsupported(_) => "UNSUPPORTED",
            CoreError::Unavailable(_) => "UNAVAILABLE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_combines_validation_messages() {
        let a = CoreError::validation("bad label");
        let b = CoreError::validation("bad owner");
        let merged = a.merge(b);
        match merged {
            CoreError::Validation(msgs) => {
                assert_eq!(msgs, vec!["bad label".to_string(), "bad owner".to_string()])
            }
            _ => panic!("expected Validation"),
        }
    }

    #[test]
    fn predicates_classify_without_downcast() {
        assert!(CoreError::NotFound("x".into()).is_not_found());
        assert!(CoreError::VersionConflict("x".into()).is_conflict());
        assert!(CoreError::AlreadyExists("x".into()).is_conflict());
        assert!(!CoreError::Unavailable("x".into()).is_conflict());
    }
}
