//! The access tuple evaluated by the authorization middleware (spec §3 `Access`).

use crate::resource::ResourcePointer;
use serde::{Deserialize, Serialize};

/// The verb of an operation, used both for authorization and for metrics
/// counters keyed `(verb, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    /// Read a single resource by pointer.
    Get,
    /// Read a collection of resources of a kind.
    List,
    /// Subscribe to change events.
    Watch,
    /// Create a new resource.
    Create,
    /// Update an existing resource to a new version.
    Update,
    /// Permanently remove a resource.
    Destroy,
}

impl Verb {
    /// Whether this verb mutates stored state (used to decide whether the
    /// audit middleware must record the call).
    pub fn is_mutating(self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::Destroy)
    }

    /// A stable lowercase name, used in audit records and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Destroy => "destroy",
        }
    }
}

/// A tuple evaluated against the caller's role and any per-cluster ACL
/// grants by the authorization middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Access {
    /// The pointer being accessed. `kind`/`id` may be empty for `List`/`Watch`-by-kind.
    pub ptr: ResourcePointer,
    /// The verb being authorized.
    pub verb: Verb,
}

impl Access {
    /// Builds a new access tuple.
    pub fn new(ptr: ResourcePointer, verb: Verb) -> Self {
        Self { ptr, verb }
    }
}
