//! The resource data model (spec §3 DATA MODEL, invariants i-iv).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A unique-key string-to-string map used for labels and annotations.
///
/// `BTreeMap` gives deterministic iteration order, which matters for audit
/// records and for any caller that serializes a resource for hashing.
pub type Labels = BTreeMap<String, String>;

/// An opaque, strictly-increasing version token issued by the backend.
///
/// Callers must not interpret the token beyond equality and ordering: two
/// backends are free to use different encodings (a Raft log index, a
/// SQLite rowid, a monotonic counter) as long as they satisfy invariant
/// (ii) — version is strictly increasing per resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// The sentinel version for a resource that has never been stored.
    pub const NONE: Version = Version(0);

    /// Returns the next version in sequence.
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    /// True if this version has never been assigned by a backend.
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle phase of a resource (invariant iii: no transition back to
/// `Running` once `TearingDown`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// The resource is live and mutable subject to ownership rules.
    Running,
    /// The resource is being torn down; it cannot return to `Running` and
    /// cannot be destroyed while `finalizers` is non-empty (invariant iv).
    TearingDown,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Running
    }
}

/// The stable identity of a resource: `(namespace, type, id)`.
///
/// Used both as the full resource's identity field and standalone as a
/// pointer for `get`/`destroy`/`watch` calls that don't need the rest of
/// the metadata.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourcePointer {
    /// The routing namespace (spec §3: default, ephemeral, virtual, external, metrics, meta, or an infra-provider prefix).
    pub namespace: String,
    /// The resource's type name, e.g. `"Cluster"` or `"MachineSet"`.
    pub kind: String,
    /// The resource's id, unique within `(namespace, kind)`.
    pub id: String,
}

impl ResourcePointer {
    /// Builds a new pointer from owned strings.
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourcePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.kind, self.id)
    }
}

/// A versioned, typed entity with the metadata described in spec §3.
///
/// The payload is deliberately opaque (`Vec<u8>`): the binary format of
/// application-level entities is out of scope (spec §1 Non-goals) — this
/// crate persists and forwards it without interpreting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource's stable identity.
    pub ptr: ResourcePointer,
    /// The opaque monotonic token issued by the backend at the last write.
    pub version: Version,
    /// The lifecycle phase.
    pub phase: Phase,
    /// Arbitrary, queryable key-value labels.
    pub labels: Labels,
    /// Arbitrary, non-queryable key-value annotations.
    pub annotations: Labels,
    /// The identity of the controller authorized to mutate this resource,
    /// if ownership is scoped.
    pub owner: Option<String>,
    /// An ordered set of finalizer strings blocking destruction while
    /// non-empty (invariant iv). Stored as a `Vec` to preserve insertion
    /// order; callers are responsible for not inserting duplicates — see
    /// [`Resource::add_finalizer`].
    pub finalizers: Vec<String>,
    /// The opaque application-level payload.
    pub payload: Vec<u8>,
}

impl Resource {
    /// Constructs a brand-new, unstored resource (`version` is `Version::NONE`).
    pub fn new(ptr: ResourcePointer, payload: Vec<u8>) -> Self {
        Self {
            ptr,
            version: Version::NONE,
            phase: Phase::Running,
            labels: Labels::new(),
            annotations: Labels::new(),
            owner: None,
            finalizers: Vec::new(),
            payload,
        }
    }

    /// Appends a finalizer if it isn't already present, preserving order.
    pub fn add_finalizer(&mut self, finalizer: impl Into<String>) {
        let finalizer = finalizer.into();
        if !self.finalizers.iter().any(|f| f == &finalizer) {
            self.finalizers.push(finalizer);
        }
    }

    /// Removes a finalizer by value, returning whether it was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != before
    }

    /// Whether this resource may legally transition to `TearingDown`.
    ///
    /// Always true from `Running`; `TearingDown` is terminal (invariant
    /// iii), so re-requesting it is idempotent rather than an error.
    pub fn can_begin_teardown(&self) -> bool {
        true
    }

    /// Whether this resource may be destroyed: phase is `TearingDown` and
    /// `finalizers` is empty (invariant iv).
    pub fn can_destroy(&self) -> bool {
        self.phase == Phase::TearingDown && self.finalizers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizers_preserve_order_and_dedup() {
        let mut r = Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![]);
        r.add_finalizer("a");
        r.add_finalizer("b");
        r.add_finalizer("a");
        assert_eq!(r.finalizers, vec!["a".to_string(), "b".to_string()]);
        assert!(r.remove_finalizer("a"));
        assert_eq!(r.finalizers, vec!["b".to_string()]);
        assert!(!r.remove_finalizer("a"));
    }

    #[test]
    fn destroy_gated_by_phase_and_finalizers() {
        let mut r = Resource::new(ResourcePointer::new("default", "Cluster", "c1"), vec![]);
        assert!(!r.can_destroy());
        r.phase = Phase::TearingDown;
        r.add_finalizer("cleanup");
        assert!(!r.can_destroy());
        r.remove_finalizer("cleanup");
        assert!(r.can_destroy());
    }

    #[test]
    fn version_ordering_is_strict() {
        assert!(Version::NONE.next() > Version::NONE);
        assert!(Version(5).next() > Version(5));
    }
}
