//! `proptest` strategies for `Resource` and `LabelQuery`, used by the
//! round-trip/conflict/destroy-gating/watch-bootstrap/label-query
//! property tests across the workspace.

use corestate_api::label_query::{LabelQuery, LabelTerm};
use corestate_types::resource::{Phase, Resource, ResourcePointer, Version};
use proptest::prelude::*;

/// A short identifier-safe string, used for namespaces/kinds/ids/label keys.
pub fn ident() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(|s| s.to_string())
}

/// A resource pointer with arbitrary but identifier-safe components.
pub fn resource_pointer() -> impl Strategy<Value = ResourcePointer> {
    (ident(), ident(), ident()).prop_map(|(namespace, kind, id)| ResourcePointer::new(namespace, kind, id))
}

/// A freshly-constructed, unstored resource (`version == Version::NONE`)
/// with between 0 and 4 labels.
pub fn resource() -> impl Strategy<Value = Resource> {
    (
        resource_pointer(),
        proptest::collection::vec((ident(), ident()), 0..4),
        proptest::collection::vec(0u8..255, 0..32),
        any::<bool>(),
    )
        .prop_map(|(ptr, label_pairs, payload, tearing_down)| {
            let mut res = Resource::new(ptr, payload);
            res.labels = label_pairs.into_iter().collect();
            if tearing_down {
                res.phase = Phase::TearingDown;
            }
            res
        })
}

/// An arbitrary, already-assigned version (never `Version::NONE`).
pub fn assigned_version() -> impl Strategy<Value = Version> {
    (1u64..10_000).prop_map(Version)
}

/// A single label term over an arbitrary key, covering every `LabelTerm`
/// variant.
pub fn label_term() -> impl Strategy<Value = LabelTerm> {
    prop_oneof![
        (ident(), ident()).prop_map(|(key, value)| LabelTerm::Equal { key, value }),
        ident().prop_map(|key| LabelTerm::Exists { key }),
        ident().prop_map(|key| LabelTerm::NotExists { key }),
        (ident(), proptest::collection::vec(ident(), 1..4))
            .prop_map(|(key, values)| LabelTerm::In { key, values }),
    ]
}

/// A label query: 1-3 terms ORed together, optionally negated.
pub fn label_query() -> impl Strategy<Value = LabelQuery> {
    (proptest::collection::vec(label_term(), 1..4), any::<bool>())
        .prop_map(|(terms, negate)| LabelQuery { terms, negate })
}

/// An ordered sequence of 0-3 label queries, ANDed together.
pub fn label_queries() -> impl Strategy<Value = Vec<LabelQuery>> {
    proptest::collection::vec(label_query(), 0..3)
}
