//! The built-in validator implementations named in spec §4.4: label
//! presence/immutability, monotonic versions, immutable/monotonic fields,
//! structural payload checks, time windows, and referential checks. Each
//! is registered per resource kind with [`crate::validation::ValidationMiddleware`].

/// Required labels and membership-label immutability.
pub mod labels;
/// Monotonic semver-like version upgrades.
pub mod version;
/// Immutable-field and monotonic-state annotations.
pub mod fields;
/// YAML shape and JSON schema checks on embedded payloads.
pub mod structural;
/// Timestamp-window checks.
pub mod time_window;
/// Relation-target existence and lifecycle checks.
pub mod referential;

pub use fields::{ImmutableAnnotationsValidator, MonotonicStateValidator};
pub use labels::{ImmutableLabelsValidator, RequiredLabelsValidator};
pub use referential::ReferentialValidator;
pub use structural::{JsonSchemaValidator, YamlShapeValidator};
pub use time_window::TimeWindowValidator;
pub use version::MonotonicVersionValidator;
