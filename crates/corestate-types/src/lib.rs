#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo
    )
)]

//! # corestate-types
//!
//! Foundational data structures, the closed error taxonomy, and
//! configuration objects shared by every other `corestate` crate. As the
//! base crate it keeps dependencies minimal so it never forms a cycle with
//! the crates that build on it.

/// A top-level, crate-wide `Result` alias defaulting to [`error::CoreError`].
pub type Result<T, E = error::CoreError> = std::result::Result<T, E>;

/// The resource data model: identity, metadata, and version.
pub mod resource;
/// Watch event envelope emitted by backends and re-emitted by middleware.
pub mod event;
/// The access tuple evaluated by the authorization middleware.
pub mod access;
/// The closed error taxonomy and `ErrorCode` classification trait.
pub mod error;
/// Layered configuration objects covering storage, tenancy, audit, auth,
/// and feature-toggle settings.
pub mod config;

pub use access::{Access, Verb};
pub use error::{CoreError, ErrorCode};
pub use event::{Event, EventKind};
pub use resource::{Labels, Phase, Resource, ResourcePointer, Version};
