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

//! # corestate-api
//!
//! The stable contract every storage backend and middleware layer
//! implements: [`CoreState`], the ambient [`RequestContext`], label
//! queries, and the pluggable [`Validator`]/[`Authorizer`] seams that the
//! middleware stack composes over. Modeled as a capability trait rather
//! than an inheritance hierarchy, so wrappers are plain function
//! composition (spec §9 DESIGN NOTES).

/// The ambient request context threaded through every operation.
pub mod context;
/// The [`CoreState`] trait and its associated option structs.
pub mod core_state;
/// Label query terms and matching (spec §4.1 `list`).
pub mod label_query;
/// The pluggable [`Validator`] seam (spec §4.4).
pub mod validator;
/// The pluggable [`Authorizer`] seam (spec §4.4, §7).
pub mod authorizer;

pub use context::{Actor, RequestContext};
pub use core_state::{
    BatchStream, CoreState, CreateOptions, DestroyOptions, EventStream, GetOptions, ListOptions,
    UpdateOptions, WatchOptions,
};
pub use label_query::{LabelQuery, LabelTerm};
pub use validator::Validator;
pub use authorizer::Authorizer;
