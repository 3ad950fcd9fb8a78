//! Controller runtime glue (spec §4.6): the per-type in-memory cache fed
//! by an internal watch, and the `Live`/`Cached` state views controllers
//! register against before the runtime starts.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::unimplemented, clippy::todo))]

pub mod cache;
pub mod controller;

pub use cache::{CacheRegistry, UncachedReadPolicy};
pub use controller::{ControllerRuntime, StateView};
