#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::unimplemented, clippy::todo)
)]

//! # corestate-election
//!
//! Single-leader election over a well-known KV key prefix (spec §4.3): a
//! session lease, a fresh random campaign key every time, and a
//! cancellable leader context. [`ElectionSupervisor`] runs several
//! concurrent campaigns keyed by prefix.

/// The per-campaign session and leadership lifecycle.
pub mod session;
/// A map of concurrent campaigns keyed by prefix, with explicit stop.
pub mod supervisor;

pub use session::{campaign, run_as_leader, LeaderSession};
pub use supervisor::ElectionSupervisor;
