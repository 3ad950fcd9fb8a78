#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::unimplemented, clippy::todo)
)]

//! # corestate-middleware
//!
//! The composable `CoreState` wrappers named in spec §4.4: audit,
//! validation (plus the built-in [`validators`]), authorization, metrics,
//! and the namespaced [`dispatcher::NamespacedDispatcher`]. Each wrapper
//! holds an inner `Arc<dyn CoreState>` and delegates after doing its own
//! work — plain function composition, never inheritance (spec §9).
//!
//! [`stack::build`] assembles the full ordered chain (outermost to
//! innermost): audit → validation → authorization → metrics → dispatcher.

/// Daily-rolling audit log plus companion SQLite table (spec §4.4, §4.7).
pub mod audit;
/// Caller-identity authorization (spec §4.4, §7).
pub mod authorization;
/// Namespace-prefix routing to backend drivers (spec §4.4 item 5).
pub mod dispatcher;
/// Prometheus-backed per-op/per-kind counters (spec §4.4 item 4).
pub mod metrics;
/// Pluggable, kind-keyed validator composition (spec §4.4 item 2).
pub mod validation;
/// The built-in validator implementations named in spec §4.4.
pub mod validators;
/// Assembles the full middleware chain in spec order.
pub mod stack;

pub use audit::{AuditMiddleware, AuditRecord};
pub use authorization::AuthorizationMiddleware;
pub use dispatcher::NamespacedDispatcher;
pub use metrics::MetricsMiddleware;
pub use validation::ValidationMiddleware;
