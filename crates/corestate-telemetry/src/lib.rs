//! Ambient logging and metrics-registry setup, carried regardless of the
//! outer telemetry pipeline (exporter HTTP server, OTLP push) being out
//! of scope: structured `tracing` output and the `prometheus::Registry`
//! fed to the middleware stack are mandatory ambient stack, not optional.

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::unimplemented, clippy::todo))]

pub mod logging;
pub mod metrics_registry;
