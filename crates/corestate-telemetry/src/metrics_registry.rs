//! Builds the shared [`Registry`] that `corestate-middleware`'s
//! `MetricsMiddleware` registers its counters into, plus a process
//! collector for baseline CPU/RSS/fd metrics.

use prometheus::process_collector::ProcessCollector;
use prometheus::Registry;

/// Builds a fresh registry with the process collector (CPU, RSS, fd
/// count) pre-registered, ready to be handed to
/// `corestate_middleware::MetricsMiddleware::new`.
pub fn build() -> anyhow::Result<Registry> {
    let registry = Registry::new();
    registry.register(Box::new(ProcessCollector::for_self()))?;
    Ok(registry)
}
