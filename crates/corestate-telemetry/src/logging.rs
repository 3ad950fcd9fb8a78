//! Structured logging init: a JSON `fmt` layer on stderr with UTC
//! RFC3339 timestamps, filtered by `RUST_LOG` (or `info` if unset).

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Installs the global `tracing` subscriber. Call once at process start;
/// calling it twice returns an error rather than panicking, since a
/// caller composing this crate with another telemetry setup should be
/// free to ignore the failure.
pub fn init() -> anyhow::Result<()> {
    let fmt_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
