//! Log subscriber setup.
//!
//! Events are filtered by `RUST_LOG` (default `info`) and written to stdout
//! with RFC 3339 local timestamps. Library events only appear when the
//! `tracing` feature is enabled, which it is by default.

use crate::server::config::LogFormat;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

pub fn init_telemetry(format: LogFormat) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()));

    match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            )
            .try_init()?,
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_timer(ChronoLocal::rfc_3339())
                    .with_file(true)
                    .json()
                    .flatten_event(true),
            )
            .try_init()?,
    }

    Ok(())
}
