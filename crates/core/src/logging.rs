//! Structured logging infrastructure for SwarmLink.
//!
//! Centralised `tracing` initialisation. The node firmware itself never
//! formats human-readable output; it only emits structured events and leaves
//! rendering to whichever subscriber the host installs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the logging system with compact text output on stderr.
///
/// Stdout is left to the serial uplink.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
///
/// # Example
/// ```no_run
/// use swarmlink_core::logging;
///
/// logging::init();
/// tracing::info!("node started");
/// ```
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init();
}

/// Initialize the logging system with JSON output.
///
/// Suitable when stderr is collected by the gateway host alongside the
/// line-delimited uplink stream.
pub fn init_json() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true),
        )
        .try_init();
}
