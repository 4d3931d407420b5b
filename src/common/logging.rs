//! Logging and tracing configuration
//!
//! The orchestrator logs human-readable lines to stderr. The in-pod agent logs
//! JSON to stderr so its stdout stays reserved for status records.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing for the suite runner
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate (DEBUG with `--debug`), WARN for dependencies.
pub fn init_cli(debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("kubectl_probe=debug,warn")
        } else {
            EnvFilter::new("kubectl_probe=info,warn")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for the probe agent (JSON on stderr)
///
/// Agent diagnostics end up in the same container log as the status records,
/// so they are kept quiet by default and never written to stdout.
pub fn init_agent() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(false),
        )
        .init();
}
