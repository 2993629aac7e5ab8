pub mod config;
pub mod pipeline;

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Output goes to stderr so stdout stays parseable.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();
}
