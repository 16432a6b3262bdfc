use tracing_subscriber::{EnvFilter, fmt};

pub mod api;
pub mod completion;
pub mod config;
pub mod follow;
pub mod spec;

/// Logs client commands to stderr so stdout stays machine-readable.
/// `RUST_LOG` overrides the `warn` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
