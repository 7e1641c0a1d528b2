//! Logging initialization

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_ansi(console::colors_enabled_stderr())
        .with_target(debug)
        .init();
}
