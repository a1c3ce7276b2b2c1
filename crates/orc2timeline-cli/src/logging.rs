//! Structured logging with tracing-subscriber.

use tracing_subscriber::EnvFilter;

/// Initialize logging on stderr.
///
/// Uses the `RUST_LOG` env var if set, otherwise the `--log-level` value.
/// `WARNING` is accepted as an alias so the historical level names keep
/// working.
pub fn init(log_level: &str) {
    let level = match log_level.to_ascii_uppercase().as_str() {
        "WARNING" => "warn".to_string(),
        other => other.to_ascii_lowercase(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
