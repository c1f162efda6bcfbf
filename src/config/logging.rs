//! Logging setup
//!
//! `LOG_FORMAT` selects `json` (default) or `pretty` output; `RUST_LOG`
//! controls the level filter (default: `info`).

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
pub fn init_logging() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_format == "pretty" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .pretty()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    }
}
