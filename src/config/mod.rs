//! Configuration management for the tracker
//!
//! Loads from optional config files + environment variables via .env

mod logging;

pub use logging::init_logging;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub telegram: TelegramConfig,
    pub notify: NotifyConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Data directory for the sample CSV and subscriber state file
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// SushiBar GraphQL endpoint
    pub graphql_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token; when absent the messaging side is disabled
    pub bot_token: Option<String>,
    /// Telegram API base URL
    pub api_url: String,
    /// getUpdates long-poll timeout in seconds
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    /// 0 suppresses only exact-zero deltas; T > 0 dispatches only |delta| >= T
    pub suppression_threshold_percent: f64,
    /// Concurrent sends per fan-out
    pub fanout_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    pub bind: String,
    /// HTTP port
    pub port: u16,
    /// Directory holding the built frontend assets
    pub static_dir: String,
    /// Upstream URL for the balance pass-through; when absent the endpoint
    /// reports a service error
    pub balance_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Storage defaults
            .set_default("storage.data_dir", "./data")?
            // Source defaults
            .set_default(
                "source.graphql_url",
                "https://production.data-gcp.sushi.com/graphql",
            )?
            .set_default("source.timeout_secs", 10)?
            // Telegram defaults
            .set_default("telegram.api_url", "https://api.telegram.org")?
            .set_default("telegram.poll_timeout_secs", 30)?
            // Notification defaults
            .set_default("notify.suppression_threshold_percent", 0.0)?
            .set_default("notify.fanout_concurrency", 4)?
            // Scheduler defaults
            .set_default("scheduler.interval_secs", 3600)?
            // API defaults
            .set_default("api.bind", "0.0.0.0")?
            .set_default("api.port", 8080)?
            .set_default("api.static_dir", "./static")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (XSUSHI_*)
            .add_source(Environment::with_prefix("XSUSHI").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Bare BOT_TOKEN is honored as a fallback for the nested key
        if app_config.telegram.bot_token.is_none() {
            if let Ok(token) = std::env::var("BOT_TOKEN") {
                if !token.is_empty() {
                    app_config.telegram.bot_token = Some(token);
                }
            }
        }

        Ok(app_config)
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "data_dir={} interval_secs={} threshold={} port={} telegram={}",
            self.storage.data_dir,
            self.scheduler.interval_secs,
            self.notify.suppression_threshold_percent,
            self.api.port,
            if self.telegram.bot_token.is_some() {
                "configured"
            } else {
                "disabled"
            }
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let config = AppConfig::load().expect("defaults should load");
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert_eq!(config.notify.suppression_threshold_percent, 0.0);
        assert_eq!(config.source.timeout_secs, 10);
        assert_eq!(config.api.port, 8080);
    }

    #[test]
    fn digest_never_leaks_the_token() {
        let mut config = AppConfig::load().expect("defaults should load");
        config.telegram.bot_token = Some("123:secret".to_string());
        assert!(!config.digest().contains("secret"));
        assert!(config.digest().contains("telegram=configured"));
    }
}
