use anyhow::{Context, Result};
use clap::Parser;
use lib_feed::{FeedConfig, UnknownTypePolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "server_feed.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Score feed consumer", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FEED_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FEED_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FEED_BASE_URL", help = "Base ws:// or wss:// address of the score socket.")]
    pub base_url: Option<String>,

    #[clap(long, env = "FEED_PATH", help = "Relative path appended to the base address.")]
    pub path: Option<String>,

    #[clap(long, env = "FEED_DISCRIMINATOR_FIELD", help = "Envelope field carrying the message type.")]
    pub discriminator_field: Option<String>,

    #[clap(long, env = "FEED_MAX_MESSAGE_BYTES", help = "Receive buffer ceiling for one message.")]
    pub max_message_bytes: Option<usize>,

    #[clap(long, env = "FEED_CONNECT_TIMEOUT_MS", help = "Handshake timeout in milliseconds.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "FEED_CLOSE_TIMEOUT_MS", help = "Close handshake timeout in milliseconds.")]
    pub close_timeout_ms: Option<u64>,

    #[clap(long, env = "FEED_UNKNOWN_TYPE_POLICY", help = "continue or terminate on unknown message types.")]
    pub unknown_type_policy: Option<UnknownTypePolicy>,

    #[clap(long, env = "FEED_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "FEED_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,
}

impl Config {
    fn defaults() -> Config {
        let feed = FeedConfig::default();
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            base_url: Some(feed.base_url),
            path: Some(feed.path),
            discriminator_field: Some(feed.discriminator_field),
            max_message_bytes: Some(feed.max_message_bytes),
            connect_timeout_ms: Some(feed.connect_timeout_ms),
            close_timeout_ms: Some(feed.close_timeout_ms),
            unknown_type_policy: Some(feed.unknown_type_policy),
            reconnect_base_delay_ms: Some(1000),
            reconnect_max_delay_ms: Some(60000),
            ..Default::default()
        }
    }

    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            base_url: other.base_url.or(self.base_url),
            path: other.path.or(self.path),
            discriminator_field: other.discriminator_field.or(self.discriminator_field),
            max_message_bytes: other.max_message_bytes.or(self.max_message_bytes),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            close_timeout_ms: other.close_timeout_ms.or(self.close_timeout_ms),
            unknown_type_policy: other.unknown_type_policy.or(self.unknown_type_policy),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
        }
    }

    /// The library settings, with library defaults for anything unset.
    pub fn feed_config(&self) -> FeedConfig {
        let defaults = FeedConfig::default();
        FeedConfig {
            base_url: self.base_url.clone().unwrap_or(defaults.base_url),
            path: self.path.clone().unwrap_or(defaults.path),
            discriminator_field: self.discriminator_field.clone().unwrap_or(defaults.discriminator_field),
            max_message_bytes: self.max_message_bytes.unwrap_or(defaults.max_message_bytes),
            connect_timeout_ms: self.connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
            close_timeout_ms: self.close_timeout_ms.unwrap_or(defaults.close_timeout_ms),
            unknown_type_policy: self.unknown_type_policy.unwrap_or(defaults.unknown_type_policy),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn read_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str::<Config>(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Layers defaults, the JSON file and the already parsed CLI/env values.
///
/// A config file named explicitly must exist; the default file is optional.
pub fn resolve(cli: Config) -> Result<Config> {
    // 1. Load defaults
    let mut current_config = Config::defaults();

    // 2. Load from config file if present
    match &cli.config_path {
        Some(path) => current_config = current_config.merge(read_config_file(path)?),
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                current_config = current_config.merge(read_config_file(&default_path)?);
            } else {
                log::info!(
                    "Config file not found at {}. Using defaults and environment/CLI variables.",
                    default_path.display()
                );
            }
        }
    }

    // 3. Override with environment variables and CLI arguments
    Ok(current_config.merge(cli))
}

pub fn load_config() -> Result<Config> {
    // .env values become visible to clap's `env` lookups
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("Failed to load .env file");
        }
    }

    resolve(Config::parse())
}
