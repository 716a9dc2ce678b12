use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use core::str::FromStr;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use web3::types::H160;

use crate::{
    constants::{ENV_PREFIX, ENV_SEPARATOR},
    eth::utils,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Eth {
    pub chain_id: u64,
    pub http_endpoint: String,
    /// Reserved for a websocket subscription transport; validated but unused
    /// by the HTTP polling gateway.
    #[serde(default)]
    pub ws_endpoint: Option<String>,
    pub exchange_address: String,
    pub conditional_tokens_address: String,
    /// First block to index when no checkpoint exists yet.
    pub start_block: u64,
}

impl Eth {
    pub fn exchange_address(&self) -> H160 {
        H160::from_str(&self.exchange_address).expect("address validated at startup")
    }

    pub fn conditional_tokens_address(&self) -> H160 {
        H160::from_str(&self.conditional_tokens_address).expect("address validated at startup")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Sync {
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    pub service_name: String,
}

impl Sync {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

fn default_confirmations() -> u64 {
    100
}

fn default_batch_size() -> u64 {
    1000
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_workers() -> usize {
    4
}

fn default_retry_interval_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MessageQueue {
    pub endpoint: String,
    pub subject_prefix: String,
    pub stream_name: String,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

fn default_dedup_window_secs() -> u64 {
    // must cover the longest expected retry/reprocess interval across restarts
    1200
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub data_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheck {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Prometheus {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub eth: Eth,
    pub sync: Sync,
    pub message_queue: MessageQueue,
    pub db: Database,
    pub health_check: Option<HealthCheck>,
    pub prometheus: Option<Prometheus>,
}

#[derive(Parser, Debug, Clone)]
#[clap(version, about = "Event indexer for the CTF exchange and conditional tokens contracts")]
pub struct CommandLineOptions {
    #[clap(
        short = 'c',
        long = "config",
        default_value = "config/default.toml",
        help = "Path to the settings file"
    )]
    pub config_path: String,
}

impl Settings {
    pub fn new(opts: &CommandLineOptions) -> Result<Self, ConfigError> {
        Self::from_file_and_env(&opts.config_path)
    }

    /// Loads the settings file, then applies `INDEXER__`-prefixed environment
    /// overrides (`__` separates nesting levels).
    pub fn from_file_and_env(file: &str) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(file))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        utils::is_eth_address(&self.eth.exchange_address)
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        utils::is_eth_address(&self.eth.conditional_tokens_address)
            .map_err(|e| ConfigError::Message(e.to_string()))?;
        if let Some(ws_endpoint) = &self.eth.ws_endpoint {
            utils::parse_websocket_url(ws_endpoint)
                .map_err(|e| ConfigError::Message(e.to_string()))?;
        }
        if self.sync.workers < 1 {
            return Err(ConfigError::Message(
                "sync.workers must be at least 1".to_string(),
            ));
        }
        if self.sync.batch_size < 1 {
            return Err(ConfigError::Message(
                "sync.batch_size must be at least 1".to_string(),
            ));
        }
        if self.message_queue.subject_prefix.is_empty() {
            return Err(ConfigError::Message(
                "message_queue.subject_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    pub fn new_test_settings() -> Result<Settings, ConfigError> {
        Settings::from_file_and_env("config/testing.toml")
    }
}
