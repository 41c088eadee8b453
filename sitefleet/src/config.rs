//! Configuration management using Figment.
//!
//! Configuration is loaded from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Environment variables (prefix: `SITEFLEET_`, `__` separates nesting)
//! 2. Current working directory: `./sitefleet.toml`
//! 3. XDG config directory: `~/.config/sitefleet/config.toml`
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Top-level configuration for the multi-site runtime plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub fleet: FleetConfig,
    pub recorder: RecorderConfig,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Site Fleet Manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Maximum number of concurrently running Site Servers.
    #[serde(default = "default_max_sites")]
    pub max_sites: usize,
    /// Root directory under which `<state_dir>/sites/<site>` per-site state lives.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Named capability bucket consulted by the authn middleware.
    #[serde(default = "default_capability_name")]
    pub capability_name: String,
}

/// Request Recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// SQLite connection URL for the analytics store.
    #[serde(default = "default_recorder_db_url")]
    pub database_url: String,
    /// Bounded in-memory queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Flush trigger: batch size.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Flush trigger: idle tick, in seconds.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

/// Webhook Notifier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// SQLite connection URL for the delivery log.
    #[serde(default = "default_notifier_db_url")]
    pub database_url: String,
    /// Bounded in-flight delivery semaphore capacity.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Retry delays, in seconds, applied between attempts.
    #[serde(default = "default_retry_delays_secs")]
    pub retry_delays_secs: Vec<u64>,
}

/// TLS configuration for the overlay listener stand-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

fn default_service_name() -> String {
    "sitefleet".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_sites() -> usize {
    64
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/sitefleet")
}

fn default_capability_name() -> String {
    "sites".to_string()
}

fn default_recorder_db_url() -> String {
    "sqlite://sitefleet-analytics.db".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_secs() -> u64 {
    1
}

fn default_notifier_db_url() -> String {
    "sqlite://sitefleet-webhooks.db".to_string()
}

fn default_max_in_flight() -> usize {
    20
}

fn default_retry_delays_secs() -> Vec<u64> {
    vec![5, 30, 120]
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_sites: default_max_sites(),
            state_dir: default_state_dir(),
            capability_name: default_capability_name(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            database_url: default_recorder_db_url(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            database_url: default_notifier_db_url(),
            max_in_flight: default_max_in_flight(),
            retry_delays_secs: default_retry_delays_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            fleet: FleetConfig::default(),
            recorder: RecorderConfig::default(),
            notifier: NotifierConfig::default(),
            tls: None,
        }
    }
}

impl Config {
    /// Load configuration from the standard search path (see module docs).
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_paths())
    }

    /// Load configuration, merging each of `paths` in order (later paths win),
    /// then environment variables on top.
    pub fn load_from(paths: Vec<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        for path in paths {
            if path.exists() {
                figment = figment.merge(Toml::file(&path));
            }
        }

        figment = figment.merge(Env::prefixed("SITEFLEET_").split("__"));

        Ok(figment.extract()?)
    }

    /// Candidate config file paths, lowest to highest precedence.
    fn find_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(config_dir) = xdg_config_dir() {
            paths.push(config_dir.join("config.toml"));
        }
        paths.push(PathBuf::from("sitefleet.toml"));

        if let Ok(explicit) = std::env::var("SITEFLEET_CONFIG") {
            paths.push(PathBuf::from(explicit));
        }

        paths
    }
}

fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".config")))
        .map(|base| base.join("sitefleet"))
}
