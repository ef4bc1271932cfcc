//! Restart guard configuration

use anyhow::{Context, Result};
use guard_lib::ControllerConfig;
use serde::Deserialize;
use std::time::Duration;

/// Base name of the optional configuration file (`restart-guard.toml`, ...)
const CONFIG_FILE: &str = "restart-guard";

/// Environment variable prefix, e.g. `GUARD_WORKERS=4`
const ENV_PREFIX: &str = "GUARD";

/// Process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Restrict the pod watch to one namespace; all namespaces when unset
    #[serde(default)]
    pub watch_namespace: Option<String>,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Seconds between restart samples
    #[serde(default = "default_monitor_period")]
    pub monitor_period_secs: u64,

    /// Seconds between baseline capture and the first sample period
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: u32,

    #[serde(default = "default_annotation_key")]
    pub annotation_key: String,

    #[serde(default = "default_node_ready_condition")]
    pub node_ready_condition: String,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,
}

fn default_api_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    ControllerConfig::default().workers
}

fn default_max_retries() -> u32 {
    ControllerConfig::default().max_retries
}

fn default_monitor_period() -> u64 {
    ControllerConfig::default().monitor_period.as_secs()
}

fn default_settle_delay() -> u64 {
    ControllerConfig::default().settle_delay.as_secs()
}

fn default_restart_threshold() -> u32 {
    ControllerConfig::default().restart_threshold
}

fn default_annotation_key() -> String {
    guard_lib::controller::DEFAULT_ANNOTATION_KEY.to_string()
}

fn default_node_ready_condition() -> String {
    guard_lib::controller::DEFAULT_NODE_READY_CONDITION.to_string()
}

fn default_retry_base_delay() -> u64 {
    ControllerConfig::default().retry_base_delay.as_millis() as u64
}

fn default_retry_max_delay() -> u64 {
    ControllerConfig::default().retry_max_delay.as_secs()
}

impl AppConfig {
    /// Load configuration from the optional config file, then the environment
    pub fn load() -> Result<Self> {
        Self::from_sources(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_sources(env: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(env.try_parsing(true))
            .build()
            .context("failed to read configuration")?;

        let app: AppConfig = config
            .try_deserialize()
            .context("invalid configuration")?;
        app.to_controller_config()?;
        Ok(app)
    }

    /// The namespace to watch, treating an empty value as "all"
    pub fn namespace(&self) -> Option<&str> {
        self.watch_namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Controller tunables, validated
    pub fn to_controller_config(&self) -> Result<ControllerConfig> {
        let config = ControllerConfig {
            workers: self.workers,
            max_retries: self.max_retries,
            monitor_period: Duration::from_secs(self.monitor_period_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            restart_threshold: self.restart_threshold,
            annotation_key: self.annotation_key.clone(),
            node_ready_condition: self.node_ready_condition.clone(),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_secs(self.retry_max_delay_secs),
        };
        config.validate()?;
        Ok(config)
    }
}
