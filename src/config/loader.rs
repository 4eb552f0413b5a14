//! Configuration Loader
//!
//! Reads the environment file mounted by the director and assembles the runtime
//! settings of the bot process from defaults overridden by `BOTICA_*` variables.

use super::error::ConfigurationError;
use super::MainConfiguration;
use crate::broker::RetryPolicy;
use crate::constants::{broker, environment, protocol};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Settings of the bot process, resolved from `BOTICA_*` environment variables
///
/// | Variable | Default |
/// |----------|---------|
/// | `BOTICA_BOT_TYPE` | required |
/// | `BOTICA_BOT_ID` | required |
/// | `BOTICA_CONFIG_PATH` | `/run/secrets/botica-config` |
/// | `BOTICA_BROKER_HOST` | `botica-rabbitmq` |
/// | `BOTICA_BROKER_PORT` | `5672` (overridden by the broker section's port) |
/// | `BOTICA_CONNECT_MAX_ATTEMPTS` | `7` |
/// | `BOTICA_CONNECT_RETRY_SECONDS` | `5` |
/// | `BOTICA_QUERY_TIMEOUT_MS` | `3000` |
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RuntimeSettings {
    pub bot_type: String,
    pub bot_id: String,
    pub config_path: PathBuf,
    pub broker_host: String,
    pub broker_port: u16,
    pub connect_max_attempts: u32,
    pub connect_retry_seconds: u64,
    pub query_timeout_ms: u64,
}

impl RuntimeSettings {
    /// Resolve settings from the process environment
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_source(None)
    }

    /// Resolve settings from an explicit variable map instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigurationError> {
        Self::from_source(Some(vars))
    }

    fn from_source(vars: Option<HashMap<String, String>>) -> Result<Self, ConfigurationError> {
        let settings = config::Config::builder()
            .set_default("config_path", environment::DEFAULT_CONFIG_PATH)?
            .set_default("broker_host", broker::DEFAULT_HOST)?
            .set_default("broker_port", i64::from(broker::DEFAULT_PORT))?
            .set_default("connect_max_attempts", i64::from(broker::MAX_CONNECT_ATTEMPTS))?
            .set_default(
                "connect_retry_seconds",
                broker::CONNECT_RETRY_INTERVAL.as_secs() as i64,
            )?
            .set_default(
                "query_timeout_ms",
                protocol::DEFAULT_QUERY_TIMEOUT.as_millis() as i64,
            )?
            .add_source(
                config::Environment::with_prefix(environment::ENV_PREFIX)
                    .prefix_separator("_")
                    .source(vars),
            )
            .build()?;

        let resolved: RuntimeSettings = settings.try_deserialize()?;

        if resolved.bot_type.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "BOTICA_BOT_TYPE",
                "runtime settings",
            ));
        }
        if resolved.bot_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "BOTICA_BOT_ID",
                "runtime settings",
            ));
        }
        if resolved.connect_max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "BOTICA_CONNECT_MAX_ATTEMPTS",
                "0",
                "at least one connection attempt is required",
            ));
        }

        debug!(
            bot_type = %resolved.bot_type,
            bot_id = %resolved.bot_id,
            config_path = %resolved.config_path.display(),
            broker_host = %resolved.broker_host,
            "Runtime settings resolved"
        );

        Ok(resolved)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_max_attempts,
            Duration::from_secs(self.connect_retry_seconds),
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Load and validate the environment configuration file
pub fn load_configuration(path: impl AsRef<Path>) -> Result<MainConfiguration, ConfigurationError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ConfigurationError::config_file_not_found(path));
    }

    let display_path = path.display().to_string();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigurationError::file_read_error(&display_path, e))?;

    let configuration: MainConfiguration = serde_yaml::from_str(&contents)
        .map_err(|e| ConfigurationError::invalid_yaml(&display_path, e))?;
    configuration.validate()?;

    debug!(
        path = %display_path,
        bot_types = configuration.bots.len(),
        "Environment configuration loaded"
    );

    Ok(configuration)
}
