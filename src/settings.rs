use std::time::Duration;

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::services::coordinator::CoordinatorConfig;

/// Process settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_host: String,
    pub server_port: u16,
    pub session_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// How long the HTTP layer holds a long-poll open before answering 204.
    pub poll_timeout_secs: u64,
    pub http_workers: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(Environment::default().try_parsing(true))
    }

    fn from_source(environment: Environment) -> Result<Self, ConfigError> {
        let settings: Settings = Config::builder()
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default("session_ttl_secs", 120)?
            .set_default("sweep_interval_secs", 15)?
            .set_default("poll_timeout_secs", 30)?
            .set_default("http_workers", 4)?
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session_ttl_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(ConfigError::Message(
                "SESSION_TTL_SECS and SWEEP_INTERVAL_SECS must be positive".into(),
            ));
        }
        if self.poll_timeout_secs == 0 || self.poll_timeout_secs >= self.session_ttl_secs {
            return Err(ConfigError::Message(
                "POLL_TIMEOUT_SECS must be positive and shorter than SESSION_TTL_SECS".into(),
            ));
        }
        if self.http_workers == 0 {
            return Err(ConfigError::Message("HTTP_WORKERS must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            session_ttl_secs: 120,
            sweep_interval_secs: 15,
            poll_timeout_secs: 30,
            http_workers: 4,
        }
    }
}
