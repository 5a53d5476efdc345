use crate::health::HealthDataType;
use crate::transport::parse_endpoint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const MIN_DEADLINE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub endpoint: String,
    #[serde(default = "default_admin_api_prefix")]
    pub admin_api_prefix: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_grace_secs")]
    pub request_grace_secs: u64,
    #[serde(default = "default_deadline")]
    pub deadline: String,
    #[serde(default = "default_types")]
    pub types: Vec<HealthDataType>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("unable to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Validation("endpoint is required".to_string()));
        }
        parse_endpoint(&self.endpoint).map_err(|err| ConfigError::Validation(err.to_string()))?;
        if !self.admin_api_prefix.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "admin_api_prefix '{}' must start with '/'",
                self.admin_api_prefix
            )));
        }
        if self.connect_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "connect_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user_agent must not be empty".to_string(),
            ));
        }
        self.deadline()?;
        Ok(())
    }

    /// Server-side collection budget parsed from `deadline`.
    pub fn deadline(&self) -> Result<Duration, ConfigError> {
        parse_deadline(&self.deadline)
    }

    pub fn request_grace(&self) -> Duration {
        Duration::from_secs(self.request_grace_secs)
    }

    /// Total time a report request may take; saturates instead of overflowing.
    pub fn request_budget(&self, deadline: Duration) -> Duration {
        deadline.saturating_add(self.request_grace())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

pub fn parse_deadline(text: &str) -> Result<Duration, ConfigError> {
    let deadline = humantime::parse_duration(text.trim())
        .map_err(|err| ConfigError::Validation(format!("deadline '{text}': {err}")))?;
    if deadline < MIN_DEADLINE {
        return Err(ConfigError::Validation(format!(
            "deadline '{text}' must be at least 1s"
        )));
    }
    Ok(deadline)
}

fn default_admin_api_prefix() -> String {
    "/minio/admin/v3".to_string()
}

const fn default_connect_timeout_secs() -> u64 {
    10
}

const fn default_request_grace_secs() -> u64 {
    30
}

fn default_deadline() -> String {
    "1h".to_string()
}

fn default_types() -> Vec<HealthDataType> {
    HealthDataType::ALL.to_vec()
}

fn default_user_agent() -> String {
    concat!("healthdiag/", env!("CARGO_PKG_VERSION")).to_string()
}
