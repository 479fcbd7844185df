//! Configuration types for the Plinth action broker.
//!
//! Configuration is loaded from a single YAML file (`plinth.yaml`) and
//! combined with the per-action manifests found in `actions_dir`.
//!
//! # Configuration Files
//!
//! - **plinth.yaml**: actions directory, broker limits, escalation helper and audit sink
//! - **actions/*.yaml**: one [`ActionManifest`] per privileged action program

pub mod action;
pub mod audit;
pub mod broker;
pub mod escalation;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub use action::ActionManifest;
pub use audit::AuditConfig;
pub use broker::BrokerConfig;
pub use escalation::{EscalationConfig, EscalationMethod};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/plinth/plinth.yaml";

/// Complete broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlinthConfig {
    /// Directory holding action programs and their manifests.
    #[serde(default = "default_actions_dir")]
    pub actions_dir: PathBuf,

    /// Invocation limits.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// How privileged programs are launched.
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Audit trail configuration.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for PlinthConfig {
    fn default() -> Self {
        Self {
            actions_dir: default_actions_dir(),
            broker: BrokerConfig::default(),
            escalation: EscalationConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

fn default_actions_dir() -> PathBuf {
    PathBuf::from("/usr/share/plinth/actions")
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PlinthConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration and resolve relative paths against the file's directory.
    pub fn load_with_context(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::from_file(path)?;

        let base_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        if config.actions_dir.is_relative() {
            config.actions_dir = base_dir.join(&config.actions_dir);
        }
        if config.audit.directory.is_relative() {
            config.audit.directory = base_dir.join(&config.audit.directory);
        }

        Ok(config)
    }

    /// Reject settings that would make the broker unsafe or unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.default_timeout_secs == 0 {
            return Err(ConfigError::Config(
                "broker.default_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.broker.max_concurrent == Some(0) {
            return Err(ConfigError::Config(
                "broker.max_concurrent must be greater than zero when set".to_string(),
            ));
        }
        if let Some(helper) = &self.escalation.helper {
            if !helper.is_absolute() {
                return Err(ConfigError::Config(format!(
                    "escalation.helper must be an absolute path, got '{}'",
                    helper.display()
                )));
            }
        }
        for name in &self.escalation.env_allowlist {
            if name.is_empty() || name.contains('=') || name.contains('\0') {
                return Err(ConfigError::Config(format!(
                    "invalid environment variable name in escalation.env_allowlist: '{name}'"
                )));
            }
        }
        Ok(())
    }
}
