//! Action manifest files.
//!
//! Every action program in `actions_dir` is described by a YAML manifest
//! next to it. The manifest is the only source of the argument schema; a
//! program without a valid manifest is never callable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::ConfigError;
use crate::action::{ArgumentSpec, ResponseFormat};

/// Contents of one `<action>.yaml` manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionManifest {
    /// Action name (unique across the registry).
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Program file name inside `actions_dir`. Defaults to `name`.
    #[serde(default)]
    pub executable: Option<String>,

    /// Run through the escalation helper.
    #[serde(default = "default_privileged")]
    pub privileged: bool,

    /// Serialize same-name invocations. Defaults to the broker setting.
    #[serde(default)]
    pub exclusive: Option<bool>,

    /// Timeout in seconds. Defaults to the broker setting.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// `frame` requires a response frame on stdout.
    #[serde(default)]
    pub response: ResponseFormat,

    /// Ordered argument schema.
    #[serde(default)]
    pub arguments: Vec<ArgumentSpec>,
}

fn default_privileged() -> bool {
    true
}

impl ActionManifest {
    /// Load a manifest from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse a manifest from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Program file name, falling back to the action name.
    pub fn executable_name(&self) -> &str {
        self.executable.as_deref().unwrap_or(&self.name)
    }
}
