//! Audit logging configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Whether audit logging is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Also print a human-readable line per record on stdout.
    #[serde(default)]
    pub stdout: bool,

    /// Directory holding the audit file.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// File name inside `directory`.
    #[serde(default = "default_file_name")]
    pub file_name: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            stdout: false,
            directory: default_directory(),
            file_name: default_file_name(),
        }
    }
}

impl AuditConfig {
    /// Full path of the audit file.
    pub fn log_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_directory() -> PathBuf {
    PathBuf::from("/var/log/plinth")
}

fn default_file_name() -> String {
    "audit.log".to_string()
}
