//! Privilege escalation configuration.
//!
//! The escalation helper is always invoked with a fixed argv: the helper
//! path, its fixed flags, `/usr/bin/timeout` with the action's deadline,
//! then the absolute path of the action program. Nothing derived from a
//! request is ever placed on the command line.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mechanism used to run privileged action programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EscalationMethod {
    /// `sudo -n --` (non-interactive; requires a sudoers rule for the action programs).
    #[default]
    Sudo,
    /// `pkexec` (requires a polkit rule).
    Pkexec,
    /// Run directly. Only correct when the broker itself already runs as root.
    None,
}

/// How privileged programs are launched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct EscalationConfig {
    #[serde(default)]
    pub method: EscalationMethod,

    /// Override the helper binary path (must be absolute).
    #[serde(default)]
    pub helper: Option<PathBuf>,

    /// Names of variables copied from the broker's environment into the
    /// child's otherwise empty environment.
    #[serde(default)]
    pub env_allowlist: Vec<String>,
}

impl EscalationConfig {
    /// Helper program and its fixed leading arguments, or `None` for direct execution.
    pub fn launcher(&self) -> Option<(PathBuf, Vec<&'static str>)> {
        let (default_helper, args): (&str, Vec<&'static str>) = match self.method {
            EscalationMethod::Sudo => ("/usr/bin/sudo", vec!["-n", "--"]),
            EscalationMethod::Pkexec => ("/usr/bin/pkexec", vec![]),
            EscalationMethod::None => return None,
        };
        let helper = self
            .helper
            .clone()
            .unwrap_or_else(|| PathBuf::from(default_helper));
        Some((helper, args))
    }
}
