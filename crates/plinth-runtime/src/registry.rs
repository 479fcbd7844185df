//! Action registry.
//!
//! Built once from `actions_dir` at startup. Each action is a program plus a
//! YAML manifest next to it. Broken entries are skipped with a warning so
//! one bad manifest cannot take the whole panel down; a missing or
//! unreadable directory is fatal because the broker cannot know what is
//! permitted.

use plinth_core::{ActionManifest, ActionSpec, BrokerConfig};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static ACTION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("action name pattern is valid")
});

/// Errors returned by the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("actions directory {path} is not readable: {source}")]
    DirectoryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown action '{0}'")]
    NotFound(String),
}

/// A manifest that was not loaded, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Immutable catalog of permitted actions.
#[derive(Debug, Clone)]
pub struct Registry {
    directory: PathBuf,
    actions: BTreeMap<String, ActionSpec>,
    skipped: Vec<SkippedEntry>,
}

impl Registry {
    /// Scan `directory` and build the catalog.
    ///
    /// `defaults` supplies the timeout and serialization setting for
    /// manifests that do not set their own.
    pub fn load(directory: impl AsRef<Path>, defaults: &BrokerConfig) -> Result<Self, RegistryError> {
        let directory = directory.as_ref().to_path_buf();
        let unreadable = |source| RegistryError::DirectoryUnreadable {
            path: directory.clone(),
            source,
        };

        let metadata = fs::metadata(&directory).map_err(unreadable)?;
        if !metadata.is_dir() {
            return Err(unreadable(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "not a directory",
            )));
        }

        let mut manifests: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&directory).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let path = entry.path();
            if path
                .extension()
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false)
            {
                manifests.push(path);
            }
        }
        // Deterministic duplicate resolution: first file name wins.
        manifests.sort();

        let mut registry = Self {
            directory,
            actions: BTreeMap::new(),
            skipped: Vec::new(),
        };

        for path in manifests {
            match registry.load_entry(&path, defaults) {
                Ok(spec) => {
                    tracing::debug!(
                        action = %spec.name,
                        executable = %spec.executable_path.display(),
                        privileged = spec.privileged,
                        "Registered action"
                    );
                    registry.actions.insert(spec.name.clone(), spec);
                }
                Err(reason) => {
                    tracing::warn!(manifest = %path.display(), %reason, "Skipping action manifest");
                    registry.skipped.push(SkippedEntry { path, reason });
                }
            }
        }

        tracing::info!(
            directory = %registry.directory.display(),
            loaded = registry.actions.len(),
            skipped = registry.skipped.len(),
            "Action registry loaded"
        );

        Ok(registry)
    }

    /// Build a registry from already-constructed specs (no filesystem checks).
    pub fn from_specs(specs: impl IntoIterator<Item = ActionSpec>) -> Self {
        Self {
            directory: PathBuf::new(),
            actions: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
            skipped: Vec::new(),
        }
    }

    fn load_entry(&self, path: &Path, defaults: &BrokerConfig) -> Result<ActionSpec, String> {
        let manifest = ActionManifest::from_file(path).map_err(|e| e.to_string())?;

        if !ACTION_NAME.is_match(&manifest.name) {
            return Err(format!("invalid action name '{}'", manifest.name));
        }
        if self.actions.contains_key(&manifest.name) {
            return Err(format!("duplicate action name '{}'", manifest.name));
        }

        let mut seen = HashSet::new();
        for arg in &manifest.arguments {
            if !seen.insert(arg.name.as_str()) {
                return Err(format!("duplicate argument '{}'", arg.name));
            }
        }

        let timeout = match manifest.timeout_secs {
            Some(0) => return Err("timeout_secs must be greater than zero".to_string()),
            Some(secs) => Duration::from_secs(secs),
            None => defaults.default_timeout(),
        };

        let executable_path = self.resolve_executable(manifest.executable_name())?;

        Ok(ActionSpec {
            name: manifest.name,
            description: manifest.description,
            executable_path,
            argument_schema: manifest.arguments,
            timeout,
            privileged: manifest.privileged,
            exclusive: manifest.exclusive.unwrap_or(defaults.serialize_same_action),
            response: manifest.response,
        })
    }

    /// Resolve a program name to a path inside the actions directory and
    /// check that it is a safe executable.
    fn resolve_executable(&self, name: &str) -> Result<PathBuf, String> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(format!("executable '{name}' must be a plain file name"));
        }

        let path = self.directory.join(name);
        let metadata = fs::metadata(&path)
            .map_err(|e| format!("executable {} is not accessible: {e}", path.display()))?;
        if !metadata.is_file() {
            return Err(format!("executable {} is not a regular file", path.display()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            if mode & 0o111 == 0 {
                return Err(format!("{} is not executable", path.display()));
            }
            if mode & 0o022 != 0 {
                return Err(format!(
                    "{} is group- or world-writable (mode {:o})",
                    path.display(),
                    mode & 0o7777
                ));
            }
        }

        Ok(path)
    }

    /// Look up an action by name.
    pub fn lookup(&self, name: &str) -> Result<&ActionSpec, RegistryError> {
        self.actions
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Action names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    /// Action specs in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ActionSpec> {
        self.actions.values()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Manifests skipped during load.
    pub fn skipped(&self) -> &[SkippedEntry] {
        &self.skipped
    }

    /// Directory the registry was loaded from.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}
