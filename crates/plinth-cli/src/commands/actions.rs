//! Registry inspection commands.
//!
//! `plinth actions list` - List registered actions.
//! `plinth actions describe` - Show one action's full definition.
//! `plinth actions check` - Load the registry and report skipped manifests.

use anyhow::{Context, Result};
use plinth_runtime::Registry;
use std::path::Path;

use super::load_config;

fn load_registry(config_path: &Path) -> Result<Registry> {
    let config = load_config(config_path)?;
    Registry::load(&config.actions_dir, &config.broker)
        .with_context(|| format!("Failed to load actions from {:?}", config.actions_dir))
}

/// List registered actions.
pub fn list(config_path: &Path) -> Result<()> {
    let registry = load_registry(config_path)?;

    if registry.is_empty() {
        println!("No actions registered in {}", registry.directory().display());
        return Ok(());
    }

    let width = registry.names().map(str::len).max().unwrap_or(0);
    println!("\n🔧 Actions ({}):", registry.len());
    for spec in registry.iter() {
        let mode = if spec.privileged { "root" } else { "user" };
        println!(
            "   {:<width$}  {}  {:>5}s  {}",
            spec.name,
            mode,
            spec.timeout.as_secs(),
            spec.description.as_deref().unwrap_or(""),
        );
    }

    if !registry.skipped().is_empty() {
        println!(
            "\n⚠️  {} manifest(s) skipped; run `plinth actions check` for details.",
            registry.skipped().len()
        );
    }

    Ok(())
}

/// Print one action's definition as YAML.
pub fn describe(config_path: &Path, name: &str) -> Result<()> {
    let registry = load_registry(config_path)?;
    let spec = registry.lookup(name)?;
    print!("{}", serde_yaml::to_string(spec)?);
    Ok(())
}

/// Report loaded and skipped entries. Returns `false` if anything was skipped.
pub fn check(config_path: &Path) -> Result<bool> {
    let registry = load_registry(config_path)?;

    for spec in registry.iter() {
        println!("✔ {} ({})", spec.name, spec.executable_path.display());
    }
    for skipped in registry.skipped() {
        println!("✘ {}: {}", skipped.path.display(), skipped.reason);
    }

    println!(
        "\n{} loaded, {} skipped",
        registry.len(),
        registry.skipped().len()
    );
    Ok(registry.skipped().is_empty())
}
