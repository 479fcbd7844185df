//! Audit trail commands.
//!
//! `plinth audit list` - Print recorded invocations, oldest first.

use anyhow::{Context, Result};
use plinth_audit::{AuditFilter, AuditOutcome, FileStorage};
use serde_json::Value;
use std::path::Path;

use super::load_config;

/// Parse an outcome name as written in the log (`timed_out`, `completed`, ...).
pub fn parse_outcome(raw: &str) -> Result<AuditOutcome> {
    serde_json::from_value(Value::String(raw.to_ascii_lowercase()))
        .with_context(|| format!("unknown outcome '{raw}' (completed, rejected, failed, timed_out)"))
}

/// Print the newest `limit` records matching the filters.
pub async fn list(
    config_path: &Path,
    action: Option<String>,
    outcome: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    if !config.audit.enabled {
        println!("Audit logging is disabled in {}", config_path.display());
        return Ok(());
    }

    let filter = AuditFilter {
        action,
        outcome: outcome.map(parse_outcome).transpose()?,
        ..Default::default()
    };

    // Read the file directly; no broker or write access is needed.
    let path = config.audit.log_path();
    if !path.exists() {
        println!("No audit records at {}", path.display());
        return Ok(());
    }
    let records = FileStorage::query_path(&path, filter)
        .await
        .with_context(|| format!("Failed to read audit log {}", path.display()))?;

    let skip = records.len().saturating_sub(limit);
    for record in records.iter().skip(skip) {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            println!("{}", record.to_log_line());
        }
    }

    Ok(())
}
