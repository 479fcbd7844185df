//! Audit record types.
//!
//! One [`AuditRecord`] is written per invocation, whatever its outcome.
//! Arguments are never stored verbatim; the record carries a SHA-256
//! fingerprint of their canonical JSON so that secrets passed to an action
//! do not end up in the audit file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Terminal outcome of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Program ran to completion (any exit status).
    Completed,
    /// Request refused before anything was spawned.
    Rejected,
    /// Encoding, launch or response decoding failed.
    Failed,
    /// Program exceeded its timeout and was killed.
    TimedOut,
}

impl std::fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Failed => write!(f, "FAILED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// An audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record ID.
    pub record_id: Uuid,

    /// When the record was appended. Assigned by the logger under its
    /// writer lock, so timestamps in the file never decrease.
    pub timestamp: DateTime<Utc>,

    /// Terminal outcome.
    pub outcome: AuditOutcome,

    /// Requested action name (may be unknown to the registry).
    pub action_name: String,

    /// Hex SHA-256 of the canonical argument JSON.
    pub argument_fingerprint: String,

    /// Program exit status, when a program ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,

    /// When the program was launched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Time from launch to reap, or from receipt to rejection.
    pub duration_ms: u64,

    /// Rejection or failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditRecord {
    /// Create a new record with the given outcome and core fields.
    pub fn new(
        outcome: AuditOutcome,
        action_name: impl Into<String>,
        argument_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            outcome,
            action_name: action_name.into(),
            argument_fingerprint: argument_fingerprint.into(),
            exit_status: None,
            started_at: None,
            duration_ms: 0,
            reason: None,
        }
    }

    /// Create a builder for an audit record.
    pub fn builder(
        outcome: AuditOutcome,
        action_name: impl Into<String>,
        arguments: &BTreeMap<String, Value>,
    ) -> AuditRecordBuilder {
        AuditRecordBuilder::new(outcome, action_name, arguments)
    }

    /// Format the record as a human-readable log line.
    ///
    /// Format: `[timestamp] OUTCOME action=... args=... [exit=...] duration_ms=...`
    pub fn to_log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} action={} args={}",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            self.outcome,
            self.action_name,
            &self.argument_fingerprint[..self.argument_fingerprint.len().min(12)],
        );

        if let Some(exit_status) = self.exit_status {
            line.push_str(&format!(" exit={}", exit_status));
        }

        line.push_str(&format!(" duration_ms={}", self.duration_ms));

        if let Some(ref reason) = self.reason {
            line.push_str(&format!(" reason=\"{}\"", reason.replace('"', "'")));
        }

        line
    }
}

/// Builder for creating audit records.
#[derive(Debug)]
pub struct AuditRecordBuilder {
    record: AuditRecord,
}

impl AuditRecordBuilder {
    /// Create a new builder, fingerprinting the arguments.
    pub fn new(
        outcome: AuditOutcome,
        action_name: impl Into<String>,
        arguments: &BTreeMap<String, Value>,
    ) -> Self {
        Self {
            record: AuditRecord::new(outcome, action_name, fingerprint_arguments(arguments)),
        }
    }

    /// Set the exit status.
    pub fn exit_status(mut self, status: i32) -> Self {
        self.record.exit_status = Some(status);
        self
    }

    /// Set the launch time.
    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.started_at = Some(at);
        self
    }

    /// Set the duration in milliseconds.
    pub fn duration_ms(mut self, duration: u64) -> Self {
        self.record.duration_ms = duration;
        self
    }

    /// Set the rejection or failure reason.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.record.reason = Some(reason.into());
        self
    }

    /// Build the audit record.
    pub fn build(self) -> AuditRecord {
        self.record
    }
}

/// Fingerprint an argument map.
///
/// `BTreeMap` serializes with sorted keys, so equal maps always hash equal.
pub fn fingerprint_arguments(arguments: &BTreeMap<String, Value>) -> String {
    let canonical = serde_json::to_vec(arguments).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
