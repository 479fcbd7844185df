//! Audit logger implementation.
//!
//! The `AuditLogger` is the single owned audit sink of a broker process. It
//! is opened at startup, injected into the broker and closed at shutdown.

use chrono::{DateTime, Utc};
use plinth_core::AuditConfig;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AuditError;
use crate::record::{AuditOutcome, AuditRecord};
use crate::storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};

/// The main audit logger.
///
/// Appends are serialized by one writer lock. The record timestamp is
/// assigned while that lock is held and clamped to the previous one, so the
/// stored sequence is ordered even if the wall clock steps backwards.
pub struct AuditLogger {
    config: AuditConfig,
    storage: Arc<dyn AuditStorage>,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl AuditLogger {
    /// Open the audit sink described by the configuration.
    pub fn open(config: AuditConfig) -> Result<Self, AuditError> {
        let storage: Arc<dyn AuditStorage> = if !config.enabled {
            Arc::new(NullStorage::new())
        } else {
            let file_path = config.log_path();

            if config.stdout {
                // Dual output: file + console
                Arc::new(DualStorage::open(&file_path)?)
            } else {
                Arc::new(FileStorage::open(&file_path)?)
            }
        };

        tracing::info!(
            enabled = config.enabled,
            path = %config.log_path().display(),
            "Audit log opened"
        );

        Ok(Self::with_storage(config, storage))
    }

    /// Create a logger with a custom storage backend.
    pub fn with_storage(config: AuditConfig, storage: Arc<dyn AuditStorage>) -> Self {
        Self {
            config,
            storage,
            last_timestamp: Mutex::new(None),
        }
    }

    /// Create a disabled (no-op) logger.
    pub fn disabled() -> Self {
        Self::with_storage(
            AuditConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(NullStorage::new()),
        )
    }

    /// Create a console-only logger (useful for development).
    pub fn console_only() -> Self {
        Self::with_storage(
            AuditConfig {
                enabled: true,
                stdout: true,
                ..Default::default()
            },
            Arc::new(ConsoleStorage::new()),
        )
    }

    /// Check if logging is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Append a record durably and return it as stored.
    pub async fn record(&self, mut record: AuditRecord) -> Result<AuditRecord, AuditError> {
        let mut last = self.last_timestamp.lock().await;

        let now = Utc::now();
        record.timestamp = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };

        tracing::debug!(
            record_id = %record.record_id,
            outcome = %record.outcome,
            action = %record.action_name,
            exit_status = ?record.exit_status,
            duration_ms = record.duration_ms,
            "Audit record"
        );

        self.storage.store(&record).await?;
        *last = Some(record.timestamp);
        Ok(record)
    }

    /// Query audit records with filters.
    pub async fn query(&self, filter: AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        self.storage.query(filter).await
    }

    /// Flush and close the sink. Later appends fail.
    pub async fn close(&self) -> Result<(), AuditError> {
        // Wait for any in-flight append.
        let _last = self.last_timestamp.lock().await;
        self.storage.close().await
    }
}

/// Filter for querying audit records.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Filter by action name.
    pub action: Option<String>,
    /// Filter by outcome.
    pub outcome: Option<AuditOutcome>,
    /// Filter by start time (inclusive).
    pub start_time: Option<DateTime<Utc>>,
    /// Filter by end time (inclusive).
    pub end_time: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

impl AuditFilter {
    /// Whether a record passes every filter field.
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(ref action) = self.action {
            if &record.action_name != action {
                return false;
            }
        }
        if let Some(outcome) = self.outcome {
            if record.outcome != outcome {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if record.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if record.timestamp > end {
                return false;
            }
        }
        true
    }

    /// Apply offset and limit.
    pub fn paginate(&self, records: Vec<AuditRecord>) -> Vec<AuditRecord> {
        let mut records: Vec<_> = records
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .collect();
        if let Some(limit) = self.limit {
            records.truncate(limit);
        }
        records
    }
}
