//! # plinth-audit
//!
//! Append-only audit trail for privileged actions.
//!
//! This crate provides functionality for:
//! - Recording one [`AuditRecord`] per action invocation, whatever its outcome
//! - Durable appends (the record is synced to disk before `record` returns)
//! - Storing records in files (JSON Lines) and console (human-readable)
//! - Querying audit history with filters
//!
//! ## Outcomes
//!
//! | Outcome | Description |
//! |---------|-------------|
//! | `Completed` | Program ran to completion (any exit status) |
//! | `Rejected` | Unknown action or invalid arguments; nothing spawned |
//! | `Failed` | Encoding, launch or response decoding failed |
//! | `TimedOut` | Program exceeded its timeout and was killed |
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use plinth_audit::{AuditLogger, AuditOutcome, AuditRecord};
//! use plinth_core::AuditConfig;
//! use std::collections::BTreeMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = AuditLogger::open(AuditConfig::default())?;
//!
//! let record = AuditRecord::builder(AuditOutcome::Completed, "pagekite-start", &BTreeMap::new())
//!     .exit_status(0)
//!     .duration_ms(120)
//!     .build();
//! logger.record(record).await?;
//!
//! logger.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod logger;
pub mod record;
pub mod storage;

pub use error::AuditError;
pub use logger::{AuditFilter, AuditLogger};
pub use record::{fingerprint_arguments, AuditOutcome, AuditRecord, AuditRecordBuilder};
pub use storage::{AuditStorage, ConsoleStorage, DualStorage, FileStorage, NullStorage};
