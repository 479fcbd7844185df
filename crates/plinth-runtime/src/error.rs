//! Broker error type.

use plinth_audit::AuditError;
use plinth_core::ActionResult;
use plinth_policy::ValidationError;
use thiserror::Error;

use crate::codec::CodecError;
use crate::invoker::LaunchError;
use crate::registry::RegistryError;

/// Why a submission did not produce a plain [`ActionResult`].
///
/// Variants raised before dispatch guarantee that no process was spawned.
/// Variants raised after dispatch carry whatever output was captured.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] ValidationError),

    #[error("failed to encode request: {0}")]
    Encode(#[source] CodecError),

    #[error("action '{action}' wrote an undecodable response: {source}")]
    Decode {
        action: String,
        #[source]
        source: CodecError,
        result: Box<ActionResult>,
    },

    #[error("failed to launch action '{action}': {source}")]
    LaunchFailure {
        action: String,
        #[source]
        source: LaunchError,
    },

    #[error("action '{}' timed out after {} ms", .0.action, .0.duration_ms())]
    TimedOut(Box<ActionResult>),

    #[error("failed to audit action '{action}': {source}")]
    AuditWriteFailure {
        action: String,
        #[source]
        source: AuditError,
        result: Option<Box<ActionResult>>,
    },

    #[error("dispatch of action '{action}' was aborted: {source}")]
    Aborted {
        action: String,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl BrokerError {
    /// Output captured before the error, if a program ran.
    pub fn result(&self) -> Option<&ActionResult> {
        match self {
            BrokerError::Decode { result, .. } | BrokerError::TimedOut(result) => Some(result),
            BrokerError::AuditWriteFailure { result, .. } => result.as_deref(),
            _ => None,
        }
    }

    /// Take ownership of the captured output, if any.
    pub fn into_result(self) -> Option<Box<ActionResult>> {
        match self {
            BrokerError::Decode { result, .. } | BrokerError::TimedOut(result) => Some(result),
            BrokerError::AuditWriteFailure { result, .. } => result,
            _ => None,
        }
    }

    /// Whether the error was raised before anything was spawned.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BrokerError::UnknownAction(_) | BrokerError::InvalidArguments(_)
        )
    }
}

/// The broker could not be assembled from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("audit logging is disabled; the broker refuses to run unaudited")]
    AuditDisabled,
}
