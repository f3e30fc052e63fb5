//! Worker runtime and unit-of-work error types.

use thiserror::Error;

use crate::persistence::PersistenceError;
use crate::queue::QueueError;

/// Errors raised by the runtime itself.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker runtime is already running")]
    AlreadyRunning,

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Failure reported by a unit of work. The classification drives the retry
/// loop: retryable failures consume retry budget, fatal ones go straight to
/// the dead letter path.
#[derive(Error, Debug)]
pub enum WorkError {
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl WorkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkError::Retryable(_))
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        WorkError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        WorkError::Fatal(msg.into())
    }
}

/// Governance and validation rejections repeat deterministically, so they
/// never consume retry budget; backend faults may clear on a later attempt.
impl From<PersistenceError> for WorkError {
    fn from(err: PersistenceError) -> Self {
        match &err {
            PersistenceError::Adapter { .. } => WorkError::Retryable(err.to_string()),
            _ => WorkError::Fatal(err.to_string()),
        }
    }
}

impl From<QueueError> for WorkError {
    fn from(err: QueueError) -> Self {
        if err.is_retryable() {
            WorkError::Retryable(err.to_string())
        } else {
            WorkError::Fatal(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Access;

    #[test]
    fn persistence_errors_classify_by_variant() {
        let governance: WorkError = PersistenceError::TableNotAllowed {
            table: "clients".into(),
            access: Access::Write,
        }
        .into();
        assert!(!governance.is_retryable());

        let backend: WorkError = PersistenceError::Adapter {
            op: "write",
            table: "leads".into(),
            message: "connection reset".into(),
        }
        .into();
        assert!(backend.is_retryable());
    }
}
