//! Persistence error taxonomy.
//!
//! Explicit variants let callers distinguish governance rejections (never
//! retried) from backend failures (retryable at the worker layer).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Governance rejection: the table is not in the relevant allow-list.
    /// Raised before any adapter call is attempted.
    #[error("{access} access to table '{table}' is not permitted by policy")]
    TableNotAllowed { table: String, access: Access },

    /// An operation is not permitted regardless of allow-lists (read-only
    /// facade rejecting a write).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed input (empty table name, invalid identifier, bad filter).
    #[error("validation error: {0}")]
    Validation(String),

    /// The underlying adapter/backend failed; carries operation and table
    /// context so callers can tell governance rejections from backend faults.
    #[error("adapter error during {op} on {table}: {message}")]
    Adapter {
        op: &'static str,
        table: String,
        message: String,
    },
}

/// Operation class being checked against the allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

impl PersistenceError {
    /// Governance and permission errors repeat deterministically and must not
    /// consume retry budget.
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            PersistenceError::TableNotAllowed { .. } | PersistenceError::PermissionDenied(_)
        )
    }
}
