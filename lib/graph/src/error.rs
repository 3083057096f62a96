//! Error types for the graph crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `HostError`: Host transaction and entity failures
//! - `StatementError`: Failures of the statement engine
//! - `HookError`: A commit listener refusing a commit

use std::fmt;

/// Errors from the host database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A transaction could not be opened or used.
    TransactionFailed { reason: String },
    /// A commit listener rejected the commit; the transaction was rolled back.
    CommitRejected { reason: String },
    /// The referenced entity does not exist in this transaction.
    EntityNotFound { entity: String },
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransactionFailed { reason } => write!(f, "transaction failed: {reason}"),
            Self::CommitRejected { reason } => write!(f, "commit rejected: {reason}"),
            Self::EntityNotFound { entity } => write!(f, "entity not found: {entity}"),
        }
    }
}

impl std::error::Error for HostError {}

/// Errors from statement validation or execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementError {
    /// The engine does not understand the statement.
    UnknownStatement { statement: String },
    /// The statement failed while running or while its rows were drained.
    ExecutionFailed { message: String },
    /// A parameter had an unexpected shape.
    InvalidParameter { name: String, reason: String },
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownStatement { statement } => write!(f, "unknown statement: {statement}"),
            Self::ExecutionFailed { message } => write!(f, "{message}"),
            Self::InvalidParameter { name, reason } => {
                write!(f, "invalid parameter '{name}': {reason}")
            }
        }
    }
}

impl std::error::Error for StatementError {}

impl From<HostError> for StatementError {
    fn from(e: HostError) -> Self {
        Self::ExecutionFailed {
            message: e.to_string(),
        }
    }
}

/// Errors a commit listener returns to abort a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookError {
    /// The listener refused the commit.
    Rejected { listener: String, reason: String },
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { listener, reason } => {
                write!(f, "listener '{listener}' rejected commit: {reason}")
            }
        }
    }
}

impl std::error::Error for HookError {}
