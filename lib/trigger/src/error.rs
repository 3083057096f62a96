//! Error types for the trigger crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `StoreError`: Failures of the metadata store
//! - `DispatchError`: Failures while running a phase
//! - `TriggerError`: Errors surfaced by management operations

use crate::definition::Phase;
use indexmap::IndexMap;
use std::fmt;

/// Errors from management operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// Triggers are disabled by configuration.
    NotEnabled,
    /// No trigger with this name exists.
    NotFound { name: String },
    /// The definition is malformed.
    InvalidDefinition { name: String, reason: String },
    /// The statement engine rejected the statement.
    InvalidStatement { name: String, reason: String },
    /// A metadata store operation failed.
    Store { operation: &'static str },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEnabled => write!(
                f,
                "triggers have not been enabled; set trigger.enabled = true in the server configuration"
            ),
            Self::NotFound { name } => write!(f, "trigger not found: {name}"),
            Self::InvalidDefinition { name, reason } => {
                write!(f, "invalid trigger '{name}': {reason}")
            }
            Self::InvalidStatement { name, reason } => {
                write!(f, "invalid statement for trigger '{name}': {reason}")
            }
            Self::Store { operation } => write!(f, "trigger store {operation} failed"),
        }
    }
}

impl std::error::Error for TriggerError {}

/// Errors from the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached.
    Unavailable { reason: String },
    /// Reading definitions or the marker failed.
    ReadFailed { reason: String },
    /// Writing definitions or the marker failed.
    WriteFailed { reason: String },
    /// A stored definition could not be decoded.
    Corrupt { name: String, reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "metadata store unavailable: {reason}"),
            Self::ReadFailed { reason } => write!(f, "metadata read failed: {reason}"),
            Self::WriteFailed { reason } => write!(f, "metadata write failed: {reason}"),
            Self::Corrupt { name, reason } => {
                write!(f, "stored trigger '{name}' is corrupt: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from running a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// One or more triggers failed. Maps trigger name to error text.
    TriggersFailed {
        phase: Phase,
        failures: IndexMap<String, String>,
    },
    /// The transaction hosting the phase could not be opened or committed.
    Transaction { phase: Phase, reason: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TriggersFailed { phase, failures } => {
                write!(f, "error executing triggers in phase {phase}: ")?;
                for (i, (name, message)) in failures.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {message}")?;
                }
                Ok(())
            }
            Self::Transaction { phase, reason } => {
                write!(f, "transaction for phase {phase} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}
