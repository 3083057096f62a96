//! Domain error types for server startup.

use std::fmt;

/// Errors that stop the server from starting.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration could not be loaded.
    Config { details: String },
    /// The metadata database could not be reached.
    Database { details: String },
    /// Schema migrations failed.
    Migration { details: String },
    /// The trigger engine failed to start.
    Trigger,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Database { details } => write!(f, "database connection failed: {details}"),
            Self::Migration { details } => write!(f, "database migration failed: {details}"),
            Self::Trigger => write!(f, "trigger engine failed to start"),
        }
    }
}

impl std::error::Error for ServerError {}
