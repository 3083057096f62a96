//! Graph host model for tripwire.
//!
//! This crate provides:
//!
//! - **Entities**: nodes and relationships as seen by trigger statements
//! - **Change-sets**: `TransactionData` describing what a commit changed
//! - **Ports**: the host, transaction, commit-hook and statement engine traits
//! - **Memory host**: an in-memory graph with real commit hooks, used by tests
//!   and the demo server

pub mod change;
pub mod entity;
pub mod error;
pub mod memory;
pub mod port;
pub mod scripted;

pub use change::{LabelEntry, PropertyEntry, TransactionData};
pub use entity::{Node, Properties, Relationship};
pub use error::{HookError, HostError, StatementError};
pub use memory::{MemoryGraph, MemoryTransaction};
pub use port::{
    CommitHookPort, GraphHost, GraphTransaction, HostResult, Params, Row, RowStream, StatementEngine,
};
pub use scripted::ScriptedEngine;
