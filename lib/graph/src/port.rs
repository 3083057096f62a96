//! Ports between the trigger engine and its host database.
//!
//! The host owns transactions and raises commit hooks; the statement engine
//! runs trigger statements inside a host transaction. Both are traits so the
//! trigger engine can be tested against the in-memory host.

use crate::change::TransactionData;
use crate::entity::{Node, Relationship};
use crate::error::{HookError, HostError, StatementError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tripwire_core::{NodeId, RelationshipId};

/// Result of a host operation, carrying rootcause context.
pub type HostResult<T> = tripwire_core::Result<T, HostError>;

/// Named parameters passed to a statement.
pub type Params = serde_json::Map<String, JsonValue>;

/// One result row of a statement.
pub type Row = serde_json::Map<String, JsonValue>;

/// Lazily produced result rows.
///
/// Statements may defer work until rows are pulled, so callers drain the
/// stream to completion to observe every effect and failure.
pub type RowStream = BoxStream<'static, Result<Row, StatementError>>;

/// An open host transaction.
#[async_trait]
pub trait GraphTransaction: Send + Sync {
    /// Resolves a node by ID as seen by this transaction.
    async fn node(&self, id: NodeId) -> HostResult<Option<Node>>;

    /// Resolves a relationship by ID as seen by this transaction.
    async fn relationship(
        &self,
        id: RelationshipId,
    ) -> HostResult<Option<Relationship>>;
}

/// Callbacks the host raises around each commit.
///
/// `before_commit` runs inside the committing transaction and may reject the
/// commit. The after hooks run once the outcome is final and cannot change it.
#[async_trait]
pub trait CommitHookPort<Tx: Send>: Send + Sync {
    /// Called before the transaction commits. An error aborts the commit.
    async fn before_commit(&self, data: &TransactionData, tx: &mut Tx) -> Result<(), HookError>;

    /// Called after the transaction committed.
    async fn after_commit(&self, data: &TransactionData);

    /// Called after the transaction rolled back.
    async fn after_rollback(&self, data: &TransactionData);
}

/// A host database that can open transactions and raise commit hooks.
#[async_trait]
pub trait GraphHost: Send + Sync + 'static {
    /// The host's transaction type.
    type Tx: GraphTransaction + Send + 'static;

    /// Name of the database this host serves. Trigger metadata is scoped by it.
    fn database_name(&self) -> &str;

    /// Opens a new transaction.
    async fn begin(&self) -> HostResult<Self::Tx>;

    /// Commits a transaction, raising commit hooks.
    async fn commit(&self, tx: Self::Tx) -> HostResult<TransactionData>;

    /// Discards a transaction.
    async fn rollback(&self, tx: Self::Tx) -> HostResult<()>;

    /// Registers a commit listener under a key, replacing any previous one.
    fn subscribe(&self, key: &str, listener: Arc<dyn CommitHookPort<Self::Tx>>);

    /// Removes the commit listener registered under a key.
    fn unsubscribe(&self, key: &str);
}

/// Runs trigger statements inside host transactions.
#[async_trait]
pub trait StatementEngine<Tx: Send>: Send + Sync {
    /// Checks a statement before it is stored.
    fn validate(&self, _statement: &str) -> Result<(), StatementError> {
        Ok(())
    }

    /// Executes a statement and returns its rows.
    async fn execute(
        &self,
        statement: &str,
        params: Params,
        tx: &mut Tx,
    ) -> Result<RowStream, StatementError>;
}
