//! A statement engine backed by registered Rust closures.
//!
//! Each statement text names a script. Executing the statement runs the
//! script against the memory transaction with the supplied parameters.

use crate::error::StatementError;
use crate::memory::MemoryTransaction;
use crate::port::{Params, Row, RowStream, StatementEngine};
use async_trait::async_trait;
use futures::stream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

type Script =
    dyn Fn(&Params, &mut MemoryTransaction) -> Result<Vec<Row>, StatementError> + Send + Sync;

/// Statement engine resolving statements to registered scripts.
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: RwLock<HashMap<String, Arc<Script>>>,
    executions: AtomicUsize,
}

impl ScriptedEngine {
    /// Creates an engine with no scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a script under a statement text, replacing any existing one.
    pub fn register<F>(&self, statement: impl Into<String>, script: F)
    where
        F: Fn(&Params, &mut MemoryTransaction) -> Result<Vec<Row>, StatementError>
            + Send
            + Sync
            + 'static,
    {
        self.scripts.write().insert(statement.into(), Arc::new(script));
    }

    /// Builder form of `register`.
    #[must_use]
    pub fn with_script<F>(self, statement: impl Into<String>, script: F) -> Self
    where
        F: Fn(&Params, &mut MemoryTransaction) -> Result<Vec<Row>, StatementError>
            + Send
            + Sync
            + 'static,
    {
        self.register(statement, script);
        self
    }

    /// Returns how many statements have been executed.
    #[must_use]
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    fn script(&self, statement: &str) -> Result<Arc<Script>, StatementError> {
        self.scripts
            .read()
            .get(statement)
            .cloned()
            .ok_or_else(|| StatementError::UnknownStatement {
                statement: statement.to_string(),
            })
    }
}

#[async_trait]
impl StatementEngine<MemoryTransaction> for ScriptedEngine {
    fn validate(&self, statement: &str) -> Result<(), StatementError> {
        self.script(statement).map(|_| ())
    }

    async fn execute(
        &self,
        statement: &str,
        params: Params,
        tx: &mut MemoryTransaction,
    ) -> Result<RowStream, StatementError> {
        let script = self.script(statement)?;
        self.executions.fetch_add(1, Ordering::SeqCst);
        debug!(statement, "running script");
        let rows = script(&params, tx)?;
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }
}
