//! Commit-hook listener wiring phases to the host's commit pipeline.

use crate::async_exec::{AsyncExecutor, discard};
use crate::definition::Phase;
use crate::dispatch::{DispatchSummary, PhaseDispatcher};
use crate::error::DispatchError;
use crate::metadata::{ChangeSnapshot, TriggerMetadata};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;
use tripwire_graph::{CommitHookPort, GraphHost, HookError, StatementEngine, TransactionData};

/// Runs trigger phases when the host raises commit hooks.
///
/// - `before` runs in the committing transaction and rejects the commit on failure
/// - `after` and `rollback` run in a new transaction that is committed on its own
/// - `afterAsync` is handed to the async pool once `after` has finished
pub struct TriggerListener<H, E> {
    key: String,
    host: Arc<H>,
    dispatcher: Arc<PhaseDispatcher<E>>,
    executor: Arc<AsyncExecutor<H, E>>,
}

impl<H, E> TriggerListener<H, E>
where
    H: GraphHost,
    E: StatementEngine<H::Tx> + 'static,
{
    /// Creates a listener registered under `key`.
    pub fn new(
        key: impl Into<String>,
        host: Arc<H>,
        dispatcher: Arc<PhaseDispatcher<E>>,
        executor: Arc<AsyncExecutor<H, E>>,
    ) -> Self {
        Self {
            key: key.into(),
            host,
            dispatcher,
            executor,
        }
    }

    async fn run_in_new_transaction(
        &self,
        phase: Phase,
        data: &TransactionData,
    ) -> Result<DispatchSummary, DispatchError> {
        let mut tx = self
            .host
            .begin()
            .await
            .map_err(|e| DispatchError::Transaction {
                phase,
                reason: e.to_string(),
            })?;
        let metadata = TriggerMetadata::from_data(data);

        match self.dispatcher.dispatch(phase, &metadata, &mut tx).await {
            Ok(summary) => {
                self.host
                    .commit(tx)
                    .await
                    .map_err(|e| DispatchError::Transaction {
                        phase,
                        reason: e.to_string(),
                    })?;
                Ok(summary)
            }
            Err(e) => {
                discard(self.host.as_ref(), tx, phase).await;
                Err(e)
            }
        }
    }

    async fn run_reported(&self, phase: Phase, data: &TransactionData) {
        if !self.dispatcher.has_phase(phase) {
            return;
        }
        if let Err(e) = self.run_in_new_transaction(phase, data).await {
            error!(phase = %phase, error = %e, "trigger phase failed");
        }
    }
}

#[async_trait]
impl<H, E> CommitHookPort<H::Tx> for TriggerListener<H, E>
where
    H: GraphHost,
    E: StatementEngine<H::Tx> + 'static,
{
    async fn before_commit(&self, data: &TransactionData, tx: &mut H::Tx) -> Result<(), HookError> {
        if !self.dispatcher.has_phase(Phase::Before) {
            return Ok(());
        }
        let metadata = TriggerMetadata::from_data(data);
        self.dispatcher
            .dispatch(Phase::Before, &metadata, tx)
            .await
            .map(|_| ())
            .map_err(|e| HookError::Rejected {
                listener: self.key.clone(),
                reason: e.to_string(),
            })
    }

    async fn after_commit(&self, data: &TransactionData) {
        self.run_reported(Phase::After, data).await;
        if self.dispatcher.has_phase(Phase::AfterAsync) {
            self.executor.submit(ChangeSnapshot::capture(data));
        }
    }

    async fn after_rollback(&self, data: &TransactionData) {
        self.run_reported(Phase::Rollback, data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TriggerCache;
    use crate::definition::{Selector, TriggerDefinition};
    use serde_json::json;
    use tripwire_core::NodeId;
    use tripwire_graph::{MemoryGraph, Properties, Row, ScriptedEngine, StatementError};

    struct Fixture {
        graph: Arc<MemoryGraph>,
        executor: Arc<AsyncExecutor<MemoryGraph, ScriptedEngine>>,
    }

    fn fixture(defs: Vec<TriggerDefinition>) -> Fixture {
        let engine = ScriptedEngine::new()
            .with_script("stamp", |params, tx| {
                for node in params["createdNodes"].as_array().into_iter().flatten() {
                    let Some(id) = node["id"].as_str().and_then(|s| s.parse::<NodeId>().ok()) else {
                        continue;
                    };
                    tx.set_node_property(id, "stamped", json!(true))
                        .map_err(|e| StatementError::ExecutionFailed {
                            message: e.to_string(),
                        })?;
                }
                Ok(Vec::new())
            })
            .with_script("log", |params, tx| {
                let created = params["createdNodes"].as_array().map_or(0, Vec::len);
                if created > 0 && params["createdNodes"][0]["labels"] != json!(["Log"]) {
                    let mut props = Properties::new();
                    props.insert("trigger".to_string(), params["trigger"].clone());
                    tx.create_node(["Log"], props);
                }
                Ok(vec![Row::new()])
            })
            .with_script("fail", |params, _| {
                let only_logs = params["createdNodes"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .all(|n| n["labels"] == json!(["Log"]));
                if only_logs {
                    return Ok(Vec::new());
                }
                Err(StatementError::ExecutionFailed {
                    message: "boom".to_string(),
                })
            });
        let graph = Arc::new(MemoryGraph::new("graph"));
        let cache = Arc::new(TriggerCache::new());
        cache.replace(defs, None);
        let dispatcher = Arc::new(PhaseDispatcher::new(cache, Arc::new(engine)));
        let executor = Arc::new(AsyncExecutor::new(Arc::clone(&graph), Arc::clone(&dispatcher), 1));
        let listener = Arc::new(TriggerListener::new(
            "triggers",
            Arc::clone(&graph),
            dispatcher,
            Arc::clone(&executor),
        ));
        graph.subscribe("triggers", listener);
        Fixture { graph, executor }
    }

    fn in_phase(name: &str, statement: &str, phase: Phase) -> TriggerDefinition {
        TriggerDefinition::new(name, statement).with_selector(Selector::phase(phase))
    }

    async fn create_person(graph: &MemoryGraph) -> Result<TransactionData, String> {
        let mut tx = graph.begin().await.map_err(|e| e.to_string())?;
        tx.create_node(["Person"], Properties::new());
        graph.commit(tx).await.map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn before_phase_writes_into_committing_transaction() {
        let f = fixture(vec![TriggerDefinition::new("stamp", "stamp")]);

        let data = create_person(&f.graph).await.expect("commit");

        let node = f.graph.node(data.created_nodes[0].id).expect("node");
        assert_eq!(node.property("stamped"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn before_failure_rejects_commit() {
        let f = fixture(vec![TriggerDefinition::new("bad", "fail")]);

        let err = create_person(&f.graph).await.unwrap_err();

        assert!(err.contains("bad: boom"));
        assert_eq!(f.graph.node_count(), 0);
    }

    #[tokio::test]
    async fn after_phase_runs_in_its_own_transaction() {
        let f = fixture(vec![in_phase("log", "log", Phase::After)]);

        create_person(&f.graph).await.expect("commit");

        let logs = f.graph.nodes_with_label("Log");
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].property("trigger"), Some(&json!("log")));
    }

    #[tokio::test]
    async fn after_failure_does_not_undo_commit() {
        let f = fixture(vec![in_phase("bad", "fail", Phase::After)]);

        create_person(&f.graph).await.expect("commit");

        assert_eq!(f.graph.nodes_with_label("Person").len(), 1);
    }

    #[tokio::test]
    async fn rollback_phase_runs_after_rejected_commit() {
        let f = fixture(vec![
            TriggerDefinition::new("bad", "fail"),
            in_phase("log", "log", Phase::Rollback),
        ]);

        assert!(create_person(&f.graph).await.is_err());

        assert!(f.graph.nodes_with_label("Person").is_empty());
        assert_eq!(f.graph.nodes_with_label("Log").len(), 1);
    }

    #[tokio::test]
    async fn after_async_is_submitted_to_pool() {
        let f = fixture(vec![in_phase("log", "log", Phase::AfterAsync)]);

        create_person(&f.graph).await.expect("commit");
        f.executor.shutdown().await;

        assert_eq!(f.graph.nodes_with_label("Log").len(), 1);
    }
}
