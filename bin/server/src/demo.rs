//! Demo statements and workload for the in-memory graph.
//!
//! The server has no query language of its own, so statements are named
//! scripts registered with a `ScriptedEngine`.

use chrono::Utc;
use serde_json::json;
use tracing::info;
use tripwire_core::NodeId;
use tripwire_graph::{
    GraphHost, MemoryGraph, Params, Properties, Row, ScriptedEngine, StatementError,
};
use tripwire_trigger::{
    Phase, Selector, TriggerError, TriggerProcedures, nodes_by_label, properties_by_key,
};

/// Label of the nodes written by the audit statement.
pub const AUDIT_LABEL: &str = "Audit";

fn failed(e: impl std::fmt::Display) -> StatementError {
    StatementError::ExecutionFailed {
        message: e.to_string(),
    }
}

/// Returns an engine with the demo statements registered.
///
/// - `timestamp`: sets `createdAt` on every created node not yet stamped
/// - `audit`: records one audit node per transaction touching non-audit nodes
/// - `renames`: counts changes to the `name` property into the row stream
#[must_use]
pub fn statements() -> ScriptedEngine {
    ScriptedEngine::new()
        .with_script("timestamp", |params, tx| {
            let now = Utc::now().timestamp_millis();
            for node in params["createdNodes"].as_array().into_iter().flatten() {
                if node["properties"].get("createdAt").is_some() {
                    continue;
                }
                let Some(id) = node["id"].as_str().and_then(|s| s.parse::<NodeId>().ok()) else {
                    continue;
                };
                tx.set_node_property(id, "createdAt", json!(now))
                    .map_err(failed)?;
            }
            Ok(Vec::new())
        })
        .with_script("audit", |params, tx| {
            let touched: Vec<_> = nodes_by_label(&params["assignedLabels"], None)
                .into_iter()
                .filter(|n| n["labels"] != json!([AUDIT_LABEL]))
                .collect();
            if touched.is_empty() {
                return Ok(Vec::new());
            }
            let mut props = Properties::new();
            props.insert("nodes".to_string(), json!(touched.len()));
            props.insert("transaction".to_string(), params["transactionId"].clone());
            props.insert("trigger".to_string(), params["trigger"].clone());
            tx.create_node([AUDIT_LABEL], props);
            Ok(Vec::new())
        })
        .with_script("renames", |params, _| {
            let renames = properties_by_key(&params["assignedNodeProperties"], "name");
            Ok(renames
                .into_iter()
                .map(|entry| {
                    let mut row = Row::new();
                    row.insert("old".to_string(), entry["old"].clone());
                    row.insert("new".to_string(), entry["new"].clone());
                    row
                })
                .collect())
        })
}

/// Installs the demo triggers.
///
/// # Errors
///
/// Returns an error if triggers are disabled or the store rejects a write.
pub async fn install(
    procedures: &TriggerProcedures<MemoryGraph, ScriptedEngine>,
) -> Result<(), rootcause::prelude::Report<TriggerError>> {
    procedures
        .install("timestamp", "timestamp", None, Params::new())
        .await?;
    procedures
        .install(
            "audit",
            "audit",
            Some(Selector::phase(Phase::AfterAsync)),
            Params::new(),
        )
        .await?;
    procedures
        .install(
            "renames",
            "renames",
            Some(Selector::phase(Phase::After)),
            Params::new(),
        )
        .await?;
    for row in procedures.show()? {
        info!(trigger = %row.name, paused = row.paused, "trigger installed");
    }
    Ok(())
}

/// Commits a small workload so the demo triggers have something to see.
///
/// # Errors
///
/// Returns an error if a transaction cannot be opened or committed.
pub async fn run_workload(
    graph: &MemoryGraph,
) -> Result<(), rootcause::prelude::Report<tripwire_graph::HostError>> {
    let mut tx = graph.begin().await?;
    let mut props = Properties::new();
    props.insert("name".to_string(), json!("Ada"));
    let ada = tx.create_node(["Person"], props);
    graph.commit(tx).await?;

    let mut tx = graph.begin().await?;
    tx.set_node_property(ada.id, "name", json!("Ada Lovelace"))?;
    let data = graph.commit(tx).await?;
    info!(transaction = ?data.transaction_id, "demo workload committed");
    Ok(())
}
