//! End-to-end trigger scenarios against the in-memory graph.

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tripwire_core::NodeId;
use tripwire_graph::{
    GraphHost, MemoryGraph, Params, Properties, ScriptedEngine, StatementError, TransactionData,
};
use tripwire_trigger::{
    InMemoryMetadataStore, LISTENER_KEY, Phase, Selector, TriggerConfig, TriggerEngine,
    nodes_by_label,
};

type Engine = TriggerEngine<MemoryGraph, ScriptedEngine>;

fn failed(e: impl std::fmt::Display) -> StatementError {
    StatementError::ExecutionFailed {
        message: e.to_string(),
    }
}

fn scripts(counter: Arc<AtomicUsize>) -> ScriptedEngine {
    ScriptedEngine::new()
        .with_script("stamp", |params, tx| {
            for node in nodes_by_label(&params["assignedLabels"], Some("Person")) {
                let Some(id) = node["id"].as_str().and_then(|s| s.parse::<NodeId>().ok()) else {
                    continue;
                };
                tx.set_node_property(id, "stamp", params["stamp"].clone())
                    .map_err(failed)?;
            }
            Ok(Vec::new())
        })
        .with_script("audit", |params, tx| {
            let people = nodes_by_label(&params["assignedLabels"], Some("Person"));
            if !people.is_empty() {
                let mut props = Properties::new();
                props.insert("count".to_string(), json!(people.len()));
                props.insert("transaction".to_string(), params["transactionId"].clone());
                tx.create_node(["Audit"], props);
            }
            Ok(Vec::new())
        })
        .with_script("log", |params, tx| {
            let mut props = Properties::new();
            props.insert("trigger".to_string(), params["trigger"].clone());
            tx.create_node(["Log"], props);
            Ok(Vec::new())
        })
        .with_script("reject-bad", |params, _| {
            if nodes_by_label(&params["assignedLabels"], Some("Bad")).is_empty() {
                Ok(Vec::new())
            } else {
                Err(failed("bad nodes are not allowed"))
            }
        })
        .with_script("explode", |_, _| Err(failed("boom")))
        .with_script("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        })
}

struct Harness {
    graph: Arc<MemoryGraph>,
    store: InMemoryMetadataStore,
    counter: Arc<AtomicUsize>,
    engine: Engine,
}

fn harness_with(config: TriggerConfig, store: InMemoryMetadataStore) -> Harness {
    let graph = Arc::new(MemoryGraph::new("graph"));
    let counter = Arc::new(AtomicUsize::new(0));
    let engine = TriggerEngine::new(
        config,
        Arc::clone(&graph),
        Arc::new(scripts(Arc::clone(&counter))),
        Arc::new(store.clone()),
    );
    Harness {
        graph,
        store,
        counter,
        engine,
    }
}

fn harness() -> Harness {
    harness_with(TriggerConfig::enabled(), InMemoryMetadataStore::new())
}

fn after(phase: Phase) -> Option<Selector> {
    Some(Selector::phase(phase))
}

async fn create(graph: &MemoryGraph, label: &str) -> Result<TransactionData, String> {
    let mut tx = graph.begin().await.map_err(|e| e.to_string())?;
    tx.create_node([label], Properties::new());
    graph.commit(tx).await.map_err(|e| e.to_string())
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn before_trigger_stamps_new_nodes() {
    let h = harness();
    h.engine.start().await.expect("start");
    let mut params = Params::new();
    params.insert("stamp".to_string(), json!("seen"));
    h.engine
        .add("stamp", "stamp", None, params)
        .await
        .expect("add");

    let data = create(&h.graph, "Person").await.expect("commit");

    let node = h.graph.node(data.created_nodes[0].id).expect("node");
    assert_eq!(node.property("stamp"), Some(&json!("seen")));
    h.engine.stop().await;
}

#[tokio::test]
async fn after_async_trigger_audits_eventually() {
    let h = harness();
    h.engine
        .add("audit", "audit", after(Phase::AfterAsync), Params::new())
        .await
        .expect("add");

    let data = create(&h.graph, "Person").await.expect("commit");

    assert!(eventually(|| !h.graph.nodes_with_label("Audit").is_empty()).await);
    let audit = &h.graph.nodes_with_label("Audit")[0];
    assert_eq!(audit.property("count"), Some(&json!(1)));
    let transaction = data.transaction_id.expect("committed").get();
    assert_eq!(audit.property("transaction"), Some(&json!(transaction)));
    h.engine.stop().await;
}

#[tokio::test]
async fn rollback_trigger_runs_after_rejected_commit() {
    let h = harness();
    h.engine
        .add("guard", "reject-bad", None, Params::new())
        .await
        .expect("add");
    h.engine
        .add("log", "log", after(Phase::Rollback), Params::new())
        .await
        .expect("add");

    let err = create(&h.graph, "Bad").await.unwrap_err();

    assert!(err.contains("bad nodes are not allowed"));
    assert!(h.graph.nodes_with_label("Bad").is_empty());
    let logs = h.graph.nodes_with_label("Log");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].property("trigger"), Some(&json!("log")));
}

#[tokio::test]
async fn failing_trigger_does_not_stop_siblings() {
    let h = harness();
    h.engine
        .add("first", "count", after(Phase::After), Params::new())
        .await
        .expect("add");
    h.engine
        .add("broken", "explode", after(Phase::After), Params::new())
        .await
        .expect("add");
    h.engine
        .add("last", "count", after(Phase::After), Params::new())
        .await
        .expect("add");

    create(&h.graph, "Person").await.expect("commit");

    assert_eq!(h.counter.load(Ordering::SeqCst), 2);
    assert_eq!(h.graph.nodes_with_label("Person").len(), 1);
}

#[tokio::test]
async fn paused_trigger_stays_listed_but_does_not_run() {
    let h = harness();
    h.engine
        .add("count", "count", None, Params::new())
        .await
        .expect("add");
    h.engine.update_paused("count", true).await.expect("pause");

    create(&h.graph, "Person").await.expect("commit");

    assert_eq!(h.counter.load(Ordering::SeqCst), 0);
    assert!(h.engine.list().expect("list")["count"].paused);
    assert!(h.graph.is_subscribed(LISTENER_KEY));

    h.engine.update_paused("count", false).await.expect("resume");
    create(&h.graph, "Person").await.expect("commit");
    assert_eq!(h.counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remove_all_stops_dispatch_and_unsubscribes() {
    let h = harness();
    h.engine
        .add("a", "count", None, Params::new())
        .await
        .expect("add");
    h.engine
        .add("b", "count", after(Phase::After), Params::new())
        .await
        .expect("add");

    h.engine.remove_all().await.expect("remove all");
    create(&h.graph, "Person").await.expect("commit");

    assert!(h.engine.list().expect("list").is_empty());
    assert!(!h.graph.is_subscribed(LISTENER_KEY));
    assert_eq!(h.counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn subscription_follows_trigger_count() {
    let h = harness();
    h.engine
        .add("a", "count", None, Params::new())
        .await
        .expect("add");
    h.engine
        .add("b", "count", None, Params::new())
        .await
        .expect("add");
    assert_eq!(h.graph.subscribe_calls(), 1);

    h.engine.remove("a").await.expect("remove");
    h.engine.remove("b").await.expect("remove");
    assert_eq!(h.graph.unsubscribe_calls(), 1);

    h.engine
        .add("c", "count", None, Params::new())
        .await
        .expect("add");
    assert_eq!(h.graph.subscribe_calls(), 2);
}

#[tokio::test]
async fn instances_sharing_a_store_converge() {
    let shared = InMemoryMetadataStore::new();
    let config = TriggerConfig {
        refresh_interval_ms: 20,
        ..TriggerConfig::enabled()
    };
    let a = harness_with(config.clone(), shared.clone());
    let b = harness_with(config, shared);
    a.engine.start().await.expect("start");
    b.engine.start().await.expect("start");

    a.engine
        .add("count", "count", None, Params::new())
        .await
        .expect("add");

    assert!(eventually(|| b.engine.list().is_ok_and(|l| l.contains_key("count"))).await);
    assert!(b.graph.is_subscribed(LISTENER_KEY));
    create(&b.graph, "Person").await.expect("commit");
    assert_eq!(b.counter.load(Ordering::SeqCst), 1);

    a.engine.remove("count").await.expect("remove");
    assert!(eventually(|| !b.graph.is_subscribed(LISTENER_KEY)).await);

    a.engine.stop().await;
    b.engine.stop().await;
}

#[tokio::test]
async fn disabled_engine_refuses_management() {
    let h = harness_with(TriggerConfig::default(), InMemoryMetadataStore::new());

    let err = h
        .engine
        .add("a", "count", None, Params::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("trigger.enabled"));
    assert!(h.engine.list().is_err());
}

#[tokio::test]
async fn unavailable_store_keeps_serving_cached_triggers() {
    let h = harness();
    h.engine
        .add("count", "count", None, Params::new())
        .await
        .expect("add");
    h.store.set_unavailable(true);

    assert!(h.engine.refresh().await.is_err());
    assert!(h.engine.add("other", "count", None, Params::new()).await.is_err());

    create(&h.graph, "Person").await.expect("commit");
    assert_eq!(h.counter.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.list().expect("list").len(), 1);
}
