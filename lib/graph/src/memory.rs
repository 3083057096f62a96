//! In-memory graph host.
//!
//! `MemoryGraph` keeps committed nodes and relationships behind a lock and
//! hands out `MemoryTransaction`s that buffer their writes. On commit the
//! buffered writes are diffed against committed state into a
//! `TransactionData`, commit listeners run, and the writes are applied.
//!
//! Commits are last-writer-wins per entity. There is no isolation beyond
//! that; the host exists to exercise the commit-hook contract.

use crate::change::{LabelEntry, PropertyEntry, TransactionData};
use crate::entity::{Node, Properties, Relationship};
use crate::error::HostError;
use crate::port::{CommitHookPort, GraphHost, GraphTransaction, HostResult};
use async_trait::async_trait;
use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::RwLock;
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, instrument};
use tripwire_core::{NodeId, RelationshipId, TransactionId};

type Listener = Arc<dyn CommitHookPort<MemoryTransaction>>;

#[derive(Debug, Default)]
struct GraphState {
    nodes: IndexMap<NodeId, Node>,
    relationships: IndexMap<RelationshipId, Relationship>,
}

/// An in-memory graph database with commit hooks.
pub struct MemoryGraph {
    name: String,
    state: Arc<RwLock<GraphState>>,
    listeners: RwLock<IndexMap<String, Listener>>,
    next_transaction: AtomicU64,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl MemoryGraph {
    /// Creates an empty graph serving the named database.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(GraphState::default())),
            listeners: RwLock::new(IndexMap::new()),
            next_transaction: AtomicU64::new(1),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Returns a committed node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.state.read().nodes.get(&id).cloned()
    }

    /// Returns a committed relationship.
    #[must_use]
    pub fn relationship(&self, id: RelationshipId) -> Option<Relationship> {
        self.state.read().relationships.get(&id).cloned()
    }

    /// Returns committed nodes carrying the label, in creation order.
    #[must_use]
    pub fn nodes_with_label(&self, label: &str) -> Vec<Node> {
        self.state
            .read()
            .nodes
            .values()
            .filter(|n| n.has_label(label))
            .cloned()
            .collect()
    }

    /// Returns the number of committed nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Returns whether a listener is registered under the key.
    #[must_use]
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.listeners.read().contains_key(key)
    }

    /// Returns how many times `subscribe` was called.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Returns how many times `unsubscribe` was called.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    fn listener_snapshot(&self) -> Vec<(String, Listener)> {
        self.listeners
            .read()
            .iter()
            .map(|(k, l)| (k.clone(), Arc::clone(l)))
            .collect()
    }

    fn apply(&self, tx: MemoryTransaction) -> TransactionId {
        let mut state = self.state.write();
        for (id, node) in tx.nodes {
            match node {
                Some(node) => {
                    state.nodes.insert(id, node);
                }
                None => {
                    state.nodes.shift_remove(&id);
                }
            }
        }
        for (id, rel) in tx.relationships {
            match rel {
                Some(rel) => {
                    state.relationships.insert(id, rel);
                }
                None => {
                    state.relationships.shift_remove(&id);
                }
            }
        }
        TransactionId::new(self.next_transaction.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl GraphHost for MemoryGraph {
    type Tx = MemoryTransaction;

    fn database_name(&self) -> &str {
        &self.name
    }

    async fn begin(&self) -> HostResult<MemoryTransaction> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            nodes: IndexMap::new(),
            relationships: IndexMap::new(),
            metadata: Properties::new(),
        })
    }

    #[instrument(skip(self, tx), fields(database = %self.name))]
    async fn commit(&self, mut tx: MemoryTransaction) -> HostResult<TransactionData> {
        let data = tx.change_set();
        if data.is_empty() {
            debug!("nothing to commit");
            return Ok(data);
        }

        let listeners = self.listener_snapshot();
        for (key, listener) in &listeners {
            if let Err(e) = listener.before_commit(&data, &mut tx).await {
                debug!(listener = %key, error = %e, "commit rejected, rolling back");
                for (_, listener) in &listeners {
                    listener.after_rollback(&data).await;
                }
                return Err(HostError::CommitRejected {
                    reason: e.to_string(),
                }
                .into());
            }
        }

        // Before-commit listeners may have written more changes.
        let mut data = tx.change_set();
        let transaction_id = self.apply(tx);
        data.transaction_id = Some(transaction_id);
        data.commit_time = Some(Utc::now());
        debug!(transaction = %transaction_id, "committed");

        for (_, listener) in &listeners {
            listener.after_commit(&data).await;
        }
        Ok(data)
    }

    async fn rollback(&self, tx: MemoryTransaction) -> HostResult<()> {
        drop(tx);
        Ok(())
    }

    fn subscribe(&self, key: &str, listener: Listener) {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(key.to_string(), listener);
    }

    fn unsubscribe(&self, key: &str) {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().shift_remove(key);
    }
}

/// A transaction against a `MemoryGraph`.
///
/// Writes are buffered per entity; `None` marks a deletion.
pub struct MemoryTransaction {
    state: Arc<RwLock<GraphState>>,
    nodes: IndexMap<NodeId, Option<Node>>,
    relationships: IndexMap<RelationshipId, Option<Relationship>>,
    metadata: Properties,
}

impl MemoryTransaction {
    /// Creates a node.
    pub fn create_node<L, S>(&mut self, labels: L, properties: Properties) -> Node
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let node = Node::new(labels, properties);
        self.nodes.insert(node.id, Some(node.clone()));
        node
    }

    /// Returns a node as seen by this transaction.
    #[must_use]
    pub fn read_node(&self, id: NodeId) -> Option<Node> {
        match self.nodes.get(&id) {
            Some(buffered) => buffered.clone(),
            None => self.state.read().nodes.get(&id).cloned(),
        }
    }

    /// Returns a relationship as seen by this transaction.
    #[must_use]
    pub fn read_relationship(&self, id: RelationshipId) -> Option<Relationship> {
        match self.relationships.get(&id) {
            Some(buffered) => buffered.clone(),
            None => self.state.read().relationships.get(&id).cloned(),
        }
    }

    /// Returns nodes carrying the label as seen by this transaction.
    #[must_use]
    pub fn find_nodes(&self, label: &str) -> Vec<Node> {
        let state = self.state.read();
        let mut found: Vec<Node> = state
            .nodes
            .values()
            .filter(|n| !self.nodes.contains_key(&n.id))
            .filter(|n| n.has_label(label))
            .cloned()
            .collect();
        found.extend(
            self.nodes
                .values()
                .flatten()
                .filter(|n| n.has_label(label))
                .cloned(),
        );
        found
    }

    /// Sets a node property.
    pub fn set_node_property(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: JsonValue,
    ) -> HostResult<()> {
        self.node_mut(id)?.properties.insert(key.into(), value);
        Ok(())
    }

    /// Removes a node property.
    pub fn remove_node_property(&mut self, id: NodeId, key: &str) -> HostResult<()> {
        self.node_mut(id)?.properties.remove(key);
        Ok(())
    }

    /// Adds a label to a node.
    pub fn add_label(&mut self, id: NodeId, label: impl Into<String>) -> HostResult<()> {
        let label = label.into();
        let node = self.node_mut(id)?;
        if !node.has_label(&label) {
            node.labels.push(label);
        }
        Ok(())
    }

    /// Removes a label from a node.
    pub fn remove_label(&mut self, id: NodeId, label: &str) -> HostResult<()> {
        self.node_mut(id)?.labels.retain(|l| l != label);
        Ok(())
    }

    /// Deletes a node and every relationship attached to it.
    pub fn delete_node(&mut self, id: NodeId) -> HostResult<()> {
        if self.read_node(id).is_none() {
            return Err(missing(id));
        }
        let attached: Vec<RelationshipId> = {
            let state = self.state.read();
            state
                .relationships
                .values()
                .filter(|r| !self.relationships.contains_key(&r.id))
                .chain(self.relationships.values().flatten())
                .filter(|r| r.is_attached_to(id))
                .map(|r| r.id)
                .collect()
        };
        for rel in attached {
            self.relationships.insert(rel, None);
        }
        self.nodes.insert(id, None);
        Ok(())
    }

    /// Creates a relationship between two existing nodes.
    pub fn create_relationship(
        &mut self,
        start: NodeId,
        end: NodeId,
        rel_type: impl Into<String>,
        properties: Properties,
    ) -> HostResult<Relationship> {
        for id in [start, end] {
            if self.read_node(id).is_none() {
                return Err(missing(id));
            }
        }
        let rel = Relationship::new(start, end, rel_type, properties);
        self.relationships.insert(rel.id, Some(rel.clone()));
        Ok(rel)
    }

    /// Sets a relationship property.
    pub fn set_relationship_property(
        &mut self,
        id: RelationshipId,
        key: impl Into<String>,
        value: JsonValue,
    ) -> HostResult<()> {
        self.relationship_mut(id)?
            .properties
            .insert(key.into(), value);
        Ok(())
    }

    /// Deletes a relationship.
    pub fn delete_relationship(&mut self, id: RelationshipId) -> HostResult<()> {
        if self.read_relationship(id).is_none() {
            return Err(missing(id));
        }
        self.relationships.insert(id, None);
        Ok(())
    }

    /// Attaches client metadata to the transaction.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: JsonValue) {
        self.metadata.insert(key.into(), value);
    }

    /// Computes what this transaction changed relative to committed state.
    #[must_use]
    pub fn change_set(&self) -> TransactionData {
        let state = self.state.read();
        let mut data = TransactionData {
            metadata: self.metadata.clone(),
            ..Default::default()
        };

        for (id, after) in &self.nodes {
            match (state.nodes.get(id), after) {
                (None, Some(created)) => {
                    data.created_nodes.push(created.clone());
                    let blank = Node {
                        labels: Vec::new(),
                        properties: Properties::new(),
                        ..created.clone()
                    };
                    diff_node(&mut data, &blank, created);
                }
                (Some(before), None) => {
                    data.deleted_nodes.push(before.clone());
                    for label in &before.labels {
                        data.removed_labels.push(LabelEntry {
                            label: label.clone(),
                            node: before.clone(),
                        });
                    }
                    for (key, value) in &before.properties {
                        data.removed_node_properties.push(PropertyEntry {
                            key: key.clone(),
                            entity: before.clone(),
                            previous: Some(value.clone()),
                            value: None,
                        });
                    }
                }
                (Some(before), Some(after)) => diff_node(&mut data, before, after),
                (None, None) => {}
            }
        }

        for (id, after) in &self.relationships {
            match (state.relationships.get(id), after) {
                (None, Some(created)) => {
                    data.created_relationships.push(created.clone());
                    for (key, value) in &created.properties {
                        data.assigned_relationship_properties.push(PropertyEntry {
                            key: key.clone(),
                            entity: created.clone(),
                            previous: None,
                            value: Some(value.clone()),
                        });
                    }
                }
                (Some(before), None) => {
                    data.deleted_relationships.push(before.clone());
                    for (key, value) in &before.properties {
                        data.removed_relationship_properties.push(PropertyEntry {
                            key: key.clone(),
                            entity: before.clone(),
                            previous: Some(value.clone()),
                            value: None,
                        });
                    }
                }
                (Some(before), Some(after)) => {
                    let (assigned, removed) =
                        diff_properties(&before.properties, &after.properties, after);
                    data.assigned_relationship_properties.extend(assigned);
                    data.removed_relationship_properties.extend(removed);
                }
                (None, None) => {}
            }
        }

        data
    }

    fn node_mut(&mut self, id: NodeId) -> HostResult<&mut Node> {
        if !self.nodes.contains_key(&id) {
            let committed = self.state.read().nodes.get(&id).cloned();
            let Some(node) = committed else {
                return Err(missing(id));
            };
            self.nodes.insert(id, Some(node));
        }
        match self.nodes.get_mut(&id) {
            Some(Some(node)) => Ok(node),
            _ => Err(missing(id)),
        }
    }

    fn relationship_mut(&mut self, id: RelationshipId) -> HostResult<&mut Relationship> {
        if !self.relationships.contains_key(&id) {
            let committed = self.state.read().relationships.get(&id).cloned();
            let Some(rel) = committed else {
                return Err(missing(id));
            };
            self.relationships.insert(id, Some(rel));
        }
        match self.relationships.get_mut(&id) {
            Some(Some(rel)) => Ok(rel),
            _ => Err(missing(id)),
        }
    }
}

#[async_trait]
impl GraphTransaction for MemoryTransaction {
    async fn node(&self, id: NodeId) -> HostResult<Option<Node>> {
        Ok(self.read_node(id))
    }

    async fn relationship(
        &self,
        id: RelationshipId,
    ) -> HostResult<Option<Relationship>> {
        Ok(self.read_relationship(id))
    }
}

fn missing(entity: impl std::fmt::Display) -> Report<HostError> {
    HostError::EntityNotFound {
        entity: entity.to_string(),
    }
    .into()
}

fn diff_node(data: &mut TransactionData, before: &Node, after: &Node) {
    for label in &after.labels {
        if !before.has_label(label) {
            data.assigned_labels.push(LabelEntry {
                label: label.clone(),
                node: after.clone(),
            });
        }
    }
    for label in &before.labels {
        if !after.has_label(label) {
            data.removed_labels.push(LabelEntry {
                label: label.clone(),
                node: after.clone(),
            });
        }
    }
    let (assigned, removed) = diff_properties(&before.properties, &after.properties, after);
    data.assigned_node_properties.extend(assigned);
    data.removed_node_properties.extend(removed);
}

fn diff_properties<T: Clone>(
    before: &Properties,
    after: &Properties,
    entity: &T,
) -> (Vec<PropertyEntry<T>>, Vec<PropertyEntry<T>>) {
    let assigned = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| PropertyEntry {
            key: key.clone(),
            entity: entity.clone(),
            previous: before.get(key).cloned(),
            value: Some(value.clone()),
        })
        .collect();
    let removed = before
        .iter()
        .filter(|(key, _)| !after.contains_key(*key))
        .map(|(key, value)| PropertyEntry {
            key: key.clone(),
            entity: entity.clone(),
            previous: Some(value.clone()),
            value: None,
        })
        .collect();
    (assigned, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use parking_lot::Mutex;
    use serde_json::json;

    fn props(value: JsonValue) -> Properties {
        value.as_object().cloned().unwrap_or_default()
    }

    #[derive(Default)]
    struct RecordingListener {
        reject: bool,
        events: Mutex<Vec<String>>,
        seen: Mutex<Vec<TransactionData>>,
    }

    #[async_trait]
    impl CommitHookPort<MemoryTransaction> for RecordingListener {
        async fn before_commit(
            &self,
            data: &TransactionData,
            tx: &mut MemoryTransaction,
        ) -> Result<(), HookError> {
            self.events.lock().push("before".to_string());
            if self.reject {
                return Err(HookError::Rejected {
                    listener: "recording".to_string(),
                    reason: "no".to_string(),
                });
            }
            for node in &data.created_nodes {
                tx.set_node_property(node.id, "stamped", json!(true))
                    .map_err(|e| HookError::Rejected {
                        listener: "recording".to_string(),
                        reason: e.to_string(),
                    })?;
            }
            Ok(())
        }

        async fn after_commit(&self, data: &TransactionData) {
            self.events.lock().push("after".to_string());
            self.seen.lock().push(data.clone());
        }

        async fn after_rollback(&self, _data: &TransactionData) {
            self.events.lock().push("rollback".to_string());
        }
    }

    #[tokio::test]
    async fn commit_applies_buffered_writes() {
        let graph = MemoryGraph::new("graph");
        let mut tx = graph.begin().await.expect("begin");
        let node = tx.create_node(["Person"], props(json!({"name": "Ada"})));
        assert!(graph.node(node.id).is_none());

        let data = graph.commit(tx).await.expect("commit");

        assert_eq!(data.created_nodes.len(), 1);
        assert_eq!(data.assigned_labels.len(), 1);
        assert_eq!(data.assigned_node_properties.len(), 1);
        assert!(data.transaction_id.is_some());
        assert!(data.commit_time.is_some());
        assert_eq!(graph.node(node.id).expect("node").property("name"), Some(&json!("Ada")));
    }

    #[tokio::test]
    async fn change_set_diffs_against_committed_state() {
        let graph = MemoryGraph::new("graph");
        let mut tx = graph.begin().await.expect("begin");
        let node = tx.create_node(["A"], props(json!({"keep": 1, "drop": 2, "change": 3})));
        graph.commit(tx).await.expect("commit");

        let mut tx = graph.begin().await.expect("begin");
        tx.set_node_property(node.id, "change", json!(4)).expect("set");
        tx.remove_node_property(node.id, "drop").expect("remove");
        tx.add_label(node.id, "B").expect("label");
        tx.remove_label(node.id, "A").expect("label");
        let data = tx.change_set();

        assert!(data.created_nodes.is_empty());
        assert_eq!(data.assigned_node_properties.len(), 1);
        assert_eq!(data.assigned_node_properties[0].key, "change");
        assert_eq!(data.assigned_node_properties[0].previous, Some(json!(3)));
        assert_eq!(data.removed_node_properties.len(), 1);
        assert_eq!(data.removed_node_properties[0].key, "drop");
        assert_eq!(data.assigned_labels[0].label, "B");
        assert_eq!(data.removed_labels[0].label, "A");
    }

    #[tokio::test]
    async fn delete_node_detaches_relationships() {
        let graph = MemoryGraph::new("graph");
        let mut tx = graph.begin().await.expect("begin");
        let a = tx.create_node(["A"], Properties::new());
        let b = tx.create_node(["B"], Properties::new());
        let rel = tx
            .create_relationship(a.id, b.id, "LINKS", Properties::new())
            .expect("rel");
        graph.commit(tx).await.expect("commit");

        let mut tx = graph.begin().await.expect("begin");
        tx.delete_node(a.id).expect("delete");
        let data = graph.commit(tx).await.expect("commit");

        assert_eq!(data.deleted_nodes.len(), 1);
        assert_eq!(data.deleted_relationships.len(), 1);
        assert_eq!(data.removed_labels.len(), 1);
        assert!(graph.node(a.id).is_none());
        assert!(graph.relationship(rel.id).is_none());
        assert!(graph.node(b.id).is_some());
    }

    #[tokio::test]
    async fn writes_to_missing_entities_fail() {
        let graph = MemoryGraph::new("graph");
        let mut tx = graph.begin().await.expect("begin");
        let err = tx
            .set_node_property(NodeId::new(), "x", json!(1))
            .unwrap_err();
        assert!(err.to_string().contains("entity not found"));
    }

    #[tokio::test]
    async fn empty_commit_skips_listeners() {
        let graph = MemoryGraph::new("graph");
        let listener = Arc::new(RecordingListener::default());
        graph.subscribe("rec", listener.clone());

        let tx = graph.begin().await.expect("begin");
        let data = graph.commit(tx).await.expect("commit");

        assert!(data.is_empty());
        assert!(listener.events.lock().is_empty());
    }

    #[tokio::test]
    async fn listeners_run_before_and_after_commit() {
        let graph = MemoryGraph::new("graph");
        let listener = Arc::new(RecordingListener::default());
        graph.subscribe("rec", listener.clone());

        let mut tx = graph.begin().await.expect("begin");
        let node = tx.create_node(["A"], Properties::new());
        graph.commit(tx).await.expect("commit");

        assert_eq!(*listener.events.lock(), vec!["before", "after"]);
        let stamped = graph.node(node.id).expect("node");
        assert_eq!(stamped.property("stamped"), Some(&json!(true)));
        let seen = listener.seen.lock();
        assert!(seen[0].transaction_id.is_some());
    }

    #[tokio::test]
    async fn rejected_commit_rolls_back_and_notifies() {
        let graph = MemoryGraph::new("graph");
        let listener = Arc::new(RecordingListener {
            reject: true,
            ..Default::default()
        });
        graph.subscribe("rec", listener.clone());

        let mut tx = graph.begin().await.expect("begin");
        let node = tx.create_node(["A"], Properties::new());
        let err = graph.commit(tx).await.unwrap_err();

        assert!(err.to_string().contains("commit rejected"));
        assert_eq!(*listener.events.lock(), vec!["before", "rollback"]);
        assert!(graph.node(node.id).is_none());
    }

    #[tokio::test]
    async fn unsubscribe_removes_listener() {
        let graph = MemoryGraph::new("graph");
        let listener = Arc::new(RecordingListener::default());
        graph.subscribe("rec", listener.clone());
        assert!(graph.is_subscribed("rec"));

        graph.unsubscribe("rec");
        assert!(!graph.is_subscribed("rec"));
        assert_eq!(graph.subscribe_calls(), 1);
        assert_eq!(graph.unsubscribe_calls(), 1);

        let mut tx = graph.begin().await.expect("begin");
        tx.create_node(["A"], Properties::new());
        graph.commit(tx).await.expect("commit");
        assert!(listener.events.lock().is_empty());
    }

    #[tokio::test]
    async fn find_nodes_merges_buffer_and_committed() {
        let graph = MemoryGraph::new("graph");
        let mut tx = graph.begin().await.expect("begin");
        let committed = tx.create_node(["Person"], Properties::new());
        graph.commit(tx).await.expect("commit");

        let mut tx = graph.begin().await.expect("begin");
        tx.create_node(["Person"], Properties::new());
        tx.remove_label(committed.id, "Person").expect("label");

        let found = tx.find_nodes("Person");
        assert_eq!(found.len(), 1);
        assert_ne!(found[0].id, committed.id);
    }

    #[tokio::test]
    async fn transaction_ids_increase() {
        let graph = MemoryGraph::new("graph");
        let mut ids = Vec::new();
        for _ in 0..2 {
            let mut tx = graph.begin().await.expect("begin");
            tx.create_node(["A"], Properties::new());
            ids.push(graph.commit(tx).await.expect("commit").transaction_id);
        }
        assert!(ids[0] < ids[1]);
    }
}
