//! Change-set parameters handed to trigger statements.
//!
//! `TriggerMetadata` groups a `TransactionData` the way statements consume
//! it: labels map to nodes, property keys map to change entries.
//! `ChangeSnapshot` is the transaction-independent copy taken for the
//! `afterAsync` phase and re-resolved inside the worker's transaction.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::collections::HashSet;
use tracing::debug;
use tripwire_core::{NodeId, RelationshipId, TransactionId};
use tripwire_graph::{
    GraphTransaction, HostError, LabelEntry, Node, Params, Properties, PropertyEntry,
    Relationship, TransactionData,
};

/// One property change grouped under its key.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange<T> {
    pub key: String,
    pub entity: T,
    pub old: Option<JsonValue>,
    /// `None` for removals.
    pub new: Option<JsonValue>,
}

impl<T> PropertyChange<T> {
    fn from_entry(entry: &PropertyEntry<T>) -> Self
    where
        T: Clone,
    {
        Self {
            key: entry.key.clone(),
            entity: entry.entity.clone(),
            old: entry.previous.clone(),
            new: entry.value.clone(),
        }
    }

    fn to_json(&self, entity_field: &str, entity: JsonValue, include_new: bool) -> JsonValue {
        let mut map = serde_json::Map::new();
        map.insert("key".to_string(), JsonValue::String(self.key.clone()));
        map.insert(entity_field.to_string(), entity);
        map.insert("old".to_string(), self.old.clone().unwrap_or(JsonValue::Null));
        if include_new {
            map.insert("new".to_string(), self.new.clone().unwrap_or(JsonValue::Null));
        }
        JsonValue::Object(map)
    }
}

type PropertyChanges<T> = IndexMap<String, Vec<PropertyChange<T>>>;

/// Change-set grouped for statement parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerMetadata {
    pub transaction_id: Option<TransactionId>,
    pub commit_time: Option<DateTime<Utc>>,
    pub created_nodes: Vec<Node>,
    pub created_relationships: Vec<Relationship>,
    pub deleted_nodes: Vec<Node>,
    pub deleted_relationships: Vec<Relationship>,
    pub assigned_labels: IndexMap<String, Vec<Node>>,
    pub removed_labels: IndexMap<String, Vec<Node>>,
    pub assigned_node_properties: PropertyChanges<Node>,
    pub removed_node_properties: PropertyChanges<Node>,
    pub assigned_relationship_properties: PropertyChanges<Relationship>,
    pub removed_relationship_properties: PropertyChanges<Relationship>,
    pub metadata: Properties,
}

impl TriggerMetadata {
    /// Groups a change-set.
    #[must_use]
    pub fn from_data(data: &TransactionData) -> Self {
        Self {
            transaction_id: data.transaction_id,
            commit_time: data.commit_time,
            created_nodes: data.created_nodes.clone(),
            created_relationships: data.created_relationships.clone(),
            deleted_nodes: data.deleted_nodes.clone(),
            deleted_relationships: data.deleted_relationships.clone(),
            assigned_labels: group_labels(&data.assigned_labels),
            removed_labels: group_labels(&data.removed_labels),
            assigned_node_properties: group_properties(&data.assigned_node_properties),
            removed_node_properties: group_properties(&data.removed_node_properties),
            assigned_relationship_properties: group_properties(
                &data.assigned_relationship_properties,
            ),
            removed_relationship_properties: group_properties(
                &data.removed_relationship_properties,
            ),
            metadata: data.metadata.clone(),
        }
    }

    /// Builds the base statement parameters.
    ///
    /// `transactionId` and `commitTime` are -1 before commit.
    #[must_use]
    pub fn to_params(&self) -> Params {
        let transaction_id = self
            .transaction_id
            .and_then(|id| i64::try_from(id.get()).ok())
            .unwrap_or(-1);
        let commit_time = self.commit_time.map_or(-1, |t| t.timestamp_millis());

        let mut params = Params::new();
        params.insert("transactionId".to_string(), json!(transaction_id));
        params.insert("commitTime".to_string(), json!(commit_time));
        params.insert("createdNodes".to_string(), nodes_json(&self.created_nodes));
        params.insert(
            "createdRelationships".to_string(),
            relationships_json(&self.created_relationships),
        );
        params.insert("deletedNodes".to_string(), nodes_json(&self.deleted_nodes));
        params.insert(
            "deletedRelationships".to_string(),
            relationships_json(&self.deleted_relationships),
        );
        params.insert("assignedLabels".to_string(), labels_json(&self.assigned_labels));
        params.insert("removedLabels".to_string(), labels_json(&self.removed_labels));
        params.insert(
            "assignedNodeProperties".to_string(),
            properties_json(&self.assigned_node_properties, "node", Node::to_json, true),
        );
        params.insert(
            "removedNodeProperties".to_string(),
            properties_json(&self.removed_node_properties, "node", Node::to_json, false),
        );
        params.insert(
            "assignedRelationshipProperties".to_string(),
            properties_json(
                &self.assigned_relationship_properties,
                "relationship",
                Relationship::to_json,
                true,
            ),
        );
        params.insert(
            "removedRelationshipProperties".to_string(),
            properties_json(
                &self.removed_relationship_properties,
                "relationship",
                Relationship::to_json,
                false,
            ),
        );
        params.insert("metaData".to_string(), JsonValue::Object(self.metadata.clone()));
        params
    }
}

fn group_labels(entries: &[LabelEntry]) -> IndexMap<String, Vec<Node>> {
    let mut grouped: IndexMap<String, Vec<Node>> = IndexMap::new();
    for entry in entries {
        grouped
            .entry(entry.label.clone())
            .or_default()
            .push(entry.node.clone());
    }
    grouped
}

fn group_properties<T: Clone>(entries: &[PropertyEntry<T>]) -> PropertyChanges<T> {
    let mut grouped: PropertyChanges<T> = IndexMap::new();
    for entry in entries {
        grouped
            .entry(entry.key.clone())
            .or_default()
            .push(PropertyChange::from_entry(entry));
    }
    grouped
}

fn nodes_json(nodes: &[Node]) -> JsonValue {
    JsonValue::Array(nodes.iter().map(Node::to_json).collect())
}

fn relationships_json(rels: &[Relationship]) -> JsonValue {
    JsonValue::Array(rels.iter().map(Relationship::to_json).collect())
}

fn labels_json(labels: &IndexMap<String, Vec<Node>>) -> JsonValue {
    JsonValue::Object(
        labels
            .iter()
            .map(|(label, nodes)| (label.clone(), nodes_json(nodes)))
            .collect(),
    )
}

fn properties_json<T>(
    changes: &PropertyChanges<T>,
    entity_field: &str,
    entity_json: fn(&T) -> JsonValue,
    include_new: bool,
) -> JsonValue {
    JsonValue::Object(
        changes
            .iter()
            .map(|(key, entries)| {
                let entries = entries
                    .iter()
                    .map(|c| c.to_json(entity_field, entity_json(&c.entity), include_new))
                    .collect();
                (key.clone(), JsonValue::Array(entries))
            })
            .collect(),
    )
}

#[derive(Debug, Clone)]
enum NodeRef {
    Live(NodeId),
    Detached(Node),
}

#[derive(Debug, Clone)]
enum RelationshipRef {
    Live(RelationshipId),
    Detached(Relationship),
}

#[derive(Debug, Clone)]
struct CapturedProperty<R> {
    key: String,
    entity: R,
    previous: Option<JsonValue>,
    value: Option<JsonValue>,
}

/// A change-set copied out of its transaction.
///
/// Live entities are kept by ID and re-resolved later; entities deleted by
/// the transaction are kept as detached copies since they cannot be
/// resolved any more.
#[derive(Debug, Clone)]
pub struct ChangeSnapshot {
    transaction_id: Option<TransactionId>,
    commit_time: Option<DateTime<Utc>>,
    created_nodes: Vec<NodeId>,
    created_relationships: Vec<RelationshipId>,
    deleted_nodes: Vec<Node>,
    deleted_relationships: Vec<Relationship>,
    assigned_labels: Vec<(String, NodeRef)>,
    removed_labels: Vec<(String, NodeRef)>,
    assigned_node_properties: Vec<CapturedProperty<NodeRef>>,
    removed_node_properties: Vec<CapturedProperty<NodeRef>>,
    assigned_relationship_properties: Vec<CapturedProperty<RelationshipRef>>,
    removed_relationship_properties: Vec<CapturedProperty<RelationshipRef>>,
    metadata: Properties,
}

impl ChangeSnapshot {
    /// Copies a change-set out of its transaction.
    #[must_use]
    pub fn capture(data: &TransactionData) -> Self {
        let deleted_nodes: HashSet<NodeId> = data.deleted_nodes.iter().map(|n| n.id).collect();
        let deleted_rels: HashSet<RelationshipId> =
            data.deleted_relationships.iter().map(|r| r.id).collect();

        let node_ref = |node: &Node| {
            if deleted_nodes.contains(&node.id) {
                NodeRef::Detached(node.clone())
            } else {
                NodeRef::Live(node.id)
            }
        };
        let rel_ref = |rel: &Relationship| {
            if deleted_rels.contains(&rel.id) {
                RelationshipRef::Detached(rel.clone())
            } else {
                RelationshipRef::Live(rel.id)
            }
        };

        Self {
            transaction_id: data.transaction_id,
            commit_time: data.commit_time,
            created_nodes: data.created_nodes.iter().map(|n| n.id).collect(),
            created_relationships: data.created_relationships.iter().map(|r| r.id).collect(),
            deleted_nodes: data.deleted_nodes.clone(),
            deleted_relationships: data.deleted_relationships.clone(),
            assigned_labels: capture_labels(&data.assigned_labels, &node_ref),
            removed_labels: capture_labels(&data.removed_labels, &node_ref),
            assigned_node_properties: capture_properties(&data.assigned_node_properties, &node_ref),
            removed_node_properties: capture_properties(&data.removed_node_properties, &node_ref),
            assigned_relationship_properties: capture_properties(
                &data.assigned_relationship_properties,
                &rel_ref,
            ),
            removed_relationship_properties: capture_properties(
                &data.removed_relationship_properties,
                &rel_ref,
            ),
            metadata: data.metadata.clone(),
        }
    }

    /// Re-resolves the snapshot inside another transaction.
    ///
    /// Entities that no longer exist are skipped.
    pub async fn rebind<T>(&self, tx: &T) -> Result<TransactionData, Report<HostError>>
    where
        T: GraphTransaction,
    {
        let mut data = TransactionData {
            transaction_id: self.transaction_id,
            commit_time: self.commit_time,
            deleted_nodes: self.deleted_nodes.clone(),
            deleted_relationships: self.deleted_relationships.clone(),
            metadata: self.metadata.clone(),
            ..Default::default()
        };

        for id in &self.created_nodes {
            if let Some(node) = resolve_node(tx, &NodeRef::Live(*id)).await? {
                data.created_nodes.push(node);
            }
        }
        for id in &self.created_relationships {
            if let Some(rel) = resolve_relationship(tx, &RelationshipRef::Live(*id)).await? {
                data.created_relationships.push(rel);
            }
        }
        for (label, node) in &self.assigned_labels {
            if let Some(node) = resolve_node(tx, node).await? {
                data.assigned_labels.push(LabelEntry {
                    label: label.clone(),
                    node,
                });
            }
        }
        for (label, node) in &self.removed_labels {
            if let Some(node) = resolve_node(tx, node).await? {
                data.removed_labels.push(LabelEntry {
                    label: label.clone(),
                    node,
                });
            }
        }
        for captured in &self.assigned_node_properties {
            if let Some(node) = resolve_node(tx, &captured.entity).await? {
                data.assigned_node_properties.push(captured.rebound(node));
            }
        }
        for captured in &self.removed_node_properties {
            if let Some(node) = resolve_node(tx, &captured.entity).await? {
                data.removed_node_properties.push(captured.rebound(node));
            }
        }
        for captured in &self.assigned_relationship_properties {
            if let Some(rel) = resolve_relationship(tx, &captured.entity).await? {
                data.assigned_relationship_properties.push(captured.rebound(rel));
            }
        }
        for captured in &self.removed_relationship_properties {
            if let Some(rel) = resolve_relationship(tx, &captured.entity).await? {
                data.removed_relationship_properties.push(captured.rebound(rel));
            }
        }

        Ok(data)
    }
}

impl<R> CapturedProperty<R> {
    fn rebound<T>(&self, entity: T) -> PropertyEntry<T> {
        PropertyEntry {
            key: self.key.clone(),
            entity,
            previous: self.previous.clone(),
            value: self.value.clone(),
        }
    }
}

fn capture_labels(entries: &[LabelEntry], to_ref: impl Fn(&Node) -> NodeRef) -> Vec<(String, NodeRef)> {
    entries
        .iter()
        .map(|e| (e.label.clone(), to_ref(&e.node)))
        .collect()
}

fn capture_properties<T, R>(
    entries: &[PropertyEntry<T>],
    to_ref: impl Fn(&T) -> R,
) -> Vec<CapturedProperty<R>> {
    entries
        .iter()
        .map(|e| CapturedProperty {
            key: e.key.clone(),
            entity: to_ref(&e.entity),
            previous: e.previous.clone(),
            value: e.value.clone(),
        })
        .collect()
}

async fn resolve_node<T>(tx: &T, node: &NodeRef) -> Result<Option<Node>, Report<HostError>>
where
    T: GraphTransaction,
{
    match node {
        NodeRef::Detached(node) => Ok(Some(node.clone())),
        NodeRef::Live(id) => {
            let resolved = tx.node(*id).await?;
            if resolved.is_none() {
                debug!(node = %id, "node vanished before async phase");
            }
            Ok(resolved)
        }
    }
}

async fn resolve_relationship<T>(
    tx: &T,
    rel: &RelationshipRef,
) -> Result<Option<Relationship>, Report<HostError>>
where
    T: GraphTransaction,
{
    match rel {
        RelationshipRef::Detached(rel) => Ok(Some(rel.clone())),
        RelationshipRef::Live(id) => {
            let resolved = tx.relationship(*id).await?;
            if resolved.is_none() {
                debug!(relationship = %id, "relationship vanished before async phase");
            }
            Ok(resolved)
        }
    }
}
