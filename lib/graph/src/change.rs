//! Change-sets produced by the host for each commit.
//!
//! A `TransactionData` borrows nothing from the transaction that produced it,
//! but its entities reflect the state inside that transaction. Consumers that
//! need current state elsewhere must re-resolve entities by ID.

use crate::entity::{Node, Properties, Relationship};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tripwire_core::TransactionId;

/// A label assigned to or removed from a node.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelEntry {
    /// The label.
    pub label: String,
    /// The node as of the transaction.
    pub node: Node,
}

/// A property assigned on or removed from an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry<T> {
    /// Property key.
    pub key: String,
    /// The entity as of the transaction.
    pub entity: T,
    /// Committed value before the transaction, if any.
    pub previous: Option<JsonValue>,
    /// New value; `None` for removals.
    pub value: Option<JsonValue>,
}

/// Everything a transaction changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionData {
    /// Assigned at commit; `None` while the transaction is still open.
    pub transaction_id: Option<TransactionId>,
    /// Assigned at commit; `None` while the transaction is still open.
    pub commit_time: Option<DateTime<Utc>>,
    pub created_nodes: Vec<Node>,
    pub created_relationships: Vec<Relationship>,
    pub deleted_nodes: Vec<Node>,
    pub deleted_relationships: Vec<Relationship>,
    pub assigned_labels: Vec<LabelEntry>,
    pub removed_labels: Vec<LabelEntry>,
    pub assigned_node_properties: Vec<PropertyEntry<Node>>,
    pub removed_node_properties: Vec<PropertyEntry<Node>>,
    pub assigned_relationship_properties: Vec<PropertyEntry<Relationship>>,
    pub removed_relationship_properties: Vec<PropertyEntry<Relationship>>,
    /// Free-form metadata attached to the transaction by the client.
    pub metadata: Properties,
}

impl TransactionData {
    /// Returns true when no entity changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.created_relationships.is_empty()
            && self.deleted_nodes.is_empty()
            && self.deleted_relationships.is_empty()
            && self.assigned_labels.is_empty()
            && self.removed_labels.is_empty()
            && self.assigned_node_properties.is_empty()
            && self.removed_node_properties.is_empty()
            && self.assigned_relationship_properties.is_empty()
            && self.removed_relationship_properties.is_empty()
    }
}
