//! Graph entities as handed to trigger statements.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tripwire_core::{NodeId, RelationshipId};

/// Property map of a node or relationship.
pub type Properties = serde_json::Map<String, JsonValue>;

/// A node with its labels and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable identity.
    pub id: NodeId,
    /// Labels in assignment order.
    pub labels: Vec<String>,
    /// Property values.
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    /// Creates a node with a fresh ID.
    #[must_use]
    pub fn new<L, S>(labels: L, properties: Properties) -> Self
    where
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: NodeId::new(),
            labels: labels.into_iter().map(Into::into).collect(),
            properties,
        }
    }

    /// Returns whether the node carries the label.
    #[must_use]
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    /// Returns a property value.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }

    /// Returns the JSON form passed to statements.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id.to_string(),
            "labels": self.labels,
            "properties": self.properties,
        })
    }
}

/// A typed, directed relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Stable identity.
    pub id: RelationshipId,
    /// Relationship type.
    #[serde(rename = "type")]
    pub rel_type: String,
    /// Start node.
    pub start: NodeId,
    /// End node.
    pub end: NodeId,
    /// Property values.
    #[serde(default)]
    pub properties: Properties,
}

impl Relationship {
    /// Creates a relationship with a fresh ID.
    #[must_use]
    pub fn new(start: NodeId, end: NodeId, rel_type: impl Into<String>, properties: Properties) -> Self {
        Self {
            id: RelationshipId::new(),
            rel_type: rel_type.into(),
            start,
            end,
            properties,
        }
    }

    /// Returns whether the relationship touches the node.
    #[must_use]
    pub fn is_attached_to(&self, node: NodeId) -> bool {
        self.start == node || self.end == node
    }

    /// Returns the JSON form passed to statements.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "id": self.id.to_string(),
            "type": self.rel_type,
            "start": self.start.to_string(),
            "end": self.end.to_string(),
            "properties": self.properties,
        })
    }
}
