//! Helpers for trigger statements working on change-set parameters.
//!
//! Nodes are in their statement form: objects with `id`, `labels` and
//! `properties`.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// Returns nodes from a label map or a property-change map.
///
/// - a label map (`assignedLabels`/`removedLabels`) yields the nodes under
///   `label`, or every node when `label` is `None`
/// - a property-change map yields the distinct `node` of each entry,
///   restricted to nodes carrying `label` when one is given
///
/// Anything else yields an empty list.
#[must_use]
pub fn nodes_by_label(entries: &JsonValue, label: Option<&str>) -> Vec<JsonValue> {
    let Some(map) = entries.as_object() else {
        return Vec::new();
    };
    if let Some(JsonValue::Array(nodes)) = label.and_then(|l| map.get(l)) {
        return nodes.clone();
    }
    let Some(first) = map
        .values()
        .next()
        .and_then(JsonValue::as_array)
        .and_then(|list| list.first())
    else {
        return Vec::new();
    };

    let mut found = IndexMap::new();
    if first.get("node").is_some() {
        let nodes = map
            .values()
            .filter_map(JsonValue::as_array)
            .flatten()
            .filter_map(|entry| entry.get("node"));
        for node in nodes {
            if label.is_none_or(|l| has_label(node, l)) {
                insert_node(&mut found, node);
            }
        }
    } else if is_node(first) && label.is_none() {
        for node in map.values().filter_map(JsonValue::as_array).flatten() {
            insert_node(&mut found, node);
        }
    }
    found.into_values().collect()
}

/// Returns the property-change entries recorded for `key`.
#[must_use]
pub fn properties_by_key(entries: &JsonValue, key: &str) -> Vec<JsonValue> {
    entries
        .get(key)
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default()
}

fn is_node(value: &JsonValue) -> bool {
    value.get("id").is_some() && value.get("labels").is_some_and(JsonValue::is_array)
}

fn has_label(node: &JsonValue, label: &str) -> bool {
    node.get("labels")
        .and_then(JsonValue::as_array)
        .is_some_and(|labels| labels.iter().any(|l| l.as_str() == Some(label)))
}

fn insert_node(found: &mut IndexMap<String, JsonValue>, node: &JsonValue) {
    if !is_node(node) {
        return;
    }
    let id = node["id"].to_string();
    found.entry(id).or_insert_with(|| node.clone());
}
