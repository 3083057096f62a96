//! Trigger definitions and phase selection.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use tripwire_graph::Params;

/// Commit-lifecycle point at which a trigger fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Inside the committing transaction.
    #[default]
    Before,
    /// In a new transaction after a successful commit.
    After,
    /// In a new transaction after an aborted commit.
    Rollback,
    /// In a new transaction on the background pool after a successful commit.
    AfterAsync,
}

impl Phase {
    /// All phases in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Before, Self::After, Self::Rollback, Self::AfterAsync];

    /// Returns the wire name of the phase.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
            Self::Rollback => "rollback",
            Self::AfterAsync => "afterAsync",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("unknown phase: {s}"))
    }
}

/// Selects when a trigger fires.
///
/// Keys other than `phase` are kept as-is for richer selectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selector {
    /// The phase; `before` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Additional selector keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

impl Selector {
    /// Creates a selector for a phase.
    #[must_use]
    pub fn phase(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            extra: serde_json::Map::new(),
        }
    }

    /// Returns the phase this selector resolves to.
    #[must_use]
    pub fn resolved_phase(&self) -> Phase {
        self.phase.unwrap_or_default()
    }
}

/// A named trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique within a database.
    pub name: String,
    /// Statement handed to the statement engine.
    pub statement: String,
    /// When to fire; `None` means `before`.
    pub selector: Option<Selector>,
    /// Merged into the execution parameters.
    #[serde(default)]
    pub params: Params,
    /// Paused triggers never execute.
    #[serde(default)]
    pub paused: bool,
}

impl TriggerDefinition {
    /// Creates an unpaused trigger firing in `before` with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            selector: None,
            params: Params::new(),
            paused: false,
        }
    }

    /// Sets the selector.
    #[must_use]
    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Returns the phase the trigger fires in.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.selector
            .as_ref()
            .map_or(Phase::Before, Selector::resolved_phase)
    }

    /// Returns whether the trigger's selector resolves to the phase.
    /// Pausing is not considered.
    #[must_use]
    pub fn fires_in(&self, phase: Phase) -> bool {
        self.phase() == phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn phase_wire_names() {
        assert_eq!(serde_json::to_value(Phase::AfterAsync).expect("ser"), json!("afterAsync"));
        assert_eq!("rollback".parse::<Phase>(), Ok(Phase::Rollback));
        assert!("sometime".parse::<Phase>().is_err());
    }

    #[test]
    fn missing_selector_means_before() {
        let def = TriggerDefinition::new("t", "s");
        assert!(def.fires_in(Phase::Before));
        assert!(!def.fires_in(Phase::After));
    }

    #[test]
    fn selector_without_phase_means_before() {
        let selector: Selector = serde_json::from_value(json!({"label": "Person"})).expect("de");
        let def = TriggerDefinition::new("t", "s").with_selector(selector);

        assert_eq!(def.phase(), Phase::Before);
        assert_eq!(def.selector.as_ref().map(|s| s.extra.len()), Some(1));
    }

    #[test]
    fn selector_keeps_extra_keys() {
        let selector: Selector =
            serde_json::from_value(json!({"phase": "after", "label": "Person"})).expect("de");
        assert_eq!(selector.resolved_phase(), Phase::After);

        let back = serde_json::to_value(&selector).expect("ser");
        assert_eq!(back, json!({"phase": "after", "label": "Person"}));
    }
}
