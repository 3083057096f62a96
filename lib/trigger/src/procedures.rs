//! Operator procedures over the trigger engine.
//!
//! Every procedure yields `TriggerInfo` rows describing the definitions it
//! touched, so operators see the state before and after a change.

use crate::definition::{Selector, TriggerDefinition};
use crate::engine::TriggerEngine;
use crate::error::TriggerError;
use rootcause::prelude::Report;
use serde::Serialize;
use tripwire_graph::{GraphHost, Params, StatementEngine};

/// One row returned by a trigger procedure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerInfo {
    pub name: String,
    /// Statement text; `None` when the named trigger did not exist.
    pub query: Option<String>,
    pub selector: Option<Selector>,
    pub params: Params,
    /// Whether the trigger is installed after the procedure ran.
    pub installed: bool,
    pub paused: bool,
}

impl TriggerInfo {
    fn from_definition(def: TriggerDefinition, installed: bool) -> Self {
        Self {
            name: def.name,
            query: Some(def.statement),
            selector: def.selector,
            params: def.params,
            installed,
            paused: def.paused,
        }
    }

    fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            query: None,
            selector: None,
            params: Params::new(),
            installed: false,
            paused: false,
        }
    }
}

/// Operator-facing trigger management.
pub struct TriggerProcedures<H: GraphHost, E> {
    engine: TriggerEngine<H, E>,
}

impl<H, E> TriggerProcedures<H, E>
where
    H: GraphHost,
    E: StatementEngine<H::Tx> + 'static,
{
    pub fn new(engine: TriggerEngine<H, E>) -> Self {
        Self { engine }
    }

    /// Installs a trigger. Replacing an existing one yields the old
    /// definition as an uninstalled row before the new one.
    pub async fn install(
        &self,
        name: &str,
        statement: &str,
        selector: Option<Selector>,
        params: Params,
    ) -> Result<Vec<TriggerInfo>, Report<TriggerError>> {
        let previous = self
            .engine
            .add(name, statement, selector.clone(), params.clone())
            .await?;

        let mut rows = Vec::with_capacity(2);
        if let Some(previous) = previous {
            rows.push(TriggerInfo::from_definition(previous, false));
        }
        rows.push(TriggerInfo {
            name: name.to_string(),
            query: Some(statement.to_string()),
            selector,
            params,
            installed: true,
            paused: false,
        });
        Ok(rows)
    }

    /// Drops a trigger.
    pub async fn drop(&self, name: &str) -> Result<TriggerInfo, Report<TriggerError>> {
        let removed = self.engine.remove(name).await?;
        Ok(removed.map_or_else(
            || TriggerInfo::missing(name),
            |def| TriggerInfo::from_definition(def, false),
        ))
    }

    /// Drops every trigger.
    pub async fn drop_all(&self) -> Result<Vec<TriggerInfo>, Report<TriggerError>> {
        let removed = self.engine.remove_all().await?;
        Ok(removed
            .into_iter()
            .map(|def| TriggerInfo::from_definition(def, false))
            .collect())
    }

    /// Pauses a trigger.
    pub async fn stop(&self, name: &str) -> Result<TriggerInfo, Report<TriggerError>> {
        let def = self.engine.update_paused(name, true).await?;
        Ok(TriggerInfo::from_definition(def, true))
    }

    /// Resumes a paused trigger.
    pub async fn start(&self, name: &str) -> Result<TriggerInfo, Report<TriggerError>> {
        let def = self.engine.update_paused(name, false).await?;
        Ok(TriggerInfo::from_definition(def, true))
    }

    /// Lists installed triggers.
    pub fn show(&self) -> Result<Vec<TriggerInfo>, Report<TriggerError>> {
        let triggers = self.engine.list()?;
        Ok(triggers
            .values()
            .cloned()
            .map(|def| TriggerInfo::from_definition(def, true))
            .collect())
    }
}
