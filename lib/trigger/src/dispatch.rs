//! Phase dispatcher.
//!
//! Runs every unpaused cached trigger whose selector resolves to the phase,
//! in cache order, against the given transaction. A failing trigger is
//! logged and recorded; the others still run. The phase fails once at the
//! end if any trigger failed.

use crate::cache::TriggerCache;
use crate::definition::{Phase, TriggerDefinition};
use crate::error::DispatchError;
use crate::metadata::TriggerMetadata;
use futures::StreamExt;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, warn};
use tripwire_graph::{Params, StatementEngine, StatementError};

/// Parameter key carrying the executing trigger's name.
pub const TRIGGER_PARAM: &str = "trigger";

/// Triggers executed by one phase dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub phase: Phase,
    /// Names of the triggers that ran, in execution order.
    pub executed: Vec<String>,
}

impl DispatchSummary {
    fn empty(phase: Phase) -> Self {
        Self {
            phase,
            executed: Vec::new(),
        }
    }
}

/// Selects and runs triggers for a phase.
pub struct PhaseDispatcher<E> {
    cache: Arc<TriggerCache>,
    engine: Arc<E>,
}

impl<E> PhaseDispatcher<E> {
    /// Creates a dispatcher reading from the cache.
    pub fn new(cache: Arc<TriggerCache>, engine: Arc<E>) -> Self {
        Self { cache, engine }
    }

    /// Returns whether any unpaused trigger fires in the phase.
    #[must_use]
    pub fn has_phase(&self, phase: Phase) -> bool {
        self.cache.has_phase(phase)
    }

    /// Runs the phase's triggers inside `tx`.
    pub async fn dispatch<Tx>(
        &self,
        phase: Phase,
        metadata: &TriggerMetadata,
        tx: &mut Tx,
    ) -> Result<DispatchSummary, DispatchError>
    where
        Tx: Send,
        E: StatementEngine<Tx>,
    {
        if !self.cache.has_phase(phase) {
            return Ok(DispatchSummary::empty(phase));
        }

        let base = metadata.to_params();
        let triggers = self.cache.list();
        let mut summary = DispatchSummary::empty(phase);
        let mut failures = IndexMap::new();

        for def in triggers.values() {
            if def.paused || !def.fires_in(phase) {
                continue;
            }
            let mut params = base.clone();
            params.extend(def.params.clone());
            params.insert(TRIGGER_PARAM.to_string(), JsonValue::String(def.name.clone()));

            match self.run(def, params, tx).await {
                Ok(rows) => {
                    debug!(trigger = %def.name, phase = %phase, rows, "trigger executed");
                    summary.executed.push(def.name.clone());
                }
                Err(e) => {
                    warn!(trigger = %def.name, phase = %phase, error = %e, "error executing trigger");
                    failures.insert(def.name.clone(), e.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(DispatchError::TriggersFailed { phase, failures })
        }
    }

    async fn run<Tx>(
        &self,
        def: &TriggerDefinition,
        params: Params,
        tx: &mut Tx,
    ) -> Result<usize, StatementError>
    where
        Tx: Send,
        E: StatementEngine<Tx>,
    {
        let mut rows = self.engine.execute(&def.statement, params, tx).await?;
        let mut count = 0;
        while let Some(row) = rows.next().await {
            row?;
            count += 1;
        }
        Ok(count)
    }
}
