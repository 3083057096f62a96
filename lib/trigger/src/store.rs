//! Trigger store adapter over the shared metadata store.
//!
//! The metadata store is an external collaborator shared by every engine
//! instance. It keeps trigger definitions and a last-update marker per
//! database scope. `TriggerStore` maps between `TriggerDefinition` and the
//! stored form, and bumps the marker on every mutation.

use crate::definition::{Selector, TriggerDefinition};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use tripwire_graph::Params;

/// A trigger as persisted by the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTrigger {
    pub name: String,
    pub statement: String,
    /// Selector as JSON text; `None` when the trigger has no selector.
    pub selector: Option<String>,
    /// Parameters as JSON text.
    pub params: String,
    pub paused: bool,
}

/// Persistent storage for trigger definitions, scoped by database.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Lists all definitions in a scope.
    async fn list_trigger_definitions(&self, scope: &str)
    -> Result<Vec<StoredTrigger>, StoreError>;

    /// Inserts or replaces a definition, returning the one it replaced.
    async fn upsert_trigger_definition(
        &self,
        scope: &str,
        trigger: StoredTrigger,
    ) -> Result<Option<StoredTrigger>, StoreError>;

    /// Sets the paused flag, returning the updated definition.
    async fn set_trigger_paused(
        &self,
        scope: &str,
        name: &str,
        paused: bool,
    ) -> Result<Option<StoredTrigger>, StoreError>;

    /// Deletes a definition, returning it if it existed.
    async fn delete_trigger_definition(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<Option<StoredTrigger>, StoreError>;

    /// Deletes every definition in a scope, returning them.
    async fn delete_all_trigger_definitions(
        &self,
        scope: &str,
    ) -> Result<Vec<StoredTrigger>, StoreError>;

    /// Returns the last-update marker, if the scope was ever mutated.
    async fn last_update_marker(&self, scope: &str) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Advances the last-update marker and returns the new value.
    async fn bump_last_update_marker(&self, scope: &str) -> Result<DateTime<Utc>, StoreError>;
}

/// Returns the marker following `previous`: now, or one millisecond past
/// `previous` when the clock has not moved on.
#[must_use]
pub fn next_marker(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + Duration::milliseconds(1),
        _ => now,
    }
}

/// Maps trigger definitions onto a metadata store scope.
#[derive(Clone)]
pub struct TriggerStore {
    scope: String,
    backend: Arc<dyn MetadataStore>,
}

impl TriggerStore {
    /// Creates an adapter for a scope.
    #[must_use]
    pub fn new(scope: impl Into<String>, backend: Arc<dyn MetadataStore>) -> Self {
        Self {
            scope: scope.into(),
            backend,
        }
    }

    /// Returns the scope.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Loads every definition in the scope.
    pub async fn load_all(&self) -> Result<Vec<TriggerDefinition>, Report<StoreError>> {
        let stored = self.backend.list_trigger_definitions(&self.scope).await?;
        let defs = stored
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    /// Persists a definition and returns the one it replaced.
    pub async fn save(
        &self,
        def: &TriggerDefinition,
    ) -> Result<Option<TriggerDefinition>, Report<StoreError>> {
        let previous = self
            .backend
            .upsert_trigger_definition(&self.scope, encode(def)?)
            .await?;
        self.touch().await?;
        Ok(previous.map(decode).transpose()?)
    }

    /// Sets the paused flag and returns the updated definition.
    pub async fn set_paused(
        &self,
        name: &str,
        paused: bool,
    ) -> Result<Option<TriggerDefinition>, Report<StoreError>> {
        let updated = self
            .backend
            .set_trigger_paused(&self.scope, name, paused)
            .await?;
        self.touch().await?;
        Ok(updated.map(decode).transpose()?)
    }

    /// Deletes a definition and returns it.
    pub async fn delete(&self, name: &str) -> Result<Option<TriggerDefinition>, Report<StoreError>> {
        let removed = self
            .backend
            .delete_trigger_definition(&self.scope, name)
            .await?;
        self.touch().await?;
        Ok(removed.map(decode).transpose()?)
    }

    /// Deletes every definition and returns them.
    pub async fn delete_all(&self) -> Result<Vec<TriggerDefinition>, Report<StoreError>> {
        let removed = self
            .backend
            .delete_all_trigger_definitions(&self.scope)
            .await?;
        self.touch().await?;
        let defs = removed
            .into_iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(defs)
    }

    /// Reads the last-update marker.
    pub async fn last_update(&self) -> Result<Option<DateTime<Utc>>, Report<StoreError>> {
        Ok(self.backend.last_update_marker(&self.scope).await?)
    }

    async fn touch(&self) -> Result<(), Report<StoreError>> {
        let marker = self.backend.bump_last_update_marker(&self.scope).await?;
        debug!(scope = %self.scope, marker = %marker, "bumped last-update marker");
        Ok(())
    }
}

fn encode(def: &TriggerDefinition) -> Result<StoredTrigger, StoreError> {
    let write_failed = |e: serde_json::Error| StoreError::WriteFailed {
        reason: format!("cannot encode trigger '{}': {e}", def.name),
    };
    let selector = def
        .selector
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(write_failed)?;
    let params = serde_json::to_string(&def.params).map_err(write_failed)?;
    Ok(StoredTrigger {
        name: def.name.clone(),
        statement: def.statement.clone(),
        selector,
        params,
        paused: def.paused,
    })
}

fn decode(stored: StoredTrigger) -> Result<TriggerDefinition, StoreError> {
    let corrupt = |e: serde_json::Error| StoreError::Corrupt {
        name: stored.name.clone(),
        reason: e.to_string(),
    };
    let selector = match stored.selector.as_deref() {
        None | Some("null") => None,
        Some(text) => Some(serde_json::from_str::<Selector>(text).map_err(corrupt)?),
    };
    let params = if stored.params.is_empty() {
        Params::new()
    } else {
        serde_json::from_str::<Option<Params>>(&stored.params)
            .map_err(corrupt)?
            .unwrap_or_default()
    };
    Ok(TriggerDefinition {
        name: stored.name,
        statement: stored.statement,
        selector,
        params,
        paused: stored.paused,
    })
}

#[derive(Debug, Default)]
struct ScopeState {
    triggers: IndexMap<String, StoredTrigger>,
    marker: Option<DateTime<Utc>>,
}

/// Metadata store held in memory.
///
/// Clones share state, so several engines built over clones of one store
/// behave like processes sharing a database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataStore {
    scopes: Arc<Mutex<HashMap<String, ScopeState>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryMetadataStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Inserts a raw row without bumping the marker.
    pub fn insert_raw(&self, scope: &str, trigger: StoredTrigger) {
        self.scopes
            .lock()
            .entry(scope.to_string())
            .or_default()
            .triggers
            .insert(trigger.name.clone(), trigger);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn list_trigger_definitions(
        &self,
        scope: &str,
    ) -> Result<Vec<StoredTrigger>, StoreError> {
        self.check()?;
        Ok(self
            .scopes
            .lock()
            .get(scope)
            .map(|s| s.triggers.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_trigger_definition(
        &self,
        scope: &str,
        trigger: StoredTrigger,
    ) -> Result<Option<StoredTrigger>, StoreError> {
        self.check()?;
        Ok(self
            .scopes
            .lock()
            .entry(scope.to_string())
            .or_default()
            .triggers
            .insert(trigger.name.clone(), trigger))
    }

    async fn set_trigger_paused(
        &self,
        scope: &str,
        name: &str,
        paused: bool,
    ) -> Result<Option<StoredTrigger>, StoreError> {
        self.check()?;
        let mut scopes = self.scopes.lock();
        let updated = scopes
            .get_mut(scope)
            .and_then(|s| s.triggers.get_mut(name))
            .map(|t| {
                t.paused = paused;
                t.clone()
            });
        Ok(updated)
    }

    async fn delete_trigger_definition(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<Option<StoredTrigger>, StoreError> {
        self.check()?;
        Ok(self
            .scopes
            .lock()
            .get_mut(scope)
            .and_then(|s| s.triggers.shift_remove(name)))
    }

    async fn delete_all_trigger_definitions(
        &self,
        scope: &str,
    ) -> Result<Vec<StoredTrigger>, StoreError> {
        self.check()?;
        Ok(self
            .scopes
            .lock()
            .get_mut(scope)
            .map(|s| s.triggers.drain(..).map(|(_, t)| t).collect())
            .unwrap_or_default())
    }

    async fn last_update_marker(&self, scope: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.check()?;
        Ok(self.scopes.lock().get(scope).and_then(|s| s.marker))
    }

    async fn bump_last_update_marker(&self, scope: &str) -> Result<DateTime<Utc>, StoreError> {
        self.check()?;
        let mut scopes = self.scopes.lock();
        let state = scopes.entry(scope.to_string()).or_default();
        let marker = next_marker(state.marker, Utc::now());
        state.marker = Some(marker);
        Ok(marker)
    }
}
