//! In-memory cache of active triggers.
//!
//! Readers take a lock-free snapshot; writers replace the whole map. The
//! cache also remembers the last-update marker it was built from so the
//! refresh job can tell when another instance changed the store.

use crate::definition::{Phase, TriggerDefinition};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Snapshot of the cached triggers, keyed by name.
pub type TriggerMap = IndexMap<String, TriggerDefinition>;

const NEVER: i64 = i64::MIN;

/// Concurrently readable trigger map.
#[derive(Debug)]
pub struct TriggerCache {
    triggers: ArcSwap<TriggerMap>,
    last_seen: AtomicI64,
}

impl Default for TriggerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerCache {
    /// Creates an empty cache that has never seen a marker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            triggers: ArcSwap::from_pointee(IndexMap::new()),
            last_seen: AtomicI64::new(NEVER),
        }
    }

    /// Replaces the contents with `defs` and records the marker they were
    /// loaded under.
    pub fn replace(&self, defs: Vec<TriggerDefinition>, marker: Option<DateTime<Utc>>) {
        let map: TriggerMap = defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        self.triggers.store(Arc::new(map));
        let seen = marker.map_or(NEVER, |m| m.timestamp_millis());
        self.last_seen.fetch_max(seen, Ordering::SeqCst);
    }

    /// Returns an immutable snapshot of all triggers.
    #[must_use]
    pub fn list(&self) -> Arc<TriggerMap> {
        self.triggers.load_full()
    }

    /// Returns a trigger by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<TriggerDefinition> {
        self.triggers.load().get(name).cloned()
    }

    /// Inserts or replaces a trigger, returning the previous one.
    pub fn put(&self, def: TriggerDefinition) -> Option<TriggerDefinition> {
        let name = def.name.clone();
        let previous = self.triggers.rcu(|current| {
            let mut next = TriggerMap::clone(current);
            next.insert(def.name.clone(), def.clone());
            next
        });
        previous.get(&name).cloned()
    }

    /// Removes a trigger, returning it.
    pub fn remove(&self, name: &str) -> Option<TriggerDefinition> {
        let previous = self.triggers.rcu(|current| {
            let mut next = TriggerMap::clone(current);
            next.shift_remove(name);
            next
        });
        previous.get(name).cloned()
    }

    /// Removes every trigger, returning the previous snapshot.
    pub fn remove_all(&self) -> Arc<TriggerMap> {
        self.triggers.swap(Arc::new(IndexMap::new()))
    }

    /// Returns the number of cached triggers, paused ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triggers.load().len()
    }

    /// Returns whether no triggers are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.load().is_empty()
    }

    /// Returns whether any unpaused trigger fires in the phase.
    #[must_use]
    pub fn has_phase(&self, phase: Phase) -> bool {
        self.triggers
            .load()
            .values()
            .any(|d| !d.paused && d.fires_in(phase))
    }

    /// Returns whether `marker` is newer than the one this cache was built from.
    #[must_use]
    pub fn is_stale(&self, marker: Option<DateTime<Utc>>) -> bool {
        marker.is_some_and(|m| m.timestamp_millis() > self.last_seen.load(Ordering::SeqCst))
    }

    /// Returns the marker this cache was last built from, in epoch millis.
    #[must_use]
    pub fn last_seen_millis(&self) -> Option<i64> {
        match self.last_seen.load(Ordering::SeqCst) {
            NEVER => None,
            millis => Some(millis),
        }
    }
}
