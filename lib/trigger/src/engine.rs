//! Trigger engine facade.
//!
//! Ties the store, cache, reconciler, listener and refresh job together and
//! exposes the management operations. Every mutation writes through the
//! store and then rebuilds the cache from it, which in turn reconciles the
//! host subscription.

use crate::async_exec::AsyncExecutor;
use crate::cache::{TriggerCache, TriggerMap};
use crate::config::TriggerConfig;
use crate::definition::{Phase, Selector, TriggerDefinition};
use crate::dispatch::PhaseDispatcher;
use crate::error::TriggerError;
use crate::listener::TriggerListener;
use crate::refresh::{JobHandle, JobScheduler, RecurringJob, TokioScheduler};
use crate::registration::{HostSubscription, KernelRegistration, RegistrationChange};
use crate::store::{MetadataStore, TriggerStore};
use parking_lot::Mutex;
use rootcause::prelude::{Report, ResultExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};
use tripwire_graph::{GraphHost, Params, StatementEngine};

/// Key the engine's listener is registered under with the host.
pub const LISTENER_KEY: &str = "tripwire.triggers";

const REFRESH_JOB: &str = "trigger-refresh";

/// The trigger engine for one database.
///
/// Cloning is cheap and clones share all state.
pub struct TriggerEngine<H: GraphHost, E> {
    inner: Arc<EngineInner<H, E>>,
}

impl<H: GraphHost, E> Clone for TriggerEngine<H, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<H: GraphHost, E> {
    config: TriggerConfig,
    statements: Arc<E>,
    store: TriggerStore,
    cache: Arc<TriggerCache>,
    registration: KernelRegistration,
    executor: Arc<AsyncExecutor<H, E>>,
    scheduler: Arc<dyn JobScheduler>,
    refresh_job: Mutex<Option<JobHandle>>,
    // Held while rebuilding the cache; rebuilds never interleave.
    rebuild: tokio::sync::Mutex<()>,
    // Set by stop; a stopped engine keeps its cache but never subscribes.
    stopped: AtomicBool,
}

impl<H, E> TriggerEngine<H, E>
where
    H: GraphHost,
    E: StatementEngine<H::Tx> + 'static,
{
    /// Creates an engine that schedules refreshes on the tokio runtime.
    pub fn new(
        config: TriggerConfig,
        host: Arc<H>,
        statements: Arc<E>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::with_scheduler(config, host, statements, metadata, Arc::new(TokioScheduler))
    }

    /// Creates an engine with a custom refresh scheduler.
    pub fn with_scheduler(
        config: TriggerConfig,
        host: Arc<H>,
        statements: Arc<E>,
        metadata: Arc<dyn MetadataStore>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        let store = TriggerStore::new(host.database_name(), metadata);
        let cache = Arc::new(TriggerCache::new());
        let dispatcher = Arc::new(PhaseDispatcher::new(
            Arc::clone(&cache),
            Arc::clone(&statements),
        ));
        let executor = Arc::new(AsyncExecutor::new(
            Arc::clone(&host),
            Arc::clone(&dispatcher),
            config.async_workers(),
        ));
        let listener = Arc::new(TriggerListener::new(
            LISTENER_KEY,
            Arc::clone(&host),
            dispatcher,
            Arc::clone(&executor),
        ));
        let registration =
            KernelRegistration::new(Box::new(HostSubscription::new(host, LISTENER_KEY, listener)));

        Self {
            inner: Arc::new(EngineInner {
                config,
                statements,
                store,
                cache,
                registration,
                executor,
                scheduler,
                refresh_job: Mutex::new(None),
                rebuild: tokio::sync::Mutex::new(()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Returns whether triggers are enabled by configuration.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Returns the database scope this engine serves.
    #[must_use]
    pub fn scope(&self) -> &str {
        self.inner.store.scope()
    }

    fn check_enabled(&self) -> Result<(), Report<TriggerError>> {
        if !self.is_enabled() {
            return Err(TriggerError::NotEnabled.into());
        }
        Ok(())
    }

    /// Loads triggers from the store and schedules the refresh job.
    ///
    /// Does nothing when triggers are disabled.
    #[instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn start(&self) -> Result<(), Report<TriggerError>> {
        if !self.is_enabled() {
            info!("triggers disabled, not starting");
            return Ok(());
        }
        self.inner.executor.reopen();
        self.inner.stopped.store(false, Ordering::SeqCst);
        self.refresh().await?;

        let interval = self.inner.config.refresh_interval();
        let weak = Arc::downgrade(&self.inner);
        let job: RecurringJob = Arc::new(move || {
            let weak: Weak<EngineInner<H, E>> = Weak::clone(&weak);
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let engine = TriggerEngine { inner };
                if let Err(e) = engine.refresh_if_stale().await {
                    warn!(error = %e, "scheduled trigger refresh failed");
                }
            })
        });
        let handle = self
            .inner
            .scheduler
            .schedule_recurring(REFRESH_JOB, job, interval, interval);
        if let Some(previous) = self.inner.refresh_job.lock().replace(handle) {
            previous.cancel();
        }
        info!(triggers = self.inner.cache.len(), "trigger engine started");
        Ok(())
    }

    /// Cancels the refresh job, unsubscribes from the host and drains the
    /// async pool.
    ///
    /// Later changes still reach the store and the cache, but the host
    /// subscription stays released until the next `start`.
    #[instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn stop(&self) {
        let job = self.inner.refresh_job.lock().take();
        if let Some(job) = job {
            job.cancel();
        }
        {
            // Waits out an in-flight rebuild so it cannot subscribe again.
            let _rebuild = self.inner.rebuild.lock().await;
            self.inner.stopped.store(true, Ordering::SeqCst);
            self.inner.registration.release();
        }
        self.inner.executor.shutdown().await;
        info!("trigger engine stopped");
    }

    /// Rebuilds the cache from the store and reconciles the subscription.
    ///
    /// On failure the previous cache contents stay in place.
    #[instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn refresh(&self) -> Result<RegistrationChange, Report<TriggerError>> {
        let _rebuild = self.inner.rebuild.lock().await;
        // Read the marker first so a write racing the listing is seen as newer.
        let marker = self
            .inner
            .store
            .last_update()
            .await
            .context(TriggerError::Store {
                operation: "read marker",
            })?;
        let defs = self
            .inner
            .store
            .load_all()
            .await
            .context(TriggerError::Store { operation: "list" })?;

        debug!(triggers = defs.len(), "rebuilding trigger cache");
        self.inner.cache.replace(defs, marker);
        Ok(self.reconcile())
    }

    /// Rebuilds the cache only if the store changed since the last rebuild.
    /// Returns whether a rebuild happened.
    #[instrument(skip(self), fields(scope = %self.scope()))]
    pub async fn refresh_if_stale(&self) -> Result<bool, Report<TriggerError>> {
        let marker = self
            .inner
            .store
            .last_update()
            .await
            .context(TriggerError::Store {
                operation: "read marker",
            })?;
        if !self.inner.cache.is_stale(marker) {
            return Ok(false);
        }
        debug!("trigger definitions changed elsewhere, refreshing");
        self.refresh().await?;
        Ok(true)
    }

    fn reconcile(&self) -> RegistrationChange {
        let wanted =
            !self.inner.stopped.load(Ordering::SeqCst) && !self.inner.cache.is_empty();
        self.inner.registration.reconcile(wanted)
    }

    /// Adds or replaces a trigger and returns the one it replaced.
    #[instrument(skip(self, statement, selector, params))]
    pub async fn add(
        &self,
        name: &str,
        statement: &str,
        selector: Option<Selector>,
        params: Params,
    ) -> Result<Option<TriggerDefinition>, Report<TriggerError>> {
        self.check_enabled()?;
        if name.trim().is_empty() {
            return Err(TriggerError::InvalidDefinition {
                name: name.to_string(),
                reason: "name must not be empty".to_string(),
            }
            .into());
        }
        self.inner
            .statements
            .validate(statement)
            .map_err(|e| TriggerError::InvalidStatement {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let def = TriggerDefinition {
            name: name.to_string(),
            statement: statement.to_string(),
            selector,
            params,
            paused: false,
        };
        let previous = self
            .inner
            .store
            .save(&def)
            .await
            .context(TriggerError::Store { operation: "save" })?;
        info!(phase = %def.phase(), replaced = previous.is_some(), "trigger added");
        self.refresh().await?;
        Ok(previous)
    }

    /// Removes a trigger and returns it, or `None` if it did not exist.
    #[instrument(skip(self))]
    pub async fn remove(&self, name: &str) -> Result<Option<TriggerDefinition>, Report<TriggerError>> {
        self.check_enabled()?;
        let removed = self
            .inner
            .store
            .delete(name)
            .await
            .context(TriggerError::Store { operation: "delete" })?;
        info!(found = removed.is_some(), "trigger removed");
        self.refresh().await?;
        Ok(removed)
    }

    /// Pauses or resumes a trigger and returns its new state.
    #[instrument(skip(self))]
    pub async fn update_paused(
        &self,
        name: &str,
        paused: bool,
    ) -> Result<TriggerDefinition, Report<TriggerError>> {
        self.check_enabled()?;
        let updated = self
            .inner
            .store
            .set_paused(name, paused)
            .await
            .context(TriggerError::Store {
                operation: "update paused",
            })?;
        self.refresh().await?;
        updated.ok_or_else(|| {
            TriggerError::NotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    /// Removes every trigger and returns them.
    #[instrument(skip(self))]
    pub async fn remove_all(&self) -> Result<Vec<TriggerDefinition>, Report<TriggerError>> {
        self.check_enabled()?;
        let removed = self
            .inner
            .store
            .delete_all()
            .await
            .context(TriggerError::Store {
                operation: "delete all",
            })?;
        info!(count = removed.len(), "all triggers removed");
        self.refresh().await?;
        Ok(removed)
    }

    /// Returns a snapshot of the cached triggers.
    pub fn list(&self) -> Result<Arc<TriggerMap>, Report<TriggerError>> {
        self.check_enabled()?;
        Ok(self.inner.cache.list())
    }

    /// Returns a cached trigger by name.
    pub fn get(&self, name: &str) -> Result<Option<TriggerDefinition>, Report<TriggerError>> {
        self.check_enabled()?;
        Ok(self.inner.cache.get(name))
    }

    /// Returns whether any unpaused trigger fires in the phase.
    #[must_use]
    pub fn has_phase(&self, phase: Phase) -> bool {
        self.inner.cache.has_phase(phase)
    }

    /// Returns whether the engine is subscribed to the host's commit hooks.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.inner.registration.is_registered()
    }

    /// Returns the number of `afterAsync` units queued or running.
    #[must_use]
    pub fn pending_async(&self) -> usize {
        self.inner.executor.pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryMetadataStore;
    use serde_json::json;
    use std::time::Duration;
    use tripwire_graph::{MemoryGraph, Properties, ScriptedEngine};

    /// Captures scheduled jobs so tests can run them by hand.
    #[derive(Default)]
    struct ManualScheduler {
        jobs: Mutex<Vec<(RecurringJob, JobHandle)>>,
    }

    impl ManualScheduler {
        async fn tick(&self) {
            let jobs: Vec<_> = self
                .jobs
                .lock()
                .iter()
                .filter(|(_, h)| !h.is_cancelled())
                .map(|(j, _)| Arc::clone(j))
                .collect();
            for job in jobs {
                job().await;
            }
        }
    }

    impl JobScheduler for ManualScheduler {
        fn schedule_recurring(
            &self,
            _name: &str,
            job: RecurringJob,
            _initial_delay: Duration,
            _interval: Duration,
        ) -> JobHandle {
            let handle = JobHandle::new(tokio_util::sync::CancellationToken::new());
            self.jobs.lock().push((job, handle.clone()));
            handle
        }
    }

    type Engine = TriggerEngine<MemoryGraph, ScriptedEngine>;

    struct Fixture {
        graph: Arc<MemoryGraph>,
        store: InMemoryMetadataStore,
        scheduler: Arc<ManualScheduler>,
        engine: Engine,
    }

    fn scripts() -> Arc<ScriptedEngine> {
        Arc::new(
            ScriptedEngine::new()
                .with_script("noop", |_, _| Ok(Vec::new()))
                .with_script("tag", |_, tx| {
                    tx.set_metadata("tagged", json!(true));
                    Ok(Vec::new())
                })
                .with_script("mark", |params, tx| {
                    let mut created = params["createdNodes"].as_array().into_iter().flatten();
                    if created.any(|n| n["labels"] != json!(["Mark"])) {
                        tx.create_node(["Mark"], Properties::new());
                    }
                    Ok(Vec::new())
                }),
        )
    }

    fn fixture_with(config: TriggerConfig, store: InMemoryMetadataStore) -> Fixture {
        let graph = Arc::new(MemoryGraph::new("graph"));
        let scheduler = Arc::new(ManualScheduler::default());
        let engine = TriggerEngine::with_scheduler(
            config,
            Arc::clone(&graph),
            scripts(),
            Arc::new(store.clone()),
            scheduler.clone(),
        );
        Fixture {
            graph,
            store,
            scheduler,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(TriggerConfig::enabled(), InMemoryMetadataStore::new())
    }

    #[tokio::test]
    async fn disabled_engine_rejects_management_operations() {
        let f = fixture_with(TriggerConfig::default(), InMemoryMetadataStore::new());

        let err = f.engine.add("t", "noop", None, Params::new()).await.unwrap_err();
        assert!(err.to_string().contains("not been enabled"));
        assert!(f.engine.list().is_err());
        assert!(f.engine.remove("t").await.is_err());
        assert!(f.engine.remove_all().await.is_err());
        assert!(f.engine.update_paused("t", true).await.is_err());

        f.engine.start().await.expect("start");
        assert!(!f.engine.is_registered());
        assert!(f.scheduler.jobs.lock().is_empty());
    }

    #[tokio::test]
    async fn first_add_subscribes_once() {
        let f = fixture();
        f.engine.start().await.expect("start");
        assert_eq!(f.graph.subscribe_calls(), 0);

        f.engine.add("a", "noop", None, Params::new()).await.expect("add");
        f.engine.add("b", "noop", None, Params::new()).await.expect("add");

        assert_eq!(f.graph.subscribe_calls(), 1);
        assert!(f.graph.is_subscribed(LISTENER_KEY));
        assert!(f.engine.is_registered());
    }

    #[tokio::test]
    async fn removing_last_trigger_unsubscribes_once() {
        let f = fixture();
        f.engine.add("a", "noop", None, Params::new()).await.expect("add");
        f.engine.add("b", "noop", None, Params::new()).await.expect("add");

        f.engine.remove("a").await.expect("remove");
        assert_eq!(f.graph.unsubscribe_calls(), 0);
        f.engine.remove("b").await.expect("remove");

        assert_eq!(f.graph.unsubscribe_calls(), 1);
        assert!(!f.graph.is_subscribed(LISTENER_KEY));
    }

    #[tokio::test]
    async fn add_returns_previous_definition() {
        let f = fixture();
        assert!(f.engine.add("a", "noop", None, Params::new()).await.expect("add").is_none());

        let previous = f
            .engine
            .add("a", "tag", Some(Selector::phase(Phase::After)), Params::new())
            .await
            .expect("add")
            .expect("previous");

        assert_eq!(previous.statement, "noop");
        let current = f.engine.get("a").expect("get").expect("present");
        assert_eq!(current.statement, "tag");
        assert_eq!(current.phase(), Phase::After);
    }

    #[tokio::test]
    async fn add_validates_before_writing() {
        let f = fixture();

        let err = f
            .engine
            .add("a", "no such script", None, Params::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid statement for trigger 'a'"));

        let err = f.engine.add("  ", "noop", None, Params::new()).await.unwrap_err();
        assert!(err.to_string().contains("name must not be empty"));
        assert!(f.store.list_trigger_definitions("graph").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn paused_trigger_stays_listed_and_registered() {
        let f = fixture();
        f.engine.add("a", "noop", None, Params::new()).await.expect("add");

        let paused = f.engine.update_paused("a", true).await.expect("pause");

        assert!(paused.paused);
        assert_eq!(f.engine.list().expect("list").len(), 1);
        assert!(!f.engine.has_phase(Phase::Before));
        assert!(f.engine.is_registered());

        let resumed = f.engine.update_paused("a", false).await.expect("resume");
        assert!(!resumed.paused);
        assert!(f.engine.has_phase(Phase::Before));
    }

    #[tokio::test]
    async fn update_paused_unknown_is_not_found() {
        let f = fixture();
        let err = f.engine.update_paused("missing", true).await.unwrap_err();
        assert!(err.to_string().contains("trigger not found: missing"));
    }

    #[tokio::test]
    async fn remove_unknown_returns_none() {
        let f = fixture();
        assert!(f.engine.remove("missing").await.expect("remove").is_none());
    }

    #[tokio::test]
    async fn remove_all_clears_everything() {
        let f = fixture();
        f.engine.add("a", "noop", None, Params::new()).await.expect("add");
        f.engine.add("b", "noop", None, Params::new()).await.expect("add");

        let removed = f.engine.remove_all().await.expect("remove all");

        assert_eq!(removed.len(), 2);
        assert!(f.engine.list().expect("list").is_empty());
        assert!(!f.engine.is_registered());
        for phase in Phase::ALL {
            assert!(!f.engine.has_phase(phase));
        }
    }

    #[tokio::test]
    async fn refresh_failure_keeps_previous_cache() {
        let f = fixture();
        f.engine.add("a", "noop", None, Params::new()).await.expect("add");
        f.store.set_unavailable(true);

        let err = f.engine.refresh().await.unwrap_err();

        assert!(err.to_string().contains("trigger store read marker failed"));
        assert_eq!(f.engine.list().expect("list").len(), 1);
        assert!(f.engine.is_registered());
    }

    #[tokio::test]
    async fn scheduled_refresh_picks_up_changes_from_other_instances() {
        let shared = InMemoryMetadataStore::new();
        let a = fixture_with(TriggerConfig::enabled(), shared.clone());
        let b = fixture_with(TriggerConfig::enabled(), shared);
        a.engine.start().await.expect("start");
        b.engine.start().await.expect("start");

        a.engine.add("x", "noop", None, Params::new()).await.expect("add");
        assert!(b.engine.list().expect("list").is_empty());

        b.scheduler.tick().await;

        assert!(b.engine.list().expect("list").contains_key("x"));
        assert!(b.engine.is_registered());
    }

    #[tokio::test]
    async fn refresh_if_stale_skips_when_current() {
        let f = fixture();
        f.engine.add("a", "noop", None, Params::new()).await.expect("add");

        assert!(!f.engine.refresh_if_stale().await.expect("refresh"));
    }

    #[tokio::test]
    async fn stop_cancels_job_and_unsubscribes() {
        let f = fixture();
        f.engine.start().await.expect("start");
        f.engine.add("a", "noop", None, Params::new()).await.expect("add");

        f.engine.stop().await;

        assert!(!f.graph.is_subscribed(LISTENER_KEY));
        assert!(!f.engine.is_registered());
        let jobs = f.scheduler.jobs.lock();
        assert!(jobs.iter().all(|(_, h)| h.is_cancelled()));
    }

    async fn commit_node(graph: &MemoryGraph, label: &str) {
        let mut tx = graph.begin().await.expect("begin");
        tx.create_node([label], Properties::new());
        graph.commit(tx).await.expect("commit");
    }

    #[tokio::test]
    async fn restart_after_stop_runs_after_async_triggers() {
        let f = fixture();
        f.engine.start().await.expect("start");
        let selector = Selector::phase(Phase::AfterAsync);
        f.engine.add("mark", "mark", Some(selector), Params::new()).await.expect("add");
        f.engine.stop().await;

        f.engine.start().await.expect("restart");
        assert!(f.engine.is_registered());
        commit_node(&f.graph, "A").await;
        f.engine.stop().await;

        assert_eq!(f.graph.nodes_with_label("Mark").len(), 1);
    }

    #[tokio::test]
    async fn changes_after_stop_do_not_subscribe() {
        let f = fixture();
        f.engine.start().await.expect("start");
        f.engine.stop().await;

        f.engine.add("a", "noop", None, Params::new()).await.expect("add");
        assert!(f.engine.refresh().await.is_ok());

        assert!(f.engine.list().expect("list").contains_key("a"));
        assert!(!f.engine.is_registered());
        assert!(!f.graph.is_subscribed(LISTENER_KEY));
        assert_eq!(f.graph.subscribe_calls(), 0);

        f.engine.start().await.expect("restart");
        assert!(f.graph.is_subscribed(LISTENER_KEY));
    }

    #[tokio::test]
    async fn start_loads_existing_definitions() {
        let store = InMemoryMetadataStore::new();
        let first = fixture_with(TriggerConfig::enabled(), store.clone());
        first.engine.add("a", "noop", None, Params::new()).await.expect("add");

        let second = fixture_with(TriggerConfig::enabled(), store);
        second.engine.start().await.expect("start");

        assert!(second.engine.list().expect("list").contains_key("a"));
        assert!(second.graph.is_subscribed(LISTENER_KEY));
    }

    #[tokio::test]
    async fn commits_without_triggers_skip_hooks() {
        let f = fixture();
        f.engine.start().await.expect("start");

        let mut tx = f.graph.begin().await.expect("begin");
        tx.create_node(["A"], Properties::new());
        f.graph.commit(tx).await.expect("commit");

        assert!(!f.graph.is_subscribed(LISTENER_KEY));
    }
}
