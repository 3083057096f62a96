//! Background execution of the `afterAsync` phase.
//!
//! Each unit re-binds a change snapshot in a fresh transaction, runs the
//! phase and commits. The caller that produced the snapshot is never
//! blocked; submission only spawns the unit.

use crate::definition::Phase;
use crate::dispatch::{DispatchSummary, PhaseDispatcher};
use crate::error::DispatchError;
use crate::metadata::{ChangeSnapshot, TriggerMetadata};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use tripwire_graph::{GraphHost, StatementEngine};

/// Bounded pool running `afterAsync` units.
pub struct AsyncExecutor<H, E> {
    host: Arc<H>,
    dispatcher: Arc<PhaseDispatcher<E>>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl<H, E> AsyncExecutor<H, E>
where
    H: GraphHost,
    E: StatementEngine<H::Tx> + 'static,
{
    /// Creates a pool running at most `workers` units at once.
    pub fn new(host: Arc<H>, dispatcher: Arc<PhaseDispatcher<E>>, workers: usize) -> Self {
        Self {
            host,
            dispatcher,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Queues a unit. Returns false once the pool has been shut down.
    pub fn submit(&self, snapshot: ChangeSnapshot) -> bool {
        if self.tracker.is_closed() {
            warn!("async trigger pool is shut down, dropping afterAsync work");
            return false;
        }
        let host = Arc::clone(&self.host);
        let dispatcher = Arc::clone(&self.dispatcher);
        let permits = Arc::clone(&self.permits);

        self.tracker.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match run_after_async(host.as_ref(), &dispatcher, &snapshot).await {
                Ok(summary) => {
                    debug!(executed = summary.executed.len(), "afterAsync phase complete");
                }
                Err(e) => {
                    error!(phase = %Phase::AfterAsync, error = %e, "afterAsync phase failed");
                }
            }
        });
        true
    }

    /// Returns the number of units queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting units and waits for queued ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Accepts units again after a shutdown.
    pub fn reopen(&self) {
        self.tracker.reopen();
    }
}

async fn run_after_async<H, E>(
    host: &H,
    dispatcher: &PhaseDispatcher<E>,
    snapshot: &ChangeSnapshot,
) -> Result<DispatchSummary, DispatchError>
where
    H: GraphHost,
    E: StatementEngine<H::Tx>,
{
    let phase = Phase::AfterAsync;
    let mut tx = host
        .begin()
        .await
        .map_err(|e| DispatchError::Transaction {
            phase,
            reason: e.to_string(),
        })?;

    let data = match snapshot.rebind(&tx).await {
        Ok(data) => data,
        Err(e) => {
            discard(host, tx, phase).await;
            return Err(DispatchError::Transaction {
                phase,
                reason: e.to_string(),
            });
        }
    };
    let metadata = TriggerMetadata::from_data(&data);

    match dispatcher.dispatch(phase, &metadata, &mut tx).await {
        Ok(summary) => {
            host.commit(tx)
                .await
                .map_err(|e| DispatchError::Transaction {
                    phase,
                    reason: e.to_string(),
                })?;
            Ok(summary)
        }
        Err(e) => {
            discard(host, tx, phase).await;
            Err(e)
        }
    }
}

/// Rolls back a phase transaction, logging if that fails too.
pub(crate) async fn discard<H: GraphHost>(host: &H, tx: H::Tx, phase: Phase) {
    if let Err(e) = host.rollback(tx).await {
        warn!(phase = %phase, error = %e, "rollback of trigger transaction failed");
    }
}
