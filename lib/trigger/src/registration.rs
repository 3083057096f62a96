//! Kernel registration reconciler.
//!
//! Subscribing to host commit hooks costs every transaction something even
//! when no trigger matches, so the engine stays subscribed only while the
//! cache holds at least one trigger.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tripwire_graph::{CommitHookPort, GraphHost};

/// Side effects of subscribing to and unsubscribing from commit hooks.
pub trait HookSubscription: Send + Sync {
    /// Registers the listener with the host.
    fn subscribe(&self);

    /// Removes the listener from the host.
    fn unsubscribe(&self);
}

/// Subscribes a listener to a `GraphHost` under a fixed key.
pub struct HostSubscription<H: GraphHost> {
    host: Arc<H>,
    key: String,
    listener: Arc<dyn CommitHookPort<H::Tx>>,
}

impl<H: GraphHost> HostSubscription<H> {
    /// Creates a subscription for the listener.
    pub fn new(
        host: Arc<H>,
        key: impl Into<String>,
        listener: Arc<dyn CommitHookPort<H::Tx>>,
    ) -> Self {
        Self {
            host,
            key: key.into(),
            listener,
        }
    }
}

impl<H: GraphHost> HookSubscription for HostSubscription<H> {
    fn subscribe(&self) {
        self.host.subscribe(&self.key, Arc::clone(&self.listener));
    }

    fn unsubscribe(&self) {
        self.host.unsubscribe(&self.key);
    }
}

/// What a reconciliation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationChange {
    Subscribed,
    Unsubscribed,
    Unchanged,
}

/// Keeps the commit-hook subscription in line with whether triggers exist.
pub struct KernelRegistration {
    registered: AtomicBool,
    guard: Mutex<()>,
    subscription: Box<dyn HookSubscription>,
}

impl KernelRegistration {
    /// Creates an unregistered reconciler.
    #[must_use]
    pub fn new(subscription: Box<dyn HookSubscription>) -> Self {
        Self {
            registered: AtomicBool::new(false),
            guard: Mutex::new(()),
            subscription,
        }
    }

    /// Subscribes when triggers exist and we are not subscribed, unsubscribes
    /// when none exist and we are. Otherwise does nothing.
    pub fn reconcile(&self, has_triggers: bool) -> RegistrationChange {
        let _guard = self.guard.lock();
        if has_triggers {
            if self
                .registered
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.subscription.subscribe();
                info!("subscribed to commit hooks");
                return RegistrationChange::Subscribed;
            }
        } else if self
            .registered
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.subscription.unsubscribe();
            info!("unsubscribed from commit hooks");
            return RegistrationChange::Unsubscribed;
        }
        RegistrationChange::Unchanged
    }

    /// Unsubscribes if subscribed.
    pub fn release(&self) -> RegistrationChange {
        self.reconcile(false)
    }

    /// Returns whether the listener is currently subscribed.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }
}
