//! Trigger registration and execution engine for tripwire.
//!
//! Triggers are named statements that run when a host transaction reaches a
//! commit-lifecycle phase:
//!
//! - **before**: inside the committing transaction; a failure aborts the commit
//! - **after**: in a new transaction once the commit succeeded
//! - **rollback**: in a new transaction once the commit was aborted
//! - **afterAsync**: in a new transaction on a bounded background pool
//!
//! Definitions are persisted through a [`MetadataStore`] shared by every
//! engine instance serving the same database. Each instance keeps a
//! [`TriggerCache`] and polls the store's last-update marker to pick up
//! changes made elsewhere. The engine only subscribes to the host's commit
//! hooks while at least one trigger exists.

pub mod async_exec;
pub mod cache;
pub mod config;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod functions;
pub mod listener;
pub mod metadata;
pub mod procedures;
pub mod refresh;
pub mod registration;
pub mod store;

pub use async_exec::AsyncExecutor;
pub use cache::TriggerCache;
pub use config::TriggerConfig;
pub use definition::{Phase, Selector, TriggerDefinition};
pub use dispatch::{DispatchSummary, PhaseDispatcher};
pub use engine::{LISTENER_KEY, TriggerEngine};
pub use error::{DispatchError, StoreError, TriggerError};
pub use functions::{nodes_by_label, properties_by_key};
pub use listener::TriggerListener;
pub use metadata::{ChangeSnapshot, TriggerMetadata};
pub use procedures::{TriggerInfo, TriggerProcedures};
pub use refresh::{JobHandle, JobScheduler, RecurringJob, TokioScheduler};
pub use registration::{HookSubscription, HostSubscription, KernelRegistration, RegistrationChange};
pub use store::{InMemoryMetadataStore, MetadataStore, StoredTrigger, TriggerStore};
