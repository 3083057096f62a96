//! Database repositories for the tripwire server.
//!
//! This module provides data access for trigger definitions and the
//! per-database last-update marker.

pub mod trigger_store;

pub use trigger_store::PgMetadataStore;
