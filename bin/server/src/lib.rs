//! Standalone host for the tripwire trigger engine.
//!
//! Wires configuration, the metadata store and a demo in-memory graph
//! around a `TriggerEngine`.

pub mod config;
pub mod db;
pub mod demo;
pub mod error;
