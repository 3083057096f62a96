//! Core types shared by every tripwire crate: the rootcause `Result` alias
//! and the identifiers of graph entities and host transactions.

pub mod id;

pub use id::{NodeId, ParseIdError, RelationshipId, TransactionId};

/// Result carrying a rootcause report whose top-level context is `C`.
///
/// Host and trigger layers pick their own error enum for `C` and wrap
/// lower-level reports with `.context(..)`.
pub type Result<T, C = ()> = std::result::Result<T, rootcause::Report<C>>;
