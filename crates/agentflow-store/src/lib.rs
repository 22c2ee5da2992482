//! Persistence for agentflow.
//!
//! The store is the single source of truth for run, stage and task status.
//! Every mutation is one atomic write keyed by entity identity; callers re-read
//! after suspension points instead of trusting in-memory copies.

/// SQLite DDL.
pub mod schema;
/// [`SqliteStore`], the SQLite implementation.
pub mod sqlite;
/// The [`WorkflowStore`] trait.
pub mod store;

pub use sqlite::SqliteStore;
pub use store::WorkflowStore;
