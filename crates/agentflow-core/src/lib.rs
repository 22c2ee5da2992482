//! Core types and error definitions for agentflow.
//!
//! This crate provides the foundational types shared across all agentflow crates:
//! the unified error enum, the persisted domain model of a workflow run, and
//! the worker-role / model-tier vocabulary used for dispatch and cost accounting.
//!
//! # Main types
//!
//! - [`AgentflowError`] — Unified error enum for all agentflow subsystems.
//! - [`AgentflowResult`] — Convenience alias for `Result<T, AgentflowError>`.
//! - [`WorkflowRun`], [`Stage`], [`Task`] — The persisted entities of a run.
//! - [`TaskOutput`], [`TaskContext`], [`TokenUsageRecord`] — Write-once records.
//! - [`WorkerRole`] — Runtime-extensible worker role tag.
//! - [`ModelTier`], [`CostTable`] — Model pricing tiers.

/// Persisted domain model (runs, stages, tasks, outputs, ledger entries).
pub mod model;
/// Worker roles, model tiers and the token cost table.
pub mod role;

pub use model::{
    Artifact, DependencyKind, Priority, RunStatus, Stage, StageStatus, Task, TaskAttempt,
    TaskContext, TaskDependency, TaskOutput, TaskStatus, TokenUsageRecord, UsageTotals,
    WorkflowRun,
};
pub use role::{CostTable, ModelTier, TierCost, WorkerRole};

// --- Error types ---

/// Top-level error type for agentflow.
///
/// Each variant corresponds to one class of failure the orchestration core
/// distinguishes when deciding whether to mutate state or report to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AgentflowError {
    /// Template errors: unknown workflow type, invalid lifecycle transition.
    #[error("Workflow error: {0}")]
    Workflow(String),

    /// A run, stage or task could not be found in the store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The task executor could not be invoked or returned unusable output.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Token usage reached a configured ceiling.
    #[error("Budget error: {0}")]
    Budget(String),

    /// The persisted store rejected or failed an operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`AgentflowError`].
pub type AgentflowResult<T> = Result<T, AgentflowError>;
