//! Task executor collaborator for agentflow.
//!
//! The orchestration core only sees the [`TaskExecutor`] trait. This crate
//! provides the production implementation, [`ClaudeCliExecutor`], which runs
//! the `claude` CLI headless and parses the worker's `<task_output>` reply,
//! plus the [`RoleRegistry`] that maps worker roles to model tiers and
//! system prompts.

/// The `claude` CLI executor.
pub mod claude_cli;
/// Executor settings.
pub mod config;
/// The [`TaskExecutor`] seam and its request/result types.
pub mod executor;
/// `<task_output>` reply parsing.
pub mod parser;
/// Worker role profiles and prompts.
pub mod roles;

pub use claude_cli::ClaudeCliExecutor;
pub use config::ExecutorConfig;
pub use executor::{ExecutionRequest, ExecutionResult, FollowUpProposal, TaskExecutor};
pub use parser::{parse_task_output, ParsedOutput};
pub use roles::{RoleProfile, RoleRegistry};
