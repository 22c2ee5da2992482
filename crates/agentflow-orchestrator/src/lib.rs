//! Dependency-aware, budget-bounded workflow orchestration.
//!
//! Drives a workflow run through its ordered stages, dispatching each stage's
//! tasks to a [`TaskExecutor`](agentflow_agent::TaskExecutor) either one at a
//! time or as a bounded-concurrency group, bounding the context each task
//! receives and the tokens the whole run may spend.
//!
//! # Main types
//!
//! - [`WorkflowEngine`] — Run lifecycle: create, execute, pause, resume, cancel.
//! - [`StageExecutor`] — Executes one stage and reduces its task outcomes.
//! - [`DependencyResolver`] — Computes the runnable tasks of a run.
//! - [`ContextBuilder`] / [`ContextWindower`] — Bounded task input documents.
//! - [`BudgetTracker`] — Token ledger accounting.
//! - [`TemplateCatalogue`] — Workflow-type tag to stage list.
//! - [`EventBus`] / [`EventSink`] — Lifecycle notifications.

/// Token ledger accounting and budget queries.
pub mod budget;
/// Orchestrator configuration.
pub mod config;
/// Task input document assembly.
pub mod context;
/// Workflow and stage engine.
pub mod engine;
/// Lifecycle events and observers.
pub mod events;
/// Follow-up task placement and limits.
pub mod followup;
/// Complexity estimation and adaptive model tiers.
pub mod model_selector;
/// Runnable-task computation.
pub mod resolver;
/// Stage execution and the dispatch gate.
pub mod stage;
/// Built-in workflow templates.
pub mod templates;
/// Dependency context windowing.
pub mod windowing;

pub use budget::BudgetTracker;
pub use config::{OrchestratorConfig, WindowingConfig};
pub use context::{escape_xml, ContextBuilder, ContextSpec};
pub use engine::{RunReport, WorkflowEngine};
pub use events::{EventBus, EventSink, LoggingSink, WorkflowEvent};
pub use followup::FollowUpPlanner;
pub use model_selector::{estimate_complexity, select_tier, Complexity};
pub use resolver::{runnable_tasks, DependencyResolver};
pub use stage::{DispatchGate, GateDecision, HaltReason, StageExecutor, StageOutcome};
pub use templates::{StageTemplate, TemplateCatalogue, WorkflowTemplate};
pub use windowing::{estimate_tokens, truncate_to_summary, ContextWindower, DependencySummary};
