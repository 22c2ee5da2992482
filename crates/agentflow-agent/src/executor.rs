use agentflow_core::{AgentflowResult, Artifact, ModelTier, Priority, WorkerRole};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything an executor needs to run one task.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Task being executed.
    pub task_id: Uuid,
    /// Role whose system prompt and tier apply.
    pub role: WorkerRole,
    /// Run the task belongs to.
    pub run_id: Uuid,
    /// The serialized, windowed context document.
    pub context: String,
    /// Tier chosen by the dispatcher. `None` means the role's default.
    pub model_tier: Option<ModelTier>,
}

/// Follow-on work proposed by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpProposal {
    /// Role that should pick up the new task.
    pub role: WorkerRole,
    /// Priority as proposed, parsed leniently.
    pub priority: Priority,
    /// Short task title.
    pub title: String,
    /// Free-text requirement for the new task.
    pub description: String,
    /// Criteria carried into the new task's context document.
    pub acceptance_criteria: Vec<String>,
}

/// Outcome of one executor invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Worker-reported outcome; false for malformed replies.
    pub success: bool,
    /// One-paragraph summary handed to dependents.
    pub summary: String,
    /// Decisions dependents should respect.
    pub key_decisions: Vec<String>,
    /// Files or documents the worker produced.
    pub artifacts: Vec<Artifact>,
    /// Follow-on tasks the worker proposed.
    pub follow_ups: Vec<FollowUpProposal>,
    /// Non-fatal issues; logged, not stored.
    pub warnings: Vec<String>,
    /// Prompt tokens consumed.
    pub input_tokens: u64,
    /// Completion tokens produced.
    pub output_tokens: u64,
    /// Cost as reported by the executor itself, if it reports one. Logged
    /// next to the ledger cost; the ledger is always priced from the cost table.
    pub reported_cost_usd: f64,
    /// Model alias or name the call ran on.
    pub model: String,
    /// Wall-clock time of the call in milliseconds. Zero if unknown.
    pub duration_ms: u64,
    /// Unparsed worker response.
    pub raw_output: String,
}

impl ExecutionResult {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The external agent-invocation service.
///
/// Implementations may take unbounded time. They return
/// [`AgentflowError::Execution`](agentflow_core::AgentflowError::Execution) when
/// the underlying process cannot be run at all; malformed worker output is not
/// an error and yields `success == false` instead.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one task to completion and report what the worker produced.
    async fn execute(&self, request: ExecutionRequest) -> AgentflowResult<ExecutionResult>;
}
