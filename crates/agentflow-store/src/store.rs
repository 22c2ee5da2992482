use agentflow_core::{
    AgentflowResult, RunStatus, Stage, StageStatus, Task, TaskAttempt, TaskContext,
    TaskDependency, TaskOutput, TaskStatus, TokenUsageRecord, UsageTotals, WorkflowRun,
};
use async_trait::async_trait;
use uuid::Uuid;

/// Create/read/update operations over the persisted entities of a workflow run.
///
/// Each method is individually atomic. No method spans entities in a way that
/// requires a caller-visible transaction, except [`append_usage`](Self::append_usage)
/// which also refreshes the run's materialized totals in the same write.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // --- runs ---
    /// Insert a new run.
    async fn create_run(&self, run: &WorkflowRun) -> AgentflowResult<()>;
    /// Load one run.
    async fn get_run(&self, id: Uuid) -> AgentflowResult<Option<WorkflowRun>>;
    /// Runs newest first, optionally filtered by status.
    async fn list_runs(
        &self,
        status: Option<RunStatus>,
        limit: usize,
    ) -> AgentflowResult<Vec<WorkflowRun>>;
    /// Sets `started_at` on the first transition to running and `completed_at`
    /// on terminal transitions. Entering running clears any previous error.
    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> AgentflowResult<()>;
    /// Cascades to stages, tasks, edges, contexts, outputs and ledger entries.
    async fn delete_run(&self, id: Uuid) -> AgentflowResult<()>;

    // --- stages ---
    /// Insert a stage.
    async fn create_stage(&self, stage: &Stage) -> AgentflowResult<()>;
    /// A run's stages ordered by stage order.
    async fn get_stages(&self, run_id: Uuid) -> AgentflowResult<Vec<Stage>>;
    /// Set a stage's status and its start/completion timestamps.
    async fn update_stage_status(&self, id: Uuid, status: StageStatus) -> AgentflowResult<()>;

    // --- tasks ---
    /// Insert a task.
    async fn create_task(&self, task: &Task) -> AgentflowResult<()>;
    /// Load one task.
    async fn get_task(&self, id: Uuid) -> AgentflowResult<Option<Task>>;
    /// A run's tasks in creation order.
    async fn get_run_tasks(&self, run_id: Uuid) -> AgentflowResult<Vec<Task>>;
    /// A stage's tasks in creation order.
    async fn get_stage_tasks(&self, stage_id: Uuid) -> AgentflowResult<Vec<Task>>;
    /// Set a task's status. A `Some` error replaces the stored one.
    async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> AgentflowResult<()>;
    /// Add an attempt's tokens to the task and record its duration.
    async fn record_task_execution(
        &self,
        id: Uuid,
        tokens_used: u64,
        duration_ms: u64,
    ) -> AgentflowResult<()>;
    /// Return a task to pending for another attempt.
    ///
    /// The previous attempt's status, error, context and output are archived
    /// as a [`TaskAttempt`] before the live records are cleared, so each
    /// attempt still writes its own context and output once. Returns the
    /// archived attempt, or `None` if the task had not been tried yet.
    async fn reset_task(&self, id: Uuid) -> AgentflowResult<Option<TaskAttempt>>;
    /// Archived attempts of a task, oldest first.
    async fn list_attempts(&self, task_id: Uuid) -> AgentflowResult<Vec<TaskAttempt>>;

    // --- dependency edges ---
    /// Insert an edge; duplicates are ignored.
    async fn add_dependency(&self, dependency: &TaskDependency) -> AgentflowResult<()>;
    /// Edges leaving one task.
    async fn get_dependencies(&self, task_id: Uuid) -> AgentflowResult<Vec<TaskDependency>>;
    /// Every edge between tasks of a run.
    async fn get_run_dependencies(&self, run_id: Uuid) -> AgentflowResult<Vec<TaskDependency>>;

    // --- write-once task records ---
    /// Record a task's context document. Fails if one already exists.
    async fn save_context(&self, context: &TaskContext) -> AgentflowResult<()>;
    /// The current attempt's context document.
    async fn get_context(&self, task_id: Uuid) -> AgentflowResult<Option<TaskContext>>;
    /// Record a task's output. Fails if one already exists.
    async fn save_output(&self, output: &TaskOutput) -> AgentflowResult<()>;
    /// The current attempt's output.
    async fn get_output(&self, task_id: Uuid) -> AgentflowResult<Option<TaskOutput>>;

    // --- token ledger ---
    /// Append a ledger entry and refresh the run's materialized totals.
    async fn append_usage(&self, record: &TokenUsageRecord) -> AgentflowResult<()>;
    /// Sum over a run's ledger.
    async fn usage_totals(&self, run_id: Uuid) -> AgentflowResult<UsageTotals>;
    /// A run's ledger entries in append order.
    async fn list_usage(&self, run_id: Uuid) -> AgentflowResult<Vec<TokenUsageRecord>>;
}
