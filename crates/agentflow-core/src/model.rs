use crate::role::WorkerRole;
use crate::AgentflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of a [`WorkflowRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created, not yet executed.
    Pending,
    /// A driver is executing stages.
    Running,
    /// Dispatch stopped by the user; resumable.
    Paused,
    /// Every stage completed.
    Completed,
    /// A stage failed; resumable.
    Failed,
    /// Stopped for good.
    Cancelled,
}

impl RunStatus {
    /// Stable string form used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    /// Only paused and failed runs may be resumed.
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Failed)
    }

    /// Whether the driver must stop dispatching work for a run in this status.
    pub fn halts_dispatch(&self) -> bool {
        matches!(self, RunStatus::Paused | RunStatus::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(AgentflowError::Storage(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

/// Status of a [`Stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Not started, or returned here after an interruption.
    Pending,
    /// Tasks are being dispatched.
    Running,
    /// Every task in the stage completed.
    Completed,
    /// At least one task failed or could not run.
    Failed,
    /// Skipped by the driver.
    Skipped,
}

impl StageStatus {
    /// Stable string form used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            "skipped" => Ok(StageStatus::Skipped),
            other => Err(AgentflowError::Storage(format!(
                "unknown stage status '{other}'"
            ))),
        }
    }
}

/// Status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for its dependencies or a dispatch slot.
    Pending,
    /// Picked for dispatch.
    Assigned,
    /// The executor call is in flight.
    Running,
    /// Finished with a successful output.
    Completed,
    /// The executor failed or reported failure.
    Failed,
    /// Never considered by the resolver until reset to pending.
    Blocked,
}

impl TaskStatus {
    /// Stable string form used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "assigned" => Ok(TaskStatus::Assigned),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(AgentflowError::Storage(format!(
                "unknown task status '{other}'"
            ))),
        }
    }
}

/// Task priority as declared by the creator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Nice to have.
    Low,
    /// Default for follow-ups and later stages.
    #[default]
    Medium,
    /// Seeded first-stage work and urgent proposals.
    High,
}

impl Priority {
    /// Stable string form used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    /// Lenient parse for priorities proposed by workers; unknown values map to medium.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Priority::Low,
            "high" | "critical" => Priority::High,
            _ => Priority::Medium,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One end-to-end execution of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Run identity.
    pub id: Uuid,
    /// Template tag, e.g. `full_project`.
    pub workflow_type: String,
    /// What the run should achieve; becomes the seeded tasks' requirement.
    pub description: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Materialized sum over the token ledger.
    pub total_tokens: u64,
    /// Materialized sum over the token ledger.
    pub estimated_cost_usd: f64,
    /// Why the run last failed, if it did.
    pub error_message: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First transition to running.
    pub started_at: Option<DateTime<Utc>>,
    /// Last terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// A pending run with a fresh id.
    pub fn new(workflow_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_type: workflow_type.into(),
            description: description.into(),
            status: RunStatus::Pending,
            total_tokens: 0,
            estimated_cost_usd: 0.0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// An ordered phase of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    /// Stage identity.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Template stage name, e.g. `implementation`.
    pub name: String,
    /// Execution sequence, unique per run.
    pub order: u32,
    /// Dispatch runnable tasks concurrently instead of one at a time.
    pub parallel: bool,
    /// Roles the template assigns to this stage; used for seeding and follow-on placement.
    pub roles: Vec<WorkerRole>,
    /// Current status.
    pub status: StageStatus,
    /// Last transition to running.
    pub started_at: Option<DateTime<Utc>>,
    /// Last terminal transition.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Stage {
    /// A pending stage with a fresh id.
    pub fn new(
        run_id: Uuid,
        name: impl Into<String>,
        order: u32,
        parallel: bool,
        roles: Vec<WorkerRole>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            name: name.into(),
            order,
            parallel,
            roles,
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One unit of delegated work assigned to a worker role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identity.
    pub id: Uuid,
    /// Owning run.
    pub run_id: Uuid,
    /// Stage the task is dispatched in.
    pub stage_id: Option<Uuid>,
    /// Short title shown to the worker and in listings.
    pub title: String,
    /// Requirement text.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Declared priority.
    pub priority: Priority,
    /// Worker role the task is dispatched to.
    pub role: WorkerRole,
    /// `"user"`, `"engine"`, or the role that proposed this task.
    pub created_by: String,
    /// Task whose output proposed this one, if any.
    #[serde(default)]
    pub parent_task: Option<Uuid>,
    /// Depth in the follow-on hierarchy (0 = seeded task).
    #[serde(default)]
    pub depth: u32,
    /// Criteria the worker is asked to satisfy.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Tokens spent across all attempts.
    pub tokens_used: u64,
    /// Wall time of the last attempt.
    pub duration_ms: Option<u64>,
    /// Why the last attempt failed, if it did.
    pub error_message: Option<String>,
    /// Creation time; ties between runnable tasks break on it.
    pub created_at: DateTime<Utc>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A pending, user-created task with no stage.
    pub fn new(run_id: Uuid, title: impl Into<String>, role: WorkerRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            stage_id: None,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            role,
            created_by: "user".to_string(),
            parent_task: None,
            depth: 0,
            acceptance_criteria: Vec::new(),
            tokens_used: 0,
            duration_ms: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Place the task in a stage.
    pub fn in_stage(mut self, stage_id: Uuid) -> Self {
        self.stage_id = Some(stage_id);
        self
    }

    /// Set the requirement text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Record who created the task.
    pub fn created_by(mut self, creator: impl Into<String>) -> Self {
        self.created_by = creator.into();
        self
    }

    /// Set the acceptance criteria.
    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// Mark this task as a follow-on of `parent` one level deeper in the hierarchy.
    pub fn spawned_from(mut self, parent: &Task) -> Self {
        self.parent_task = Some(parent.id);
        self.depth = parent.depth + 1;
        self
    }
}

/// How a dependency edge came to exist. Both kinds must be Completed before the
/// dependent task may run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Edge created by stage seeding.
    #[default]
    Required,
    /// Edge from a follow-on task back to the task that proposed it.
    FollowUp,
}

impl DependencyKind {
    /// Stable string form used by the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Required => "required",
            DependencyKind::FollowUp => "follow_up",
        }
    }
}

impl FromStr for DependencyKind {
    type Err = AgentflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(DependencyKind::Required),
            "follow_up" => Ok(DependencyKind::FollowUp),
            other => Err(AgentflowError::Storage(format!(
                "unknown dependency kind '{other}'"
            ))),
        }
    }
}

/// Directed edge: `task_id` may not run before `depends_on` is Completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// The dependent task.
    pub task_id: Uuid,
    /// The task that must complete first.
    pub depends_on: Uuid,
    /// How the edge came to exist.
    pub kind: DependencyKind,
}

impl TaskDependency {
    /// A seeding edge.
    pub fn required(task_id: Uuid, depends_on: Uuid) -> Self {
        Self {
            task_id,
            depends_on,
            kind: DependencyKind::Required,
        }
    }

    /// An edge from a follow-on task to its proposer.
    pub fn follow_up(task_id: Uuid, depends_on: Uuid) -> Self {
        Self {
            task_id,
            depends_on,
            kind: DependencyKind::FollowUp,
        }
    }
}

/// The serialized input document handed to a task's executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskContext {
    /// Task the document was built for.
    pub task_id: Uuid,
    /// The `<task_input>` document.
    pub document: String,
    /// Characters / 4.
    pub estimated_tokens: u64,
    /// Build time.
    pub created_at: DateTime<Utc>,
}

/// An artifact descriptor reported by a worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Free-form kind, e.g. `code` or `document`.
    pub kind: String,
    /// File name or identifier.
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Inline content, if the worker supplied any.
    #[serde(default)]
    pub content: String,
}

impl Artifact {
    /// An artifact with no description or content.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A task's result. Written at most once per execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    /// Task the output belongs to.
    pub task_id: Uuid,
    /// Whether the worker reported success.
    pub success: bool,
    /// Worker summary; fed to dependents.
    pub summary: String,
    /// Decisions the worker called out.
    pub key_decisions: Vec<String>,
    /// Artifacts the worker reported.
    pub artifacts: Vec<Artifact>,
    /// Unparsed worker response.
    pub raw_output: String,
    /// Input plus output tokens of this attempt.
    pub tokens_used: u64,
    /// Model that served the call.
    pub model_used: String,
    /// Record time.
    pub created_at: DateTime<Utc>,
}

/// A failed attempt archived when its task is reset for another try.
///
/// Attempts are numbered from 1 per task and never change once archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAttempt {
    /// Task the attempt belongs to.
    pub task_id: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Status the task held when it was reset.
    pub status: TaskStatus,
    /// Error recorded on the task, if any.
    pub error_message: Option<String>,
    /// Context document of the attempt, if one was built.
    pub context_document: Option<String>,
    /// Worker summary, if an output was recorded.
    pub summary: Option<String>,
    /// Unparsed worker response, if an output was recorded.
    pub raw_output: Option<String>,
    /// When the attempt was archived.
    pub archived_at: DateTime<Utc>,
}

/// Append-only ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsageRecord {
    /// Run charged.
    pub run_id: Uuid,
    /// Task charged, if the call belonged to one.
    pub task_id: Option<Uuid>,
    /// Role that made the call.
    pub role: WorkerRole,
    /// Model string the cost was priced with.
    pub model: String,
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
    /// Cost computed from the cost table.
    pub cost_usd: f64,
    /// Append time.
    pub recorded_at: DateTime<Utc>,
}

/// Sum over a run's ledger entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Summed prompt tokens.
    pub input_tokens: u64,
    /// Summed completion tokens.
    pub output_tokens: u64,
    /// Summed cost.
    pub cost_usd: f64,
}

impl UsageTotals {
    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_roundtrip_strings() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Paused,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_run_status_resumable() {
        assert!(RunStatus::Paused.is_resumable());
        assert!(RunStatus::Failed.is_resumable());
        assert!(!RunStatus::Completed.is_resumable());
        assert!(!RunStatus::Running.is_resumable());
        assert!(!RunStatus::Cancelled.is_resumable());
    }

    #[test]
    fn test_task_creation_defaults() {
        let run_id = Uuid::new_v4();
        let task = Task::new(run_id, "Design API", WorkerRole::new("ARCH"));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.created_by, "user");
        assert_eq!(task.depth, 0);
        assert!(task.stage_id.is_none());
    }

    #[test]
    fn test_spawned_from_sets_parent_and_depth() {
        let run_id = Uuid::new_v4();
        let parent = Task::new(run_id, "Parent", WorkerRole::new("PM"));
        let child = Task::new(run_id, "Child", WorkerRole::new("ARCH")).spawned_from(&parent);
        assert_eq!(child.parent_task, Some(parent.id));
        assert_eq!(child.depth, 1);
    }

    #[test]
    fn test_priority_parse_lenient() {
        assert_eq!(Priority::parse_lenient("HIGH"), Priority::High);
        assert_eq!(Priority::parse_lenient(" low "), Priority::Low);
        assert_eq!(Priority::parse_lenient("urgent-ish"), Priority::Medium);
    }

    #[test]
    fn test_usage_totals() {
        let totals = UsageTotals {
            input_tokens: 1200,
            output_tokens: 300,
            cost_usd: 0.1,
        };
        assert_eq!(totals.total_tokens(), 1500);
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
        let parsed: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TaskStatus::Blocked);
    }
}
