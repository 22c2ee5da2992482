use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Lifecycle notifications emitted by the workflow engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The run moved to Running.
    WorkflowStarted {
        /// Run the event concerns.
        run_id: Uuid,
    },
    /// Every stage completed.
    WorkflowCompleted {
        /// Run the event concerns.
        run_id: Uuid,
    },
    /// The run failed.
    WorkflowFailed {
        /// Run the event concerns.
        run_id: Uuid,
        /// Why the run failed.
        error: String,
    },
    /// The run halted on a pause.
    WorkflowPaused {
        /// Run the event concerns.
        run_id: Uuid,
    },
    /// The run was cancelled.
    WorkflowCancelled {
        /// Run the event concerns.
        run_id: Uuid,
    },
    /// A stage began dispatching.
    StageStarted {
        /// Run the stage belongs to.
        run_id: Uuid,
        /// Stage row id.
        stage_id: Uuid,
        /// Template stage name.
        stage_name: String,
    },
    /// Every task of the stage completed.
    StageCompleted {
        /// Run the stage belongs to.
        run_id: Uuid,
        /// Stage row id.
        stage_id: Uuid,
        /// Template stage name.
        stage_name: String,
    },
    /// A stage ended with a failed task or an exhausted budget.
    StageFailed {
        /// Run the stage belongs to.
        run_id: Uuid,
        /// Stage row id.
        stage_id: Uuid,
        /// Template stage name.
        stage_name: String,
        /// First failure reported by the stage.
        error: String,
    },
    /// Emitted at most once per `execute` call.
    BudgetWarning {
        /// Run the event concerns.
        run_id: Uuid,
        /// Ledger total divided by the token ceiling.
        fraction_used: f64,
    },
}

impl WorkflowEvent {
    /// Snake-case tag, the same as the serialized `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
            WorkflowEvent::WorkflowPaused { .. } => "workflow_paused",
            WorkflowEvent::WorkflowCancelled { .. } => "workflow_cancelled",
            WorkflowEvent::StageStarted { .. } => "stage_started",
            WorkflowEvent::StageCompleted { .. } => "stage_completed",
            WorkflowEvent::StageFailed { .. } => "stage_failed",
            WorkflowEvent::BudgetWarning { .. } => "budget_warning",
        }
    }

    /// Run the event concerns.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { run_id }
            | WorkflowEvent::WorkflowCompleted { run_id }
            | WorkflowEvent::WorkflowFailed { run_id, .. }
            | WorkflowEvent::WorkflowPaused { run_id }
            | WorkflowEvent::WorkflowCancelled { run_id }
            | WorkflowEvent::StageStarted { run_id, .. }
            | WorkflowEvent::StageCompleted { run_id, .. }
            | WorkflowEvent::StageFailed { run_id, .. }
            | WorkflowEvent::BudgetWarning { run_id, .. } => *run_id,
        }
    }
}

/// Observer of workflow lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Called once per event, in emission order.
    async fn on_event(&self, event: &WorkflowEvent);
}

/// Writes every event to the `tracing` log.
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn on_event(&self, event: &WorkflowEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                tracing::info!(run_id = %event.run_id(), event = event.name(), %payload, "workflow event")
            }
            Err(_) => tracing::info!(run_id = %event.run_id(), event = event.name(), "workflow event"),
        }
    }
}

/// Fans events out to registered sinks, in registration order.
#[derive(Default)]
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    /// Bus with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink. It receives events emitted from now on.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Deliver to each sink in turn. A sink registered while an event is
    /// being delivered sees only later events.
    pub async fn emit(&self, event: WorkflowEvent) {
        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().clone();
        for sink in sinks {
            sink.on_event(&event).await;
        }
    }
}
