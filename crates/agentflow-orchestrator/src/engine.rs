use crate::budget::{budget_fraction, BudgetTracker};
use crate::config::OrchestratorConfig;
use crate::events::{EventBus, EventSink, WorkflowEvent};
use crate::stage::{halted, DispatchGate, GateDecision, HaltReason, StageExecutor, StageOutcome};
use crate::templates::TemplateCatalogue;
use agentflow_agent::{RoleRegistry, TaskExecutor};
use agentflow_core::{
    AgentflowError, AgentflowResult, CostTable, Priority, RunStatus, Stage, StageStatus, Task,
    TaskDependency, TaskStatus, UsageTotals, WorkerRole, WorkflowRun,
};
use agentflow_store::WorkflowStore;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Everything persisted about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// The run row.
    pub run: WorkflowRun,
    /// Stages in order.
    pub stages: Vec<Stage>,
    /// Every task of the run, in creation order.
    pub tasks: Vec<Task>,
    /// Ledger totals.
    pub usage: UsageTotals,
}

/// Drives workflow runs stage by stage.
///
/// The store is the single source of truth: every decision re-reads the
/// persisted state, so a run can be resumed by a fresh engine after a crash.
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    stages: StageExecutor,
    templates: TemplateCatalogue,
    budget: Arc<BudgetTracker>,
    config: OrchestratorConfig,
    events: EventBus,
}

impl WorkflowEngine {
    /// Build an engine over `store`. The budget tracker shares the store and
    /// prices usage from `costs`.
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn TaskExecutor>,
        roles: Arc<RoleRegistry>,
        templates: TemplateCatalogue,
        costs: CostTable,
        config: OrchestratorConfig,
    ) -> Self {
        let budget = Arc::new(BudgetTracker::new(
            store.clone(),
            costs,
            config.warning_threshold,
        ));
        let stages = StageExecutor::new(
            store.clone(),
            executor,
            roles,
            budget.clone(),
            config.clone(),
        );
        Self {
            store,
            stages,
            templates,
            budget,
            config,
            events: EventBus::new(),
        }
    }

    /// Register an observer for lifecycle events.
    pub fn on_event(&self, sink: Arc<dyn EventSink>) {
        self.events.subscribe(sink);
    }

    /// Templates this engine creates runs from.
    pub fn templates(&self) -> &TemplateCatalogue {
        &self.templates
    }

    /// Ledger accounting shared with the stage executor.
    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    /// Persist a new run with all of its stages and seed the first stage.
    pub async fn create_run(
        &self,
        workflow_type: &str,
        description: &str,
    ) -> AgentflowResult<WorkflowRun> {
        let template = self.templates.get(workflow_type).ok_or_else(|| {
            AgentflowError::Workflow(format!("Unknown workflow type: {workflow_type}"))
        })?;

        let run = WorkflowRun::new(workflow_type, description);
        self.store.create_run(&run).await?;

        let stages: Vec<Stage> = template
            .stages
            .iter()
            .enumerate()
            .map(|(i, t)| Stage::new(run.id, t.name.clone(), i as u32, t.parallel, t.roles.clone()))
            .collect();
        for stage in &stages {
            self.store.create_stage(stage).await?;
        }
        if let Some(first) = stages.first() {
            self.seed_stage(&run, first, &stages).await?;
        }

        info!(
            run_id = %run.id,
            workflow_type,
            stages = stages.len(),
            "Workflow run created"
        );
        Ok(run)
    }

    /// [`create_run`](Self::create_run) followed by [`execute`](Self::execute).
    pub async fn create_and_execute(
        &self,
        workflow_type: &str,
        description: &str,
    ) -> AgentflowResult<WorkflowRun> {
        let run = self.create_run(workflow_type, description).await?;
        self.execute(run.id).await
    }

    /// Run the remaining stages in order and return the refreshed run.
    ///
    /// Stage and task failures end with the run Failed and are not errors;
    /// an `Err` means the store or the gate itself failed.
    pub async fn execute(&self, run_id: Uuid) -> AgentflowResult<WorkflowRun> {
        let run = self.load_run(run_id).await?;
        if matches!(run.status, RunStatus::Completed | RunStatus::Cancelled) {
            return Err(AgentflowError::Workflow(format!(
                "Cannot execute workflow in status: {}",
                run.status
            )));
        }

        self.store
            .update_run_status(run_id, RunStatus::Running, None)
            .await?;
        info!(run_id = %run_id, workflow_type = %run.workflow_type, "Workflow started");
        self.events
            .emit(WorkflowEvent::WorkflowStarted { run_id })
            .await;

        if let Err(e) = self.drive(&run).await {
            error!(run_id = %run_id, error = %e, "Workflow aborted");
            let message = e.to_string();
            if let Err(store_err) = self
                .store
                .update_run_status(run_id, RunStatus::Failed, Some(&message))
                .await
            {
                error!(run_id = %run_id, error = %store_err, "could not record run failure");
            }
            self.events
                .emit(WorkflowEvent::WorkflowFailed {
                    run_id,
                    error: message,
                })
                .await;
            return Err(e);
        }

        self.load_run(run_id).await
    }

    async fn drive(&self, run: &WorkflowRun) -> AgentflowResult<()> {
        let run_id = run.id;
        let guard = RunGuard {
            store: self.store.as_ref(),
            budget: &self.budget,
            events: &self.events,
            config: &self.config,
            warned: AtomicBool::new(false),
        };
        let stages = self.store.get_stages(run_id).await?;

        for stage in &stages {
            if matches!(stage.status, StageStatus::Completed | StageStatus::Skipped) {
                continue;
            }

            let outcome = match guard.check(run_id).await? {
                GateDecision::Halt(reason) => halted(reason),
                GateDecision::Proceed { .. } => {
                    // follow-ups may already sit here; seed unless seeded tasks exist
                    let seeded = self
                        .store
                        .get_stage_tasks(stage.id)
                        .await?
                        .iter()
                        .any(|t| t.parent_task.is_none());
                    if !seeded {
                        self.seed_stage(run, stage, &stages).await?;
                    }
                    self.store
                        .update_stage_status(stage.id, StageStatus::Running)
                        .await?;
                    self.events
                        .emit(WorkflowEvent::StageStarted {
                            run_id,
                            stage_id: stage.id,
                            stage_name: stage.name.clone(),
                        })
                        .await;
                    self.stages
                        .execute_stage(run, stage, &stages, &guard)
                        .await?
                }
            };

            match outcome {
                StageOutcome::Completed => {
                    self.store
                        .update_stage_status(stage.id, StageStatus::Completed)
                        .await?;
                    info!(run_id = %run_id, stage = %stage.name, "Stage completed");
                    self.events
                        .emit(WorkflowEvent::StageCompleted {
                            run_id,
                            stage_id: stage.id,
                            stage_name: stage.name.clone(),
                        })
                        .await;
                }
                StageOutcome::Failed(message) => {
                    self.store
                        .update_stage_status(stage.id, StageStatus::Failed)
                        .await?;
                    error!(run_id = %run_id, stage = %stage.name, error = %message, "Stage failed");
                    self.events
                        .emit(WorkflowEvent::StageFailed {
                            run_id,
                            stage_id: stage.id,
                            stage_name: stage.name.clone(),
                            error: message.clone(),
                        })
                        .await;

                    if self.halted_externally(run_id).await? {
                        return Ok(());
                    }
                    let error = format!("Stage {} failed: {message}", stage.name);
                    self.store
                        .update_run_status(run_id, RunStatus::Failed, Some(&error))
                        .await?;
                    self.events
                        .emit(WorkflowEvent::WorkflowFailed { run_id, error })
                        .await;
                    return Ok(());
                }
                StageOutcome::Interrupted(reason) => {
                    self.store
                        .update_stage_status(stage.id, StageStatus::Pending)
                        .await?;
                    info!(run_id = %run_id, stage = %stage.name, ?reason, "Workflow interrupted");
                    return Ok(());
                }
            }
        }

        if self.halted_externally(run_id).await? {
            return Ok(());
        }
        self.store
            .update_run_status(run_id, RunStatus::Completed, None)
            .await?;
        info!(run_id = %run_id, "Workflow completed");
        self.events
            .emit(WorkflowEvent::WorkflowCompleted { run_id })
            .await;
        Ok(())
    }

    /// Whether a pause or cancel landed while the last stage was running.
    async fn halted_externally(&self, run_id: Uuid) -> AgentflowResult<bool> {
        Ok(self.load_run(run_id).await?.status.halts_dispatch())
    }

    /// One task per stage role. Tasks of later stages depend on every
    /// Completed task of the nearest earlier stage that has any.
    async fn seed_stage(
        &self,
        run: &WorkflowRun,
        stage: &Stage,
        stages: &[Stage],
    ) -> AgentflowResult<()> {
        let first = stages.iter().map(|s| s.order).min() == Some(stage.order);
        let upstream = if first {
            Vec::new()
        } else {
            self.upstream_completed(stage, stages).await?
        };

        for role in &stage.roles {
            let task = Task::new(run.id, seed_title(&stage.name, role, &run.description), role.clone())
                .in_stage(stage.id)
                .with_description(run.description.clone())
                .with_priority(if first { Priority::High } else { Priority::Medium })
                .created_by(if first { "user" } else { "engine" });
            self.store.create_task(&task).await?;
            for dep in &upstream {
                self.store
                    .add_dependency(&TaskDependency::required(task.id, *dep))
                    .await?;
            }
        }

        info!(
            run_id = %run.id,
            stage = %stage.name,
            tasks = stage.roles.len(),
            dependencies = upstream.len(),
            "Stage seeded"
        );
        Ok(())
    }

    async fn upstream_completed(&self, stage: &Stage, stages: &[Stage]) -> AgentflowResult<Vec<Uuid>> {
        let mut earlier: Vec<&Stage> = stages.iter().filter(|s| s.order < stage.order).collect();
        earlier.sort_by_key(|s| std::cmp::Reverse(s.order));

        for prev in earlier {
            let completed: Vec<Uuid> = self
                .store
                .get_stage_tasks(prev.id)
                .await?
                .into_iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .map(|t| t.id)
                .collect();
            if !completed.is_empty() {
                return Ok(completed);
            }
        }
        Ok(Vec::new())
    }

    /// Stop dispatching new tasks. In-flight tasks finish and are recorded.
    pub async fn pause(&self, run_id: Uuid) -> AgentflowResult<()> {
        let run = self.load_run(run_id).await?;
        if !matches!(run.status, RunStatus::Pending | RunStatus::Running) {
            return Err(AgentflowError::Workflow(format!(
                "Cannot pause workflow in status: {}",
                run.status
            )));
        }
        self.store
            .update_run_status(run_id, RunStatus::Paused, None)
            .await?;
        info!(run_id = %run_id, "Workflow paused");
        self.events
            .emit(WorkflowEvent::WorkflowPaused { run_id })
            .await;
        Ok(())
    }

    /// Reset failed and interrupted work, then execute again from the first
    /// unresolved point. Completed stages and tasks are not re-run.
    ///
    /// With budget enforcement on, a run still at its token ceiling is
    /// rejected with `Budget` before anything is reset.
    pub async fn resume(&self, run_id: Uuid) -> AgentflowResult<WorkflowRun> {
        let run = self.load_run(run_id).await?;
        if !run.status.is_resumable() {
            return Err(AgentflowError::Workflow(format!(
                "Cannot resume workflow in status: {}",
                run.status
            )));
        }
        if self.config.enforce_budget {
            self.budget
                .ensure_within(run_id, self.config.token_budget)
                .await?;
        }

        for stage in self.store.get_stages(run_id).await? {
            if matches!(stage.status, StageStatus::Failed | StageStatus::Running) {
                self.store
                    .update_stage_status(stage.id, StageStatus::Pending)
                    .await?;
            }
        }
        let mut reset = 0usize;
        for task in self.store.get_run_tasks(run_id).await? {
            if matches!(
                task.status,
                TaskStatus::Failed | TaskStatus::Assigned | TaskStatus::Running
            ) {
                self.store.reset_task(task.id).await?;
                reset += 1;
            }
        }

        info!(run_id = %run_id, from = %run.status, reset_tasks = reset, "Resuming workflow");
        self.execute(run_id).await
    }

    /// Terminal. In-flight tasks finish and are recorded; nothing new starts.
    pub async fn cancel(&self, run_id: Uuid) -> AgentflowResult<()> {
        let run = self.load_run(run_id).await?;
        if matches!(run.status, RunStatus::Completed | RunStatus::Cancelled) {
            return Err(AgentflowError::Workflow(format!(
                "Cannot cancel workflow in status: {}",
                run.status
            )));
        }
        self.store
            .update_run_status(run_id, RunStatus::Cancelled, None)
            .await?;
        warn!(run_id = %run_id, "Workflow cancelled");
        self.events
            .emit(WorkflowEvent::WorkflowCancelled { run_id })
            .await;
        Ok(())
    }

    /// Snapshot of the run, its stages, tasks and ledger totals.
    pub async fn report(&self, run_id: Uuid) -> AgentflowResult<RunReport> {
        Ok(RunReport {
            run: self.load_run(run_id).await?,
            stages: self.store.get_stages(run_id).await?,
            tasks: self.store.get_run_tasks(run_id).await?,
            usage: self.budget.usage(run_id).await?,
        })
    }

    /// Most recently created run, if any.
    pub async fn latest_run(&self) -> AgentflowResult<Option<WorkflowRun>> {
        Ok(self.store.list_runs(None, 1).await?.into_iter().next())
    }

    async fn load_run(&self, run_id: Uuid) -> AgentflowResult<WorkflowRun> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AgentflowError::NotFound(format!("workflow run {run_id}")))
    }
}

fn seed_title(stage: &str, role: &WorkerRole, description: &str) -> String {
    let short: String = description.chars().take(100).collect();
    format!("{stage} ({role}): {short}")
}

/// Dispatch gate for one `execute` call: honours pause/cancel and the token
/// ceiling, and raises the budget warning once.
struct RunGuard<'a> {
    store: &'a dyn WorkflowStore,
    budget: &'a BudgetTracker,
    events: &'a EventBus,
    config: &'a OrchestratorConfig,
    warned: AtomicBool,
}

#[async_trait]
impl DispatchGate for RunGuard<'_> {
    async fn check(&self, run_id: Uuid) -> AgentflowResult<GateDecision> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AgentflowError::NotFound(format!("workflow run {run_id}")))?;
        match run.status {
            RunStatus::Paused => return Ok(GateDecision::Halt(HaltReason::Paused)),
            RunStatus::Cancelled => return Ok(GateDecision::Halt(HaltReason::Cancelled)),
            _ => {}
        }

        let ceiling = self.config.token_budget;
        let used = self.budget.usage(run_id).await?.total_tokens();
        let (within, fraction) = budget_fraction(used, ceiling);

        if ceiling > 0
            && fraction >= self.budget.warning_threshold()
            && !self.warned.swap(true, Ordering::SeqCst)
        {
            warn!(run_id = %run_id, used, ceiling, fraction, "Token budget warning");
            self.events
                .emit(WorkflowEvent::BudgetWarning {
                    run_id,
                    fraction_used: fraction,
                })
                .await;
        }

        if self.config.enforce_budget && !within {
            warn!(run_id = %run_id, used, ceiling, "Token budget exhausted, dispatch halted");
            return Ok(GateDecision::Halt(HaltReason::BudgetExceeded { used, ceiling }));
        }

        let budget_remaining = if ceiling == 0 {
            1.0
        } else {
            (1.0 - fraction).max(0.0)
        };
        Ok(GateDecision::Proceed { budget_remaining })
    }
}
