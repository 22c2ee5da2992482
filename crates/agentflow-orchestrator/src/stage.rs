use crate::budget::BudgetTracker;
use crate::config::OrchestratorConfig;
use crate::context::{ContextBuilder, ContextSpec};
use crate::followup::FollowUpPlanner;
use crate::model_selector::{estimate_complexity, select_tier};
use crate::resolver::DependencyResolver;
use crate::windowing::{ContextWindower, DependencySummary};
use agentflow_agent::{ExecutionRequest, FollowUpProposal, RoleRegistry, TaskExecutor};
use agentflow_core::{
    AgentflowResult, Artifact, ModelTier, Stage, Task, TaskDependency, TaskOutput, TaskStatus,
    WorkflowRun,
};
use agentflow_store::WorkflowStore;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why dispatch stopped before a stage ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    /// The run was paused.
    Paused,
    /// The run was cancelled.
    Cancelled,
    /// The ledger reached the token ceiling.
    BudgetExceeded {
        /// Ledger total when dispatch was refused.
        used: u64,
        /// Configured token ceiling.
        ceiling: u64,
    },
}

/// Answer of a [`DispatchGate`] for one prospective dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Dispatch may go ahead.
    Proceed {
        /// Unused fraction of the run's token ceiling (1.0 when unlimited).
        budget_remaining: f64,
    },
    /// Do not dispatch; the stage stops here.
    Halt(HaltReason),
}

/// Consulted before every task dispatch.
#[async_trait]
pub trait DispatchGate: Send + Sync {
    /// Decide whether the next task of `run_id` may be dispatched.
    async fn check(&self, run_id: Uuid) -> AgentflowResult<GateDecision>;
}

/// Reduction of a stage's task outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Every task completed.
    Completed,
    /// A task failed, or the budget ran out. Carries the first error.
    Failed(String),
    /// Paused or cancelled mid-stage; the stage can be picked up again.
    Interrupted(HaltReason),
}

enum TaskRun {
    Completed,
    Failed(String),
    Halted(HaltReason),
}

/// Runs the tasks of one stage against the external executor.
pub struct StageExecutor {
    store: Arc<dyn WorkflowStore>,
    executor: Arc<dyn TaskExecutor>,
    roles: Arc<RoleRegistry>,
    budget: Arc<BudgetTracker>,
    resolver: DependencyResolver,
    builder: ContextBuilder,
    planner: FollowUpPlanner,
    config: OrchestratorConfig,
}

impl StageExecutor {
    /// Stage executor sharing `budget` with the engine.
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        executor: Arc<dyn TaskExecutor>,
        roles: Arc<RoleRegistry>,
        budget: Arc<BudgetTracker>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            resolver: DependencyResolver::new(store.clone()),
            builder: ContextBuilder::new(ContextWindower::new(config.windowing)),
            planner: FollowUpPlanner::new(config.max_follow_ups_per_task, config.max_task_depth),
            store,
            executor,
            roles,
            budget,
            config,
        }
    }

    /// Execute every runnable task of `stage`.
    ///
    /// Sequential stages run one task at a time in creation order and stop at
    /// the first failure. Parallel stages dispatch each batch of runnable
    /// tasks with at most `max_concurrent_tasks` in flight and let every
    /// dispatched task finish before reducing. Runnable tasks are re-queried
    /// after each round so follow-ups placed in this stage are picked up.
    /// `stages` is the run's full stage list, used to place follow-ups.
    pub async fn execute_stage(
        &self,
        run: &WorkflowRun,
        stage: &Stage,
        stages: &[Stage],
        gate: &dyn DispatchGate,
    ) -> AgentflowResult<StageOutcome> {
        info!(run_id = %run.id, stage = %stage.name, parallel = stage.parallel, "Executing stage");

        loop {
            let runnable = self.resolver.runnable_in_stage(run.id, stage.id).await?;
            if runnable.is_empty() {
                break;
            }

            let batch: Vec<Task> = if stage.parallel {
                runnable
            } else {
                runnable.into_iter().take(1).collect()
            };

            let results: Vec<AgentflowResult<TaskRun>> = stream::iter(batch)
                .map(|task| self.dispatch(run, stage, stages, task, gate))
                .buffer_unordered(self.config.max_concurrent_tasks.max(1))
                .collect()
                .await;

            let mut failures = Vec::new();
            let mut halt = None;
            for result in results {
                match result? {
                    TaskRun::Completed => {}
                    TaskRun::Failed(message) => failures.push(message),
                    TaskRun::Halted(reason) => halt = Some(reason),
                }
            }

            if let Some(reason) = halt {
                return Ok(halted(reason));
            }
            if !failures.is_empty() {
                return Ok(StageOutcome::Failed(failures.join("; ")));
            }
        }

        let tasks = self.store.get_stage_tasks(stage.id).await?;
        let incomplete = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .count();
        if incomplete > 0 {
            warn!(stage = %stage.name, incomplete, "stage has tasks that cannot run");
            return Ok(StageOutcome::Failed(format!(
                "{incomplete} task(s) could not run: unresolved dependencies or blocked"
            )));
        }
        Ok(StageOutcome::Completed)
    }

    async fn dispatch(
        &self,
        run: &WorkflowRun,
        stage: &Stage,
        stages: &[Stage],
        task: Task,
        gate: &dyn DispatchGate,
    ) -> AgentflowResult<TaskRun> {
        match gate.check(run.id).await? {
            GateDecision::Halt(reason) => {
                info!(task_id = %task.id, ?reason, "dispatch halted");
                Ok(TaskRun::Halted(reason))
            }
            GateDecision::Proceed { budget_remaining } => {
                self.run_task(run, stage, stages, task, budget_remaining).await
            }
        }
    }

    async fn run_task(
        &self,
        run: &WorkflowRun,
        stage: &Stage,
        stages: &[Stage],
        task: Task,
        budget_remaining: f64,
    ) -> AgentflowResult<TaskRun> {
        info!(task_id = %task.id, role = %task.role, title = %task.title, "Executing task");
        self.store
            .update_task_status(task.id, TaskStatus::Assigned, None)
            .await?;

        let (dependencies, artifacts) = self.gather_dependencies(task.id).await?;
        let context = self.builder.build(
            ContextSpec::for_task(&task)
                .with_dependencies(dependencies)
                .with_artifacts(artifacts),
        );
        self.store.save_context(&context).await?;

        let tier = self.select_tier(&task, budget_remaining);
        self.store
            .update_task_status(task.id, TaskStatus::Running, None)
            .await?;

        let start = Instant::now();
        let request = ExecutionRequest {
            task_id: task.id,
            role: task.role.clone(),
            run_id: run.id,
            context: context.document,
            model_tier: Some(tier),
        };

        let result = match self.executor.execute(request).await {
            Ok(result) => result,
            Err(e) => {
                let elapsed = start.elapsed().as_millis() as u64;
                error!(task_id = %task.id, role = %task.role, error = %e, "Task failed");
                self.store.record_task_execution(task.id, 0, elapsed).await?;
                let message = e.to_string();
                self.store
                    .update_task_status(task.id, TaskStatus::Failed, Some(&message))
                    .await?;
                return Ok(TaskRun::Failed(format!("task '{}' failed: {message}", task.title)));
            }
        };

        let duration_ms = if result.duration_ms > 0 {
            result.duration_ms
        } else {
            start.elapsed().as_millis() as u64
        };
        let model = if result.model.is_empty() {
            tier.alias().to_string()
        } else {
            result.model.clone()
        };

        let cost_usd = self
            .budget
            .record_usage(
                run.id,
                Some(task.id),
                &task.role,
                &model,
                result.input_tokens,
                result.output_tokens,
            )
            .await?;
        // the ledger is priced from the cost table; the executor's own figure is only logged
        debug!(
            task_id = %task.id,
            model = %model,
            cost_usd,
            reported_cost_usd = result.reported_cost_usd,
            "task cost"
        );
        self.store
            .record_task_execution(task.id, result.total_tokens(), duration_ms)
            .await?;
        self.store
            .save_output(&TaskOutput {
                task_id: task.id,
                success: result.success,
                summary: result.summary.clone(),
                key_decisions: result.key_decisions.clone(),
                artifacts: result.artifacts.clone(),
                raw_output: result.raw_output.clone(),
                tokens_used: result.total_tokens(),
                model_used: model,
                created_at: Utc::now(),
            })
            .await?;

        for warning in &result.warnings {
            warn!(task_id = %task.id, warning = %warning, "worker warning");
        }

        if result.success {
            self.store
                .update_task_status(task.id, TaskStatus::Completed, None)
                .await?;
            self.spawn_follow_ups(&task, stage, stages, &result.follow_ups)
                .await?;
            info!(task_id = %task.id, role = %task.role, tokens = result.total_tokens(), "Task completed");
            Ok(TaskRun::Completed)
        } else {
            let message = if result.summary.trim().is_empty() {
                "worker reported failure".to_string()
            } else {
                result.summary
            };
            error!(task_id = %task.id, role = %task.role, error = %message, "Task failed");
            self.store
                .update_task_status(task.id, TaskStatus::Failed, Some(&message))
                .await?;
            Ok(TaskRun::Failed(format!("task '{}' failed: {message}", task.title)))
        }
    }

    /// Summaries and artifacts of the task's completed dependencies, in edge order.
    async fn gather_dependencies(
        &self,
        task_id: Uuid,
    ) -> AgentflowResult<(Vec<DependencySummary>, Vec<Artifact>)> {
        let mut summaries = Vec::new();
        let mut artifacts = Vec::new();

        for edge in self.store.get_dependencies(task_id).await? {
            let Some(dep) = self.store.get_task(edge.depends_on).await? else {
                continue;
            };
            let Some(output) = self.store.get_output(dep.id).await? else {
                continue;
            };
            if !output.success {
                continue;
            }
            summaries.push(DependencySummary {
                task_id: dep.id,
                role: dep.role,
                summary: output.summary,
                key_decisions: output.key_decisions,
            });
            artifacts.extend(output.artifacts);
        }
        Ok((summaries, artifacts))
    }

    fn select_tier(&self, task: &Task, budget_remaining: f64) -> ModelTier {
        let default = self.roles.default_tier(&task.role);
        if !self.config.adaptive_models {
            return default;
        }
        let complexity = estimate_complexity(&task.title, &task.description);
        let tier = select_tier(default, complexity, budget_remaining);
        if tier != default {
            info!(
                task_id = %task.id,
                from = %default,
                to = %tier,
                ?complexity,
                budget_remaining,
                "model tier adjusted"
            );
        }
        tier
    }

    /// Persist follow-up tasks with an edge back to the completed parent.
    async fn spawn_follow_ups(
        &self,
        parent: &Task,
        stage: &Stage,
        stages: &[Stage],
        proposals: &[FollowUpProposal],
    ) -> AgentflowResult<()> {
        for task in self.planner.plan(parent, stage, stages, proposals) {
            self.store.create_task(&task).await?;
            self.store
                .add_dependency(&TaskDependency::follow_up(task.id, parent.id))
                .await?;
            info!(
                parent = %parent.id,
                task_id = %task.id,
                role = %task.role,
                "follow-up task created"
            );
        }
        Ok(())
    }
}

pub(crate) fn halted(reason: HaltReason) -> StageOutcome {
    match reason {
        HaltReason::BudgetExceeded { used, ceiling } => StageOutcome::Failed(format!(
            "token budget exhausted: {used} of {ceiling} tokens used"
        )),
        other => StageOutcome::Interrupted(other),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use agentflow_agent::ExecutionResult;
    use agentflow_core::{AgentflowError, CostTable, WorkerRole};
    use agentflow_store::SqliteStore;
    use parking_lot::Mutex;

    struct Scripted {
        fail_titles: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskExecutor for Scripted {
        async fn execute(&self, request: ExecutionRequest) -> AgentflowResult<ExecutionResult> {
            let title = request
                .context
                .split("<summary>")
                .nth(1)
                .and_then(|s| s.split("</summary>").next())
                .unwrap_or_default()
                .to_string();
            self.calls.lock().push(title.clone());
            if title == "boom" {
                return Err(AgentflowError::Execution("process exited".into()));
            }
            Ok(ExecutionResult {
                success: !self.fail_titles.contains(&title.as_str()),
                summary: format!("{title} done."),
                input_tokens: 10,
                output_tokens: 5,
                model: "sonnet".into(),
                ..Default::default()
            })
        }
    }

    struct Open;

    #[async_trait]
    impl DispatchGate for Open {
        async fn check(&self, _run_id: Uuid) -> AgentflowResult<GateDecision> {
            Ok(GateDecision::Proceed {
                budget_remaining: 1.0,
            })
        }
    }

    struct Closed(HaltReason);

    #[async_trait]
    impl DispatchGate for Closed {
        async fn check(&self, _run_id: Uuid) -> AgentflowResult<GateDecision> {
            Ok(GateDecision::Halt(self.0.clone()))
        }
    }

    async fn setup(
        parallel: bool,
        titles: &[&str],
        fail_titles: Vec<&'static str>,
    ) -> (Arc<dyn WorkflowStore>, StageExecutor, Arc<Scripted>, WorkflowRun, Stage) {
        let store: Arc<dyn WorkflowStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let run = WorkflowRun::new("custom", "test run");
        store.create_run(&run).await.unwrap();
        let stage = Stage::new(run.id, "work", 0, parallel, vec!["QE".into()]);
        store.create_stage(&stage).await.unwrap();
        for title in titles {
            let task = Task::new(run.id, *title, WorkerRole::new("QE")).in_stage(stage.id);
            store.create_task(&task).await.unwrap();
        }

        let executor = Arc::new(Scripted {
            fail_titles,
            calls: Mutex::new(Vec::new()),
        });
        let budget = Arc::new(BudgetTracker::new(store.clone(), CostTable::default(), 0.8));
        let stage_executor = StageExecutor::new(
            store.clone(),
            executor.clone(),
            Arc::new(RoleRegistry::builtin()),
            budget,
            OrchestratorConfig::default(),
        );
        (store, stage_executor, executor, run, stage)
    }

    async fn statuses(store: &Arc<dyn WorkflowStore>, stage: &Stage) -> Vec<TaskStatus> {
        store
            .get_stage_tasks(stage.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.status)
            .collect()
    }

    #[tokio::test]
    async fn test_sequential_stops_at_first_failure() {
        let (store, exec, mock, run, stage) = setup(false, &["a", "b", "c"], vec!["b"]).await;
        let outcome = exec
            .execute_stage(&run, &stage, std::slice::from_ref(&stage), &Open)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Failed(ref m) if m.contains("'b'")));
        assert_eq!(*mock.calls.lock(), vec!["a", "b"]);
        assert_eq!(
            statuses(&store, &stage).await,
            vec![TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Pending]
        );
    }

    #[tokio::test]
    async fn test_parallel_failure_lets_siblings_finish() {
        let (store, exec, mock, run, stage) = setup(true, &["a", "b", "c"], vec!["a"]).await;
        let outcome = exec
            .execute_stage(&run, &stage, std::slice::from_ref(&stage), &Open)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Failed(_)));
        assert_eq!(mock.calls.lock().len(), 3);
        assert_eq!(
            statuses(&store, &stage).await,
            vec![TaskStatus::Failed, TaskStatus::Completed, TaskStatus::Completed]
        );
    }

    #[tokio::test]
    async fn test_executor_error_is_task_failure() {
        let (store, exec, _mock, run, stage) = setup(false, &["boom"], vec![]).await;
        let outcome = exec
            .execute_stage(&run, &stage, std::slice::from_ref(&stage), &Open)
            .await
            .unwrap();

        assert!(matches!(outcome, StageOutcome::Failed(ref m) if m.contains("process exited")));
        let task = &store.get_stage_tasks(stage.id).await.unwrap()[0];
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error_message.as_deref().unwrap().contains("process exited"));
        assert!(store.get_output(task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_records_output_context_and_usage() {
        let (store, exec, _mock, run, stage) = setup(false, &["a"], vec![]).await;
        let outcome = exec
            .execute_stage(&run, &stage, std::slice::from_ref(&stage), &Open)
            .await
            .unwrap();
        assert_eq!(outcome, StageOutcome::Completed);

        let task = &store.get_stage_tasks(stage.id).await.unwrap()[0];
        assert_eq!(task.tokens_used, 15);
        let output = store.get_output(task.id).await.unwrap().unwrap();
        assert!(output.success);
        assert_eq!(output.summary, "a done.");
        assert!(store.get_context(task.id).await.unwrap().is_some());
        assert_eq!(store.usage_totals(run.id).await.unwrap().total_tokens(), 15);
    }

    #[tokio::test]
    async fn test_closed_gate_dispatches_nothing() {
        let (store, exec, mock, run, stage) = setup(true, &["a", "b"], vec![]).await;
        let outcome = exec
            .execute_stage(&run, &stage, std::slice::from_ref(&stage), &Closed(HaltReason::Paused))
            .await
            .unwrap();
        assert_eq!(outcome, StageOutcome::Interrupted(HaltReason::Paused));
        assert!(mock.calls.lock().is_empty());
        assert_eq!(
            statuses(&store, &stage).await,
            vec![TaskStatus::Pending, TaskStatus::Pending]
        );

        let outcome = exec
            .execute_stage(
                &run,
                &stage,
                std::slice::from_ref(&stage),
                &Closed(HaltReason::BudgetExceeded {
                    used: 10,
                    ceiling: 10,
                }),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, StageOutcome::Failed(ref m) if m.contains("budget")));
    }

    #[tokio::test]
    async fn test_blocked_task_fails_stage() {
        let (store, exec, _mock, run, stage) = setup(false, &["a", "b"], vec![]).await;
        let b = store.get_stage_tasks(stage.id).await.unwrap()[1].id;
        store
            .update_task_status(b, TaskStatus::Blocked, None)
            .await
            .unwrap();

        let outcome = exec
            .execute_stage(&run, &stage, std::slice::from_ref(&stage), &Open)
            .await
            .unwrap();
        assert!(matches!(outcome, StageOutcome::Failed(ref m) if m.contains("1 task(s)")));
    }
}
