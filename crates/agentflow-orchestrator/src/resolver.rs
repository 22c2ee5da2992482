use agentflow_core::{AgentflowResult, Task, TaskDependency, TaskStatus};
use agentflow_store::WorkflowStore;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Computes which tasks of a run may run now.
///
/// Always reads fresh state from the store; nothing is cached between calls.
pub struct DependencyResolver {
    store: Arc<dyn WorkflowStore>,
}

impl DependencyResolver {
    /// Resolver reading from `store`.
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Pending tasks of the run whose dependencies are all Completed, in
    /// creation order.
    pub async fn runnable(&self, run_id: Uuid) -> AgentflowResult<Vec<Task>> {
        let tasks = self.store.get_run_tasks(run_id).await?;
        let edges = self.store.get_run_dependencies(run_id).await?;
        Ok(runnable_tasks(&tasks, &edges))
    }

    /// [`runnable`](Self::runnable) restricted to one stage.
    pub async fn runnable_in_stage(&self, run_id: Uuid, stage_id: Uuid) -> AgentflowResult<Vec<Task>> {
        let mut runnable = self.runnable(run_id).await?;
        runnable.retain(|t| t.stage_id == Some(stage_id));
        Ok(runnable)
    }
}

/// Pending tasks whose every dependency edge points at a Completed task.
///
/// `tasks` must be in creation order; the result preserves it. An edge to a
/// task not present in `tasks` is treated as unresolved. Blocked tasks are
/// never runnable.
pub fn runnable_tasks(tasks: &[Task], edges: &[TaskDependency]) -> Vec<Task> {
    let status: HashMap<Uuid, TaskStatus> = tasks.iter().map(|t| (t.id, t.status)).collect();

    let mut depends_on: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for edge in edges {
        depends_on.entry(edge.task_id).or_default().push(edge.depends_on);
    }

    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending)
        .filter(|t| {
            depends_on.get(&t.id).map_or(true, |deps| {
                deps.iter()
                    .all(|dep| status.get(dep) == Some(&TaskStatus::Completed))
            })
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::WorkerRole;

    fn task(run_id: Uuid, title: &str, status: TaskStatus) -> Task {
        let mut t = Task::new(run_id, title, WorkerRole::new("DEV_PYTHON"));
        t.status = status;
        t
    }

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    #[test]
    fn test_no_dependencies_is_runnable() {
        let run = Uuid::new_v4();
        let tasks = vec![
            task(run, "a", TaskStatus::Pending),
            task(run, "b", TaskStatus::Pending),
        ];
        assert_eq!(titles(&runnable_tasks(&tasks, &[])), vec!["a", "b"]);
    }

    #[test]
    fn test_unfinished_dependency_excludes() {
        let run = Uuid::new_v4();
        let a = task(run, "a", TaskStatus::Running);
        let b = task(run, "b", TaskStatus::Pending);
        let edges = vec![TaskDependency::required(b.id, a.id)];
        assert!(runnable_tasks(&[a, b], &edges).is_empty());
    }

    #[test]
    fn test_all_dependencies_must_complete() {
        let run = Uuid::new_v4();
        let a = task(run, "a", TaskStatus::Completed);
        let b = task(run, "b", TaskStatus::Failed);
        let c = task(run, "c", TaskStatus::Pending);
        let d = task(run, "d", TaskStatus::Pending);
        let edges = vec![
            TaskDependency::required(c.id, a.id),
            TaskDependency::required(c.id, b.id),
            TaskDependency::follow_up(d.id, a.id),
        ];
        let runnable = runnable_tasks(&[a, b, c, d], &edges);
        assert_eq!(titles(&runnable), vec!["d"]);
    }

    #[test]
    fn test_only_pending_considered() {
        let run = Uuid::new_v4();
        let tasks = vec![
            task(run, "blocked", TaskStatus::Blocked),
            task(run, "done", TaskStatus::Completed),
            task(run, "failed", TaskStatus::Failed),
            task(run, "ready", TaskStatus::Pending),
        ];
        assert_eq!(titles(&runnable_tasks(&tasks, &[])), vec!["ready"]);
    }

    #[test]
    fn test_dangling_edge_is_unresolved() {
        let run = Uuid::new_v4();
        let t = task(run, "t", TaskStatus::Pending);
        let edges = vec![TaskDependency::required(t.id, Uuid::new_v4())];
        assert!(runnable_tasks(&[t], &edges).is_empty());
    }
}
