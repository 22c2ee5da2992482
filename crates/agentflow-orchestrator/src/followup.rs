use agentflow_agent::FollowUpProposal;
use agentflow_core::{Stage, Task};

/// Turns follow-up proposals from a completed task into new tasks,
/// enforcing depth and fan-out limits to prevent runaway recursion.
#[derive(Debug, Clone, Copy)]
pub struct FollowUpPlanner {
    /// Maximum number of follow-ups accepted from a single task.
    max_per_task: usize,
    /// Maximum allowed depth in the task hierarchy (seeded tasks are depth 0).
    max_depth: u32,
}

impl FollowUpPlanner {
    /// Planner accepting at most `max_per_task` proposals per task, up to `max_depth`.
    pub fn new(max_per_task: usize, max_depth: u32) -> Self {
        Self {
            max_per_task,
            max_depth,
        }
    }

    /// Build the follow-up tasks for `parent`, which ran in `current`.
    ///
    /// Each task is placed in the first later stage whose roles include the
    /// proposed role, else the next stage, else `current`. Proposals with an
    /// empty title are ignored. Returned tasks are not yet persisted.
    pub fn plan(
        &self,
        parent: &Task,
        current: &Stage,
        stages: &[Stage],
        proposals: &[FollowUpProposal],
    ) -> Vec<Task> {
        if proposals.is_empty() {
            return Vec::new();
        }
        if parent.depth + 1 > self.max_depth {
            tracing::warn!(
                task_id = %parent.id,
                depth = parent.depth,
                max_depth = self.max_depth,
                dropped = proposals.len(),
                "follow-up tasks dropped, maximum depth reached"
            );
            return Vec::new();
        }

        let valid: Vec<&FollowUpProposal> = proposals
            .iter()
            .filter(|p| !p.title.trim().is_empty())
            .collect();
        if valid.len() > self.max_per_task {
            tracing::warn!(
                task_id = %parent.id,
                proposed = valid.len(),
                max = self.max_per_task,
                "follow-up tasks truncated"
            );
        }

        valid
            .into_iter()
            .take(self.max_per_task)
            .map(|proposal| {
                let stage = target_stage(current, stages, proposal);
                Task::new(parent.run_id, proposal.title.trim(), proposal.role.clone())
                    .in_stage(stage.id)
                    .with_description(proposal.description.clone())
                    .with_priority(proposal.priority)
                    .with_acceptance_criteria(proposal.acceptance_criteria.clone())
                    .created_by(parent.role.as_str())
                    .spawned_from(parent)
            })
            .collect()
    }
}

fn target_stage<'a>(
    current: &'a Stage,
    stages: &'a [Stage],
    proposal: &FollowUpProposal,
) -> &'a Stage {
    let mut later: Vec<&Stage> = stages.iter().filter(|s| s.order > current.order).collect();
    later.sort_by_key(|s| s.order);

    later
        .iter()
        .find(|s| s.roles.contains(&proposal.role))
        .or_else(|| later.first())
        .copied()
        .unwrap_or(current)
}
