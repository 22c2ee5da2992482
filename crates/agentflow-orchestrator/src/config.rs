use serde::{Deserialize, Serialize};

/// Orchestration limits (`[orchestrator]` in `agentflow.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Ceiling on concurrently dispatched tasks within a parallel stage.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Token ceiling per run. Zero disables the ceiling.
    #[serde(default = "default_token_budget")]
    pub token_budget: u64,
    /// Stop dispatching once the ceiling is reached.
    #[serde(default = "default_true")]
    pub enforce_budget: bool,
    /// Fraction of `token_budget` that raises a single budget warning per execution.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
    /// Adjust each role's model tier by remaining budget and task complexity.
    #[serde(default = "default_true")]
    pub adaptive_models: bool,
    /// Follow-up proposals accepted from one task; extras are dropped.
    #[serde(default = "default_max_follow_ups")]
    pub max_follow_ups_per_task: usize,
    /// Deepest follow-up chain allowed. Seeded tasks are depth 0.
    #[serde(default = "default_max_task_depth")]
    pub max_task_depth: u32,
    /// Dependency context ceilings.
    #[serde(default)]
    pub windowing: WindowingConfig,
}

/// Character ceilings for dependency context (`[orchestrator.windowing]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowingConfig {
    /// Ceiling on one dependency summary, in characters.
    #[serde(default = "default_max_chars_per_dependency")]
    pub max_chars_per_dependency: usize,
    /// Ceiling on all dependency summaries of a task together.
    #[serde(default = "default_max_total_chars")]
    pub max_total_chars: usize,
    /// Below this many remaining characters a dependency is dropped rather
    /// than truncated.
    #[serde(default = "default_min_useful_chars")]
    pub min_useful_chars: usize,
}

fn default_max_concurrent_tasks() -> usize {
    3
}

fn default_token_budget() -> u64 {
    500_000
}

fn default_true() -> bool {
    true
}

fn default_warning_threshold() -> f64 {
    0.8
}

fn default_max_follow_ups() -> usize {
    10
}

fn default_max_task_depth() -> u32 {
    3
}

fn default_max_chars_per_dependency() -> usize {
    8000
}

fn default_max_total_chars() -> usize {
    32_000
}

fn default_min_useful_chars() -> usize {
    1000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            token_budget: default_token_budget(),
            enforce_budget: true,
            warning_threshold: default_warning_threshold(),
            adaptive_models: true,
            max_follow_ups_per_task: default_max_follow_ups(),
            max_task_depth: default_max_task_depth(),
            windowing: WindowingConfig::default(),
        }
    }
}

impl Default for WindowingConfig {
    fn default() -> Self {
        Self {
            max_chars_per_dependency: default_max_chars_per_dependency(),
            max_total_chars: default_max_total_chars(),
            min_useful_chars: default_min_useful_chars(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.token_budget, 500_000);
        assert!(config.enforce_budget);
        assert_eq!(config.windowing.max_total_chars, 32_000);
    }

    #[test]
    fn test_nested_windowing_section() {
        let config: OrchestratorConfig = toml::from_str(
            r#"
            token_budget = 1000
            [windowing]
            max_total_chars = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.token_budget, 1000);
        assert_eq!(config.windowing.max_total_chars, 500);
        assert_eq!(config.windowing.max_chars_per_dependency, 8000);
        assert_eq!(config.max_task_depth, 3);
    }
}
