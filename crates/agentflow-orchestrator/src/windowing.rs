use crate::config::WindowingConfig;
use agentflow_core::WorkerRole;
use uuid::Uuid;

/// What a completed dependency contributes to a dependent task's context.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencySummary {
    /// The completed dependency.
    pub task_id: Uuid,
    /// Role that produced it.
    pub role: WorkerRole,
    /// Windowed text.
    pub summary: String,
    /// Carried through unchanged; not counted against the ceilings.
    pub key_decisions: Vec<String>,
}

/// Bounds the dependency text carried into a task's context.
///
/// Each summary is cut to `max_chars_per_dependency`, then the list is walked
/// in order against `max_total_chars`. An entry that does not fit is cut to
/// the remaining space if more than `min_useful_chars` remain, otherwise it is
/// dropped. Earlier entries are never shortened to make room for later ones.
/// Lengths are counted in `char`s. Applying the windower to its own output
/// returns it unchanged.
#[derive(Debug, Clone, Copy)]
pub struct ContextWindower {
    config: WindowingConfig,
}

impl ContextWindower {
    /// Windower enforcing `config`'s ceilings.
    pub fn new(config: WindowingConfig) -> Self {
        Self { config }
    }

    /// Window `dependencies`, keeping their order.
    pub fn apply(&self, dependencies: Vec<DependencySummary>) -> Vec<DependencySummary> {
        let mut total = 0usize;
        let mut windowed = Vec::with_capacity(dependencies.len());

        for mut dep in dependencies {
            dep.summary = truncate_to_summary(&dep.summary, self.config.max_chars_per_dependency);
            let mut len = dep.summary.chars().count();

            if total + len > self.config.max_total_chars {
                let remaining = self.config.max_total_chars.saturating_sub(total);
                if remaining > self.config.min_useful_chars {
                    dep.summary = truncate_to_summary(&dep.summary, remaining);
                    len = dep.summary.chars().count();
                } else {
                    tracing::debug!(
                        task_id = %dep.task_id,
                        remaining,
                        "dependency dropped from context, aggregate ceiling reached"
                    );
                    continue;
                }
            }

            total += len;
            windowed.push(dep);
        }

        windowed
    }
}

/// Cut `text` to at most `target` chars.
///
/// Prefers ending on a period that lies past the midpoint of the target;
/// otherwise hard-cuts and appends `...`, with the ellipsis counted inside
/// the target.
pub fn truncate_to_summary(text: &str, target: usize) -> String {
    if text.chars().count() <= target {
        return text.to_string();
    }

    let prefix: String = text.chars().take(target).collect();
    if let Some(byte_idx) = prefix.rfind('.') {
        let period_pos = prefix[..byte_idx].chars().count();
        if period_pos > target / 2 {
            return prefix[..=byte_idx].to_string();
        }
    }

    if target < 3 {
        return prefix;
    }
    let mut cut: String = prefix.chars().take(target - 3).collect();
    cut.push_str("...");
    cut
}

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / 4) as u64
}
