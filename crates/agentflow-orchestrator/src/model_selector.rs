use agentflow_core::ModelTier;

/// Rough difficulty of a task, inferred from its wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    /// Mostly simple-work indicators.
    Low,
    /// Indicators balanced or absent.
    Medium,
    /// Mostly hard-work indicators.
    High,
}

const HIGH_INDICATORS: &[&str] = &[
    "architecture",
    "design system",
    "security",
    "scale",
    "performance",
    "complex",
    "integration",
    "migrate",
];

const LOW_INDICATORS: &[&str] = &[
    "simple", "basic", "update", "fix typo", "rename", "minor", "small",
];

/// Count keyword indicators in the title and description.
pub fn estimate_complexity(title: &str, description: &str) -> Complexity {
    let text = format!("{description} {title}").to_lowercase();
    let high = HIGH_INDICATORS.iter().filter(|k| text.contains(*k)).count();
    let low = LOW_INDICATORS.iter().filter(|k| text.contains(*k)).count();

    if high >= 2 {
        Complexity::High
    } else if low >= 2 {
        Complexity::Low
    } else if high > low {
        Complexity::High
    } else if low > high {
        Complexity::Low
    } else {
        Complexity::Medium
    }
}

/// Adjust a role's default tier for the remaining budget fraction (`0.0..=1.0`).
pub fn select_tier(default: ModelTier, complexity: Complexity, budget_remaining: f64) -> ModelTier {
    if budget_remaining < 0.2 {
        return ModelTier::Haiku;
    }
    if budget_remaining < 0.5 && complexity != Complexity::High {
        return match default {
            ModelTier::Opus => ModelTier::Sonnet,
            other => other,
        };
    }
    if complexity == Complexity::High && default == ModelTier::Sonnet && budget_remaining > 0.7 {
        return ModelTier::Opus;
    }
    default
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complexity_keywords() {
        assert_eq!(
            estimate_complexity("Security architecture", ""),
            Complexity::High
        );
        assert_eq!(
            estimate_complexity("Fix typo", "small minor change"),
            Complexity::Low
        );
        assert_eq!(estimate_complexity("Add endpoint", "returns JSON"), Complexity::Medium);
        assert_eq!(
            estimate_complexity("Improve performance", "update the cache"),
            Complexity::Medium
        );
    }

    #[test]
    fn test_low_budget_forces_haiku() {
        assert_eq!(
            select_tier(ModelTier::Opus, Complexity::High, 0.1),
            ModelTier::Haiku
        );
    }

    #[test]
    fn test_medium_budget_downgrades_opus() {
        assert_eq!(
            select_tier(ModelTier::Opus, Complexity::Medium, 0.4),
            ModelTier::Sonnet
        );
        assert_eq!(
            select_tier(ModelTier::Opus, Complexity::High, 0.4),
            ModelTier::Opus
        );
        assert_eq!(
            select_tier(ModelTier::Haiku, Complexity::Low, 0.4),
            ModelTier::Haiku
        );
    }

    #[test]
    fn test_high_complexity_upgrades_with_budget() {
        assert_eq!(
            select_tier(ModelTier::Sonnet, Complexity::High, 0.9),
            ModelTier::Opus
        );
        assert_eq!(
            select_tier(ModelTier::Sonnet, Complexity::High, 0.6),
            ModelTier::Sonnet
        );
        assert_eq!(
            select_tier(ModelTier::Haiku, Complexity::High, 1.0),
            ModelTier::Haiku
        );
    }
}
