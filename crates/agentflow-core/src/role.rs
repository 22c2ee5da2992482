use serde::{Deserialize, Serialize};

/// A named worker responsibility (`"ARCH"`, `"DEV_RUST"`, ...).
///
/// Roles are an open set keyed by string so new ones (e.g. language-specific
/// developer variants) can be introduced at runtime without recompiling.
/// Tags are normalized to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerRole(String);

impl WorkerRole {
    /// Normalize `tag` (trimmed, upper case) into a role.
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().trim().to_ascii_uppercase())
    }

    /// The normalized tag.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The family prefix of a dynamic role: `"DEV_PYTHON"` → `Some("DEV")`.
    pub fn family(&self) -> Option<&str> {
        self.0.split_once('_').map(|(family, _)| family)
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerRole {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Claude model tiers, cheapest first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Fast and cheap.
    Haiku,
    /// Balanced default.
    #[default]
    Sonnet,
    /// Most capable, most expensive.
    Opus,
}

impl ModelTier {
    /// Alias accepted by the `claude` CLI `--model` flag.
    pub fn alias(&self) -> &'static str {
        match self {
            ModelTier::Haiku => "haiku",
            ModelTier::Sonnet => "sonnet",
            ModelTier::Opus => "opus",
        }
    }

    /// Map a model name or alias to its tier. Unknown names are billed as sonnet.
    pub fn from_model_name(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        if lower.contains("opus") {
            ModelTier::Opus
        } else if lower.contains("haiku") {
            ModelTier::Haiku
        } else {
            ModelTier::Sonnet
        }
    }
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.alias())
    }
}

/// Price of one tier in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierCost {
    /// USD per million prompt tokens.
    pub input_per_million: f64,
    /// USD per million completion tokens.
    pub output_per_million: f64,
}

/// Per-tier token prices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    /// Haiku prices.
    #[serde(default = "default_haiku")]
    pub haiku: TierCost,
    /// Sonnet prices.
    #[serde(default = "default_sonnet")]
    pub sonnet: TierCost,
    /// Opus prices.
    #[serde(default = "default_opus")]
    pub opus: TierCost,
}

fn default_haiku() -> TierCost {
    TierCost {
        input_per_million: 0.25,
        output_per_million: 1.25,
    }
}

fn default_sonnet() -> TierCost {
    TierCost {
        input_per_million: 3.0,
        output_per_million: 15.0,
    }
}

fn default_opus() -> TierCost {
    TierCost {
        input_per_million: 15.0,
        output_per_million: 75.0,
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            haiku: default_haiku(),
            sonnet: default_sonnet(),
            opus: default_opus(),
        }
    }
}

impl CostTable {
    /// Prices of one tier.
    pub fn tier(&self, tier: ModelTier) -> TierCost {
        match tier {
            ModelTier::Haiku => self.haiku,
            ModelTier::Sonnet => self.sonnet,
            ModelTier::Opus => self.opus,
        }
    }

    /// Cost in USD of one call at the given tier.
    pub fn cost(&self, tier: ModelTier, input_tokens: u64, output_tokens: u64) -> f64 {
        let price = self.tier(tier);
        (input_tokens as f64 / 1_000_000.0) * price.input_per_million
            + (output_tokens as f64 / 1_000_000.0) * price.output_per_million
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_normalized() {
        assert_eq!(WorkerRole::new(" dev_python ").as_str(), "DEV_PYTHON");
        assert_eq!(WorkerRole::from("arch"), WorkerRole::new("ARCH"));
    }

    #[test]
    fn test_role_family() {
        assert_eq!(WorkerRole::new("DEV_RUST").family(), Some("DEV"));
        assert_eq!(WorkerRole::new("PM").family(), None);
    }

    #[test]
    fn test_tier_from_model_name() {
        assert_eq!(ModelTier::from_model_name("claude-opus-4-1"), ModelTier::Opus);
        assert_eq!(ModelTier::from_model_name("haiku"), ModelTier::Haiku);
        assert_eq!(ModelTier::from_model_name("sonnet-4.5"), ModelTier::Sonnet);
        assert_eq!(ModelTier::from_model_name("gpt-x"), ModelTier::Sonnet);
    }

    #[test]
    fn test_sonnet_cost() {
        let cost = CostTable::default().cost(ModelTier::Sonnet, 1_000_000, 500_000);
        assert!((cost - 10.5).abs() < 1e-9);
    }

    #[test]
    fn test_haiku_cost_is_cheapest() {
        let table = CostTable::default();
        let haiku = table.cost(ModelTier::Haiku, 10_000, 10_000);
        let opus = table.cost(ModelTier::Opus, 10_000, 10_000);
        assert!(haiku < opus);
    }

    #[test]
    fn test_cost_table_partial_override() {
        let table: CostTable =
            serde_json::from_str(r#"{"opus":{"input_per_million":10.0,"output_per_million":50.0}}"#)
                .unwrap_or_default();
        assert_eq!(table.opus.input_per_million, 10.0);
        assert_eq!(table.sonnet, CostTable::default().sonnet);
    }
}
