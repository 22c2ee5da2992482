use agentflow_core::{
    AgentflowError, AgentflowResult, CostTable, ModelTier, TokenUsageRecord, UsageTotals, WorkerRole,
};
use agentflow_store::WorkflowStore;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Token accounting over the run ledger.
///
/// Pure bookkeeping: it records and answers questions, it never stops
/// anything. Enforcement is the engine's dispatch gate.
pub struct BudgetTracker {
    store: Arc<dyn WorkflowStore>,
    costs: CostTable,
    warning_threshold: f64,
}

impl BudgetTracker {
    /// `warning_threshold` is the fraction of the ceiling that counts as a warning.
    pub fn new(store: Arc<dyn WorkflowStore>, costs: CostTable, warning_threshold: f64) -> Self {
        Self {
            store,
            costs,
            warning_threshold,
        }
    }

    /// Prices used for every ledger entry.
    pub fn costs(&self) -> &CostTable {
        &self.costs
    }

    /// Append a ledger entry priced from the cost table and return its cost.
    pub async fn record_usage(
        &self,
        run_id: Uuid,
        task_id: Option<Uuid>,
        role: &WorkerRole,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> AgentflowResult<f64> {
        let tier = ModelTier::from_model_name(model);
        let cost_usd = self.costs.cost(tier, input_tokens, output_tokens);
        self.store
            .append_usage(&TokenUsageRecord {
                run_id,
                task_id,
                role: role.clone(),
                model: model.to_string(),
                input_tokens,
                output_tokens,
                cost_usd,
                recorded_at: Utc::now(),
            })
            .await?;
        tracing::debug!(
            run_id = %run_id,
            role = %role,
            tier = %tier,
            input_tokens,
            output_tokens,
            cost_usd,
            "token usage recorded"
        );
        Ok(cost_usd)
    }

    /// Ledger totals for a run.
    pub async fn usage(&self, run_id: Uuid) -> AgentflowResult<UsageTotals> {
        self.store.usage_totals(run_id).await
    }

    /// `(total < ceiling, total / ceiling)`. A zero ceiling means unlimited.
    pub async fn within_budget(&self, run_id: Uuid, ceiling: u64) -> AgentflowResult<(bool, f64)> {
        let used = self.usage(run_id).await?.total_tokens();
        Ok(budget_fraction(used, ceiling))
    }

    /// Whether the run has used at least the warning fraction of `ceiling`.
    pub async fn is_warning(&self, run_id: Uuid, ceiling: u64) -> AgentflowResult<bool> {
        let (_, fraction) = self.within_budget(run_id, ceiling).await?;
        Ok(fraction >= self.warning_threshold)
    }

    /// Fraction of the ceiling at which [`WorkflowEvent::BudgetWarning`](crate::WorkflowEvent::BudgetWarning) fires.
    pub fn warning_threshold(&self) -> f64 {
        self.warning_threshold
    }

    /// `Err(Budget)` when the run is at or over `ceiling`.
    pub async fn ensure_within(&self, run_id: Uuid, ceiling: u64) -> AgentflowResult<()> {
        let used = self.usage(run_id).await?.total_tokens();
        match budget_fraction(used, ceiling) {
            (true, _) => Ok(()),
            (false, _) => Err(AgentflowError::Budget(format!(
                "run {run_id} has used {used} of {ceiling} tokens"
            ))),
        }
    }
}

pub(crate) fn budget_fraction(used: u64, ceiling: u64) -> (bool, f64) {
    if ceiling == 0 {
        return (true, 0.0);
    }
    (used < ceiling, used as f64 / ceiling as f64)
}
