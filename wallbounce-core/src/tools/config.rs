//! Tool configuration manager — which tools a request may see.
//!
//! Filters the registered tool set by cost tier, security tier, and the
//! request's remaining budget. The budget trim drops the most expensive
//! survivors first until the projected spend fits.

use super::{CostTier, SecurityTier, ToolDescriptor};
use crate::types::TaskTier;
use std::collections::HashMap;
use tracing::debug;

/// The governance context a request presents when asking for tools.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_tier: TaskTier,
    /// Tools costlier than this are invisible to the request.
    pub budget_tier: CostTier,
    /// Tools more sensitive than this are invisible to the request.
    pub security_tier: SecurityTier,
    pub budget_used: f64,
    pub budget_limit: f64,
    /// Expected call counts per tool label; absent means 1.
    pub expected_calls: HashMap<String, u32>,
}

impl ToolContext {
    pub fn new(task_tier: TaskTier, budget_tier: CostTier, security_tier: SecurityTier) -> Self {
        Self {
            task_tier,
            budget_tier,
            security_tier,
            budget_used: 0.0,
            budget_limit: f64::INFINITY,
            expected_calls: HashMap::new(),
        }
    }

    pub fn with_budget(mut self, used: f64, limit: f64) -> Self {
        self.budget_used = used;
        self.budget_limit = limit;
        self
    }

    pub fn with_expected_calls(mut self, label: impl Into<String>, calls: u32) -> Self {
        self.expected_calls.insert(label.into(), calls);
        self
    }

    fn expected_calls_for(&self, label: &str) -> u32 {
        self.expected_calls.get(label).copied().unwrap_or(1)
    }
}

/// Holds the full tool catalogue and answers per-request subsets.
#[derive(Debug, Default)]
pub struct ToolConfigManager {
    descriptors: Vec<ToolDescriptor>,
}

impl ToolConfigManager {
    pub fn new(descriptors: Vec<ToolDescriptor>) -> Self {
        Self { descriptors }
    }

    /// Projected spend for one tool under this context.
    fn projected_cost(tool: &ToolDescriptor, context: &ToolContext) -> f64 {
        tool.cost_tier.weight() * f64::from(context.expected_calls_for(&tool.label))
    }

    /// The toolset this context is allowed to use, in catalogue order.
    pub fn tools_for(&self, context: &ToolContext) -> Vec<ToolDescriptor> {
        let mut allowed: Vec<ToolDescriptor> = self
            .descriptors
            .iter()
            .filter(|t| t.cost_tier <= context.budget_tier)
            .filter(|t| t.security_tier <= context.security_tier)
            .cloned()
            .collect();

        // Budget trim: drop the most expensive survivors until the
        // projection fits. Ties drop the lexicographically greater label
        // so the result is deterministic.
        let mut projected: f64 = context.budget_used
            + allowed
                .iter()
                .map(|t| Self::projected_cost(t, context))
                .sum::<f64>();
        while projected > context.budget_limit && !allowed.is_empty() {
            let (idx, _) = allowed
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    Self::projected_cost(a, context)
                        .partial_cmp(&Self::projected_cost(b, context))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.label.cmp(&b.label))
                })
                .expect("allowed is non-empty");
            let dropped = allowed.remove(idx);
            projected -= Self::projected_cost(&dropped, context);
            debug!(
                tool = %dropped.label,
                budget_limit = context.budget_limit,
                "dropping tool to fit budget"
            );
        }

        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ApprovalPolicy;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;

    fn tool(label: &str, cost: CostTier, security: SecurityTier) -> ToolDescriptor {
        ToolDescriptor {
            label: label.to_string(),
            transport_url: format!("https://{label}.example"),
            auth_token: None,
            cost_tier: cost,
            security_tier: security,
            allowed_operations: BTreeSet::from(["run".to_string()]),
            approval_policy: ApprovalPolicy::Never,
        }
    }

    fn catalogue() -> ToolConfigManager {
        ToolConfigManager::new(vec![
            tool("dmesg_reader", CostTier::Free, SecurityTier::Public),
            tool("ticket_search", CostTier::Standard, SecurityTier::Internal),
            tool("runbook_executor", CostTier::Premium, SecurityTier::Sensitive),
            tool("secrets_rotator", CostTier::Premium, SecurityTier::Critical),
        ])
    }

    fn context(budget: CostTier, security: SecurityTier) -> ToolContext {
        ToolContext::new(TaskTier::Premium, budget, security)
    }

    #[test]
    fn test_cost_tier_ceiling() {
        let tools = catalogue().tools_for(&context(CostTier::Standard, SecurityTier::Critical));
        let labels: Vec<&str> = tools.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["dmesg_reader", "ticket_search"]);
    }

    #[test]
    fn test_security_tier_ceiling() {
        let tools = catalogue().tools_for(&context(CostTier::Premium, SecurityTier::Internal));
        let labels: Vec<&str> = tools.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["dmesg_reader", "ticket_search"]);
    }

    #[test]
    fn test_budget_trim_drops_most_expensive_first() {
        // Free (0) + standard (1) + two premium (5 each) = 11 projected.
        let ctx = context(CostTier::Premium, SecurityTier::Critical).with_budget(0.0, 6.0);
        let tools = catalogue().tools_for(&ctx);
        let labels: Vec<&str> = tools.iter().map(|t| t.label.as_str()).collect();
        // Both premiums cost 5; "secrets_rotator" > "runbook_executor"
        // lexicographically, so it drops first, leaving 0+1+5 = 6.
        assert_eq!(labels, vec!["dmesg_reader", "ticket_search", "runbook_executor"]);
    }

    #[test]
    fn test_budget_used_counts_against_limit() {
        let ctx = context(CostTier::Standard, SecurityTier::Critical).with_budget(0.5, 1.0);
        let tools = catalogue().tools_for(&ctx);
        // 0.5 used + standard(1) exceeds 1.0, so only the free tool stays.
        let labels: Vec<&str> = tools.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["dmesg_reader"]);
    }

    #[test]
    fn test_expected_calls_scale_projection() {
        let ctx = context(CostTier::Premium, SecurityTier::Critical)
            .with_budget(0.0, 10.0)
            .with_expected_calls("runbook_executor", 3); // 15 projected on its own
        let tools = catalogue().tools_for(&ctx);
        let labels: Vec<&str> = tools.iter().map(|t| t.label.as_str()).collect();
        // runbook_executor (15) drops first, then fits: 0+1+5 = 6.
        assert_eq!(labels, vec!["dmesg_reader", "ticket_search", "secrets_rotator"]);
    }

    #[test]
    fn test_unlimited_budget_keeps_everything_allowed() {
        let tools = catalogue().tools_for(&context(CostTier::Premium, SecurityTier::Critical));
        assert_eq!(tools.len(), 4);
    }

    #[test]
    fn test_empty_catalogue() {
        let manager = ToolConfigManager::default();
        assert!(manager
            .tools_for(&context(CostTier::Premium, SecurityTier::Critical))
            .is_empty());
    }
}
