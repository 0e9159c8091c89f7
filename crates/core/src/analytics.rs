//! Pre-aggregated distribution summaries for dashboards.
//!
//! Stores maintain these counts as assignments are written so readers never
//! re-scan the full assignment history.

use serde::{Deserialize, Serialize};

use crate::assignment::AssignmentOutcome;
use crate::lead::{DistributionState, LeadStatus};
use crate::rule::StrategyKind;
use crate::types::{DbId, Timestamp};

/// Per-rule counters kept by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule_id: DbId,
    pub leads_assigned: i64,
    pub leads_pending_manual: i64,
    pub last_assigned_at: Option<Timestamp>,
}

/// Rule counters joined with rule metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub rule_id: DbId,
    pub rule_name: String,
    pub strategy: StrategyKind,
    pub priority: i32,
    pub is_active: bool,
    pub active_agents: i64,
    pub leads_assigned: i64,
    pub leads_pending_manual: i64,
    pub last_assigned_at: Option<Timestamp>,
}

impl RuleSummary {
    /// Share of this rule's settled leads that went straight to an agent,
    /// as a percentage. `None` before the rule has produced any outcome.
    pub fn auto_assignment_rate(&self) -> Option<f64> {
        percentage(
            self.leads_assigned,
            self.leads_assigned + self.leads_pending_manual,
        )
    }
}

/// Number of leads currently in a distribution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCount {
    pub state: DistributionState,
    pub count: i64,
}

/// Number of leads currently held by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLoad {
    pub user_id: DbId,
    pub assigned_leads: i64,
}

/// One entry of the recent distributions feed: a lead handed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentDistribution {
    pub record_id: DbId,
    pub lead_id: DbId,
    pub lead_name: String,
    pub company: Option<String>,
    /// Sales status of the lead now, not at assignment time.
    pub lead_status: LeadStatus,
    pub rule_id: Option<DbId>,
    pub rule_name: Option<String>,
    pub user_id: DbId,
    pub agent_name: String,
    pub outcome: AssignmentOutcome,
    pub distributed_at: Timestamp,
}

/// `"first last"`, without stray whitespace when either part is empty.
pub fn display_name(first_name: &str, last_name: &str) -> String {
    format!("{} {}", first_name.trim(), last_name.trim())
        .trim()
        .to_string()
}

/// `part / total * 100`, or `None` when `total` is not positive.
pub fn percentage(part: i64, total: i64) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    Some(part as f64 / total as f64 * 100.0)
}

/// Fill in zero counts for states absent from `counts`, in declaration order.
pub fn complete_state_counts(counts: &[StateCount]) -> Vec<StateCount> {
    DistributionState::ALL
        .iter()
        .map(|&state| StateCount {
            state,
            count: counts
                .iter()
                .filter(|c| c.state == state)
                .map(|c| c.count)
                .sum(),
        })
        .collect()
}
