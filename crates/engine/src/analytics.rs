//! Dashboard summaries read from the store's pre-aggregated counters.

use std::collections::HashMap;
use std::sync::Arc;

use leadroute_core::analytics::{
    complete_state_counts, AgentLoad, RecentDistribution, RuleSummary, StateCount,
};
use leadroute_core::types::DbId;
use leadroute_db::DistributionStore;

use crate::agent_pool::AgentPool;
use crate::error::EngineResult;

pub struct DistributionAnalytics {
    store: Arc<dyn DistributionStore>,
    agents: Arc<AgentPool>,
}

impl DistributionAnalytics {
    pub fn new(store: Arc<dyn DistributionStore>, agents: Arc<AgentPool>) -> Self {
        Self { store, agents }
    }

    /// One summary per rule, active or not, in ascending id order.
    pub async fn rule_summaries(&self) -> EngineResult<Vec<RuleSummary>> {
        let rules = self.store.list_rules().await?;
        let stats: HashMap<DbId, _> = self
            .store
            .rule_stats()
            .await?
            .into_iter()
            .map(|s| (s.rule_id, s))
            .collect();

        let mut summaries = Vec::with_capacity(rules.len());
        for rule in rules {
            let active_agents = self.agents.eligible_agents(rule.id).await?.len() as i64;
            let stats = stats.get(&rule.id).cloned().unwrap_or_default();
            summaries.push(RuleSummary {
                rule_id: rule.id,
                rule_name: rule.name,
                strategy: rule.strategy,
                priority: rule.priority,
                is_active: rule.is_active,
                active_agents,
                leads_assigned: stats.leads_assigned,
                leads_pending_manual: stats.leads_pending_manual,
                last_assigned_at: stats.last_assigned_at,
            });
        }
        Ok(summaries)
    }

    /// Lead counts for every distribution state, zeros included.
    pub async fn state_counts(&self) -> EngineResult<Vec<StateCount>> {
        let counts = self.store.state_counts().await?;
        Ok(complete_state_counts(&counts))
    }

    /// Open leads per user, busiest first.
    pub async fn agent_load(&self) -> EngineResult<Vec<AgentLoad>> {
        let mut load = self.store.agent_load().await?;
        load.sort_by(|a, b| {
            b.assigned_leads
                .cmp(&a.assigned_leads)
                .then(a.user_id.cmp(&b.user_id))
        });
        Ok(load)
    }

    /// Latest hand-offs to agents across all leads, newest first.
    pub async fn recent_assignments(&self, limit: i64) -> EngineResult<Vec<RecentDistribution>> {
        Ok(self.store.list_recent_assignments(limit).await?)
    }
}
