//! Per-rule agent pools.

use std::sync::Arc;

use leadroute_core::agent::{eligible_agents, CreateAgent, RuleAgent, UpdateAgent};
use leadroute_core::types::DbId;
use leadroute_db::DistributionStore;

use crate::error::EngineResult;

pub struct AgentPool {
    store: Arc<dyn DistributionStore>,
}

impl AgentPool {
    pub fn new(store: Arc<dyn DistributionStore>) -> Self {
        Self { store }
    }

    /// Add a user to a rule's pool.
    pub async fn add_agent(&self, input: CreateAgent) -> EngineResult<RuleAgent> {
        let input = input.validated()?;
        let agent = self.store.insert_agent(&input).await?;
        tracing::info!(
            agent_id = agent.id,
            rule_id = agent.rule_id,
            user_id = agent.user_id,
            weight = agent.weight,
            "Agent added to rule pool",
        );
        Ok(agent)
    }

    pub async fn update_agent(&self, id: DbId, input: UpdateAgent) -> EngineResult<RuleAgent> {
        let input = input.validated()?;
        let agent = self.store.update_agent(id, &input).await?;
        tracing::info!(
            agent_id = id,
            rule_id = agent.rule_id,
            is_active = agent.is_active,
            "Agent updated",
        );
        Ok(agent)
    }

    pub async fn deactivate_agent(&self, id: DbId) -> EngineResult<RuleAgent> {
        self.update_agent(id, UpdateAgent::deactivate()).await
    }

    pub async fn get_agent(&self, id: DbId) -> EngineResult<RuleAgent> {
        Ok(self.store.get_agent(id).await?)
    }

    /// Every entry of a rule's pool, including inactive ones.
    pub async fn list_agents(&self, rule_id: DbId) -> EngineResult<Vec<RuleAgent>> {
        Ok(self.store.list_agents(rule_id).await?)
    }

    /// Agents a strategy may pick from: active, ascending id.
    pub async fn eligible_agents(&self, rule_id: DbId) -> EngineResult<Vec<RuleAgent>> {
        let agents = self.store.list_agents(rule_id).await?;
        Ok(eligible_agents(&agents))
    }

    /// Deactivate every pool entry of a user. Returns the entries changed.
    pub async fn deactivate_user(&self, user_id: DbId) -> EngineResult<Vec<RuleAgent>> {
        let mut changed = Vec::new();
        for agent in self.store.list_agents_by_user(user_id).await? {
            if agent.is_active {
                changed.push(self.deactivate_agent(agent.id).await?);
            }
        }
        tracing::info!(user_id, entries = changed.len(), "User removed from all rule pools");
        Ok(changed)
    }
}
