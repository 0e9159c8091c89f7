//! Rule agents: the per-rule assignment targets.
//!
//! An agent entry belongs to exactly one rule. The same user appears once per
//! rule they take leads from, each entry with its own weight and team.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Weight given to an agent when none is supplied.
pub const DEFAULT_AGENT_WEIGHT: i32 = 1;

/// A user eligible to receive leads from one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleAgent {
    pub id: DbId,
    pub rule_id: DbId,
    pub user_id: DbId,
    pub display_name: String,
    pub team_id: Option<DbId>,
    /// Relative share for weighted rules. Zero keeps the agent out of draws.
    pub weight: i32,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for adding a user to a rule's pool.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAgent {
    pub rule_id: DbId,
    pub user_id: DbId,
    #[validate(length(min = 1, max = 128))]
    pub display_name: String,
    pub team_id: Option<DbId>,
    #[validate(range(min = 0, max = 1000))]
    pub weight: Option<i32>,
    pub is_active: Option<bool>,
}

impl CreateAgent {
    pub fn new(rule_id: DbId, user_id: DbId, display_name: impl Into<String>) -> Self {
        Self {
            rule_id,
            user_id,
            display_name: display_name.into(),
            team_id: None,
            weight: None,
            is_active: None,
        }
    }

    pub fn with_team(mut self, team_id: DbId) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Validate and fill defaults.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        self.validate()?;
        self.display_name = self.display_name.trim().to_string();
        self.weight.get_or_insert(DEFAULT_AGENT_WEIGHT);
        self.is_active.get_or_insert(true);
        Ok(self)
    }
}

/// DTO for editing an agent entry. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAgent {
    #[validate(length(min = 1, max = 128))]
    pub display_name: Option<String>,
    pub team_id: Option<DbId>,
    #[validate(range(min = 0, max = 1000))]
    pub weight: Option<i32>,
    pub is_active: Option<bool>,
}

impl UpdateAgent {
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }

    pub fn validated(self) -> Result<Self, CoreError> {
        self.validate()?;
        Ok(self)
    }

    /// Apply the non-`None` fields to `agent`.
    pub fn apply(&self, agent: &mut RuleAgent) {
        if let Some(name) = &self.display_name {
            agent.display_name = name.trim().to_string();
        }
        if let Some(team_id) = self.team_id {
            agent.team_id = Some(team_id);
        }
        if let Some(weight) = self.weight {
            agent.weight = weight;
        }
        if let Some(is_active) = self.is_active {
            agent.is_active = is_active;
        }
    }
}

/// Active agents in stable (ascending id) order.
///
/// Rotation indexes into this list, so the order must not depend on how the
/// store happened to return the rows.
pub fn eligible_agents(agents: &[RuleAgent]) -> Vec<RuleAgent> {
    let mut eligible: Vec<RuleAgent> = agents.iter().filter(|a| a.is_active).cloned().collect();
    eligible.sort_by_key(|a| a.id);
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn agent(id: DbId, active: bool) -> RuleAgent {
        RuleAgent {
            id,
            rule_id: 1,
            user_id: id * 10,
            display_name: format!("agent-{id}"),
            team_id: None,
            weight: 1,
            is_active: active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn eligible_filters_inactive_and_sorts() {
        let agents = vec![agent(3, true), agent(1, true), agent(2, false)];
        let ids: Vec<DbId> = eligible_agents(&agents).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn create_fills_defaults() {
        let input = CreateAgent::new(1, 5, "  Sarah Johnson ").validated().unwrap();
        assert_eq!(input.weight, Some(DEFAULT_AGENT_WEIGHT));
        assert_eq!(input.is_active, Some(true));
        assert_eq!(input.display_name, "Sarah Johnson");
    }

    #[test]
    fn create_rejects_negative_weight() {
        assert_matches!(
            CreateAgent::new(1, 5, "Mike").with_weight(-1).validated(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn update_applies_supplied_fields() {
        let mut a = agent(1, true);
        UpdateAgent {
            weight: Some(4),
            ..UpdateAgent::deactivate()
        }
        .apply(&mut a);
        assert_eq!(a.weight, 4);
        assert!(!a.is_active);
        assert_eq!(a.display_name, "agent-1");
    }
}
