//! Rows of `rule_agents`.

use leadroute_core::agent::RuleAgent;
use leadroute_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `rule_agents` table.
#[derive(Debug, Clone, FromRow)]
pub struct AgentRow {
    pub id: DbId,
    pub rule_id: DbId,
    pub user_id: DbId,
    pub display_name: String,
    pub team_id: Option<DbId>,
    pub weight: i32,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<AgentRow> for RuleAgent {
    fn from(row: AgentRow) -> Self {
        RuleAgent {
            id: row.id,
            rule_id: row.rule_id,
            user_id: row.user_id,
            display_name: row.display_name,
            team_id: row.team_id,
            weight: row.weight,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
