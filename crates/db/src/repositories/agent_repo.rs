//! Repository for `rule_agents`.

use leadroute_core::agent::{CreateAgent, RuleAgent, DEFAULT_AGENT_WEIGHT};
use leadroute_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::agent::AgentRow;

/// Column list for `rule_agents` queries.
const COLUMNS: &str = "\
    id, rule_id, user_id, display_name, team_id, weight, is_active, created_at, updated_at";

pub struct AgentRepo;

impl AgentRepo {
    pub async fn insert(
        conn: &mut PgConnection,
        input: &CreateAgent,
    ) -> Result<AgentRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO rule_agents (rule_id, user_id, display_name, team_id, weight, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AgentRow>(&query)
            .bind(input.rule_id)
            .bind(input.user_id)
            .bind(&input.display_name)
            .bind(input.team_id)
            .bind(input.weight.unwrap_or(DEFAULT_AGENT_WEIGHT))
            .bind(input.is_active.unwrap_or(true))
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AgentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_agents WHERE id = $1");
        sqlx::query_as::<_, AgentRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<AgentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_agents WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, AgentRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Persist an edited agent entry.
    pub async fn save(conn: &mut PgConnection, agent: &RuleAgent) -> Result<AgentRow, sqlx::Error> {
        let query = format!(
            "UPDATE rule_agents SET \
                display_name = $2, team_id = $3, weight = $4, is_active = $5, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AgentRow>(&query)
            .bind(agent.id)
            .bind(&agent.display_name)
            .bind(agent.team_id)
            .bind(agent.weight)
            .bind(agent.is_active)
            .fetch_one(conn)
            .await
    }

    /// Every agent entry of a rule, ascending id.
    pub async fn list_for_rule(pool: &PgPool, rule_id: DbId) -> Result<Vec<AgentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_agents WHERE rule_id = $1 ORDER BY id");
        sqlx::query_as::<_, AgentRow>(&query)
            .bind(rule_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_user(pool: &PgPool, user_id: DbId) -> Result<Vec<AgentRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_agents WHERE user_id = $1 ORDER BY id");
        sqlx::query_as::<_, AgentRow>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }
}
