//! Repository for the `leads` table.

use leadroute_core::lead::{DistributionState, LeadInput, LeadSource, LeadStatus};
use leadroute_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::lead::LeadRow;

/// Column list for `leads` queries.
const COLUMNS: &str = "\
    id, first_name, last_name, email, phone, company, source, \
    campaign_source, product_interest, estimated_value, heat_score, team_id, tags, \
    status, distribution_state, assigned_agent_id, assigned_user_id, \
    distribution_rule_id, needs_review, external_id, archived_at, created_at, updated_at";

/// Distribution columns written when a pass or override settles a lead.
#[derive(Debug, Clone, Copy)]
pub struct Settlement {
    pub state: DistributionState,
    pub agent_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub rule_id: Option<DbId>,
    pub needs_review: bool,
}

pub struct LeadRepo;

impl LeadRepo {
    /// Insert a new `unassigned` lead.
    ///
    /// Returns `None` when another lead already holds `external_id`.
    pub async fn insert(pool: &PgPool, input: &LeadInput) -> Result<Option<LeadRow>, sqlx::Error> {
        let query = format!(
            "INSERT INTO leads \
                (first_name, last_name, email, phone, company, source, campaign_source, \
                 product_interest, estimated_value, heat_score, team_id, tags, external_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (external_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(&input.first_name)
            .bind(&input.last_name)
            .bind(&input.email)
            .bind(&input.phone)
            .bind(&input.company)
            .bind(input.source.unwrap_or(LeadSource::Other).as_str())
            .bind(&input.campaign_source)
            .bind(&input.product_interest)
            .bind(input.estimated_value)
            .bind(input.heat_score)
            .bind(input.team_id)
            .bind(input.tags.clone().unwrap_or_default())
            .bind(&input.external_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<LeadRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM leads WHERE id = $1");
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock a lead row until the transaction ends.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<LeadRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM leads WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    pub async fn find_by_external_id(
        pool: &PgPool,
        external_id: &str,
    ) -> Result<Option<LeadRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM leads WHERE external_id = $1");
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(external_id)
            .fetch_optional(pool)
            .await
    }

    /// Non-archived leads in a distribution state, oldest first.
    pub async fn list_by_state(
        pool: &PgPool,
        state: DistributionState,
    ) -> Result<Vec<LeadRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM leads \
             WHERE distribution_state = $1 AND archived_at IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(state.as_str())
            .fetch_all(pool)
            .await
    }

    /// Non-archived leads currently assigned to a user.
    pub async fn list_assigned_to(pool: &PgPool, user_id: DbId) -> Result<Vec<LeadRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM leads \
             WHERE assigned_user_id = $1 AND distribution_state = $2 AND archived_at IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(user_id)
            .bind(DistributionState::Assigned.as_str())
            .fetch_all(pool)
            .await
    }

    /// Update status and/or archive flag. Only non-`None` fields are applied.
    pub async fn update_fields(
        pool: &PgPool,
        id: DbId,
        status: Option<LeadStatus>,
        archived: Option<bool>,
    ) -> Result<Option<LeadRow>, sqlx::Error> {
        let query = format!(
            "UPDATE leads SET \
                status = COALESCE($2, status), \
                archived_at = CASE \
                    WHEN $3::BOOLEAN IS NULL THEN archived_at \
                    WHEN $3 THEN COALESCE(archived_at, NOW()) \
                    ELSE NULL END, \
                updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(id)
            .bind(status.map(|s| s.as_str()))
            .bind(archived)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_state(
        conn: &mut PgConnection,
        id: DbId,
        state: DistributionState,
    ) -> Result<LeadRow, sqlx::Error> {
        let query = format!(
            "UPDATE leads SET distribution_state = $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(id)
            .bind(state.as_str())
            .fetch_one(conn)
            .await
    }

    /// Write the outcome of a pass or override onto the lead.
    pub async fn settle(
        conn: &mut PgConnection,
        id: DbId,
        settlement: Settlement,
    ) -> Result<LeadRow, sqlx::Error> {
        let query = format!(
            "UPDATE leads SET \
                distribution_state = $2, assigned_agent_id = $3, assigned_user_id = $4, \
                distribution_rule_id = $5, needs_review = $6, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LeadRow>(&query)
            .bind(id)
            .bind(settlement.state.as_str())
            .bind(settlement.agent_id)
            .bind(settlement.user_id)
            .bind(settlement.rule_id)
            .bind(settlement.needs_review)
            .fetch_one(conn)
            .await
    }
}
