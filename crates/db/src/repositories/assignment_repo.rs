//! Repository for `assignment_records`, `rule_stats`, and lead summaries.

use leadroute_core::assignment::AssignmentOutcome;
use leadroute_core::lead::DistributionState;
use leadroute_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::assignment::{
    AgentLoadRow, NewRecord, RecentDistributionRow, RecordRow, StateCountRow,
};
use crate::models::rule::RuleStatsRow;

/// Column list for `assignment_records` queries.
const COLUMNS: &str = "\
    id, lead_id, rule_id, agent_id, user_id, strategy, outcome, rotation_cursor, created_at";

pub struct AssignmentRepo;

impl AssignmentRepo {
    /// Append a record. Records are never updated.
    pub async fn insert(
        conn: &mut PgConnection,
        record: &NewRecord<'_>,
    ) -> Result<RecordRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO assignment_records \
                (lead_id, rule_id, agent_id, user_id, strategy, outcome, rotation_cursor) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RecordRow>(&query)
            .bind(record.lead_id)
            .bind(record.rule_id)
            .bind(record.agent_id)
            .bind(record.user_id)
            .bind(record.strategy)
            .bind(record.outcome)
            .bind(record.rotation_cursor)
            .fetch_one(conn)
            .await
    }

    /// A lead's records, oldest first.
    pub async fn list_for_lead(pool: &PgPool, lead_id: DbId) -> Result<Vec<RecordRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM assignment_records WHERE lead_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, RecordRow>(&query)
            .bind(lead_id)
            .fetch_all(pool)
            .await
    }

    /// Fold one outcome into the rule's pre-aggregated counters.
    pub async fn count_outcome(
        conn: &mut PgConnection,
        rule_id: DbId,
        outcome: AssignmentOutcome,
    ) -> Result<(), sqlx::Error> {
        let (assigned, pending) = match outcome {
            AssignmentOutcome::Assigned => (1i64, 0i64),
            AssignmentOutcome::PendingManual | AssignmentOutcome::NoEligibleAgent => (0, 1),
            _ => return Ok(()),
        };
        sqlx::query(
            "INSERT INTO rule_stats (rule_id, leads_assigned, leads_pending_manual, last_assigned_at) \
             VALUES ($1, $2, $3, CASE WHEN $2 > 0 THEN NOW() END) \
             ON CONFLICT (rule_id) DO UPDATE SET \
                leads_assigned = rule_stats.leads_assigned + EXCLUDED.leads_assigned, \
                leads_pending_manual = rule_stats.leads_pending_manual + EXCLUDED.leads_pending_manual, \
                last_assigned_at = COALESCE(EXCLUDED.last_assigned_at, rule_stats.last_assigned_at)",
        )
        .bind(rule_id)
        .bind(assigned)
        .bind(pending)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Counters for every rule, zero for rules without outcomes.
    pub async fn rule_stats(pool: &PgPool) -> Result<Vec<RuleStatsRow>, sqlx::Error> {
        sqlx::query_as::<_, RuleStatsRow>(
            "SELECT r.id AS rule_id, \
                    COALESCE(s.leads_assigned, 0) AS leads_assigned, \
                    COALESCE(s.leads_pending_manual, 0) AS leads_pending_manual, \
                    s.last_assigned_at \
             FROM distribution_rules r \
             LEFT JOIN rule_stats s ON s.rule_id = r.id \
             ORDER BY r.id",
        )
        .fetch_all(pool)
        .await
    }

    /// Non-archived lead counts per distribution state.
    pub async fn state_counts(pool: &PgPool) -> Result<Vec<StateCountRow>, sqlx::Error> {
        sqlx::query_as::<_, StateCountRow>(
            "SELECT distribution_state AS state, COUNT(*) AS count \
             FROM leads WHERE archived_at IS NULL \
             GROUP BY distribution_state",
        )
        .fetch_all(pool)
        .await
    }

    /// Open assigned lead counts per user.
    pub async fn agent_load(pool: &PgPool) -> Result<Vec<AgentLoadRow>, sqlx::Error> {
        sqlx::query_as::<_, AgentLoadRow>(
            "SELECT assigned_user_id AS user_id, COUNT(*) AS assigned_leads \
             FROM leads \
             WHERE archived_at IS NULL AND distribution_state = $1 \
               AND assigned_user_id IS NOT NULL \
             GROUP BY assigned_user_id \
             ORDER BY assigned_user_id",
        )
        .bind(DistributionState::Assigned.as_str())
        .fetch_all(pool)
        .await
    }

    /// Latest records that carry an agent, newest first.
    pub async fn list_recent(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<RecentDistributionRow>, sqlx::Error> {
        sqlx::query_as::<_, RecentDistributionRow>(
            "SELECT a.id AS record_id, a.lead_id, \
                    l.first_name, l.last_name, l.company, l.status AS lead_status, \
                    a.rule_id, r.name AS rule_name, \
                    a.user_id, ag.display_name AS agent_name, \
                    a.outcome, a.created_at AS distributed_at \
             FROM assignment_records a \
             JOIN leads l ON l.id = a.lead_id \
             JOIN rule_agents ag ON ag.id = a.agent_id \
             LEFT JOIN distribution_rules r ON r.id = a.rule_id \
             WHERE a.agent_id IS NOT NULL AND a.user_id IS NOT NULL \
             ORDER BY a.id DESC \
             LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(pool)
        .await
    }
}
