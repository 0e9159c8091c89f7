//! Rows of `assignment_records` and the summary projections over leads.

use leadroute_core::analytics::{display_name, AgentLoad, RecentDistribution, StateCount};
use leadroute_core::assignment::AssignmentRecord;
use leadroute_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_text;
use crate::error::StoreError;

/// A row from the `assignment_records` table.
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub id: DbId,
    pub lead_id: DbId,
    pub rule_id: Option<DbId>,
    pub agent_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub strategy: Option<String>,
    pub outcome: String,
    pub rotation_cursor: Option<i64>,
    pub created_at: Timestamp,
}

impl TryFrom<RecordRow> for AssignmentRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(AssignmentRecord {
            id: row.id,
            lead_id: row.lead_id,
            rule_id: row.rule_id,
            agent_id: row.agent_id,
            user_id: row.user_id,
            strategy: row
                .strategy
                .as_deref()
                .map(|s| parse_text("strategy", s))
                .transpose()?,
            outcome: parse_text("outcome", &row.outcome)?,
            rotation_cursor: row.rotation_cursor,
            created_at: row.created_at,
        })
    }
}

/// Fields written when inserting an assignment record.
#[derive(Debug, Clone)]
pub struct NewRecord<'a> {
    pub lead_id: DbId,
    pub rule_id: Option<DbId>,
    pub agent_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub strategy: Option<&'a str>,
    pub outcome: &'a str,
    pub rotation_cursor: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StateCountRow {
    pub state: String,
    pub count: i64,
}

impl TryFrom<StateCountRow> for StateCount {
    type Error = StoreError;

    fn try_from(row: StateCountRow) -> Result<Self, Self::Error> {
        Ok(StateCount {
            state: parse_text("distribution_state", &row.state)?,
            count: row.count,
        })
    }
}

/// `assignment_records` joined with the lead, agent and rule it names.
#[derive(Debug, Clone, FromRow)]
pub struct RecentDistributionRow {
    pub record_id: DbId,
    pub lead_id: DbId,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub lead_status: String,
    pub rule_id: Option<DbId>,
    pub rule_name: Option<String>,
    pub user_id: DbId,
    pub agent_name: String,
    pub outcome: String,
    pub distributed_at: Timestamp,
}

impl TryFrom<RecentDistributionRow> for RecentDistribution {
    type Error = StoreError;

    fn try_from(row: RecentDistributionRow) -> Result<Self, Self::Error> {
        Ok(RecentDistribution {
            record_id: row.record_id,
            lead_id: row.lead_id,
            lead_name: display_name(&row.first_name, &row.last_name),
            company: row.company,
            lead_status: parse_text("status", &row.lead_status)?,
            rule_id: row.rule_id,
            rule_name: row.rule_name,
            user_id: row.user_id,
            agent_name: row.agent_name,
            outcome: parse_text("outcome", &row.outcome)?,
            distributed_at: row.distributed_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AgentLoadRow {
    pub user_id: DbId,
    pub assigned_leads: i64,
}

impl From<AgentLoadRow> for AgentLoad {
    fn from(row: AgentLoadRow) -> Self {
        AgentLoad {
            user_id: row.user_id,
            assigned_leads: row.assigned_leads,
        }
    }
}
