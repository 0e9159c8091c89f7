//! Rows of `leads`.

use leadroute_core::lead::Lead;
use leadroute_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_text;
use crate::error::StoreError;

/// A row from the `leads` table.
#[derive(Debug, Clone, FromRow)]
pub struct LeadRow {
    pub id: DbId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: String,
    pub campaign_source: Option<String>,
    pub product_interest: Option<String>,
    pub estimated_value: Option<f64>,
    pub heat_score: Option<i32>,
    pub team_id: Option<DbId>,
    pub tags: Vec<String>,
    pub status: String,
    pub distribution_state: String,
    pub assigned_agent_id: Option<DbId>,
    pub assigned_user_id: Option<DbId>,
    pub distribution_rule_id: Option<DbId>,
    pub needs_review: bool,
    pub external_id: Option<String>,
    pub archived_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<LeadRow> for Lead {
    type Error = StoreError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        Ok(Lead {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            phone: row.phone,
            company: row.company,
            source: parse_text("source", &row.source)?,
            campaign_source: row.campaign_source,
            product_interest: row.product_interest,
            estimated_value: row.estimated_value,
            heat_score: row.heat_score,
            team_id: row.team_id,
            tags: row.tags,
            status: parse_text("status", &row.status)?,
            distribution_state: parse_text("distribution_state", &row.distribution_state)?,
            assigned_agent_id: row.assigned_agent_id,
            assigned_user_id: row.assigned_user_id,
            distribution_rule_id: row.distribution_rule_id,
            needs_review: row.needs_review,
            external_id: row.external_id,
            archived_at: row.archived_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
