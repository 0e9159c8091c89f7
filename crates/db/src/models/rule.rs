//! Rows of `distribution_rules`, `distribution_rule_versions` and `rule_stats`.

use leadroute_core::analytics::RuleStats;
use leadroute_core::rule::{DistributionRule, RuleVersion};
use leadroute_core::types::{DbId, Timestamp};
use sqlx::FromRow;

use super::parse_text;
use crate::error::StoreError;

/// A row from the `distribution_rules` table.
#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    pub id: DbId,
    pub name: String,
    pub source: String,
    pub condition: serde_json::Value,
    pub strategy: String,
    pub priority: i32,
    pub is_active: bool,
    pub version: i32,
    pub pool_version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<RuleRow> for DistributionRule {
    type Error = StoreError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        let condition = serde_json::from_value(row.condition).map_err(|e| {
            StoreError::Invalid(format!("condition of rule {}: {e}", row.id))
        })?;
        Ok(DistributionRule {
            id: row.id,
            name: row.name,
            source: parse_text("source", &row.source)?,
            condition,
            strategy: parse_text("strategy", &row.strategy)?,
            priority: row.priority,
            is_active: row.is_active,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A row from the `distribution_rule_versions` table.
#[derive(Debug, Clone, FromRow)]
pub struct RuleVersionRow {
    pub rule_id: DbId,
    pub version: i32,
    pub snapshot: serde_json::Value,
    pub created_at: Timestamp,
}

impl From<RuleVersionRow> for RuleVersion {
    fn from(row: RuleVersionRow) -> Self {
        RuleVersion {
            rule_id: row.rule_id,
            version: row.version,
            snapshot: row.snapshot,
            created_at: row.created_at,
        }
    }
}

/// A row from the `rule_stats` table.
#[derive(Debug, Clone, FromRow)]
pub struct RuleStatsRow {
    pub rule_id: DbId,
    pub leads_assigned: i64,
    pub leads_pending_manual: i64,
    pub last_assigned_at: Option<Timestamp>,
}

impl From<RuleStatsRow> for RuleStats {
    fn from(row: RuleStatsRow) -> Self {
        RuleStats {
            rule_id: row.rule_id,
            leads_assigned: row.leads_assigned,
            leads_pending_manual: row.leads_pending_manual,
            last_assigned_at: row.last_assigned_at,
        }
    }
}
