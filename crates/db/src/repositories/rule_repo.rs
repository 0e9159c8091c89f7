//! Repository for `distribution_rules` and `distribution_rule_versions`.

use leadroute_core::rule::{DistributionRule, NewRule, RuleVersion};
use leadroute_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::rule::{RuleRow, RuleVersionRow};

/// Column list for `distribution_rules` queries.
const COLUMNS: &str = "\
    id, name, source, condition, strategy, priority, is_active, \
    version, pool_version, created_at, updated_at";

/// Column list for `distribution_rule_versions` queries.
const VERSION_COLUMNS: &str = "rule_id, version, snapshot, created_at";

pub struct RuleRepo;

impl RuleRepo {
    pub async fn insert(
        conn: &mut PgConnection,
        rule: &NewRule,
        condition: &serde_json::Value,
    ) -> Result<RuleRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO distribution_rules (name, source, condition, strategy, priority, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RuleRow>(&query)
            .bind(&rule.name)
            .bind(rule.source.as_str())
            .bind(condition)
            .bind(rule.strategy.as_str())
            .bind(rule.priority)
            .bind(rule.is_active)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<RuleRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM distribution_rules WHERE id = $1");
        sqlx::query_as::<_, RuleRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock a rule row for an edit.
    pub async fn find_for_update(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<RuleRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM distribution_rules WHERE id = $1 FOR UPDATE");
        sqlx::query_as::<_, RuleRow>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// All rules in ascending id order.
    pub async fn list(pool: &PgPool) -> Result<Vec<RuleRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM distribution_rules ORDER BY id");
        sqlx::query_as::<_, RuleRow>(&query).fetch_all(pool).await
    }

    /// Persist an edited rule. The caller has already bumped `version`.
    pub async fn save(
        conn: &mut PgConnection,
        rule: &DistributionRule,
        condition: &serde_json::Value,
    ) -> Result<RuleRow, sqlx::Error> {
        let query = format!(
            "UPDATE distribution_rules SET \
                name = $2, source = $3, condition = $4, strategy = $5, \
                priority = $6, is_active = $7, version = $8, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RuleRow>(&query)
            .bind(rule.id)
            .bind(&rule.name)
            .bind(rule.source.as_str())
            .bind(condition)
            .bind(rule.strategy.as_str())
            .bind(rule.priority)
            .bind(rule.is_active)
            .bind(rule.version)
            .fetch_one(conn)
            .await
    }

    pub async fn insert_version(
        conn: &mut PgConnection,
        version: &RuleVersion,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO distribution_rule_versions (rule_id, version, snapshot, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(version.rule_id)
        .bind(version.version)
        .bind(&version.snapshot)
        .bind(version.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Version snapshots of one rule, oldest first.
    pub async fn list_versions(
        pool: &PgPool,
        rule_id: DbId,
    ) -> Result<Vec<RuleVersionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {VERSION_COLUMNS} FROM distribution_rule_versions \
             WHERE rule_id = $1 ORDER BY version"
        );
        sqlx::query_as::<_, RuleVersionRow>(&query)
            .bind(rule_id)
            .fetch_all(pool)
            .await
    }

    /// Increment the pool version. Returns `None` for an unknown rule.
    pub async fn bump_pool_version(
        conn: &mut PgConnection,
        rule_id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "UPDATE distribution_rules SET pool_version = pool_version + 1 \
             WHERE id = $1 RETURNING pool_version",
        )
        .bind(rule_id)
        .fetch_optional(conn)
        .await
    }

    /// Read the pool version and hold a share lock until the transaction
    /// ends, so no pool edit can commit underneath an assignment.
    pub async fn lock_pool_version(
        conn: &mut PgConnection,
        rule_id: DbId,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT pool_version FROM distribution_rules WHERE id = $1 FOR SHARE",
        )
        .bind(rule_id)
        .fetch_optional(conn)
        .await
    }
}
