//! Repository for `rotation_cursors`.

use leadroute_core::types::DbId;
use sqlx::{PgConnection, PgPool};

pub struct RotationRepo;

impl RotationRepo {
    /// Pool version and cursor for one rotation. `None` for an unknown rule;
    /// a rotation that has never advanced reads as cursor 0.
    pub async fn snapshot(
        pool: &PgPool,
        rule_id: DbId,
        team_key: DbId,
    ) -> Result<Option<(i64, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (i64, i64)>(
            "SELECT COALESCE(c.cursor, 0), r.pool_version \
             FROM distribution_rules r \
             LEFT JOIN rotation_cursors c ON c.rule_id = r.id AND c.team_key = $2 \
             WHERE r.id = $1",
        )
        .bind(rule_id)
        .bind(team_key)
        .fetch_optional(pool)
        .await
    }

    /// Advance the cursor from `expected` to `expected + 1`.
    ///
    /// Returns `false` when the cursor no longer holds `expected`. A
    /// concurrent advance blocks on the row lock and then sees the new
    /// value, so exactly one of two racing callers succeeds.
    pub async fn compare_and_advance(
        conn: &mut PgConnection,
        rule_id: DbId,
        team_key: DbId,
        expected: i64,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query(
            "INSERT INTO rotation_cursors (rule_id, team_key, cursor) VALUES ($1, $2, 0) \
             ON CONFLICT (rule_id, team_key) DO NOTHING",
        )
        .bind(rule_id)
        .bind(team_key)
        .execute(&mut *conn)
        .await?;

        let result = sqlx::query(
            "UPDATE rotation_cursors SET cursor = cursor + 1 \
             WHERE rule_id = $1 AND team_key = $2 AND cursor = $3",
        )
        .bind(rule_id)
        .bind(team_key)
        .bind(expected)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
