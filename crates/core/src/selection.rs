//! Agent selection arithmetic shared by the assignment strategies.
//!
//! Pure functions only; cursor persistence and randomness live in the engine.

use crate::agent::RuleAgent;
use crate::types::DbId;

/// Rotation key used for cursors that span a rule's whole pool.
pub const WHOLE_POOL_TEAM_KEY: DbId = 0;

// ---------------------------------------------------------------------------
// Round-robin
// ---------------------------------------------------------------------------

/// Map a rotation cursor onto a list of `len` agents.
///
/// The cursor only ever grows; taking it modulo the current length means a
/// shrinking pool never indexes out of bounds. Returns `None` for an empty
/// pool.
pub fn round_robin_index(cursor: i64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    Some(cursor.rem_euclid(len as i64) as usize)
}

/// Cursor key for a team-scoped rotation (`None` = whole pool).
pub fn rotation_team_key(team_id: Option<DbId>) -> DbId {
    team_id.unwrap_or(WHOLE_POOL_TEAM_KEY)
}

/// Agents belonging to `team_id`, preserving input order.
pub fn team_members(agents: &[RuleAgent], team_id: DbId) -> Vec<RuleAgent> {
    agents
        .iter()
        .filter(|a| a.team_id == Some(team_id))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Weighted
// ---------------------------------------------------------------------------

/// Running totals of `weights`; non-positive weights contribute nothing.
pub fn cumulative_weights(weights: &[i32]) -> Vec<u64> {
    let mut total = 0u64;
    weights
        .iter()
        .map(|&w| {
            total += w.max(0) as u64;
            total
        })
        .collect()
}

/// Pick the index whose cumulative band contains `draw`.
///
/// `draw` must lie in `[0, total)` where `total` is the last cumulative
/// value. Bands of zero width (zero-weight agents) can never be hit. Returns
/// `None` when the total is zero or the draw is out of range.
pub fn weighted_index(cumulative: &[u64], draw: u64) -> Option<usize> {
    let total = *cumulative.last()?;
    if total == 0 || draw >= total {
        return None;
    }
    Some(cumulative.partition_point(|&upper| upper <= draw))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
