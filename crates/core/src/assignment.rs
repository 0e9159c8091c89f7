//! Assignment audit records.
//!
//! Every settled distribution pass writes exactly one [`AssignmentRecord`].
//! Records are write-once; a lead's history is its records ordered by id.

use serde::{Deserialize, Serialize};

use crate::lead::DistributionState;
use crate::rule::StrategyKind;
use crate::types::{DbId, Timestamp};

define_text_enum! {
    /// Result of one distribution pass (or manual override).
    AssignmentOutcome {
        /// A strategy picked an agent.
        Assigned = "assigned",
        /// The matched rule uses the manual strategy.
        PendingManual = "pending_manual",
        /// The matched rule had nobody eligible.
        NoEligibleAgent = "no_eligible_agent",
        /// No active rule matched the lead.
        Unmatched = "unmatched",
        /// Concurrent updates kept winning; flagged for operator review.
        ConflictUnresolved = "conflict_unresolved",
        /// A reviewer assigned the lead by hand.
        ManualOverride = "manual_override",
    }
}

impl AssignmentOutcome {
    /// Lead state after a pass with this outcome.
    pub fn resulting_state(self) -> DistributionState {
        match self {
            AssignmentOutcome::Assigned | AssignmentOutcome::ManualOverride => {
                DistributionState::Assigned
            }
            AssignmentOutcome::PendingManual | AssignmentOutcome::NoEligibleAgent => {
                DistributionState::PendingManual
            }
            AssignmentOutcome::Unmatched | AssignmentOutcome::ConflictUnresolved => {
                DistributionState::Unmatched
            }
        }
    }

    /// Whether the outcome hands the lead to an agent.
    pub fn is_assignment(self) -> bool {
        self.resulting_state() == DistributionState::Assigned
    }
}

/// Immutable audit entry for one distribution outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: DbId,
    pub lead_id: DbId,
    pub rule_id: Option<DbId>,
    pub agent_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub strategy: Option<StrategyKind>,
    pub outcome: AssignmentOutcome,
    /// Cursor value consumed by a rotating strategy.
    pub rotation_cursor: Option<i64>,
    pub created_at: Timestamp,
}
