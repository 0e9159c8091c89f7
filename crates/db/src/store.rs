//! The storage seam between the engine and its backends.
//!
//! Every method is a single atomic unit. Multi-step writes that must not
//! interleave (cursor advance + lead update + record insert) are one method
//! so each backend can make them atomic its own way.

use async_trait::async_trait;
use leadroute_core::agent::{CreateAgent, RuleAgent, UpdateAgent};
use leadroute_core::analytics::{AgentLoad, RecentDistribution, RuleStats, StateCount};
use leadroute_core::assignment::{AssignmentOutcome, AssignmentRecord};
use leadroute_core::lead::{DistributionState, Lead, LeadInput, LeadStatus};
use leadroute_core::rule::{DistributionRule, NewRule, RulePatch, RuleVersion, StrategyKind};
use leadroute_core::types::DbId;

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Commit payloads
// ---------------------------------------------------------------------------

/// Rotation state a strategy reads before picking an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationSnapshot {
    /// Number of picks already made from this rotation.
    pub cursor: i64,
    /// Version of the rule's agent pool when the cursor was read.
    pub pool_version: i64,
}

/// Cursor advance guarded by compare-and-swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorAdvance {
    pub team_key: DbId,
    /// Value the cursor must still hold; it becomes `expected + 1`.
    pub expected: i64,
}

/// An automatic assignment produced by a distribution pass.
///
/// Applied only if the lead is still `evaluating`, the rule's pool version is
/// still `expected_pool_version` and, for rotating strategies, the cursor is
/// still at `rotation.expected`. Otherwise nothing is written and the call
/// fails with [`StoreError::ConcurrentUpdateConflict`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentCommit {
    pub lead_id: DbId,
    pub rule_id: DbId,
    pub agent_id: DbId,
    pub user_id: DbId,
    pub strategy: StrategyKind,
    pub expected_pool_version: i64,
    pub rotation: Option<CursorAdvance>,
}

/// Any outcome other than an automatic assignment.
///
/// Pass outcomes require the lead to be `evaluating`. A
/// [`AssignmentOutcome::ManualOverride`] requires `agent` and may be applied
/// from any state that can transition to `assigned`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeCommit {
    pub lead_id: DbId,
    pub rule_id: Option<DbId>,
    pub strategy: Option<StrategyKind>,
    pub outcome: AssignmentOutcome,
    /// `(agent_id, user_id)` for a manual override.
    pub agent: Option<(DbId, DbId)>,
    pub needs_review: bool,
}

impl OutcomeCommit {
    pub fn new(lead_id: DbId, outcome: AssignmentOutcome) -> Self {
        Self {
            lead_id,
            rule_id: None,
            strategy: None,
            outcome,
            agent: None,
            needs_review: false,
        }
    }

    pub fn for_rule(mut self, rule: &DistributionRule) -> Self {
        self.rule_id = Some(rule.id);
        self.strategy = Some(rule.strategy);
        self
    }
}

/// Result of inserting a lead that may already exist.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertedLead {
    pub lead: Lead,
    /// `false` when `external_id` matched an existing lead.
    pub created: bool,
}

/// External edits to a lead that do not touch distribution.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeadPatch {
    pub status: Option<LeadStatus>,
    pub archived: Option<bool>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DistributionStore: Send + Sync {
    // -- rules ---------------------------------------------------------------

    /// Insert a rule at version 1 and record its first version snapshot.
    async fn insert_rule(&self, rule: &NewRule) -> StoreResult<DistributionRule>;

    /// Apply `patch`, bump the version, and record a snapshot.
    async fn update_rule(&self, id: DbId, patch: &RulePatch) -> StoreResult<DistributionRule>;

    /// Flip `is_active`, bump the version, and record a snapshot.
    async fn set_rule_active(&self, id: DbId, active: bool) -> StoreResult<DistributionRule>;

    async fn get_rule(&self, id: DbId) -> StoreResult<DistributionRule>;

    /// All rules, active or not, in ascending id order.
    async fn list_rules(&self) -> StoreResult<Vec<DistributionRule>>;

    /// Snapshots for one rule, oldest first.
    async fn list_rule_versions(&self, rule_id: DbId) -> StoreResult<Vec<RuleVersion>>;

    // -- agents --------------------------------------------------------------

    /// Add an agent to a rule's pool and bump the pool version.
    async fn insert_agent(&self, agent: &CreateAgent) -> StoreResult<RuleAgent>;

    /// Edit an agent entry and bump its rule's pool version.
    async fn update_agent(&self, id: DbId, patch: &UpdateAgent) -> StoreResult<RuleAgent>;

    async fn get_agent(&self, id: DbId) -> StoreResult<RuleAgent>;

    /// Every agent entry of a rule, active or not, in ascending id order.
    async fn list_agents(&self, rule_id: DbId) -> StoreResult<Vec<RuleAgent>>;

    /// Every agent entry of a user across all rules.
    async fn list_agents_by_user(&self, user_id: DbId) -> StoreResult<Vec<RuleAgent>>;

    // -- rotation ------------------------------------------------------------

    /// Current cursor and pool version for one rotation of a rule.
    async fn rotation_snapshot(&self, rule_id: DbId, team_key: DbId)
        -> StoreResult<RotationSnapshot>;

    // -- leads ---------------------------------------------------------------

    /// Insert an `unassigned` lead, or return the existing lead with the same
    /// `external_id`.
    async fn insert_lead(&self, input: &LeadInput) -> StoreResult<InsertedLead>;

    async fn get_lead(&self, id: DbId) -> StoreResult<Lead>;

    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>>;

    /// Non-archived leads in `state`, oldest first.
    async fn list_leads_by_state(&self, state: DistributionState) -> StoreResult<Vec<Lead>>;

    /// Non-archived leads currently held by `user_id`.
    async fn list_leads_assigned_to(&self, user_id: DbId) -> StoreResult<Vec<Lead>>;

    async fn update_lead(&self, id: DbId, patch: LeadPatch) -> StoreResult<Lead>;

    /// Move a lead to `to` if the state machine allows it from its current
    /// state. An illegal move is a [`StoreError::ConcurrentUpdateConflict`].
    async fn transition_lead(&self, id: DbId, to: DistributionState) -> StoreResult<Lead>;

    // -- assignments ---------------------------------------------------------

    /// Apply an automatic assignment atomically. See [`AssignmentCommit`].
    async fn commit_assignment(&self, commit: &AssignmentCommit)
        -> StoreResult<(Lead, AssignmentRecord)>;

    /// Settle a lead with a non-rotating outcome. See [`OutcomeCommit`].
    async fn record_outcome(&self, commit: &OutcomeCommit) -> StoreResult<(Lead, AssignmentRecord)>;

    /// A lead's records, oldest first.
    async fn list_assignment_records(&self, lead_id: DbId) -> StoreResult<Vec<AssignmentRecord>>;

    // -- summaries -----------------------------------------------------------

    async fn rule_stats(&self) -> StoreResult<Vec<RuleStats>>;

    async fn state_counts(&self) -> StoreResult<Vec<StateCount>>;

    /// Open (non-archived) lead counts per assigned user.
    async fn agent_load(&self) -> StoreResult<Vec<AgentLoad>>;

    /// The latest `limit` records that handed a lead to an agent, newest
    /// first, across all leads.
    async fn list_recent_assignments(&self, limit: i64) -> StoreResult<Vec<RecentDistribution>>;
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

/// Whether a lead in `current` may be settled with `outcome`.
pub(crate) fn check_outcome_transition(
    lead_id: DbId,
    current: DistributionState,
    outcome: AssignmentOutcome,
) -> StoreResult<()> {
    let allowed = if outcome == AssignmentOutcome::ManualOverride {
        leadroute_core::lead::state_machine::can_transition(current, DistributionState::Assigned)
    } else {
        current == DistributionState::Evaluating
    };
    if allowed {
        Ok(())
    } else {
        Err(StoreError::conflict(format!(
            "Lead {lead_id} is {current}; cannot record {outcome}"
        )))
    }
}

/// Validate the shape of an outcome commit before touching storage.
pub(crate) fn check_outcome_commit(commit: &OutcomeCommit) -> StoreResult<()> {
    match (commit.outcome, commit.agent) {
        (AssignmentOutcome::Assigned, _) => Err(StoreError::Invalid(
            "Automatic assignments go through commit_assignment".to_string(),
        )),
        (AssignmentOutcome::ManualOverride, None) => Err(StoreError::Invalid(
            "A manual override needs an agent".to_string(),
        )),
        (outcome, Some(_)) if outcome != AssignmentOutcome::ManualOverride => Err(
            StoreError::Invalid(format!("Outcome {outcome} cannot carry an agent")),
        ),
        _ => Ok(()),
    }
}
