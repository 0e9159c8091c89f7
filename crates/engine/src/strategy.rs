//! Assignment strategies.
//!
//! A strategy only chooses; it never writes. Rotating strategies read the
//! cursor the orchestrator snapshotted and the orchestrator commits the
//! advance, so a lost race simply discards the choice.

use std::collections::HashMap;
use std::sync::Arc;

use leadroute_core::agent::RuleAgent;
use leadroute_core::lead::Lead;
use leadroute_core::rule::{DistributionRule, StrategyKind};
use leadroute_core::selection::{
    cumulative_weights, round_robin_index, team_members, weighted_index, WHOLE_POOL_TEAM_KEY,
};
use leadroute_core::types::DbId;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// What a strategy decided for one lead.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Agent(RuleAgent),
    /// The pool (or the lead's slice of it) has nobody to pick.
    NoEligibleAgent,
    /// The rule leaves the choice to a human.
    Manual,
}

pub trait AssignmentStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Cursor this strategy rotates for `lead`, or `None` if it keeps none.
    fn rotation_key(&self, _lead: &Lead) -> Option<DbId> {
        None
    }

    /// Pick an agent from `eligible` (active, ascending id).
    fn select_agent(
        &self,
        rule: &DistributionRule,
        eligible: &[RuleAgent],
        lead: &Lead,
        cursor: i64,
    ) -> Selection;
}

fn rotate(agents: &[RuleAgent], cursor: i64) -> Selection {
    match round_robin_index(cursor, agents.len()) {
        Some(index) => Selection::Agent(agents[index].clone()),
        None => Selection::NoEligibleAgent,
    }
}

// ---------------------------------------------------------------------------
// Round-robin
// ---------------------------------------------------------------------------

pub struct RoundRobin;

impl AssignmentStrategy for RoundRobin {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    fn rotation_key(&self, _lead: &Lead) -> Option<DbId> {
        Some(WHOLE_POOL_TEAM_KEY)
    }

    fn select_agent(
        &self,
        _rule: &DistributionRule,
        eligible: &[RuleAgent],
        _lead: &Lead,
        cursor: i64,
    ) -> Selection {
        rotate(eligible, cursor)
    }
}

// ---------------------------------------------------------------------------
// Weighted
// ---------------------------------------------------------------------------

/// Random draw proportional to agent weight.
pub struct Weighted {
    rng: Mutex<StdRng>,
}

impl Weighted {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Reproducible draws for tests and simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for Weighted {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentStrategy for Weighted {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Weighted
    }

    fn select_agent(
        &self,
        _rule: &DistributionRule,
        eligible: &[RuleAgent],
        _lead: &Lead,
        _cursor: i64,
    ) -> Selection {
        let weights: Vec<i32> = eligible.iter().map(|a| a.weight).collect();
        let cumulative = cumulative_weights(&weights);
        let total = cumulative.last().copied().unwrap_or(0);
        if total == 0 {
            return Selection::NoEligibleAgent;
        }
        let draw = self.rng.lock().random_range(0..total);
        match weighted_index(&cumulative, draw) {
            Some(index) => Selection::Agent(eligible[index].clone()),
            None => Selection::NoEligibleAgent,
        }
    }
}

// ---------------------------------------------------------------------------
// Team-based
// ---------------------------------------------------------------------------

/// Round-robin within the lead's team, one cursor per team.
pub struct TeamBased;

impl AssignmentStrategy for TeamBased {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TeamBased
    }

    fn rotation_key(&self, lead: &Lead) -> Option<DbId> {
        lead.team_id
    }

    fn select_agent(
        &self,
        _rule: &DistributionRule,
        eligible: &[RuleAgent],
        lead: &Lead,
        cursor: i64,
    ) -> Selection {
        let Some(team_id) = lead.team_id else {
            return Selection::NoEligibleAgent;
        };
        rotate(&team_members(eligible, team_id), cursor)
    }
}

// ---------------------------------------------------------------------------
// Manual
// ---------------------------------------------------------------------------

pub struct Manual;

impl AssignmentStrategy for Manual {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Manual
    }

    fn select_agent(
        &self,
        _rule: &DistributionRule,
        _eligible: &[RuleAgent],
        _lead: &Lead,
        _cursor: i64,
    ) -> Selection {
        Selection::Manual
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Strategy implementations keyed by [`StrategyKind`].
#[derive(Clone)]
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn AssignmentStrategy>>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// All four built-in strategies, weighted draws seeded from the OS.
    pub fn standard() -> Self {
        Self::empty()
            .with(RoundRobin)
            .with(Weighted::new())
            .with(TeamBased)
            .with(Manual)
    }

    /// Built-ins with a deterministic weighted strategy.
    pub fn seeded(seed: u64) -> Self {
        Self::standard().with(Weighted::seeded(seed))
    }

    /// Register `strategy`, replacing any existing one of the same kind.
    pub fn with(mut self, strategy: impl AssignmentStrategy + 'static) -> Self {
        self.strategies.insert(strategy.kind(), Arc::new(strategy));
        self
    }

    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn AssignmentStrategy>> {
        self.strategies.get(&kind).cloned()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadroute_core::condition::Condition;
    use leadroute_core::lead::{DistributionState, LeadSource, LeadStatus};
    use leadroute_core::rule::SourceFilter;

    fn rule(strategy: StrategyKind) -> DistributionRule {
        DistributionRule {
            id: 1,
            name: "rule".to_string(),
            source: SourceFilter::Any,
            condition: Condition::always(),
            strategy,
            priority: 1,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn agent(id: DbId, weight: i32, team_id: Option<DbId>) -> RuleAgent {
        RuleAgent {
            id,
            rule_id: 1,
            user_id: id * 100,
            display_name: format!("agent-{id}"),
            team_id,
            weight,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn lead(team_id: Option<DbId>) -> Lead {
        Lead {
            id: 1,
            first_name: "Emma".to_string(),
            last_name: "Davis".to_string(),
            email: None,
            phone: None,
            company: None,
            source: LeadSource::Website,
            campaign_source: None,
            product_interest: None,
            estimated_value: None,
            heat_score: None,
            team_id,
            tags: Vec::new(),
            status: LeadStatus::New,
            distribution_state: DistributionState::Evaluating,
            assigned_agent_id: None,
            assigned_user_id: None,
            distribution_rule_id: None,
            needs_review: false,
            external_id: None,
            archived_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn picked(selection: Selection) -> Option<DbId> {
        match selection {
            Selection::Agent(agent) => Some(agent.id),
            _ => None,
        }
    }

    // -- round-robin ----------------------------------------------------------

    #[test]
    fn round_robin_follows_cursor() {
        let agents = vec![agent(1, 1, None), agent(2, 1, None)];
        let r = rule(StrategyKind::RoundRobin);
        let picks: Vec<Option<DbId>> = (0..3)
            .map(|c| picked(RoundRobin.select_agent(&r, &agents, &lead(None), c)))
            .collect();
        assert_eq!(picks, vec![Some(1), Some(2), Some(1)]);
    }

    #[test]
    fn round_robin_empty_pool() {
        let r = rule(StrategyKind::RoundRobin);
        assert_eq!(
            RoundRobin.select_agent(&r, &[], &lead(None), 0),
            Selection::NoEligibleAgent
        );
    }

    // -- weighted -------------------------------------------------------------

    #[test]
    fn weighted_converges_to_weights() {
        let agents = vec![agent(1, 3, None), agent(2, 1, None), agent(3, 0, None)];
        let r = rule(StrategyKind::Weighted);
        let strategy = Weighted::seeded(7);
        let draws = 20_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            let id = picked(strategy.select_agent(&r, &agents, &lead(None), 0)).unwrap();
            counts[(id - 1) as usize] += 1;
        }
        let share = counts[0] as f64 / draws as f64;
        assert!((share - 0.75).abs() < 0.02, "share was {share}");
        assert_eq!(counts[2], 0, "zero-weight agent must never be drawn");
    }

    #[test]
    fn weighted_all_zero_is_no_eligible_agent() {
        let agents = vec![agent(1, 0, None)];
        let r = rule(StrategyKind::Weighted);
        assert_eq!(
            Weighted::seeded(1).select_agent(&r, &agents, &lead(None), 0),
            Selection::NoEligibleAgent
        );
    }

    #[test]
    fn seeded_weighted_is_reproducible() {
        let agents = vec![agent(1, 1, None), agent(2, 1, None), agent(3, 1, None)];
        let r = rule(StrategyKind::Weighted);
        let run = |seed| {
            let strategy = Weighted::seeded(seed);
            (0..20)
                .map(|_| picked(strategy.select_agent(&r, &agents, &lead(None), 0)))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
    }

    // -- team-based -----------------------------------------------------------

    #[test]
    fn team_based_stays_within_team() {
        let agents = vec![agent(1, 1, Some(10)), agent(2, 1, Some(20)), agent(3, 1, Some(10))];
        let r = rule(StrategyKind::TeamBased);
        let picks: Vec<Option<DbId>> = (0..3)
            .map(|c| picked(TeamBased.select_agent(&r, &agents, &lead(Some(10)), c)))
            .collect();
        assert_eq!(picks, vec![Some(1), Some(3), Some(1)]);
        assert_eq!(TeamBased.rotation_key(&lead(Some(10))), Some(10));
    }

    #[test]
    fn team_based_without_team_has_nobody() {
        let agents = vec![agent(1, 1, Some(10))];
        let r = rule(StrategyKind::TeamBased);
        assert_eq!(
            TeamBased.select_agent(&r, &agents, &lead(None), 0),
            Selection::NoEligibleAgent
        );
    }

    // -- manual / registry ----------------------------------------------------

    #[test]
    fn manual_never_picks() {
        let agents = vec![agent(1, 1, None)];
        let r = rule(StrategyKind::Manual);
        assert_eq!(Manual.select_agent(&r, &agents, &lead(None), 0), Selection::Manual);
    }

    #[test]
    fn standard_registry_covers_every_kind() {
        let registry = StrategyRegistry::standard();
        for kind in StrategyKind::ALL {
            assert_eq!(registry.get(*kind).map(|s| s.kind()), Some(*kind));
        }
    }
}
