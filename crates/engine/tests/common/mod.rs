#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use leadroute_core::agent::{CreateAgent, RuleAgent, UpdateAgent};
use leadroute_core::analytics::{AgentLoad, RecentDistribution, RuleStats, StateCount};
use leadroute_core::assignment::AssignmentRecord;
use leadroute_core::lead::{DistributionState, Lead, LeadInput, LeadSource};
use leadroute_core::rule::{DistributionRule, NewRule, RulePatch, RuleVersion};
use leadroute_core::types::DbId;
use leadroute_db::store::{
    AssignmentCommit, InsertedLead, LeadPatch, OutcomeCommit, RotationSnapshot,
};
use leadroute_db::{DistributionStore, MemoryStore, StoreError, StoreResult};
use leadroute_engine::{EngineConfig, Orchestrator, StrategyRegistry};
use leadroute_events::EventBus;

pub fn test_config() -> EngineConfig {
    EngineConfig {
        evaluation_timeout: Duration::from_millis(500),
        conflict_backoff: Duration::from_millis(1),
        ..Default::default()
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<EventBus>,
}

/// Orchestrator over an in-memory store with seeded weighted draws.
pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let bus = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::new(store.clone(), Arc::clone(&bus), &config)
        .with_strategies(StrategyRegistry::seeded(17));
    Harness {
        orchestrator,
        store,
        bus,
    }
}

pub fn lead(first_name: &str) -> LeadInput {
    LeadInput {
        first_name: first_name.to_string(),
        last_name: "Prospect".to_string(),
        source: Some(LeadSource::Website),
        ..Default::default()
    }
}

pub fn agent(rule_id: DbId, user_id: DbId) -> CreateAgent {
    CreateAgent::new(rule_id, user_id, format!("user-{user_id}"))
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Delegates to [`MemoryStore`], optionally stalling rule or lead reads and
/// losing assignment races.
pub struct FaultyStore {
    pub inner: MemoryStore,
    stall: AtomicBool,
    stall_lead_reads: AtomicBool,
    lose_races: AtomicBool,
    rival_wins: AtomicBool,
    delay: Duration,
}

impl FaultyStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStore::new(),
            stall: AtomicBool::new(false),
            stall_lead_reads: AtomicBool::new(false),
            lose_races: AtomicBool::new(false),
            rival_wins: AtomicBool::new(false),
            delay,
        }
    }

    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    pub fn set_stall_lead_reads(&self, stall: bool) {
        self.stall_lead_reads.store(stall, Ordering::SeqCst);
    }

    pub fn set_lose_races(&self, lose: bool) {
        self.lose_races.store(lose, Ordering::SeqCst);
    }

    /// Commits go through but report a conflict, as if a rival pass wrote
    /// the same assignment first.
    pub fn set_rival_wins(&self, rival: bool) {
        self.rival_wins.store(rival, Ordering::SeqCst);
    }
}

#[async_trait]
impl DistributionStore for FaultyStore {
    async fn insert_rule(&self, rule: &NewRule) -> StoreResult<DistributionRule> {
        self.inner.insert_rule(rule).await
    }

    async fn update_rule(&self, id: DbId, patch: &RulePatch) -> StoreResult<DistributionRule> {
        self.inner.update_rule(id, patch).await
    }

    async fn set_rule_active(&self, id: DbId, active: bool) -> StoreResult<DistributionRule> {
        self.inner.set_rule_active(id, active).await
    }

    async fn get_rule(&self, id: DbId) -> StoreResult<DistributionRule> {
        self.inner.get_rule(id).await
    }

    async fn list_rules(&self) -> StoreResult<Vec<DistributionRule>> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.list_rules().await
    }

    async fn list_rule_versions(&self, rule_id: DbId) -> StoreResult<Vec<RuleVersion>> {
        self.inner.list_rule_versions(rule_id).await
    }

    async fn insert_agent(&self, agent: &CreateAgent) -> StoreResult<RuleAgent> {
        self.inner.insert_agent(agent).await
    }

    async fn update_agent(&self, id: DbId, patch: &UpdateAgent) -> StoreResult<RuleAgent> {
        self.inner.update_agent(id, patch).await
    }

    async fn get_agent(&self, id: DbId) -> StoreResult<RuleAgent> {
        self.inner.get_agent(id).await
    }

    async fn list_agents(&self, rule_id: DbId) -> StoreResult<Vec<RuleAgent>> {
        self.inner.list_agents(rule_id).await
    }

    async fn list_agents_by_user(&self, user_id: DbId) -> StoreResult<Vec<RuleAgent>> {
        self.inner.list_agents_by_user(user_id).await
    }

    async fn rotation_snapshot(
        &self,
        rule_id: DbId,
        team_key: DbId,
    ) -> StoreResult<RotationSnapshot> {
        self.inner.rotation_snapshot(rule_id, team_key).await
    }

    async fn insert_lead(&self, input: &LeadInput) -> StoreResult<InsertedLead> {
        self.inner.insert_lead(input).await
    }

    async fn get_lead(&self, id: DbId) -> StoreResult<Lead> {
        if self.stall_lead_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.get_lead(id).await
    }

    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>> {
        self.inner.find_lead_by_external_id(external_id).await
    }

    async fn list_leads_by_state(&self, state: DistributionState) -> StoreResult<Vec<Lead>> {
        self.inner.list_leads_by_state(state).await
    }

    async fn list_leads_assigned_to(&self, user_id: DbId) -> StoreResult<Vec<Lead>> {
        self.inner.list_leads_assigned_to(user_id).await
    }

    async fn update_lead(&self, id: DbId, patch: LeadPatch) -> StoreResult<Lead> {
        self.inner.update_lead(id, patch).await
    }

    async fn transition_lead(&self, id: DbId, to: DistributionState) -> StoreResult<Lead> {
        self.inner.transition_lead(id, to).await
    }

    async fn commit_assignment(
        &self,
        commit: &AssignmentCommit,
    ) -> StoreResult<(Lead, AssignmentRecord)> {
        if self.lose_races.load(Ordering::SeqCst) {
            return Err(StoreError::conflict("Cursor moved"));
        }
        if self.rival_wins.load(Ordering::SeqCst) {
            self.inner.commit_assignment(commit).await?;
            return Err(StoreError::conflict("Lead is no longer evaluating"));
        }
        self.inner.commit_assignment(commit).await
    }

    async fn record_outcome(
        &self,
        commit: &OutcomeCommit,
    ) -> StoreResult<(Lead, AssignmentRecord)> {
        self.inner.record_outcome(commit).await
    }

    async fn list_assignment_records(&self, lead_id: DbId) -> StoreResult<Vec<AssignmentRecord>> {
        self.inner.list_assignment_records(lead_id).await
    }

    async fn rule_stats(&self) -> StoreResult<Vec<RuleStats>> {
        self.inner.rule_stats().await
    }

    async fn state_counts(&self) -> StoreResult<Vec<StateCount>> {
        self.inner.state_counts().await
    }

    async fn agent_load(&self) -> StoreResult<Vec<AgentLoad>> {
        self.inner.agent_load().await
    }

    async fn list_recent_assignments(&self, limit: i64) -> StoreResult<Vec<RecentDistribution>> {
        self.inner.list_recent_assignments(limit).await
    }
}

/// Orchestrator over a [`FaultyStore`] with a short pass timeout.
pub fn faulty_harness(delay: Duration) -> (Orchestrator, Arc<FaultyStore>, Arc<EventBus>) {
    faulty_harness_with(
        delay,
        EngineConfig {
            evaluation_timeout: Duration::from_millis(50),
            ..test_config()
        },
    )
}

pub fn faulty_harness_with(
    delay: Duration,
    config: EngineConfig,
) -> (Orchestrator, Arc<FaultyStore>, Arc<EventBus>) {
    let store = Arc::new(FaultyStore::new(delay));
    let bus = Arc::new(EventBus::default());
    let orchestrator = Orchestrator::new(store.clone(), Arc::clone(&bus), &config);
    (orchestrator, store, bus)
}
