//! Distribution orchestrator.
//!
//! Drives each lead through `unassigned -> evaluating -> assigned |
//! pending_manual | unmatched`. A pass scans the active rules in evaluation
//! order, hands the first match to its strategy, and settles the lead with a
//! single atomic store write. Losing a concurrent race retries the whole pass
//! after a short backoff; losing again flags the lead for review.

use std::sync::Arc;
use std::time::Duration;

use leadroute_core::agent::RuleAgent;
use leadroute_core::assignment::{AssignmentOutcome, AssignmentRecord};
use leadroute_core::condition::evaluate;
use leadroute_core::error::CoreError;
use leadroute_core::lead::{DistributionState, Lead, LeadInput, LeadStatus};
use leadroute_core::rule::DistributionRule;
use leadroute_core::selection::WHOLE_POOL_TEAM_KEY;
use leadroute_core::types::DbId;
use leadroute_db::store::{AssignmentCommit, CursorAdvance, LeadPatch, OutcomeCommit};
use leadroute_db::DistributionStore;
use leadroute_events::{event_types, DistributionEvent, EventBus};
use tracing::instrument;
use uuid::Uuid;

use crate::agent_pool::AgentPool;
use crate::analytics::DistributionAnalytics;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::rule_store::RuleStore;
use crate::strategy::{Selection, StrategyRegistry};

/// A settled lead together with the record that settled it.
#[derive(Debug, Clone, PartialEq)]
pub struct Settled {
    pub lead: Lead,
    pub record: AssignmentRecord,
}

impl Settled {
    pub fn outcome(&self) -> AssignmentOutcome {
        self.record.outcome
    }
}

pub struct Orchestrator {
    store: Arc<dyn DistributionStore>,
    bus: Arc<EventBus>,
    rules: Arc<RuleStore>,
    agents: Arc<AgentPool>,
    strategies: StrategyRegistry,
    evaluation_timeout: Duration,
    conflict_backoff: Duration,
    conflict_retries: u32,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn DistributionStore>, bus: Arc<EventBus>, config: &EngineConfig) -> Self {
        Self {
            rules: Arc::new(RuleStore::new(Arc::clone(&store), Arc::clone(&bus))),
            agents: Arc::new(AgentPool::new(Arc::clone(&store))),
            store,
            bus,
            strategies: StrategyRegistry::standard(),
            evaluation_timeout: config.evaluation_timeout,
            conflict_backoff: config.conflict_backoff,
            conflict_retries: config.conflict_retries,
        }
    }

    /// Replace the strategy set (e.g. with a seeded weighted strategy).
    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn agents(&self) -> &AgentPool {
        &self.agents
    }

    pub fn analytics(&self) -> DistributionAnalytics {
        DistributionAnalytics::new(Arc::clone(&self.store), Arc::clone(&self.agents))
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Store a new lead and distribute it.
    ///
    /// A re-delivered lead (same `external_id`) returns the existing id and is
    /// not distributed again. A pass that times out leaves the lead
    /// `evaluating` for [`resume_evaluating`](Self::resume_evaluating) and
    /// still returns its id.
    pub async fn ingest_lead(&self, input: LeadInput) -> EngineResult<DbId> {
        let input = input.validated()?;
        let inserted = self.store.insert_lead(&input).await?;
        let lead_id = inserted.lead.id;
        if !inserted.created {
            tracing::info!(
                lead_id,
                external_id = ?inserted.lead.external_id,
                "Duplicate lead delivery ignored",
            );
            return Ok(lead_id);
        }
        tracing::info!(lead_id, source = %inserted.lead.source, "Lead ingested");

        match self.distribute(lead_id).await {
            Ok(_) => Ok(lead_id),
            Err(EngineError::Timeout { .. }) => Ok(lead_id),
            Err(e) => Err(e),
        }
    }

    /// Run one distribution pass for `lead_id`.
    ///
    /// The lead enters `evaluating` before the configured timeout starts, so
    /// a pass that times out always leaves it where
    /// [`resume_evaluating`](Self::resume_evaluating) finds it.
    pub async fn distribute(&self, lead_id: DbId) -> EngineResult<Settled> {
        self.ensure_not_archived(lead_id).await?;
        let lead = self
            .store
            .transition_lead(lead_id, DistributionState::Evaluating)
            .await?;

        match tokio::time::timeout(self.evaluation_timeout, self.run_pass(lead)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.evaluation_timeout.as_millis() as u64;
                tracing::warn!(lead_id, timeout_ms, "Distribution pass timed out");
                Err(EngineError::Timeout {
                    lead_id,
                    timeout_ms,
                })
            }
        }
    }

    /// Send an already distributed lead through a fresh pass. Earlier
    /// records are kept.
    pub async fn reassign(&self, lead_id: DbId) -> EngineResult<Settled> {
        tracing::info!(lead_id, "Reassignment requested");
        self.distribute(lead_id).await
    }

    /// Reviewer override: hand the lead to a specific agent entry.
    pub async fn assign_manually(&self, lead_id: DbId, agent_id: DbId) -> EngineResult<Settled> {
        let agent = self.agents.get_agent(agent_id).await?;
        if !agent.is_active {
            return Err(CoreError::Validation(format!("Agent {agent_id} is not active")).into());
        }
        self.ensure_not_archived(lead_id).await?;

        let mut commit = OutcomeCommit::new(lead_id, AssignmentOutcome::ManualOverride);
        commit.rule_id = Some(agent.rule_id);
        commit.agent = Some((agent.id, agent.user_id));
        let (lead, record) = self.store.record_outcome(&commit).await?;
        tracing::info!(
            lead_id,
            agent_id,
            user_id = agent.user_id,
            "Lead assigned manually",
        );
        let settled = Settled { lead, record };
        self.publish(&settled);
        Ok(settled)
    }

    /// An agent leaves: pull the user out of every pool, then redistribute
    /// each open lead they hold. Returns the redistributed leads.
    pub async fn release_agent(&self, user_id: DbId) -> EngineResult<Vec<Settled>> {
        self.agents.deactivate_user(user_id).await?;
        let held = self.store.list_leads_assigned_to(user_id).await?;
        tracing::info!(user_id, leads = held.len(), "Redistributing leads of departed agent");

        let mut settled = Vec::with_capacity(held.len());
        for lead in held {
            match self.distribute(lead.id).await {
                Ok(result) => settled.push(result),
                Err(EngineError::Timeout { .. }) => {
                    tracing::warn!(
                        lead_id = lead.id,
                        user_id,
                        "Redistribution timed out, lead left for resume",
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(settled)
    }

    /// Re-run leads left `evaluating` by a timed-out or interrupted pass.
    pub async fn resume_evaluating(&self) -> EngineResult<Vec<Settled>> {
        let stuck = self
            .store
            .list_leads_by_state(DistributionState::Evaluating)
            .await?;
        if !stuck.is_empty() {
            tracing::info!(leads = stuck.len(), "Resuming interrupted distribution passes");
        }
        let mut settled = Vec::with_capacity(stuck.len());
        for lead in stuck {
            match self.distribute(lead.id).await {
                Ok(result) => settled.push(result),
                Err(EngineError::Timeout { .. }) => {
                    tracing::warn!(lead_id = lead.id, "Resumed pass timed out again, lead left evaluating");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(settled)
    }

    // -----------------------------------------------------------------------
    // External edits
    // -----------------------------------------------------------------------

    /// Archive a lead. Archived leads are never redistributed.
    pub async fn archive_lead(&self, lead_id: DbId) -> EngineResult<Lead> {
        let lead = self
            .store
            .update_lead(
                lead_id,
                LeadPatch {
                    archived: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(lead_id, "Lead archived");
        Ok(lead)
    }

    pub async fn update_lead_status(&self, lead_id: DbId, status: LeadStatus) -> EngineResult<Lead> {
        let lead = self
            .store
            .update_lead(
                lead_id,
                LeadPatch {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!(lead_id, status = %status, "Lead status updated");
        Ok(lead)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_lead(&self, lead_id: DbId) -> EngineResult<Lead> {
        Ok(self.store.get_lead(lead_id).await?)
    }

    /// Every record of a lead, oldest first.
    pub async fn get_assignment_history(&self, lead_id: DbId) -> EngineResult<Vec<AssignmentRecord>> {
        self.store.get_lead(lead_id).await?;
        Ok(self.store.list_assignment_records(lead_id).await?)
    }

    /// The agent entry currently holding the lead, if any.
    pub async fn get_current_assignment(&self, lead_id: DbId) -> EngineResult<Option<RuleAgent>> {
        let lead = self.store.get_lead(lead_id).await?;
        match (lead.distribution_state, lead.assigned_agent_id) {
            (DistributionState::Assigned, Some(agent_id)) => {
                Ok(Some(self.store.get_agent(agent_id).await?))
            }
            _ => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Pass
    // -----------------------------------------------------------------------

    #[instrument(skip(self, lead), fields(lead_id = lead.id, pass_id = %Uuid::now_v7()))]
    async fn run_pass(&self, mut lead: Lead) -> EngineResult<Settled> {
        let lead_id = lead.id;
        let mut attempt = 0;
        loop {
            match self.evaluate_once(&lead).await {
                Ok(settled) => {
                    self.publish(&settled);
                    return Ok(settled);
                }
                Err(e) if e.is_conflict() && attempt < self.conflict_retries => {
                    attempt += 1;
                    tracing::warn!(lead_id, attempt, error = %e, "Concurrent update, retrying pass");
                    tokio::time::sleep(self.conflict_backoff).await;
                    lead = self.store.get_lead(lead_id).await?;
                    if let Some(settled) = self.settled_elsewhere(&lead).await? {
                        return Ok(settled);
                    }
                }
                Err(e) if e.is_conflict() => {
                    let lead = self.store.get_lead(lead_id).await?;
                    if let Some(settled) = self.settled_elsewhere(&lead).await? {
                        return Ok(settled);
                    }
                    tracing::error!(lead_id, error = %e, "Concurrent updates kept winning, flagging lead for review");
                    let mut commit =
                        OutcomeCommit::new(lead_id, AssignmentOutcome::ConflictUnresolved);
                    commit.needs_review = true;
                    let (lead, record) = self.store.record_outcome(&commit).await?;
                    let settled = Settled { lead, record };
                    self.publish(&settled);
                    return Ok(settled);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Scan the rules once and settle the lead.
    async fn evaluate_once(&self, lead: &Lead) -> EngineResult<Settled> {
        let rules = self.rules.list_active_rules_ordered_by_priority().await?;
        for rule in rules.iter() {
            if !rule.source.accepts(lead.source) {
                continue;
            }
            match evaluate(&rule.condition, lead) {
                Ok(true) => return self.apply_rule(rule, lead).await,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        lead_id = lead.id,
                        rule_id = rule.id,
                        error = %e,
                        "Rule condition could not be evaluated, skipping rule",
                    );
                }
            }
        }

        let (lead, record) = self
            .store
            .record_outcome(&OutcomeCommit::new(lead.id, AssignmentOutcome::Unmatched))
            .await?;
        tracing::info!(lead_id = lead.id, outcome = %record.outcome, "No rule matched lead");
        Ok(Settled { lead, record })
    }

    async fn apply_rule(&self, rule: &DistributionRule, lead: &Lead) -> EngineResult<Settled> {
        let strategy = self.strategies.get(rule.strategy).ok_or_else(|| {
            CoreError::Internal(format!("No strategy registered for {}", rule.strategy))
        })?;
        let rotation_key = strategy.rotation_key(lead);

        // Snapshot first: a pool edit after this point bumps the pool version
        // and fails the commit.
        let snapshot = self
            .store
            .rotation_snapshot(rule.id, rotation_key.unwrap_or(WHOLE_POOL_TEAM_KEY))
            .await?;
        let eligible = self.agents.eligible_agents(rule.id).await?;

        let (lead, record) = match strategy.select_agent(rule, &eligible, lead, snapshot.cursor) {
            Selection::Agent(agent) => {
                let commit = AssignmentCommit {
                    lead_id: lead.id,
                    rule_id: rule.id,
                    agent_id: agent.id,
                    user_id: agent.user_id,
                    strategy: rule.strategy,
                    expected_pool_version: snapshot.pool_version,
                    rotation: rotation_key.map(|team_key| CursorAdvance {
                        team_key,
                        expected: snapshot.cursor,
                    }),
                };
                self.store.commit_assignment(&commit).await?
            }
            Selection::NoEligibleAgent => {
                let commit = OutcomeCommit::new(lead.id, AssignmentOutcome::NoEligibleAgent)
                    .for_rule(rule);
                self.store.record_outcome(&commit).await?
            }
            Selection::Manual => {
                let commit =
                    OutcomeCommit::new(lead.id, AssignmentOutcome::PendingManual).for_rule(rule);
                self.store.record_outcome(&commit).await?
            }
        };

        tracing::info!(
            lead_id = lead.id,
            rule_id = rule.id,
            strategy = %rule.strategy,
            agent_id = ?record.agent_id,
            outcome = %record.outcome,
            "Lead distributed",
        );
        Ok(Settled { lead, record })
    }

    /// The settlement another pass wrote while this one was losing races.
    async fn settled_elsewhere(&self, lead: &Lead) -> EngineResult<Option<Settled>> {
        if lead.distribution_state == DistributionState::Evaluating {
            return Ok(None);
        }
        let records = self.store.list_assignment_records(lead.id).await?;
        Ok(records.into_iter().last().map(|record| {
            tracing::info!(lead_id = lead.id, outcome = %record.outcome, "Lead already settled by another pass");
            Settled {
                lead: lead.clone(),
                record,
            }
        }))
    }

    async fn ensure_not_archived(&self, lead_id: DbId) -> EngineResult<()> {
        let lead = self.store.get_lead(lead_id).await?;
        if lead.is_archived() {
            return Err(CoreError::Conflict(format!("Lead {lead_id} is archived")).into());
        }
        Ok(())
    }

    fn publish(&self, settled: &Settled) {
        let record = &settled.record;
        let event_type = match record.outcome {
            AssignmentOutcome::Assigned | AssignmentOutcome::ManualOverride => {
                event_types::LEAD_ASSIGNED
            }
            AssignmentOutcome::PendingManual | AssignmentOutcome::NoEligibleAgent => {
                event_types::LEAD_PENDING_MANUAL
            }
            AssignmentOutcome::Unmatched => event_types::LEAD_UNMATCHED,
            AssignmentOutcome::ConflictUnresolved => event_types::LEAD_REVIEW_REQUIRED,
        };
        let mut event = DistributionEvent::new(event_type)
            .with_lead(record.lead_id)
            .with_rule(record.rule_id)
            .with_payload(serde_json::json!({
                "outcome": record.outcome,
                "strategy": record.strategy,
                "agent_id": record.agent_id,
                "rotation_cursor": record.rotation_cursor,
            }));
        if let Some(user_id) = record.user_id {
            event = event.with_user(user_id);
        }
        self.bus.publish(event);
    }
}
