//! In-process [`DistributionStore`] used by tests and single-node setups.
//!
//! Per-rule rotation state lives in a [`DashMap`] entry; holding that entry
//! serialises every commit against the same rule, which is what makes the
//! cursor compare-and-swap atomic. Tables are `parking_lot` locks.
//!
//! Lock order, always: rule entry -> rules -> agents -> leads -> records.
//! No method awaits while holding a guard.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use leadroute_core::agent::{CreateAgent, RuleAgent, UpdateAgent, DEFAULT_AGENT_WEIGHT};
use leadroute_core::analytics::{
    display_name, AgentLoad, RecentDistribution, RuleStats, StateCount,
};
use leadroute_core::assignment::{AssignmentOutcome, AssignmentRecord};
use leadroute_core::lead::{
    state_machine, DistributionState, Lead, LeadInput, LeadSource, LeadStatus,
};
use leadroute_core::rule::{DistributionRule, NewRule, RulePatch, RuleVersion};
use leadroute_core::types::{DbId, Timestamp};
use parking_lot::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::{
    check_outcome_commit, check_outcome_transition, AssignmentCommit, DistributionStore,
    InsertedLead, LeadPatch, OutcomeCommit, RotationSnapshot,
};

/// Mutable per-rule state guarded by the rule's map entry.
#[derive(Debug, Default)]
struct RuleState {
    pool_version: i64,
    cursors: HashMap<DbId, i64>,
    stats: RuleStats,
}

#[derive(Debug, Default)]
struct LeadTable {
    rows: BTreeMap<DbId, Lead>,
    by_external_id: HashMap<String, DbId>,
}

#[derive(Debug, Default)]
struct Sequences {
    rules: AtomicI64,
    agents: AtomicI64,
    leads: AtomicI64,
    records: AtomicI64,
}

fn next_id(seq: &AtomicI64) -> DbId {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    seq: Sequences,
    rule_state: DashMap<DbId, RuleState>,
    rules: RwLock<BTreeMap<DbId, DistributionRule>>,
    versions: RwLock<Vec<RuleVersion>>,
    agents: RwLock<BTreeMap<DbId, RuleAgent>>,
    leads: RwLock<LeadTable>,
    records: RwLock<Vec<AssignmentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_version(&self, rule: &DistributionRule) -> StoreResult<()> {
        let version = RuleVersion::capture(rule)?;
        self.versions.write().push(version);
        Ok(())
    }

    fn bump_rule(
        &self,
        id: DbId,
        change: impl FnOnce(&mut DistributionRule),
    ) -> StoreResult<DistributionRule> {
        let updated = {
            let mut rules = self.rules.write();
            let rule = rules
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found("DistributionRule", id))?;
            change(rule);
            rule.version += 1;
            rule.updated_at = Utc::now();
            rule.clone()
        };
        self.push_version(&updated)?;
        Ok(updated)
    }

    fn push_record(&self, record: AssignmentRecord) -> AssignmentRecord {
        let mut records = self.records.write();
        let record = AssignmentRecord {
            id: next_id(&self.seq.records),
            ..record
        };
        records.push(record.clone());
        record
    }
}

fn count_outcome(stats: &mut RuleStats, outcome: AssignmentOutcome, at: Timestamp) {
    match outcome {
        AssignmentOutcome::Assigned => {
            stats.leads_assigned += 1;
            stats.last_assigned_at = Some(at);
        }
        AssignmentOutcome::PendingManual | AssignmentOutcome::NoEligibleAgent => {
            stats.leads_pending_manual += 1;
        }
        _ => {}
    }
}

fn lead_from_input(id: DbId, input: &LeadInput, now: Timestamp) -> Lead {
    Lead {
        id,
        first_name: input.first_name.clone(),
        last_name: input.last_name.clone(),
        email: input.email.clone(),
        phone: input.phone.clone(),
        company: input.company.clone(),
        source: input.source.unwrap_or(LeadSource::Other),
        campaign_source: input.campaign_source.clone(),
        product_interest: input.product_interest.clone(),
        estimated_value: input.estimated_value,
        heat_score: input.heat_score,
        team_id: input.team_id,
        tags: input.tags.clone().unwrap_or_default(),
        status: LeadStatus::New,
        distribution_state: DistributionState::Unassigned,
        assigned_agent_id: None,
        assigned_user_id: None,
        distribution_rule_id: None,
        needs_review: false,
        external_id: input.external_id.clone(),
        archived_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl DistributionStore for MemoryStore {
    // -- rules ---------------------------------------------------------------

    async fn insert_rule(&self, new_rule: &NewRule) -> StoreResult<DistributionRule> {
        let now = Utc::now();
        let id = next_id(&self.seq.rules);
        let rule = DistributionRule {
            id,
            name: new_rule.name.clone(),
            source: new_rule.source,
            condition: new_rule.condition.clone(),
            strategy: new_rule.strategy,
            priority: new_rule.priority,
            is_active: new_rule.is_active,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.rule_state.insert(
            id,
            RuleState {
                stats: RuleStats {
                    rule_id: id,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        self.rules.write().insert(id, rule.clone());
        self.push_version(&rule)?;
        Ok(rule)
    }

    async fn update_rule(&self, id: DbId, patch: &RulePatch) -> StoreResult<DistributionRule> {
        self.bump_rule(id, |rule| patch.apply(rule))
    }

    async fn set_rule_active(&self, id: DbId, active: bool) -> StoreResult<DistributionRule> {
        self.bump_rule(id, |rule| rule.is_active = active)
    }

    async fn get_rule(&self, id: DbId) -> StoreResult<DistributionRule> {
        self.rules
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("DistributionRule", id))
    }

    async fn list_rules(&self) -> StoreResult<Vec<DistributionRule>> {
        Ok(self.rules.read().values().cloned().collect())
    }

    async fn list_rule_versions(&self, rule_id: DbId) -> StoreResult<Vec<RuleVersion>> {
        Ok(self
            .versions
            .read()
            .iter()
            .filter(|v| v.rule_id == rule_id)
            .cloned()
            .collect())
    }

    // -- agents --------------------------------------------------------------

    async fn insert_agent(&self, input: &CreateAgent) -> StoreResult<RuleAgent> {
        let mut state = self
            .rule_state
            .get_mut(&input.rule_id)
            .ok_or_else(|| StoreError::not_found("DistributionRule", input.rule_id))?;
        let mut agents = self.agents.write();
        if agents
            .values()
            .any(|a| a.rule_id == input.rule_id && a.user_id == input.user_id)
        {
            return Err(StoreError::Duplicate(format!(
                "User {} is already in the pool of rule {}",
                input.user_id, input.rule_id
            )));
        }
        let now = Utc::now();
        let agent = RuleAgent {
            id: next_id(&self.seq.agents),
            rule_id: input.rule_id,
            user_id: input.user_id,
            display_name: input.display_name.clone(),
            team_id: input.team_id,
            weight: input.weight.unwrap_or(DEFAULT_AGENT_WEIGHT),
            is_active: input.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        agents.insert(agent.id, agent.clone());
        state.pool_version += 1;
        Ok(agent)
    }

    async fn update_agent(&self, id: DbId, patch: &UpdateAgent) -> StoreResult<RuleAgent> {
        let rule_id = self
            .agents
            .read()
            .get(&id)
            .map(|a| a.rule_id)
            .ok_or_else(|| StoreError::not_found("RuleAgent", id))?;
        let mut state = self
            .rule_state
            .get_mut(&rule_id)
            .ok_or_else(|| StoreError::not_found("DistributionRule", rule_id))?;
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("RuleAgent", id))?;
        patch.apply(agent);
        agent.updated_at = Utc::now();
        state.pool_version += 1;
        Ok(agent.clone())
    }

    async fn get_agent(&self, id: DbId) -> StoreResult<RuleAgent> {
        self.agents
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("RuleAgent", id))
    }

    async fn list_agents(&self, rule_id: DbId) -> StoreResult<Vec<RuleAgent>> {
        Ok(self
            .agents
            .read()
            .values()
            .filter(|a| a.rule_id == rule_id)
            .cloned()
            .collect())
    }

    async fn list_agents_by_user(&self, user_id: DbId) -> StoreResult<Vec<RuleAgent>> {
        Ok(self
            .agents
            .read()
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    // -- rotation ------------------------------------------------------------

    async fn rotation_snapshot(
        &self,
        rule_id: DbId,
        team_key: DbId,
    ) -> StoreResult<RotationSnapshot> {
        let state = self
            .rule_state
            .get(&rule_id)
            .ok_or_else(|| StoreError::not_found("DistributionRule", rule_id))?;
        Ok(RotationSnapshot {
            cursor: state.cursors.get(&team_key).copied().unwrap_or(0),
            pool_version: state.pool_version,
        })
    }

    // -- leads ---------------------------------------------------------------

    async fn insert_lead(&self, input: &LeadInput) -> StoreResult<InsertedLead> {
        let mut leads = self.leads.write();
        if let Some(external_id) = &input.external_id {
            if let Some(existing) = leads
                .by_external_id
                .get(external_id)
                .and_then(|id| leads.rows.get(id))
            {
                return Ok(InsertedLead {
                    lead: existing.clone(),
                    created: false,
                });
            }
        }
        let lead = lead_from_input(next_id(&self.seq.leads), input, Utc::now());
        if let Some(external_id) = &lead.external_id {
            leads.by_external_id.insert(external_id.clone(), lead.id);
        }
        leads.rows.insert(lead.id, lead.clone());
        Ok(InsertedLead {
            lead,
            created: true,
        })
    }

    async fn get_lead(&self, id: DbId) -> StoreResult<Lead> {
        self.leads
            .read()
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Lead", id))
    }

    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>> {
        let leads = self.leads.read();
        Ok(leads
            .by_external_id
            .get(external_id)
            .and_then(|id| leads.rows.get(id))
            .cloned())
    }

    async fn list_leads_by_state(&self, state: DistributionState) -> StoreResult<Vec<Lead>> {
        Ok(self
            .leads
            .read()
            .rows
            .values()
            .filter(|l| l.distribution_state == state && !l.is_archived())
            .cloned()
            .collect())
    }

    async fn list_leads_assigned_to(&self, user_id: DbId) -> StoreResult<Vec<Lead>> {
        Ok(self
            .leads
            .read()
            .rows
            .values()
            .filter(|l| {
                l.distribution_state == DistributionState::Assigned
                    && l.assigned_user_id == Some(user_id)
                    && !l.is_archived()
            })
            .cloned()
            .collect())
    }

    async fn update_lead(&self, id: DbId, patch: LeadPatch) -> StoreResult<Lead> {
        let mut leads = self.leads.write();
        let lead = leads
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Lead", id))?;
        let now = Utc::now();
        if let Some(status) = patch.status {
            lead.status = status;
        }
        match patch.archived {
            Some(true) if lead.archived_at.is_none() => lead.archived_at = Some(now),
            Some(false) => lead.archived_at = None,
            _ => {}
        }
        lead.updated_at = now;
        Ok(lead.clone())
    }

    async fn transition_lead(&self, id: DbId, to: DistributionState) -> StoreResult<Lead> {
        let mut leads = self.leads.write();
        let lead = leads
            .rows
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("Lead", id))?;
        state_machine::validate_transition(lead.distribution_state, to)?;
        lead.distribution_state = to;
        lead.updated_at = Utc::now();
        Ok(lead.clone())
    }

    // -- assignments ---------------------------------------------------------

    async fn commit_assignment(
        &self,
        commit: &AssignmentCommit,
    ) -> StoreResult<(Lead, AssignmentRecord)> {
        let mut state = self
            .rule_state
            .get_mut(&commit.rule_id)
            .ok_or_else(|| StoreError::not_found("DistributionRule", commit.rule_id))?;
        if state.pool_version != commit.expected_pool_version {
            return Err(StoreError::conflict(format!(
                "Pool of rule {} changed (version {} != {})",
                commit.rule_id, state.pool_version, commit.expected_pool_version
            )));
        }
        if let Some(rotation) = commit.rotation {
            let current = state.cursors.get(&rotation.team_key).copied().unwrap_or(0);
            if current != rotation.expected {
                return Err(StoreError::conflict(format!(
                    "Cursor of rule {} moved ({} != {})",
                    commit.rule_id, current, rotation.expected
                )));
            }
        }

        let mut leads = self.leads.write();
        let lead = leads
            .rows
            .get_mut(&commit.lead_id)
            .ok_or_else(|| StoreError::not_found("Lead", commit.lead_id))?;
        check_outcome_transition(
            commit.lead_id,
            lead.distribution_state,
            AssignmentOutcome::Assigned,
        )?;

        // All guards hold; apply.
        let now = Utc::now();
        if let Some(rotation) = commit.rotation {
            state.cursors.insert(rotation.team_key, rotation.expected + 1);
        }
        count_outcome(&mut state.stats, AssignmentOutcome::Assigned, now);

        lead.distribution_state = DistributionState::Assigned;
        lead.assigned_agent_id = Some(commit.agent_id);
        lead.assigned_user_id = Some(commit.user_id);
        lead.distribution_rule_id = Some(commit.rule_id);
        lead.needs_review = false;
        lead.updated_at = now;
        let lead = lead.clone();

        let record = self.push_record(AssignmentRecord {
            id: 0,
            lead_id: commit.lead_id,
            rule_id: Some(commit.rule_id),
            agent_id: Some(commit.agent_id),
            user_id: Some(commit.user_id),
            strategy: Some(commit.strategy),
            outcome: AssignmentOutcome::Assigned,
            rotation_cursor: commit.rotation.map(|r| r.expected),
            created_at: now,
        });
        Ok((lead, record))
    }

    async fn record_outcome(&self, commit: &OutcomeCommit) -> StoreResult<(Lead, AssignmentRecord)> {
        check_outcome_commit(commit)?;
        let mut state = match commit.rule_id {
            Some(rule_id) => Some(
                self.rule_state
                    .get_mut(&rule_id)
                    .ok_or_else(|| StoreError::not_found("DistributionRule", rule_id))?,
            ),
            None => None,
        };

        let mut leads = self.leads.write();
        let lead = leads
            .rows
            .get_mut(&commit.lead_id)
            .ok_or_else(|| StoreError::not_found("Lead", commit.lead_id))?;
        check_outcome_transition(commit.lead_id, lead.distribution_state, commit.outcome)?;

        let now = Utc::now();
        if let Some(state) = state.as_mut() {
            count_outcome(&mut state.stats, commit.outcome, now);
        }
        lead.distribution_state = commit.outcome.resulting_state();
        lead.assigned_agent_id = commit.agent.map(|(agent_id, _)| agent_id);
        lead.assigned_user_id = commit.agent.map(|(_, user_id)| user_id);
        lead.distribution_rule_id = commit.rule_id;
        lead.needs_review = commit.needs_review;
        lead.updated_at = now;
        let lead = lead.clone();

        let record = self.push_record(AssignmentRecord {
            id: 0,
            lead_id: commit.lead_id,
            rule_id: commit.rule_id,
            agent_id: commit.agent.map(|(agent_id, _)| agent_id),
            user_id: commit.agent.map(|(_, user_id)| user_id),
            strategy: commit.strategy,
            outcome: commit.outcome,
            rotation_cursor: None,
            created_at: now,
        });
        Ok((lead, record))
    }

    async fn list_assignment_records(&self, lead_id: DbId) -> StoreResult<Vec<AssignmentRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.lead_id == lead_id)
            .cloned()
            .collect())
    }

    // -- summaries -----------------------------------------------------------

    async fn rule_stats(&self) -> StoreResult<Vec<RuleStats>> {
        let mut stats: Vec<RuleStats> =
            self.rule_state.iter().map(|entry| entry.stats.clone()).collect();
        stats.sort_by_key(|s| s.rule_id);
        Ok(stats)
    }

    async fn state_counts(&self) -> StoreResult<Vec<StateCount>> {
        let mut counts: HashMap<DistributionState, i64> = HashMap::new();
        for lead in self.leads.read().rows.values().filter(|l| !l.is_archived()) {
            *counts.entry(lead.distribution_state).or_default() += 1;
        }
        Ok(DistributionState::ALL
            .iter()
            .filter_map(|state| {
                counts.get(state).map(|&count| StateCount {
                    state: *state,
                    count,
                })
            })
            .collect())
    }

    async fn agent_load(&self) -> StoreResult<Vec<AgentLoad>> {
        let mut load: BTreeMap<DbId, i64> = BTreeMap::new();
        for lead in self.leads.read().rows.values() {
            if lead.is_archived() || lead.distribution_state != DistributionState::Assigned {
                continue;
            }
            if let Some(user_id) = lead.assigned_user_id {
                *load.entry(user_id).or_default() += 1;
            }
        }
        Ok(load
            .into_iter()
            .map(|(user_id, assigned_leads)| AgentLoad {
                user_id,
                assigned_leads,
            })
            .collect())
    }

    async fn list_recent_assignments(&self, limit: i64) -> StoreResult<Vec<RecentDistribution>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        let rules = self.rules.read();
        let agents = self.agents.read();
        let leads = self.leads.read();
        let records = self.records.read();

        let mut feed = Vec::new();
        for record in records.iter().rev() {
            if feed.len() >= limit {
                break;
            }
            let (Some(agent_id), Some(user_id)) = (record.agent_id, record.user_id) else {
                continue;
            };
            let lead = leads
                .rows
                .get(&record.lead_id)
                .ok_or_else(|| StoreError::not_found("Lead", record.lead_id))?;
            let agent = agents
                .get(&agent_id)
                .ok_or_else(|| StoreError::not_found("RuleAgent", agent_id))?;
            feed.push(RecentDistribution {
                record_id: record.id,
                lead_id: lead.id,
                lead_name: display_name(&lead.first_name, &lead.last_name),
                company: lead.company.clone(),
                lead_status: lead.status,
                rule_id: record.rule_id,
                rule_name: record
                    .rule_id
                    .and_then(|id| rules.get(&id))
                    .map(|rule| rule.name.clone()),
                user_id,
                agent_name: agent.display_name.clone(),
                outcome: record.outcome,
                distributed_at: record.created_at,
            });
        }
        Ok(feed)
    }
}
