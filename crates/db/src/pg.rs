//! PostgreSQL [`DistributionStore`].
//!
//! Guarded writes run in one transaction: the rule row is share-locked to
//! pin the pool version, the lead row is locked `FOR UPDATE`, and the cursor
//! advances with a conditional `UPDATE`. Any failed guard rolls back.

use async_trait::async_trait;
use leadroute_core::agent::{CreateAgent, RuleAgent, UpdateAgent};
use leadroute_core::analytics::{AgentLoad, RecentDistribution, RuleStats, StateCount};
use leadroute_core::assignment::{AssignmentOutcome, AssignmentRecord};
use leadroute_core::lead::{state_machine, DistributionState, Lead, LeadInput};
use leadroute_core::rule::{DistributionRule, NewRule, RulePatch, RuleVersion};
use leadroute_core::types::DbId;
use sqlx::PgConnection;

use crate::error::{StoreError, StoreResult};
use crate::models::assignment::NewRecord;
use crate::repositories::lead_repo::Settlement;
use crate::repositories::{AgentRepo, AssignmentRepo, LeadRepo, RotationRepo, RuleRepo};
use crate::store::{
    check_outcome_commit, check_outcome_transition, AssignmentCommit, DistributionStore,
    InsertedLead, LeadPatch, OutcomeCommit, RotationSnapshot,
};
use crate::DbPool;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn locked_lead(conn: &mut PgConnection, id: DbId) -> StoreResult<Lead> {
        LeadRepo::find_for_update(conn, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Lead", id))?
            .try_into()
    }

    /// Apply `change` to a locked rule, bump its version, and snapshot it.
    async fn edit_rule(
        &self,
        id: DbId,
        change: impl FnOnce(&mut DistributionRule) + Send,
    ) -> StoreResult<DistributionRule> {
        let mut tx = self.pool.begin().await?;
        let mut rule: DistributionRule = RuleRepo::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("DistributionRule", id))?
            .try_into()?;
        change(&mut rule);
        rule.version += 1;
        let condition = condition_json(&rule)?;
        let saved: DistributionRule = RuleRepo::save(&mut tx, &rule, &condition)
            .await?
            .try_into()?;
        RuleRepo::insert_version(&mut tx, &RuleVersion::capture(&saved)?).await?;
        tx.commit().await?;
        Ok(saved)
    }
}

fn condition_json(rule: &DistributionRule) -> StoreResult<serde_json::Value> {
    serde_json::to_value(&rule.condition)
        .map_err(|e| StoreError::Invalid(format!("condition of rule {}: {e}", rule.id)))
}

fn collect<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl DistributionStore for PgStore {
    // -- rules ---------------------------------------------------------------

    async fn insert_rule(&self, new_rule: &NewRule) -> StoreResult<DistributionRule> {
        let condition = serde_json::to_value(&new_rule.condition)
            .map_err(|e| StoreError::Invalid(format!("condition: {e}")))?;
        let mut tx = self.pool.begin().await?;
        let rule: DistributionRule = RuleRepo::insert(&mut tx, new_rule, &condition)
            .await?
            .try_into()?;
        RuleRepo::insert_version(&mut tx, &RuleVersion::capture(&rule)?).await?;
        tx.commit().await?;
        Ok(rule)
    }

    async fn update_rule(&self, id: DbId, patch: &RulePatch) -> StoreResult<DistributionRule> {
        let patch = patch.clone();
        self.edit_rule(id, move |rule| patch.apply(rule)).await
    }

    async fn set_rule_active(&self, id: DbId, active: bool) -> StoreResult<DistributionRule> {
        self.edit_rule(id, move |rule| rule.is_active = active).await
    }

    async fn get_rule(&self, id: DbId) -> StoreResult<DistributionRule> {
        RuleRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::not_found("DistributionRule", id))?
            .try_into()
    }

    /// Rows that no longer decode are skipped with a warning so one bad
    /// rule cannot stop every pass.
    async fn list_rules(&self) -> StoreResult<Vec<DistributionRule>> {
        let rows = RuleRepo::list(&self.pool).await?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let rule_id = row.id;
            match DistributionRule::try_from(row) {
                Ok(rule) => rules.push(rule),
                Err(e) => {
                    tracing::warn!(rule_id, error = %e, "Stored rule could not be decoded, skipping");
                }
            }
        }
        Ok(rules)
    }

    async fn list_rule_versions(&self, rule_id: DbId) -> StoreResult<Vec<RuleVersion>> {
        let rows = RuleRepo::list_versions(&self.pool, rule_id).await?;
        Ok(rows.into_iter().map(RuleVersion::from).collect())
    }

    // -- agents --------------------------------------------------------------

    async fn insert_agent(&self, input: &CreateAgent) -> StoreResult<RuleAgent> {
        let mut tx = self.pool.begin().await?;
        RuleRepo::bump_pool_version(&mut tx, input.rule_id)
            .await?
            .ok_or_else(|| StoreError::not_found("DistributionRule", input.rule_id))?;
        let agent = AgentRepo::insert(&mut tx, input).await?;
        tx.commit().await?;
        Ok(agent.into())
    }

    async fn update_agent(&self, id: DbId, patch: &UpdateAgent) -> StoreResult<RuleAgent> {
        let mut tx = self.pool.begin().await?;
        let mut agent: RuleAgent = AgentRepo::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("RuleAgent", id))?
            .into();
        patch.apply(&mut agent);
        let saved = AgentRepo::save(&mut tx, &agent).await?;
        RuleRepo::bump_pool_version(&mut tx, agent.rule_id).await?;
        tx.commit().await?;
        Ok(saved.into())
    }

    async fn get_agent(&self, id: DbId) -> StoreResult<RuleAgent> {
        AgentRepo::find_by_id(&self.pool, id)
            .await?
            .map(RuleAgent::from)
            .ok_or_else(|| StoreError::not_found("RuleAgent", id))
    }

    async fn list_agents(&self, rule_id: DbId) -> StoreResult<Vec<RuleAgent>> {
        let rows = AgentRepo::list_for_rule(&self.pool, rule_id).await?;
        Ok(rows.into_iter().map(RuleAgent::from).collect())
    }

    async fn list_agents_by_user(&self, user_id: DbId) -> StoreResult<Vec<RuleAgent>> {
        let rows = AgentRepo::list_for_user(&self.pool, user_id).await?;
        Ok(rows.into_iter().map(RuleAgent::from).collect())
    }

    // -- rotation ------------------------------------------------------------

    async fn rotation_snapshot(
        &self,
        rule_id: DbId,
        team_key: DbId,
    ) -> StoreResult<RotationSnapshot> {
        let (cursor, pool_version) = RotationRepo::snapshot(&self.pool, rule_id, team_key)
            .await?
            .ok_or_else(|| StoreError::not_found("DistributionRule", rule_id))?;
        Ok(RotationSnapshot {
            cursor,
            pool_version,
        })
    }

    // -- leads ---------------------------------------------------------------

    async fn insert_lead(&self, input: &LeadInput) -> StoreResult<InsertedLead> {
        if let Some(row) = LeadRepo::insert(&self.pool, input).await? {
            return Ok(InsertedLead {
                lead: row.try_into()?,
                created: true,
            });
        }
        // Only a taken external_id suppresses the insert.
        let external_id = input.external_id.as_deref().unwrap_or_default();
        let existing = LeadRepo::find_by_external_id(&self.pool, external_id)
            .await?
            .ok_or_else(|| {
                StoreError::conflict(format!("Lead {external_id} vanished during ingestion"))
            })?;
        Ok(InsertedLead {
            lead: existing.try_into()?,
            created: false,
        })
    }

    async fn get_lead(&self, id: DbId) -> StoreResult<Lead> {
        LeadRepo::find_by_id(&self.pool, id)
            .await?
            .ok_or_else(|| StoreError::not_found("Lead", id))?
            .try_into()
    }

    async fn find_lead_by_external_id(&self, external_id: &str) -> StoreResult<Option<Lead>> {
        LeadRepo::find_by_external_id(&self.pool, external_id)
            .await?
            .map(Lead::try_from)
            .transpose()
    }

    async fn list_leads_by_state(&self, state: DistributionState) -> StoreResult<Vec<Lead>> {
        collect(LeadRepo::list_by_state(&self.pool, state).await?)
    }

    async fn list_leads_assigned_to(&self, user_id: DbId) -> StoreResult<Vec<Lead>> {
        collect(LeadRepo::list_assigned_to(&self.pool, user_id).await?)
    }

    async fn update_lead(&self, id: DbId, patch: LeadPatch) -> StoreResult<Lead> {
        LeadRepo::update_fields(&self.pool, id, patch.status, patch.archived)
            .await?
            .ok_or_else(|| StoreError::not_found("Lead", id))?
            .try_into()
    }

    async fn transition_lead(&self, id: DbId, to: DistributionState) -> StoreResult<Lead> {
        let mut tx = self.pool.begin().await?;
        let lead = Self::locked_lead(&mut tx, id).await?;
        state_machine::validate_transition(lead.distribution_state, to)?;
        let updated = LeadRepo::set_state(&mut tx, id, to).await?;
        tx.commit().await?;
        updated.try_into()
    }

    // -- assignments ---------------------------------------------------------

    async fn commit_assignment(
        &self,
        commit: &AssignmentCommit,
    ) -> StoreResult<(Lead, AssignmentRecord)> {
        let mut tx = self.pool.begin().await?;

        let pool_version = RuleRepo::lock_pool_version(&mut tx, commit.rule_id)
            .await?
            .ok_or_else(|| StoreError::not_found("DistributionRule", commit.rule_id))?;
        if pool_version != commit.expected_pool_version {
            tracing::debug!(
                rule_id = commit.rule_id,
                pool_version,
                expected = commit.expected_pool_version,
                "Agent pool changed under a pass",
            );
            return Err(StoreError::conflict(format!(
                "Pool of rule {} changed (version {} != {})",
                commit.rule_id, pool_version, commit.expected_pool_version
            )));
        }

        let lead = Self::locked_lead(&mut tx, commit.lead_id).await?;
        check_outcome_transition(
            commit.lead_id,
            lead.distribution_state,
            AssignmentOutcome::Assigned,
        )?;

        if let Some(rotation) = commit.rotation {
            let advanced = RotationRepo::compare_and_advance(
                &mut tx,
                commit.rule_id,
                rotation.team_key,
                rotation.expected,
            )
            .await?;
            if !advanced {
                tracing::debug!(
                    rule_id = commit.rule_id,
                    team_key = rotation.team_key,
                    expected = rotation.expected,
                    "Rotation cursor already advanced",
                );
                return Err(StoreError::conflict(format!(
                    "Cursor of rule {} moved past {}",
                    commit.rule_id, rotation.expected
                )));
            }
        }

        let lead = LeadRepo::settle(
            &mut tx,
            commit.lead_id,
            Settlement {
                state: DistributionState::Assigned,
                agent_id: Some(commit.agent_id),
                user_id: Some(commit.user_id),
                rule_id: Some(commit.rule_id),
                needs_review: false,
            },
        )
        .await?;
        let record = AssignmentRepo::insert(
            &mut tx,
            &NewRecord {
                lead_id: commit.lead_id,
                rule_id: Some(commit.rule_id),
                agent_id: Some(commit.agent_id),
                user_id: Some(commit.user_id),
                strategy: Some(commit.strategy.as_str()),
                outcome: AssignmentOutcome::Assigned.as_str(),
                rotation_cursor: commit.rotation.map(|r| r.expected),
            },
        )
        .await?;
        AssignmentRepo::count_outcome(&mut tx, commit.rule_id, AssignmentOutcome::Assigned)
            .await?;
        tx.commit().await?;
        Ok((lead.try_into()?, record.try_into()?))
    }

    async fn record_outcome(&self, commit: &OutcomeCommit) -> StoreResult<(Lead, AssignmentRecord)> {
        check_outcome_commit(commit)?;
        let mut tx = self.pool.begin().await?;

        let lead = Self::locked_lead(&mut tx, commit.lead_id).await?;
        check_outcome_transition(commit.lead_id, lead.distribution_state, commit.outcome)?;

        let agent_id = commit.agent.map(|(agent_id, _)| agent_id);
        let user_id = commit.agent.map(|(_, user_id)| user_id);
        let lead = LeadRepo::settle(
            &mut tx,
            commit.lead_id,
            Settlement {
                state: commit.outcome.resulting_state(),
                agent_id,
                user_id,
                rule_id: commit.rule_id,
                needs_review: commit.needs_review,
            },
        )
        .await?;
        let record = AssignmentRepo::insert(
            &mut tx,
            &NewRecord {
                lead_id: commit.lead_id,
                rule_id: commit.rule_id,
                agent_id,
                user_id,
                strategy: commit.strategy.map(|s| s.as_str()),
                outcome: commit.outcome.as_str(),
                rotation_cursor: None,
            },
        )
        .await?;
        if let Some(rule_id) = commit.rule_id {
            AssignmentRepo::count_outcome(&mut tx, rule_id, commit.outcome).await?;
        }
        tx.commit().await?;
        Ok((lead.try_into()?, record.try_into()?))
    }

    async fn list_assignment_records(&self, lead_id: DbId) -> StoreResult<Vec<AssignmentRecord>> {
        collect(AssignmentRepo::list_for_lead(&self.pool, lead_id).await?)
    }

    // -- summaries -----------------------------------------------------------

    async fn rule_stats(&self) -> StoreResult<Vec<RuleStats>> {
        let rows = AssignmentRepo::rule_stats(&self.pool).await?;
        Ok(rows.into_iter().map(RuleStats::from).collect())
    }

    async fn state_counts(&self) -> StoreResult<Vec<StateCount>> {
        collect(AssignmentRepo::state_counts(&self.pool).await?)
    }

    async fn agent_load(&self) -> StoreResult<Vec<AgentLoad>> {
        let rows = AssignmentRepo::agent_load(&self.pool).await?;
        Ok(rows.into_iter().map(AgentLoad::from).collect())
    }

    async fn list_recent_assignments(&self, limit: i64) -> StoreResult<Vec<RecentDistribution>> {
        collect(AssignmentRepo::list_recent(&self.pool, limit).await?)
    }
}
