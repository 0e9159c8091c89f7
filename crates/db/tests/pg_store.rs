//! PostgreSQL store tests. They need a live server (`DATABASE_URL`), so they
//! are ignored by default: `cargo test -p leadroute-db -- --ignored`.

use assert_matches::assert_matches;
use leadroute_core::agent::{CreateAgent, UpdateAgent};
use leadroute_core::assignment::AssignmentOutcome;
use leadroute_core::lead::{DistributionState, LeadInput, LeadStatus};
use leadroute_core::rule::{CreateRule, StrategyKind, UpdateRule};
use leadroute_core::selection::WHOLE_POOL_TEAM_KEY;
use leadroute_db::store::{AssignmentCommit, CursorAdvance, LeadPatch, OutcomeCommit};
use leadroute_db::{DistributionStore, PgStore, StoreError};
use sqlx::PgPool;

fn lead_input(name: &str) -> LeadInput {
    LeadInput {
        first_name: name.to_string(),
        last_name: "Tester".to_string(),
        ..Default::default()
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_health_check(pool: PgPool) {
    leadroute_db::health_check(&pool).await.unwrap();
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_rule_edits_are_versioned(pool: PgPool) {
    let store = PgStore::new(pool);
    let rule = store
        .insert_rule(
            &CreateRule::new("Website leads", StrategyKind::RoundRobin, 3)
                .into_new_rule()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rule.version, 1);

    let patch = UpdateRule {
        priority: Some(1),
        ..Default::default()
    }
    .into_patch()
    .unwrap();
    let updated = store.update_rule(rule.id, &patch).await.unwrap();
    assert_eq!(updated.priority, 1);
    assert_eq!(updated.version, 2);

    let deactivated = store.set_rule_active(rule.id, false).await.unwrap();
    assert!(!deactivated.is_active);

    let versions = store.list_rule_versions(rule.id).await.unwrap();
    let numbers: Vec<i32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_commit_assignment_advances_cursor_once(pool: PgPool) {
    let store = PgStore::new(pool);
    let rule = store
        .insert_rule(
            &CreateRule::new("Everyone", StrategyKind::RoundRobin, 1)
                .into_new_rule()
                .unwrap(),
        )
        .await
        .unwrap();
    let agent = store
        .insert_agent(&CreateAgent::new(rule.id, 7, "Mike").validated().unwrap())
        .await
        .unwrap();
    let lead = store.insert_lead(&lead_input("Liam")).await.unwrap().lead;
    store
        .transition_lead(lead.id, DistributionState::Evaluating)
        .await
        .unwrap();

    let snapshot = store
        .rotation_snapshot(rule.id, WHOLE_POOL_TEAM_KEY)
        .await
        .unwrap();
    assert_eq!(snapshot.cursor, 0);
    assert_eq!(snapshot.pool_version, 1);

    let commit = AssignmentCommit {
        lead_id: lead.id,
        rule_id: rule.id,
        agent_id: agent.id,
        user_id: agent.user_id,
        strategy: StrategyKind::RoundRobin,
        expected_pool_version: snapshot.pool_version,
        rotation: Some(CursorAdvance {
            team_key: WHOLE_POOL_TEAM_KEY,
            expected: snapshot.cursor,
        }),
    };
    let (assigned, record) = store.commit_assignment(&commit).await.unwrap();
    assert_eq!(assigned.distribution_state, DistributionState::Assigned);
    assert_eq!(assigned.assigned_user_id, Some(7));
    assert_eq!(record.outcome, AssignmentOutcome::Assigned);
    assert_eq!(record.rotation_cursor, Some(0));

    // Replaying the same snapshot loses: the lead has settled and the
    // cursor has moved.
    assert_matches!(
        store.commit_assignment(&commit).await,
        Err(StoreError::ConcurrentUpdateConflict(_))
    );
    let after = store
        .rotation_snapshot(rule.id, WHOLE_POOL_TEAM_KEY)
        .await
        .unwrap();
    assert_eq!(after.cursor, 1);

    let stats = store.rule_stats().await.unwrap();
    assert_eq!(stats[0].leads_assigned, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_pool_edit_invalidates_commit(pool: PgPool) {
    let store = PgStore::new(pool);
    let rule = store
        .insert_rule(
            &CreateRule::new("Weighted", StrategyKind::Weighted, 1)
                .into_new_rule()
                .unwrap(),
        )
        .await
        .unwrap();
    let agent = store
        .insert_agent(&CreateAgent::new(rule.id, 9, "Lisa").validated().unwrap())
        .await
        .unwrap();
    let lead = store.insert_lead(&lead_input("Mia")).await.unwrap().lead;
    store
        .transition_lead(lead.id, DistributionState::Evaluating)
        .await
        .unwrap();
    let snapshot = store
        .rotation_snapshot(rule.id, WHOLE_POOL_TEAM_KEY)
        .await
        .unwrap();

    store
        .update_agent(agent.id, &UpdateAgent::deactivate())
        .await
        .unwrap();

    let commit = AssignmentCommit {
        lead_id: lead.id,
        rule_id: rule.id,
        agent_id: agent.id,
        user_id: agent.user_id,
        strategy: StrategyKind::Weighted,
        expected_pool_version: snapshot.pool_version,
        rotation: None,
    };
    assert_matches!(
        store.commit_assignment(&commit).await,
        Err(StoreError::ConcurrentUpdateConflict(_))
    );
    assert!(store.list_assignment_records(lead.id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_external_id_is_idempotent(pool: PgPool) {
    let store = PgStore::new(pool);
    let input = LeadInput {
        external_id: Some("fb-lead-42".to_string()),
        ..lead_input("Olivia")
    };
    let first = store.insert_lead(&input).await.unwrap();
    let second = store.insert_lead(&input).await.unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.lead.id, second.lead.id);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_unmatched_outcome_and_summaries(pool: PgPool) {
    let store = PgStore::new(pool);
    let lead = store.insert_lead(&lead_input("Ava")).await.unwrap().lead;
    store
        .transition_lead(lead.id, DistributionState::Evaluating)
        .await
        .unwrap();
    let (settled, record) = store
        .record_outcome(&OutcomeCommit::new(lead.id, AssignmentOutcome::Unmatched))
        .await
        .unwrap();
    assert_eq!(settled.distribution_state, DistributionState::Unmatched);
    assert_eq!(record.rule_id, None);

    let counts = store.state_counts().await.unwrap();
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].state, DistributionState::Unmatched);

    let archived = store
        .update_lead(
            lead.id,
            LeadPatch {
                status: Some(LeadStatus::ClosedLost),
                archived: Some(true),
            },
        )
        .await
        .unwrap();
    assert!(archived.is_archived());
    assert!(store.state_counts().await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_undecodable_rule_row_is_skipped(pool: PgPool) {
    let store = PgStore::new(pool.clone());
    let mut ids = Vec::new();
    for (name, priority) in [("Hand-edited", 1), ("Everyone", 2)] {
        let rule = store
            .insert_rule(
                &CreateRule::new(name, StrategyKind::RoundRobin, priority)
                    .into_new_rule()
                    .unwrap(),
            )
            .await
            .unwrap();
        ids.push(rule.id);
    }
    sqlx::query("UPDATE distribution_rules SET condition = '\"estimatedValue >= x\"'::jsonb WHERE id = $1")
        .bind(ids[0])
        .execute(&pool)
        .await
        .unwrap();

    let rules = store.list_rules().await.unwrap();
    let listed: Vec<_> = rules.iter().map(|r| r.id).collect();
    assert_eq!(listed, vec![ids[1]]);
    assert_matches!(store.get_rule(ids[0]).await, Err(StoreError::Invalid(_)));
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires a PostgreSQL DATABASE_URL"]
async fn test_recent_assignments_join_lead_agent_and_rule(pool: PgPool) {
    let store = PgStore::new(pool);
    let rule = store
        .insert_rule(
            &CreateRule::new("VIP Leads", StrategyKind::RoundRobin, 1)
                .into_new_rule()
                .unwrap(),
        )
        .await
        .unwrap();
    let agent = store
        .insert_agent(&CreateAgent::new(rule.id, 4, "Sarah Johnson").validated().unwrap())
        .await
        .unwrap();

    let mut lead_ids = Vec::new();
    for name in ["John", "Emma"] {
        let lead = store.insert_lead(&lead_input(name)).await.unwrap().lead;
        store
            .transition_lead(lead.id, DistributionState::Evaluating)
            .await
            .unwrap();
        let snapshot = store
            .rotation_snapshot(rule.id, WHOLE_POOL_TEAM_KEY)
            .await
            .unwrap();
        store
            .commit_assignment(&AssignmentCommit {
                lead_id: lead.id,
                rule_id: rule.id,
                agent_id: agent.id,
                user_id: agent.user_id,
                strategy: StrategyKind::RoundRobin,
                expected_pool_version: snapshot.pool_version,
                rotation: Some(CursorAdvance {
                    team_key: WHOLE_POOL_TEAM_KEY,
                    expected: snapshot.cursor,
                }),
            })
            .await
            .unwrap();
        lead_ids.push(lead.id);
    }
    let unmatched = store.insert_lead(&lead_input("Nobody")).await.unwrap().lead;
    store
        .transition_lead(unmatched.id, DistributionState::Evaluating)
        .await
        .unwrap();
    store
        .record_outcome(&OutcomeCommit::new(unmatched.id, AssignmentOutcome::Unmatched))
        .await
        .unwrap();

    let feed = store.list_recent_assignments(10).await.unwrap();
    let leads: Vec<_> = feed.iter().map(|f| f.lead_id).collect();
    assert_eq!(leads, vec![lead_ids[1], lead_ids[0]]);
    assert_eq!(feed[0].lead_name, "Emma Tester");
    assert_eq!(feed[0].agent_name, "Sarah Johnson");
    assert_eq!(feed[0].rule_name.as_deref(), Some("VIP Leads"));
    assert_eq!(feed[0].lead_status, LeadStatus::New);

    assert_eq!(store.list_recent_assignments(1).await.unwrap().len(), 1);
}
