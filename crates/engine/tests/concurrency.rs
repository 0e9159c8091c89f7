mod common;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use leadroute_core::assignment::AssignmentOutcome;
use leadroute_core::lead::DistributionState;
use leadroute_core::rule::{CreateRule, StrategyKind};
use leadroute_core::types::DbId;
use leadroute_engine::EngineConfig;

use common::{agent, harness_with, lead, test_config};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestion_never_reuses_a_cursor_value() {
    let config = EngineConfig {
        conflict_retries: 50,
        ..test_config()
    };
    let h = harness_with(config);
    let orchestrator = Arc::new(h.orchestrator);

    let rule = orchestrator
        .rules()
        .create_rule(CreateRule::new("Rotation", StrategyKind::RoundRobin, 1))
        .await
        .unwrap();
    let users: [DbId; 3] = [1, 2, 3];
    for user_id in users {
        orchestrator.agents().add_agent(agent(rule.id, user_id)).await.unwrap();
    }

    let handles = (0..60).map(|i| {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.ingest_lead(lead(&format!("burst-{i}"))).await })
    });
    let ids: Vec<DbId> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 60);

    let mut cursors = Vec::new();
    for id in ids {
        let history = orchestrator.get_assignment_history(id).await.unwrap();
        assert_eq!(history.len(), 1, "lead {id} settled more than once");
        let record = &history[0];
        match record.outcome {
            AssignmentOutcome::Assigned => {
                let cursor = record.rotation_cursor.unwrap();
                assert_eq!(record.user_id, Some(users[(cursor % 3) as usize]));
                cursors.push(cursor);
            }
            AssignmentOutcome::ConflictUnresolved => {
                let lead = orchestrator.get_lead(id).await.unwrap();
                assert!(lead.needs_review);
            }
            other => panic!("unexpected outcome {other}"),
        }
    }

    cursors.sort_unstable();
    let expected: Vec<i64> = (0..cursors.len() as i64).collect();
    assert_eq!(cursors, expected);

    let evaluating = orchestrator
        .analytics()
        .state_counts()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.state == DistributionState::Evaluating)
        .map(|c| c.count);
    assert_eq!(evaluating, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rule_edits_are_seen_by_later_passes() {
    let h = harness_with(test_config());
    let orchestrator = Arc::new(h.orchestrator);
    let rule = orchestrator
        .rules()
        .create_rule(CreateRule::new("Rotation", StrategyKind::RoundRobin, 1))
        .await
        .unwrap();
    orchestrator.agents().add_agent(agent(rule.id, 1)).await.unwrap();

    let burst = (0..20).map(|i| {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.ingest_lead(lead(&format!("early-{i}"))).await })
    });
    let edit = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.rules().deactivate_rule(rule.id).await })
    };
    let early: Vec<DbId> = join_all(burst)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    edit.await.unwrap().unwrap();

    // Once the deactivation returned, no pass may still use the rule.
    let late = orchestrator.ingest_lead(lead("late")).await.unwrap();
    let late = orchestrator.get_lead(late).await.unwrap();
    assert_eq!(late.distribution_state, DistributionState::Unmatched);

    // Leads the rule already placed stay with their agent.
    for id in early {
        let held = orchestrator.get_lead(id).await.unwrap();
        if held.distribution_state != DistributionState::Assigned {
            continue;
        }
        assert_eq!(held.assigned_user_id, Some(1));
        let current = orchestrator.get_current_assignment(id).await.unwrap().unwrap();
        assert_eq!(current.user_id, 1);
        assert_eq!(orchestrator.get_assignment_history(id).await.unwrap().len(), 1);
    }
}
