//! End-to-end lifecycle runs against the built-in and scripted agents.

mod common;

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use baggage_core::agents::{AgentRegistry, Capability, InvocationStatus};
use baggage_core::models::{
    ApprovalReason, ApprovalStatus, ApproverRole, Decision, MishandlingKind, Node, RiskLevel,
    WorkflowStatus,
};
use baggage_core::OrchestratorConfig;
use rust_decimal::Decimal;

use common::*;

#[tokio::test]
async fn test_happy_path_direct_flight() {
    let service = service();
    let result = service
        .initialize(direct_trip("0001", Decimal::from(100)))
        .await
        .expect("initialize");

    assert_eq!(result.current_node, Node::Delivered);
    assert_eq!(result.status, WorkflowStatus::Completed);
    assert_eq!(result.risk_level, RiskLevel::Low);

    let history = service.history(&result.bag_id).await.unwrap();
    assert_eq!(
        visited(&history),
        vec![
            Node::CheckIn,
            Node::SecurityScreening,
            Node::Sorting,
            Node::Loading,
            Node::InFlight,
            Node::Arrival,
            Node::Claim,
            Node::Delivered,
        ]
    );
    assert!(service
        .approval_gate
        .list_for_bag(&result.bag_id)
        .await
        .unwrap()
        .is_empty());

    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(state.current_location(), "MIA");
    assert!(state.mishandling().is_none());
    assert!(state.last_call(Capability::Prediction).is_some());
    assert!(state.last_call(Capability::DemandForecast).is_some());
}

#[tokio::test]
async fn test_checkpoint_versions_strictly_increase() {
    let service = service();
    let result = service
        .initialize(connecting_trip("0002", 60))
        .await
        .unwrap();
    let history = service.history(&result.bag_id).await.unwrap();

    assert!(history.len() > 8);
    for pair in history.windows(2) {
        assert!(pair[0].version < pair[1].version);
    }
    for checkpoint in &history {
        assert_eq!(checkpoint.state_snapshot.current_node(), checkpoint.node);
        assert_eq!(checkpoint.state_snapshot.version(), checkpoint.version);
    }
}

#[tokio::test]
async fn test_tight_connection_made() {
    let service = service();
    let result = service
        .initialize(connecting_trip("0003", 30))
        .await
        .unwrap();

    assert!(result.risk_score.unwrap() > 80.0);
    assert_eq!(result.risk_level, RiskLevel::Critical);
    assert_eq!(result.current_node, Node::Delivered);

    let history = service.history(&result.bag_id).await.unwrap();
    assert_eq!(
        visited(&history),
        vec![
            Node::CheckIn,
            Node::SecurityScreening,
            Node::Sorting,
            Node::Loading,
            Node::InFlight,
            Node::Transfer,
            Node::Sorting,
            Node::Loading,
            Node::InFlight,
            Node::Arrival,
            Node::Claim,
            Node::Delivered,
        ]
    );

    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(state.transfer_count(), 1);
    assert!(state.mishandling().is_none());
    assert!(state
        .alerts()
        .iter()
        .any(|a| a.message.starts_with("High risk connection detected")));
}

#[tokio::test]
async fn test_tight_connection_missed() {
    let service = service();
    // The route agent needs 25 minutes at the hub; 20 are available.
    let result = service
        .initialize(connecting_trip("0004", 20))
        .await
        .unwrap();
    assert_eq!(result.risk_level, RiskLevel::Critical);

    let history = service.history(&result.bag_id).await.unwrap();
    let nodes = visited(&history);
    assert!(nodes.contains(&Node::Mishandled));
    assert!(!nodes[nodes.iter().position(|n| *n == Node::Transfer).unwrap()..]
        .contains(&Node::Arrival));

    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    let mishandling = state.mishandling().expect("mishandling recorded");
    assert_eq!(mishandling.kind, MishandlingKind::Delayed);
    assert_eq!(mishandling.reason, "missed_connection");
    assert_eq!(mishandling.detected_at_node, Node::Transfer);
    assert_eq!(state.transfer_count(), 0);
    assert!(state.last_call(Capability::RootCause).is_some());
    assert!(state.last_call(Capability::CustomerService).is_some());
}

#[tokio::test]
async fn test_claim_threshold_is_strict() {
    let service = service();

    let at = service
        .initialize(direct_trip("0005", Decimal::from_str("5000.00").unwrap()))
        .await
        .unwrap();
    assert_eq!(at.current_node, Node::Delivered);

    let above = service
        .initialize(direct_trip("0006", Decimal::from_str("5000.01").unwrap()))
        .await
        .unwrap();
    assert_eq!(above.current_node, Node::WaitApproval);
    assert_eq!(above.status, WorkflowStatus::Waiting);
}

#[tokio::test]
async fn test_high_value_approved() {
    let service = service();
    let result = service
        .initialize(direct_trip("0007", Decimal::from(7500)))
        .await
        .unwrap();
    assert_eq!(result.current_node, Node::WaitApproval);

    let pending = service.list_pending_approvals(None).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reason, ApprovalReason::HighValueDelivery);
    assert_eq!(pending[0].approver_role, ApproverRole::Supervisor);
    assert!(service
        .list_pending_approvals(Some(ApproverRole::Manager))
        .await
        .unwrap()
        .is_empty());

    let decided = service
        .decide_approval(&pending[0].approval_id, Decision::Approve, "sup-7", None)
        .await
        .unwrap();
    assert_eq!(decided.status, ApprovalStatus::Approved);
    assert_eq!(
        service.get_state(&result.bag_id).await.unwrap().current_node,
        Node::Delivered
    );

    let history = service.history(&result.bag_id).await.unwrap();
    assert_eq!(
        visited(&history)[6..],
        [
            Node::Claim,
            Node::RequestApproval,
            Node::WaitApproval,
            Node::Delivered
        ]
    );
    let request = service
        .approval_gate
        .get(&pending[0].approval_id)
        .await
        .unwrap();
    assert!(request.is_consumed());
}

#[tokio::test]
async fn test_double_decision_single_transition() {
    let service = service();
    let result = service
        .initialize(direct_trip("0008", Decimal::from(7500)))
        .await
        .unwrap();
    let approval_id = service.list_pending_approvals(None).await.unwrap()[0]
        .approval_id
        .clone();

    let first = service
        .decide_approval(&approval_id, Decision::Approve, "sup-1", None)
        .await
        .unwrap();
    assert_eq!(first.status, ApprovalStatus::Approved);
    assert!(first.is_consumed());
    let after_first = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(after_first.current_node(), Node::Delivered);
    let checkpoints = service.history(&result.bag_id).await.unwrap().len();

    let second = service
        .decide_approval(&approval_id, Decision::Reject, "sup-2", None)
        .await
        .unwrap();
    assert_eq!(second.status, ApprovalStatus::Approved);
    assert_eq!(second.decided_by.as_deref(), Some("sup-1"));

    // The repeated decision leaves the bag exactly as it was.
    let after_second = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(after_second.version(), after_first.version());
    assert_eq!(after_second.events().len(), after_first.events().len());

    let history = service.history(&result.bag_id).await.unwrap();
    assert_eq!(history.len(), checkpoints);
    let exits = history
        .windows(2)
        .filter(|w| w[0].node == Node::WaitApproval && w[1].node != Node::WaitApproval)
        .count();
    assert_eq!(exits, 1);

    let request = service.approval_gate.get(&approval_id).await.unwrap();
    assert_eq!(request.decided_by.as_deref(), Some("sup-1"));
}

#[tokio::test]
async fn test_compensation_below_threshold_settles() {
    let registry = AgentRegistry::builtin().with(
        Capability::Compensation,
        FixedAgent::new(serde_json::json!({
            "eligible": true,
            "compensation_amount": "100.00",
        })),
    );
    let service = service_with(config(), registry);
    let result = service
        .initialize(connecting_trip("0009", 20))
        .await
        .unwrap();

    assert_eq!(result.current_node, Node::Delivered);
    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(state.compensation_amount(), Some(Decimal::from(100)));
    assert!(service
        .approval_gate
        .list_for_bag(&result.bag_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_compensation_above_threshold_needs_manager() {
    let registry = AgentRegistry::builtin().with(
        Capability::Compensation,
        FixedAgent::new(serde_json::json!({
            "eligible": true,
            "compensation_amount": "800.00",
        })),
    );
    let service = service_with(config(), registry);
    let result = service
        .initialize(connecting_trip("0010", 20))
        .await
        .unwrap();
    assert_eq!(result.current_node, Node::WaitApproval);

    let pending = service
        .list_pending_approvals(Some(ApproverRole::Manager))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].reason, ApprovalReason::HighCompensation);

    service
        .decide_approval(&pending[0].approval_id, Decision::Approve, "mgr-1", None)
        .await
        .unwrap();
    assert_eq!(
        service.get_state(&result.bag_id).await.unwrap().current_node,
        Node::Delivered
    );
}

#[tokio::test]
async fn test_rejection_rounds_are_bounded() {
    let registry = AgentRegistry::builtin().with(
        Capability::Compensation,
        FixedAgent::new(serde_json::json!({
            "eligible": true,
            "compensation_amount": "800.00",
        })),
    );
    let service = service_with(config(), registry);
    let result = service
        .initialize(connecting_trip("0011", 20))
        .await
        .unwrap();

    for round in 0..3 {
        let pending = service
            .list_pending_approvals(Some(ApproverRole::Manager))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1, "round {}", round);
        service
            .decide_approval(&pending[0].approval_id, Decision::Reject, "mgr-1", None)
            .await
            .unwrap();
    }

    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(state.current_node(), Node::Delivered);
    assert_eq!(state.approval_rounds(), 3);
    assert_eq!(state.compensation_amount(), Some(Decimal::from(500)));
    assert!(state
        .alerts()
        .iter()
        .any(|a| a.message.starts_with("Compensation settled")));
    assert!(service.list_pending_approvals(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transfer_reentry_bound() {
    let service = service();
    // Four hub transfers against the default bound of three.
    let result = service
        .initialize(multi_leg_trip("0012", 3))
        .await
        .unwrap();
    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(state.transfer_count(), 3);
    assert_eq!(
        state.mishandling().map(|m| m.reason.as_str()),
        Some("transfer_loop_exceeded")
    );

    let relaxed = OrchestratorConfig {
        max_transfer_reentries: 4,
        ..config()
    };
    let service = service_with(relaxed, AgentRegistry::builtin());
    let result = service
        .initialize(multi_leg_trip("0013", 3))
        .await
        .unwrap();
    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    assert_eq!(state.current_node(), Node::Delivered);
    assert_eq!(state.transfer_count(), 4);
    assert!(state.mishandling().is_none());
}

#[tokio::test]
async fn test_no_viable_route() {
    let mut registry = AgentRegistry::builtin();
    registry.unregister(Capability::InfrastructureHealth);
    registry.unregister(Capability::RouteOptimization);
    let service = service_with(config(), registry);

    let result = service
        .initialize(direct_trip("0014", Decimal::from(100)))
        .await
        .unwrap();
    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();

    let mishandling = state.mishandling().expect("mishandled");
    assert_eq!(mishandling.reason, "no_viable_route");
    assert_eq!(mishandling.detected_at_node, Node::Sorting);

    let route = state.last_call(Capability::RouteOptimization).unwrap();
    assert_eq!(route.status, InvocationStatus::Error);
    assert_eq!(route.attempts, 0);
    assert_eq!(state.current_node(), Node::Delivered);
}

#[tokio::test]
async fn test_route_timeouts_are_retried_then_mishandled() {
    let slow = Arc::new(common::SlowAgent::default());
    let mut registry = AgentRegistry::builtin().with(Capability::RouteOptimization, slow.clone());
    registry.unregister(Capability::InfrastructureHealth);
    let config = OrchestratorConfig {
        agent_timeout_secs: 1,
        agent_max_attempts: 2,
        ..config()
    };
    let service = service_with(config, registry);

    let result = service
        .initialize(direct_trip("0015", Decimal::from(100)))
        .await
        .unwrap();
    assert_eq!(slow.calls.load(Ordering::SeqCst), 2);

    let state = service.orchestrator.load_full_state(&result.bag_id).await.unwrap();
    let route = state.last_call(Capability::RouteOptimization).unwrap();
    assert_eq!(route.attempts, 2);
    assert_eq!(route.status, InvocationStatus::Error);
    assert_eq!(
        state.mishandling().map(|m| m.reason.as_str()),
        Some("no_viable_route")
    );
}

#[tokio::test]
async fn test_prediction_failure_degrades_to_unknown_risk() {
    let mut registry = AgentRegistry::builtin();
    registry.unregister(Capability::Prediction);
    let service = service_with(config(), registry);

    let result = service
        .initialize(direct_trip("0016", Decimal::from(100)))
        .await
        .unwrap();
    assert_eq!(result.risk_score, None);
    assert_eq!(result.risk_level, RiskLevel::Unknown);
    assert_eq!(result.current_node, Node::Delivered);
}

#[tokio::test]
async fn test_history_replays_live_sequence() {
    let service = service();
    let mut updates = service.subscribe(None);

    let result = service
        .initialize(connecting_trip("0017", 30))
        .await
        .unwrap();

    let mut live = Vec::new();
    while let Some(update) = updates.try_recv() {
        if update.bag_id == result.bag_id
            && matches!(update.kind, baggage_core::events::UpdateKind::StateChanged)
        {
            live.push((update.version, update.node));
        }
    }
    let replay: Vec<(u64, Node)> = service
        .history(&result.bag_id)
        .await
        .unwrap()
        .iter()
        .map(|c| (c.version, c.node))
        .collect();
    assert_eq!(live, replay);
}

#[tokio::test]
async fn test_restart_keeps_bag_id() {
    let service = service();
    let first = service
        .initialize(direct_trip("0018", Decimal::from(100)))
        .await
        .unwrap();
    let second = service
        .orchestrator
        .restart(&first.bag_id, None)
        .await
        .unwrap();

    assert_eq!(second.bag_id, first.bag_id);
    assert_ne!(second.workflow_id, first.workflow_id);
    assert_eq!(second.current_node, Node::Delivered);

    let history = service.history(&first.bag_id).await.unwrap();
    assert!(history.iter().any(|c| c.workflow_id == first.workflow_id));
    assert!(history.iter().any(|c| c.workflow_id == second.workflow_id));
}

#[tokio::test]
async fn test_invalid_trip_is_rejected() {
    let service = service();
    let mut trip = direct_trip("0019", Decimal::from(100));
    trip.weight_kg = 0.0;
    let err = service.initialize(trip).await.unwrap_err();
    assert_eq!(err.kind(), "bad_request");
    assert!(service.state_store.list_bags().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundreds_of_concurrent_bags() {
    let service = Arc::new(service());
    let mut handles = Vec::new();
    for i in 0..300 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let trip = match i % 3 {
                0 => direct_trip(&format!("C{:04}", i), Decimal::from(100)),
                1 => connecting_trip(&format!("C{:04}", i), 60),
                _ => direct_trip(&format!("C{:04}", i), Decimal::from(9000)),
            };
            service.initialize(trip).await
        }));
    }

    let mut delivered = 0;
    let mut waiting = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        match result.current_node {
            Node::Delivered => delivered += 1,
            Node::WaitApproval => waiting += 1,
            other => panic!("unexpected halt at {}", other),
        }
    }
    assert_eq!(delivered, 200);
    assert_eq!(waiting, 100);
    assert_eq!(service.state_store.list_bags().await.unwrap().len(), 300);
    assert_eq!(service.list_pending_approvals(None).await.unwrap().len(), 100);
}
