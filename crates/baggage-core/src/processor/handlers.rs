//! Per-type event application.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{EventOutcome, EventType, ExternalEvent};
use crate::agents::outputs::PredictionOutput;
use crate::error::BaggageError;
use crate::models::{
    ApprovalOutcome, ApprovalReason, BagState, Decision, MishandlingKind, Node, RiskLevel,
};
use crate::orchestration::{
    alert_on_elevated_risk, default_window, prediction_input, LifecycleOrchestrator,
};

// ─── Payloads ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanPayload {
    location: String,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "scanner_id")]
    scanner_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightDelayPayload {
    #[serde(alias = "delay_minutes")]
    delay_minutes: i64,
    #[serde(default)]
    flight: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusOverridePayload {
    #[serde(default, alias = "type", alias = "mishandling_type")]
    kind: Option<MishandlingKind>,
    /// Target node by name, e.g. `"sorting"`.
    #[serde(default, alias = "target_node")]
    node: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalDecisionPayload {
    #[serde(alias = "approval_id")]
    approval_id: String,
    #[serde(default)]
    decision: Option<String>,
    #[serde(default, alias = "decided_by")]
    decided_by: Option<String>,
    #[serde(default)]
    comments: Option<String>,
}

fn parse<T: DeserializeOwned>(event_type: EventType, payload: &Value) -> Result<T, BaggageError> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        BaggageError::BadRequest(format!("Invalid {} payload: {}", event_type.as_str(), e))
    })
}

/// One-line operator message for a notification.
pub(super) fn describe(event_type: EventType, payload: &Value) -> String {
    let field = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| payload.get(*k))
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| "?".to_string())
    };
    match event_type {
        EventType::Scan => format!("Scanned at {}", field(&["location"])),
        EventType::FlightDelay => format!(
            "Flight delayed {} minutes",
            field(&["delayMinutes", "delay_minutes"])
        ),
        EventType::StatusOverride => format!(
            "Status override: {}",
            field(&["kind", "type", "mishandling_type", "node", "target_node"])
        ),
        EventType::ApprovalDecision => format!(
            "Approval {} resolved",
            field(&["approvalId", "approval_id"])
        ),
    }
}

// ─── Application ──────────────────────────────────────────────────────────

/// Apply `event` to `state` without persisting. The caller checkpoints and
/// resumes the workflow afterwards.
pub(super) async fn apply_event(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    event_type: EventType,
    event: &ExternalEvent,
) -> Result<EventOutcome, BaggageError> {
    let mut outcome = EventOutcome {
        bag_id: state.bag_id.clone(),
        event_type,
        sequence: None,
        applied: true,
        current_node: state.current_node,
        version: state.version,
        ignored_reason: None,
    };

    if state.current_node.is_terminal() {
        let location = state.current_location.clone();
        outcome.sequence = Some(state.record_event(
            event_type.as_str(),
            location,
            json!({ "payload": event.payload, "afterTerminal": true }),
        ));
        outcome.applied = false;
        outcome.ignored_reason = Some(format!("bag already {}", state.current_node));
        return Ok(outcome);
    }

    match event_type {
        EventType::Scan => {
            let payload: ScanPayload = parse(event_type, &event.payload)?;
            outcome.sequence = Some(apply_scan(orchestrator, state, payload));
        }
        EventType::FlightDelay => {
            let payload: FlightDelayPayload = parse(event_type, &event.payload)?;
            outcome.sequence = Some(apply_flight_delay(orchestrator, state, payload).await?);
        }
        EventType::StatusOverride => {
            let payload: StatusOverridePayload = parse(event_type, &event.payload)?;
            outcome.sequence = Some(apply_status_override(orchestrator, state, payload)?);
        }
        EventType::ApprovalDecision => {
            let payload: ApprovalDecisionPayload = parse(event_type, &event.payload)?;
            if let Some(reason) = apply_approval_decision(orchestrator, state, payload).await? {
                outcome.applied = false;
                outcome.ignored_reason = Some(reason);
            }
        }
    }
    Ok(outcome)
}

fn apply_scan(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    payload: ScanPayload,
) -> u64 {
    let scanned_at = payload.timestamp.unwrap_or_else(Utc::now);
    let sequence = state.record_event_at(
        EventType::Scan.as_str(),
        payload.location.clone(),
        scanned_at,
        json!({ "scannerId": payload.scanner_id }),
    );
    state.set_location(payload.location);

    let past_deadline = state
        .transfer_deadline_at
        .map_or(false, |deadline| scanned_at >= deadline);
    if state.current_node == Node::Transfer && past_deadline {
        tracing::info!(
            bag_id = %state.bag_id,
            "[EventProcessor] Scan after the transfer deadline, connection missed"
        );
        orchestrator.fail(state, MishandlingKind::Delayed, "missed_connection");
    }
    sequence
}

async fn apply_flight_delay(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    payload: FlightDelayPayload,
) -> Result<u64, BaggageError> {
    if payload.delay_minutes < 0 {
        return Err(BaggageError::BadRequest(
            "delayMinutes must not be negative".to_string(),
        ));
    }
    let config = orchestrator.config();

    state.add_connection_delay(payload.delay_minutes);
    if let Some(deadline) = state.transfer_deadline_at {
        state.set_transfer_deadline(Some(deadline - Duration::minutes(payload.delay_minutes)));
    }
    let location = state.current_location.clone();
    let sequence = state.record_event(
        EventType::FlightDelay.as_str(),
        location.clone(),
        json!({
            "delayMinutes": payload.delay_minutes,
            "flight": payload.flight,
            "reason": payload.reason,
        }),
    );

    if !state.has_pending_connection() {
        return Ok(sequence);
    }
    let remaining = state.available_connection_minutes(default_window(config));
    if remaining >= config.connection_buffer_minutes {
        return Ok(sequence);
    }

    tracing::info!(
        bag_id = %state.bag_id,
        "[EventProcessor] Connection window down to {} minutes, re-assessing risk",
        remaining
    );
    let report = orchestrator
        .invoker()
        .invoke::<PredictionOutput>(state.current_node, prediction_input(state))
        .await;
    state.record_agent_call(report.record);
    if let Ok(prediction) = report.output {
        state.set_risk_score(Some(prediction.risk_score), prediction.risk_factors);
    }
    alert_on_elevated_risk(state);

    if state.risk_level == RiskLevel::Critical {
        let request = orchestrator
            .gate()
            .request_approval(
                &state.bag_id,
                &state.workflow_id,
                ApprovalReason::FlightHold,
                json!({
                    "remainingMinutes": remaining,
                    "holdMinutes": config.flight_hold_minutes,
                    "flight": payload.flight,
                }),
            )
            .await?;
        state.record_event(
            "approval_requested",
            location,
            json!({
                "approvalId": request.approval_id,
                "reason": ApprovalReason::FlightHold,
                "approverRole": request.approver_role,
            }),
        );
    }
    Ok(sequence)
}

/// Nodes an operator may place a bag at directly. Approval nodes and the
/// later mishandling steps are only reached through the workflow.
fn override_target(name: &str) -> Result<Node, BaggageError> {
    let node = Node::from_str(name)
        .ok_or_else(|| BaggageError::BadRequest(format!("Unknown node '{}'", name)))?;
    match node {
        Node::Delivered
        | Node::RootCauseAnalysis
        | Node::Compensation
        | Node::RequestApproval
        | Node::WaitApproval => Err(BaggageError::BadRequest(format!(
            "Node {} cannot be set by a status override",
            node
        ))),
        _ => Ok(node),
    }
}

fn apply_status_override(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    payload: StatusOverridePayload,
) -> Result<u64, BaggageError> {
    let target = payload.node.as_deref().map(override_target).transpose()?;
    let reason = payload
        .reason
        .unwrap_or_else(|| EventType::StatusOverride.as_str().to_string());

    match (target, payload.kind) {
        (None | Some(Node::Mishandled), Some(kind)) => {
            Ok(mark_mishandled(orchestrator, state, kind, reason))
        }
        (Some(Node::Mishandled), None) => Err(BaggageError::BadRequest(
            "kind is required to mark a bag mishandled".to_string(),
        )),
        (Some(node), None) => reposition(orchestrator, state, node, reason),
        (Some(node), Some(_)) => Err(BaggageError::BadRequest(format!(
            "kind only applies to the mishandled node, not {}",
            node
        ))),
        (None, None) => Err(BaggageError::BadRequest(
            "status_override needs a kind or a target node".to_string(),
        )),
    }
}

fn mark_mishandled(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    kind: MishandlingKind,
    reason: String,
) -> u64 {
    state.record_mishandling(kind, reason.clone());
    let location = state.current_location.clone();
    let sequence = state.record_event(
        EventType::StatusOverride.as_str(),
        location,
        json!({ "kind": kind, "reason": reason }),
    );

    let settling = state.pending_approval_reason == Some(ApprovalReason::HighCompensation);
    if state.current_node.is_mishandling_branch() || settling {
        return sequence;
    }
    if state.current_node == Node::WaitApproval {
        // The pending delivery sign-off no longer applies.
        state.finish_approval(false);
    }
    orchestrator.enter(state, Node::Mishandled);
    sequence
}

/// Move a bag on its journey to `node`. The caller resumes the workflow
/// from there.
fn reposition(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    node: Node,
    reason: String,
) -> Result<u64, BaggageError> {
    let settling = state.pending_approval_reason == Some(ApprovalReason::HighCompensation);
    if state.current_node.is_mishandling_branch() || settling {
        return Err(BaggageError::BadRequest(format!(
            "Bag {} is being handled as mishandled and cannot be moved to {}",
            state.bag_id, node
        )));
    }

    let from = state.current_node;
    let location = state.current_location.clone();
    let sequence = state.record_event(
        EventType::StatusOverride.as_str(),
        location,
        json!({ "from": from, "node": node, "reason": reason }),
    );
    if from == node {
        return Ok(sequence);
    }
    if state.current_node == Node::WaitApproval {
        state.finish_approval(false);
    }
    orchestrator.enter(state, node);
    Ok(sequence)
}

/// Returns the reason the decision was ignored, if it was.
async fn apply_approval_decision(
    orchestrator: &LifecycleOrchestrator,
    state: &mut BagState,
    payload: ApprovalDecisionPayload,
) -> Result<Option<String>, BaggageError> {
    let gate = orchestrator.gate();
    let mut request = gate.get(&payload.approval_id).await?;
    if request.bag_id != state.bag_id {
        return Err(BaggageError::BadRequest(format!(
            "Approval {} belongs to bag {}",
            request.approval_id, request.bag_id
        )));
    }

    if request.is_pending() {
        let decision = payload
            .decision
            .as_deref()
            .ok_or_else(|| {
                BaggageError::BadRequest("decision is required for a pending approval".to_string())
            })
            .and_then(|d| {
                Decision::from_str(d)
                    .ok_or_else(|| BaggageError::BadRequest(format!("Unknown decision '{}'", d)))
            })?;
        let decided_by = payload.decided_by.unwrap_or_default();
        (request, _) = gate
            .decide(&request.approval_id, decision, &decided_by, payload.comments)
            .await?;
    }

    if request.reason.is_advisory() {
        let (request, first) = gate.consume(&request.approval_id).await?;
        if !first {
            return Ok(Some("approval already applied".to_string()));
        }
        let granted = request.outcome() == Some(ApprovalOutcome::Approved);
        let hold_minutes = if granted {
            orchestrator.config().flight_hold_minutes
        } else {
            0
        };
        if granted {
            state.grant_flight_hold(hold_minutes);
        }
        let location = state.current_location.clone();
        state.record_event(
            "flight_hold",
            location,
            json!({
                "approvalId": request.approval_id,
                "granted": granted,
                "holdMinutes": hold_minutes,
            }),
        );
        return Ok(None);
    }

    let awaited = state.current_node == Node::WaitApproval
        && state.active_approval_id.as_deref() == Some(request.approval_id.as_str());
    if !awaited {
        return Ok(Some("approval is not awaited by the bag".to_string()));
    }
    // Resumed by the caller: wait_approval consumes the resolution.
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_aliases() {
        let p: FlightDelayPayload =
            parse(EventType::FlightDelay, &json!({ "delay_minutes": 45 })).unwrap();
        assert_eq!(p.delay_minutes, 45);

        let p: StatusOverridePayload =
            parse(EventType::StatusOverride, &json!({ "type": "lost" })).unwrap();
        assert_eq!(p.kind, Some(MishandlingKind::Lost));

        let p: StatusOverridePayload =
            parse(EventType::StatusOverride, &json!({ "target_node": "sorting" })).unwrap();
        assert_eq!(p.kind, None);
        assert_eq!(p.node.as_deref(), Some("sorting"));

        let p: ApprovalDecisionPayload = parse(
            EventType::ApprovalDecision,
            &json!({ "approval_id": "A-1", "decision": "approved", "decided_by": "sup" }),
        )
        .unwrap();
        assert_eq!(p.approval_id, "A-1");
        assert_eq!(p.decided_by.as_deref(), Some("sup"));
    }

    #[test]
    fn test_malformed_payload_is_bad_request() {
        let err = parse::<ScanPayload>(EventType::Scan, &json!({ "gate": "B12" })).unwrap_err();
        assert!(matches!(err, BaggageError::BadRequest(_)));
        let err =
            parse::<StatusOverridePayload>(EventType::StatusOverride, &json!({ "kind": "stolen" }))
                .unwrap_err();
        assert!(matches!(err, BaggageError::BadRequest(_)));
    }

    #[test]
    fn test_override_targets() {
        assert_eq!(override_target("sorting").unwrap(), Node::Sorting);
        assert_eq!(override_target("mishandled").unwrap(), Node::Mishandled);
        for name in ["delivered", "wait_approval", "compensation", "Sorting", "hangar"] {
            let err = override_target(name).unwrap_err();
            assert!(matches!(err, BaggageError::BadRequest(_)), "{name}");
        }
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            describe(EventType::FlightDelay, &json!({ "delayMinutes": 45 })),
            "Flight delayed 45 minutes"
        );
        assert_eq!(
            describe(EventType::Scan, &json!({ "location": "MIA" })),
            "Scanned at MIA"
        );
        assert_eq!(
            describe(EventType::StatusOverride, &json!({ "node": "sorting" })),
            "Status override: sorting"
        );
    }
}
