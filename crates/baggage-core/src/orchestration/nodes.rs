//! Work performed at each lifecycle node.
//!
//! Node work mutates the bag through its accessors and reports a routing
//! [`Signal`]. Agent failures are absorbed here: a failed call is recorded
//! on the bag and the node falls back to its conservative default.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use super::transitions::Signal;
use super::LifecycleOrchestrator;
use crate::agents::outputs::{
    CompensationOutput, CustomerServiceOutput, DemandForecastOutput, InfrastructureHealthOutput,
    PredictionOutput, RootCauseOutput, RouteOptimizationOutput,
};
use crate::error::BaggageError;
use crate::models::{
    AlertSeverity, ApprovalOutcome, ApprovalReason, BagState, MishandlingKind, Node, RiskLevel,
};

/// Result of executing one node.
#[derive(Debug)]
pub(crate) enum NodeOutcome {
    Next(Signal),
    /// Parked at `wait_approval` with the request still pending.
    Suspend,
    /// Forced into the mishandling branch.
    Fatal {
        kind: MishandlingKind,
        reason: &'static str,
    },
}

/// Equipment health below which sorting falls back to rerouting.
const MIN_OPERATING_HEALTH: f64 = 40.0;
/// Equipment health below which an operator alert is raised.
const DEGRADED_HEALTH: f64 = 70.0;

impl LifecycleOrchestrator {
    pub(crate) async fn execute_node(
        &self,
        state: &mut BagState,
    ) -> Result<NodeOutcome, BaggageError> {
        match state.current_node {
            Node::CheckIn => Ok(self.check_in(state).await),
            Node::SecurityScreening => {
                status_event(state, "security_screening");
                Ok(NodeOutcome::Next(Signal::Done))
            }
            Node::Sorting => Ok(self.sorting(state).await),
            Node::Loading => {
                status_event(state, "loading");
                Ok(NodeOutcome::Next(Signal::Done))
            }
            Node::InFlight => {
                let flight = current_flight(state);
                let location = state.current_location.clone();
                state.record_event(
                    "status_update",
                    location,
                    json!({ "status": "in_flight", "flight": flight }),
                );
                Ok(NodeOutcome::Next(Signal::PendingConnection(
                    state.has_pending_connection(),
                )))
            }
            Node::Transfer => Ok(self.transfer(state).await),
            Node::Arrival => Ok(self.arrival(state)),
            Node::Claim => Ok(self.claim(state)),
            Node::Mishandled => Ok(self.mishandled(state).await),
            Node::RootCauseAnalysis => Ok(self.root_cause_analysis(state).await),
            Node::Compensation => Ok(self.compensation(state).await),
            Node::RequestApproval => self.request_approval(state).await,
            Node::WaitApproval => self.wait_approval(state).await,
            Node::Delivered => Err(BaggageError::Internal(
                "delivered is terminal and has no node work".to_string(),
            )),
        }
    }

    // ─── Journey nodes ─────────────────────────────────────────────────

    async fn check_in(&self, state: &mut BagState) -> NodeOutcome {
        status_event(state, "check_in");

        let node = state.current_node;
        let demand_input = json!({
            "airport_code": state.trip.origin_airport,
            "flight_id": state.trip.origin_flight,
        });
        let (prediction, demand) = tokio::join!(
            self.invoker
                .invoke::<PredictionOutput>(node, prediction_input(state)),
            self.invoker
                .invoke::<DemandForecastOutput>(node, demand_input),
        );
        state.record_agent_call(prediction.record);
        state.record_agent_call(demand.record);

        match prediction.output {
            Ok(p) => state.set_risk_score(Some(p.risk_score), p.risk_factors),
            Err(_) => state.set_risk_score(None, Vec::new()),
        }
        alert_on_elevated_risk(state);

        NodeOutcome::Next(Signal::Done)
    }

    async fn sorting(&self, state: &mut BagState) -> NodeOutcome {
        status_event(state, "sorting");

        let node = state.current_node;
        let health_input = json!({
            "airport_code": state.current_location,
            "equipment_type": "sorting_system",
        });
        let (prediction, health) = tokio::join!(
            self.invoker
                .invoke::<PredictionOutput>(node, prediction_input(state)),
            self.invoker
                .invoke::<InfrastructureHealthOutput>(node, health_input),
        );
        state.record_agent_call(prediction.record);
        state.record_agent_call(health.record);

        if let Ok(p) = prediction.output {
            state.set_risk_score(Some(p.risk_score), p.risk_factors);
        }

        let healthy = match health.output {
            Ok(h) => {
                if h.overall_health < DEGRADED_HEALTH {
                    let location = state.current_location.clone();
                    state.raise_alert(
                        AlertSeverity::Medium,
                        format!(
                            "Sorting system degraded at {} ({}%), may cause delays",
                            location, h.overall_health
                        ),
                    );
                }
                h.operational && h.overall_health >= MIN_OPERATING_HEALTH
            }
            Err(_) => false,
        };
        if healthy {
            return NodeOutcome::Next(Signal::Routable);
        }

        // Equipment down or health unknown: look for an alternate path.
        let route_input = json!({
            "origin": state.current_location,
            "destination": next_stop(state),
            "via": [],
        });
        let route = self
            .invoker
            .invoke::<RouteOptimizationOutput>(node, route_input)
            .await;
        state.record_agent_call(route.record);

        match route.output.ok().and_then(|r| r.optimal_route) {
            Some(route) => {
                let location = state.current_location.clone();
                state.record_event(
                    "reroute",
                    location,
                    json!({
                        "path": route.path,
                        "totalTimeMinutes": route.total_time_minutes,
                        "reliabilityScore": route.reliability_score,
                    }),
                );
                NodeOutcome::Next(Signal::Routable)
            }
            None => NodeOutcome::Fatal {
                kind: MishandlingKind::Delayed,
                reason: "no_viable_route",
            },
        }
    }

    async fn transfer(&self, state: &mut BagState) -> NodeOutcome {
        let now = Utc::now();
        let config = &self.config;

        if let Some(hub) = state.trip.connection_hub(state.transfer_count).map(str::to_string) {
            if state.current_location != hub {
                state.set_location(hub);
            }
        }

        if state.transfer_count >= config.max_transfer_reentries {
            return NodeOutcome::Fatal {
                kind: MishandlingKind::Delayed,
                reason: "transfer_loop_exceeded",
            };
        }

        let available = state.available_connection_minutes(default_window(config));
        if state.transfer_deadline_at.is_none() {
            state.set_transfer_deadline(Some(now + Duration::minutes(available.max(0))));
        }
        let location = state.current_location.clone();
        state.record_event(
            "status_update",
            location.clone(),
            json!({ "status": "transfer", "availableMinutes": available }),
        );

        let route_input = json!({
            "origin": state.trip.origin_airport,
            "destination": state.trip.destination_airport,
            "via": [location],
            "connection_window_minutes": available,
        });
        let route = self
            .invoker
            .invoke::<RouteOptimizationOutput>(state.current_node, route_input)
            .await;
        state.record_agent_call(route.record);

        let transfer_minutes = route
            .output
            .ok()
            .and_then(|r| r.optimal_route)
            .and_then(|r| r.transfer_minutes)
            .unwrap_or(config.minimum_connection_minutes) as i64;

        let within_deadline = state.transfer_deadline_at.map_or(false, |d| now < d);
        if transfer_minutes >= available || !within_deadline {
            tracing::info!(
                bag_id = %state.bag_id,
                "[Orchestrator] Connection missed: needs {} min, {} min available",
                transfer_minutes,
                available
            );
            return NodeOutcome::Fatal {
                kind: MishandlingKind::Delayed,
                reason: "missed_connection",
            };
        }

        state.complete_transfer();
        state.record_event(
            "transfer_complete",
            location,
            json!({ "transferMinutes": transfer_minutes, "transferCount": state.transfer_count }),
        );
        NodeOutcome::Next(Signal::ConnectionMade)
    }

    fn arrival(&self, state: &mut BagState) -> NodeOutcome {
        let destination = state.trip.destination_airport.clone();
        state.set_location(destination.clone());
        state.record_event("status_update", destination, json!({ "status": "arrival" }));

        let lost = matches!(
            state.mishandling.as_ref().map(|m| m.kind),
            Some(MishandlingKind::Lost)
        );
        NodeOutcome::Next(Signal::Located(!lost))
    }

    fn claim(&self, state: &mut BagState) -> NodeOutcome {
        status_event(state, "claim");
        let requires = state.trip.declared_value > self.config.high_value_threshold;
        if requires {
            state.begin_approval(ApprovalReason::HighValueDelivery);
        }
        NodeOutcome::Next(Signal::RequiresApproval(requires))
    }

    // ─── Mishandling branch ────────────────────────────────────────────

    async fn mishandled(&self, state: &mut BagState) -> NodeOutcome {
        if state.mishandling.is_none() {
            state.record_mishandling(MishandlingKind::Delayed, "unspecified");
        }
        let (kind, reason) = mishandling_facts(state);
        state.raise_alert(
            AlertSeverity::High,
            format!("Bag mishandled: {} ({})", kind.as_str(), reason),
        );
        let location = state.current_location.clone();
        state.record_event(
            "mishandling",
            location,
            json!({ "kind": kind, "reason": reason }),
        );

        let input = json!({
            "customer_query": format!("Baggage {}", kind.as_str()),
            "bag_tag": state.trip.tag_number,
            "passenger_id": state.trip.passenger_id,
        });
        let report = self
            .invoker
            .invoke::<CustomerServiceOutput>(state.current_node, input)
            .await;
        state.record_agent_call(report.record);

        NodeOutcome::Next(Signal::Done)
    }

    async fn root_cause_analysis(&self, state: &mut BagState) -> NodeOutcome {
        let (kind, reason) = mishandling_facts(state);
        let input = json!({
            "incident_id": format!("INC-{}", state.bag_id),
            "incident_type": kind.as_str(),
            "reason": reason,
        });
        let report = self
            .invoker
            .invoke::<RootCauseOutput>(state.current_node, input)
            .await;
        state.record_agent_call(report.record);
        NodeOutcome::Next(Signal::Done)
    }

    async fn compensation(&self, state: &mut BagState) -> NodeOutcome {
        let threshold = self.config.compensation_threshold;
        let location = state.current_location.clone();

        if state.approval_rounds >= self.config.max_approval_rounds {
            let settled = state
                .compensation_amount
                .map_or(threshold, |amount| amount.min(threshold));
            state.set_compensation_amount(Some(settled));
            state.raise_alert(
                AlertSeverity::Medium,
                format!(
                    "Compensation settled at {} after {} approval rounds",
                    settled, state.approval_rounds
                ),
            );
            state.record_event(
                "compensation_settled",
                location,
                json!({ "amount": settled, "approvalRounds": state.approval_rounds }),
            );
            return NodeOutcome::Next(Signal::RequiresApproval(false));
        }

        let (kind, _) = mishandling_facts(state);
        let delay_hours = Decimal::from(state.connection_delay_minutes.max(0)) / Decimal::from(60);
        let input = json!({
            "claim_id": format!("CLM-{}", state.bag_id),
            "incident_type": kind.as_str(),
            "delay_hours": delay_hours.ceil().to_string(),
            "declared_value": state.trip.declared_value.to_string(),
            "customer_tier": state.trip.customer_tier.as_str(),
        });
        let report = self
            .invoker
            .invoke::<CompensationOutput>(state.current_node, input)
            .await;
        state.record_agent_call(report.record);

        let requires = match report.output {
            Ok(c) => {
                state.set_compensation_amount(Some(c.compensation_amount));
                c.compensation_amount > threshold
            }
            // Amount unknown: a human decides.
            Err(_) => {
                state.set_compensation_amount(None);
                true
            }
        };
        state.record_event(
            "compensation",
            location,
            json!({ "amount": state.compensation_amount, "requiresApproval": requires }),
        );
        if requires {
            state.begin_approval(ApprovalReason::HighCompensation);
        }
        NodeOutcome::Next(Signal::RequiresApproval(requires))
    }

    // ─── Approval nodes ────────────────────────────────────────────────

    async fn request_approval(&self, state: &mut BagState) -> Result<NodeOutcome, BaggageError> {
        let reason = state.pending_approval_reason.unwrap_or_else(|| {
            if state.current_node.is_mishandling_branch() || state.compensation_amount.is_some() {
                ApprovalReason::HighCompensation
            } else {
                ApprovalReason::HighValueDelivery
            }
        });
        let payload = json!({
            "tagNumber": state.trip.tag_number,
            "declaredValue": state.trip.declared_value,
            "compensationAmount": state.compensation_amount,
            "approvalRound": state.approval_rounds + 1,
        });
        let request = self
            .gate
            .request_approval(&state.bag_id, &state.workflow_id, reason, payload)
            .await?;

        state.attach_approval(request.approval_id.clone());
        let location = state.current_location.clone();
        state.record_event(
            "approval_requested",
            location,
            json!({
                "approvalId": request.approval_id,
                "reason": reason,
                "approverRole": request.approver_role,
                "timeoutAt": request.timeout_at,
            }),
        );
        Ok(NodeOutcome::Next(Signal::Done))
    }

    async fn wait_approval(&self, state: &mut BagState) -> Result<NodeOutcome, BaggageError> {
        let approval_id = state.active_approval_id.clone().ok_or_else(|| {
            BaggageError::Internal(format!(
                "Bag {} is waiting without an approval request",
                state.bag_id
            ))
        })?;

        let request = self.gate.get(&approval_id).await?;
        let outcome = match request.outcome() {
            None => return Ok(NodeOutcome::Suspend),
            Some(outcome) => outcome,
        };

        let (request, first) = self.gate.consume(&approval_id).await?;
        if !first {
            tracing::debug!(
                bag_id = %state.bag_id,
                "[Orchestrator] Approval {} was already consumed, re-applying its outcome",
                approval_id
            );
        }

        state.finish_approval(outcome != ApprovalOutcome::Approved);
        let location = state.current_location.clone();
        state.record_event(
            "approval_resolved",
            location,
            json!({
                "approvalId": approval_id,
                "status": request.status,
                "outcome": outcome,
                "decidedBy": request.decided_by,
            }),
        );

        let reason = match outcome {
            ApprovalOutcome::Approved => None,
            ApprovalOutcome::Rejected => Some("approval_rejected"),
            ApprovalOutcome::Abandoned => Some("approval_abandoned"),
        };
        if let Some(reason) = reason {
            let kind = state
                .mishandling
                .as_ref()
                .map_or(MishandlingKind::Delayed, |m| m.kind);
            state.record_mishandling(kind, reason);
        }
        Ok(NodeOutcome::Next(Signal::Approval(outcome)))
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────

fn status_event(state: &mut BagState, status: &str) {
    let location = state.current_location.clone();
    state.record_event("status_update", location, json!({ "status": status }));
}

fn current_flight(state: &BagState) -> String {
    match state.transfer_count {
        0 => state.trip.origin_flight.clone(),
        1 => state
            .trip
            .connection_flight
            .clone()
            .unwrap_or_else(|| state.trip.origin_flight.clone()),
        n => state
            .trip
            .onward_legs
            .get(n as usize - 2)
            .map(|leg| leg.flight.clone())
            .unwrap_or_else(|| state.trip.origin_flight.clone()),
    }
}

fn next_stop(state: &BagState) -> String {
    if state.has_pending_connection() {
        if let Some(hub) = state.trip.connection_hub(state.transfer_count) {
            return hub.to_string();
        }
    }
    state.trip.destination_airport.clone()
}

fn mishandling_facts(state: &BagState) -> (MishandlingKind, String) {
    state
        .mishandling
        .as_ref()
        .map(|m| (m.kind, m.reason.clone()))
        .unwrap_or((MishandlingKind::Delayed, "unspecified".to_string()))
}

/// Window assumed when the itinerary does not state one.
pub(crate) fn default_window(config: &crate::config::OrchestratorConfig) -> u32 {
    config.minimum_connection_minutes + config.connection_buffer_minutes.max(0) as u32
}

pub(crate) fn prediction_input(state: &BagState) -> serde_json::Value {
    json!({
        "flight_id": current_flight(state),
        "departure_airport": state.trip.origin_airport,
        "arrival_airport": state.trip.destination_airport,
        "connection_time": state.relevant_connection_window(),
        "delay_minutes": state.connection_delay_minutes - state.flight_hold_minutes,
    })
}

pub(crate) fn alert_on_elevated_risk(state: &mut BagState) {
    let severity = match state.risk_level.effective() {
        RiskLevel::Critical => AlertSeverity::Critical,
        RiskLevel::High => AlertSeverity::High,
        _ => return,
    };
    let score = state.risk_score.unwrap_or_default();
    state.raise_alert(
        severity,
        format!("High risk connection detected: {:.0}%", score),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::models::{CustomerTier, TripFacts};

    fn state(window: Option<u32>) -> BagState {
        BagState::new(
            "BAG-1".to_string(),
            "WF-1".to_string(),
            TripFacts {
                tag_number: "T1".into(),
                passenger_id: "P1".into(),
                origin_flight: "CM101".into(),
                origin_airport: "BOG".into(),
                destination_airport: "MIA".into(),
                connection_flight: window.map(|_| "CM202".to_string()),
                connection_airport: window.map(|_| "PTY".to_string()),
                connection_time_minutes: window,
                onward_legs: vec![],
                weight_kg: 20.0,
                declared_value: Decimal::from(100),
                customer_tier: CustomerTier::Standard,
            },
        )
    }

    #[test]
    fn test_default_window_adds_buffer() {
        assert_eq!(default_window(&OrchestratorConfig::default()), 75);
    }

    #[test]
    fn test_prediction_input_uses_net_delay() {
        let mut s = state(Some(40));
        s.add_connection_delay(25);
        s.grant_flight_hold(15);
        let input = prediction_input(&s);
        assert_eq!(input["connection_time"], 40);
        assert_eq!(input["delay_minutes"], 10);
        assert_eq!(input["flight_id"], "CM101");
    }

    #[test]
    fn test_current_flight_follows_transfers() {
        let mut s = state(Some(60));
        assert_eq!(current_flight(&s), "CM101");
        assert_eq!(next_stop(&s), "PTY");
        s.complete_transfer();
        assert_eq!(current_flight(&s), "CM202");
        assert_eq!(next_stop(&s), "MIA");
    }

    #[test]
    fn test_elevated_risk_alerts() {
        let mut s = state(None);
        s.set_risk_score(Some(25.0), vec![]);
        alert_on_elevated_risk(&mut s);
        assert!(s.alerts.is_empty());

        s.set_risk_score(Some(90.0), vec![]);
        alert_on_elevated_risk(&mut s);
        assert_eq!(s.alerts.len(), 1);
        assert_eq!(s.alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(s.alerts[0].message, "High risk connection detected: 90%");
    }
}
