//! Deterministic rule-based agents.
//!
//! Stand-ins for the real ML agents: every capability answers from fixed
//! rules over its input, so demos and tests are reproducible.

use async_trait::async_trait;
use rust_decimal::prelude::*;
use serde_json::{json, Value};

use super::{Agent, AgentError, AgentInvocation, Capability};

/// Hub handling time the route agent reports for an expedited transfer.
pub const EXPEDITED_TRANSFER_MINUTES: u32 = 25;

#[derive(Debug, Clone, Default)]
pub struct BuiltinAgent;

impl BuiltinAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Agent for BuiltinAgent {
    fn name(&self) -> &str {
        "builtin"
    }

    async fn invoke(
        &self,
        capability: Capability,
        input: &Value,
    ) -> Result<AgentInvocation, AgentError> {
        let (result, confidence) = match capability {
            Capability::Prediction => (predict(input), 0.87),
            Capability::InfrastructureHealth => (infrastructure_health(input), 0.9),
            Capability::RouteOptimization => (route(input), 0.92),
            Capability::DemandForecast => (demand_forecast(input), 0.85),
            Capability::RootCause => (root_cause(input), 0.8),
            Capability::CustomerService => (customer_service(input), 0.95),
            Capability::Compensation => (compensation(input)?, 0.9),
        };
        Ok(AgentInvocation::success(result, confidence))
    }
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// Risk from the effective connection window (scheduled minus delay).
fn predict(input: &Value) -> Value {
    let window = input.get("connection_time").and_then(Value::as_i64);
    let delay = input.get("delay_minutes").and_then(Value::as_i64).unwrap_or(0);

    let (score, factors): (f64, Vec<&str>) = match window.map(|w| w - delay) {
        None => (10.0, vec![]),
        Some(m) if m < 40 => (90.0, vec!["connection below minimum connection time"]),
        Some(m) if m < 45 => (85.0, vec!["connection at minimum connection time"]),
        Some(m) if m < 60 => (50.0, vec!["tight connection"]),
        Some(_) => (20.0, vec![]),
    };
    let mut factors: Vec<String> = factors.into_iter().map(String::from).collect();
    if delay > 0 {
        factors.push(format!("inbound delay of {} minutes", delay));
    }

    json!({
        "risk_score": score,
        "risk_factors": factors,
        "recommended_action": if score > 80.0 { Some("expedite transfer") } else { None },
    })
}

fn infrastructure_health(input: &Value) -> Value {
    json!({
        "airport_code": str_field(input, "airport_code").unwrap_or("UNKNOWN"),
        "equipment_type": str_field(input, "equipment_type").unwrap_or("sorting_system"),
        "overall_health": 87,
        "operational": true,
        "alerts": [],
    })
}

/// Direct path through any requested hubs.
fn route(input: &Value) -> Value {
    let origin = str_field(input, "origin").unwrap_or("UNKNOWN");
    let destination = str_field(input, "destination").unwrap_or("UNKNOWN");
    let via: Vec<&str> = input
        .get("via")
        .and_then(Value::as_array)
        .map(|v| v.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut path = vec![origin];
    path.extend(via.iter().copied());
    path.push(destination);

    let route = if via.is_empty() {
        json!({
            "path": path,
            "total_time_minutes": 8,
            "reliability_score": 0.95,
        })
    } else {
        json!({
            "path": path,
            "total_time_minutes": 245,
            "transfer_minutes": EXPEDITED_TRANSFER_MINUTES,
            "reliability_score": 0.94,
        })
    };
    json!({ "optimal_route": route, "alternative_routes": [] })
}

fn demand_forecast(input: &Value) -> Value {
    json!({
        "airport_code": str_field(input, "airport_code").unwrap_or("UNKNOWN"),
        "expected_volume": 1200,
        "peak_period": false,
    })
}

fn root_cause(input: &Value) -> Value {
    let cause = match str_field(input, "incident_type") {
        Some("lost") => "tag read failure at sortation",
        Some("damaged") => "conveyor jam during loading",
        _ => "insufficient connection time",
    };
    json!({
        "incident_id": str_field(input, "incident_id"),
        "root_cause": cause,
        "contributing_factors": [str_field(input, "reason").unwrap_or("unspecified")],
        "recommendations": ["review hub staffing for connection bank"],
    })
}

fn customer_service(input: &Value) -> Value {
    json!({
        "notification_sent": true,
        "channel": "sms",
        "message": format!(
            "{} (tag {})",
            str_field(input, "customer_query").unwrap_or("Baggage update"),
            str_field(input, "bag_tag").unwrap_or("unknown")
        ),
    })
}

/// Settlement by incident kind, scaled by the loyalty tier.
fn compensation(input: &Value) -> Result<Value, AgentError> {
    let decimal = |key: &str| -> Result<Decimal, AgentError> {
        match input.get(key) {
            None | Some(Value::Null) => Ok(Decimal::ZERO),
            Some(Value::String(s)) => Decimal::from_str(s)
                .map_err(|e| AgentError::InvalidOutput(format!("{}: {}", key, e))),
            Some(Value::Number(n)) => n
                .as_f64()
                .and_then(Decimal::from_f64)
                .ok_or_else(|| AgentError::InvalidOutput(format!("{}: not a number", key))),
            Some(other) => Err(AgentError::InvalidOutput(format!("{}: {}", key, other))),
        }
    };
    let declared = decimal("declared_value")?;
    let delay_hours = decimal("delay_hours")?;

    let base = match str_field(input, "incident_type") {
        Some("lost") => declared.min(Decimal::from(1500)),
        Some("damaged") => (declared * Decimal::new(8, 1)).min(Decimal::from(1000)),
        _ => (delay_hours * Decimal::from(50)).min(Decimal::from(500)),
    };
    let multiplier = match str_field(input, "customer_tier") {
        Some("silver") => Decimal::new(11, 1),
        Some("gold") => Decimal::new(12, 1),
        Some("platinum") => Decimal::new(13, 1),
        _ => Decimal::ONE,
    };
    let amount = (base * multiplier).round_dp(2);

    Ok(json!({
        "eligible": true,
        "compensation_amount": amount.to_string(),
        "currency": "USD",
        "breakdown": {
            "base_amount": base.to_string(),
            "tier_bonus": (amount - base).to_string(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn call(capability: Capability, input: Value) -> Value {
        BuiltinAgent::new()
            .invoke(capability, &input)
            .await
            .unwrap()
            .result
    }

    #[tokio::test]
    async fn test_prediction_bands_by_connection_time() {
        let cases = [
            (None, 10.0),
            (Some(30), 90.0),
            (Some(42), 85.0),
            (Some(50), 50.0),
            (Some(90), 20.0),
        ];
        for (window, expected) in cases {
            let out = call(Capability::Prediction, json!({ "connection_time": window })).await;
            assert_eq!(out["risk_score"].as_f64(), Some(expected), "window {:?}", window);
        }
    }

    #[tokio::test]
    async fn test_delay_shrinks_the_window() {
        let out = call(
            Capability::Prediction,
            json!({"connection_time": 60, "delay_minutes": 25}),
        )
        .await;
        assert_eq!(out["risk_score"].as_f64(), Some(90.0));
    }

    fn amount(out: &Value) -> Decimal {
        Decimal::from_str(out["compensation_amount"].as_str().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_compensation_rules() {
        let lost = call(
            Capability::Compensation,
            json!({"incident_type": "lost", "declared_value": "2000", "customer_tier": "standard"}),
        )
        .await;
        assert_eq!(amount(&lost), Decimal::from(1500));

        let damaged = call(
            Capability::Compensation,
            json!({"incident_type": "damaged", "declared_value": "125", "customer_tier": "gold"}),
        )
        .await;
        assert_eq!(amount(&damaged), Decimal::from(120));

        let delayed = call(
            Capability::Compensation,
            json!({"incident_type": "delayed", "delay_hours": 4}),
        )
        .await;
        assert_eq!(amount(&delayed), Decimal::from(200));
    }

    #[tokio::test]
    async fn test_route_through_hub() {
        let out = call(
            Capability::RouteOptimization,
            json!({"origin": "BOG", "destination": "MIA", "via": ["PTY"]}),
        )
        .await;
        assert_eq!(out["optimal_route"]["path"], json!(["BOG", "PTY", "MIA"]));
        assert_eq!(out["optimal_route"]["transfer_minutes"], 25);
    }
}
