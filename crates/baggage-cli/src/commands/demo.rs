//! `baggage demo`: canned journeys against the configured service.
//!
//! Each scenario checks a bag in, plays the part of the operators where the
//! workflow asks for one, and reports where the bag ended up.

use baggage_core::models::{
    ApproverRole, CustomerTier, Decision, MishandlingKind, Node, TripFacts,
};
use baggage_core::processor::Priority;
use baggage_core::BaggageService;
use rust_decimal::Decimal;
use serde_json::json;

pub const SCENARIOS: &[&str] = &[
    "happy-path",
    "tight-connection",
    "missed-connection",
    "high-value",
    "mishandled",
];

const DEMO_APPROVER: &str = "demo-supervisor";
const DEMO_MANAGER: &str = "demo-manager";

pub async fn run(service: &BaggageService, scenario: &str) -> Result<serde_json::Value, String> {
    match scenario {
        "all" => {
            let mut results = Vec::with_capacity(SCENARIOS.len());
            for name in SCENARIOS {
                results.push(run_one(service, name).await?);
            }
            Ok(json!({ "scenarios": results }))
        }
        name => run_one(service, name).await,
    }
}

async fn run_one(service: &BaggageService, scenario: &str) -> Result<serde_json::Value, String> {
    tracing::info!("[Demo] Running scenario '{}'", scenario);
    let bag_id = match scenario {
        "happy-path" => initialize(service, direct_trip("0230550001", 150)).await?,
        "tight-connection" => initialize(service, connecting_trip("0230550002", 30)).await?,
        "missed-connection" => initialize(service, connecting_trip("0230550003", 20)).await?,
        "high-value" => {
            let bag_id = initialize(service, direct_trip("0230550004", 7500)).await?;
            approve_all(service, &bag_id, ApproverRole::Supervisor, DEMO_APPROVER).await?;
            bag_id
        }
        "mishandled" => mishandled(service).await?,
        other => {
            return Err(format!(
                "Unknown scenario '{}' (expected one of: {}, all)",
                other,
                SCENARIOS.join(", ")
            ))
        }
    };
    report(service, scenario, &bag_id).await
}

/// High-value bag reported lost while it waits for the delivery sign-off.
async fn mishandled(service: &BaggageService) -> Result<String, String> {
    let bag_id = initialize(service, direct_trip("0230550005", 7500)).await?;
    service
        .submit_event(
            &bag_id,
            "status_override",
            json!({ "kind": MishandlingKind::Lost.as_str(), "reason": "not on carousel" }),
            Priority::High,
        )
        .await
        .map_err(|e| e.to_string())?;
    approve_all(service, &bag_id, ApproverRole::Manager, DEMO_MANAGER).await?;
    Ok(bag_id)
}

async fn initialize(service: &BaggageService, trip: TripFacts) -> Result<String, String> {
    let result = service.initialize(trip).await.map_err(|e| e.to_string())?;
    Ok(result.bag_id)
}

async fn approve_all(
    service: &BaggageService,
    bag_id: &str,
    role: ApproverRole,
    approver: &str,
) -> Result<(), String> {
    let pending = service
        .list_pending_approvals(Some(role))
        .await
        .map_err(|e| e.to_string())?;
    for request in pending.iter().filter(|r| r.bag_id == bag_id) {
        service
            .decide_approval(
                &request.approval_id,
                Decision::Approve,
                approver,
                Some("approved by demo".to_string()),
            )
            .await
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

async fn report(
    service: &BaggageService,
    scenario: &str,
    bag_id: &str,
) -> Result<serde_json::Value, String> {
    let state = service
        .orchestrator
        .load_full_state(bag_id)
        .await
        .map_err(|e| e.to_string())?;
    let history = service.history(bag_id).await.map_err(|e| e.to_string())?;
    let mut path: Vec<Node> = history.iter().map(|c| c.node).collect();
    path.dedup();

    Ok(json!({
        "scenario": scenario,
        "bagId": state.bag_id(),
        "finalNode": state.current_node(),
        "status": state.status(),
        "riskLevel": state.risk_level(),
        "transfers": state.transfer_count(),
        "mishandling": state.mishandling(),
        "compensationAmount": state.compensation_amount(),
        "alerts": state.alerts().len(),
        "path": path,
    }))
}

// ─── Trips ────────────────────────────────────────────────────────────────

fn direct_trip(tag: &str, declared_value: i64) -> TripFacts {
    TripFacts {
        tag_number: tag.to_string(),
        passenger_id: format!("PAX-{}", tag),
        origin_flight: "CM101".to_string(),
        origin_airport: "PTY".to_string(),
        destination_airport: "MIA".to_string(),
        connection_flight: None,
        connection_airport: None,
        connection_time_minutes: None,
        onward_legs: Vec::new(),
        weight_kg: 23.0,
        declared_value: Decimal::from(declared_value),
        customer_tier: CustomerTier::Standard,
    }
}

fn connecting_trip(tag: &str, window_minutes: u32) -> TripFacts {
    TripFacts {
        origin_airport: "BOG".to_string(),
        connection_flight: Some("CM202".to_string()),
        connection_airport: Some("PTY".to_string()),
        connection_time_minutes: Some(window_minutes),
        ..direct_trip(tag, 150)
    }
}
