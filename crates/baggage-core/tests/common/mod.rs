//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use baggage_core::agents::{Agent, AgentError, AgentInvocation, AgentRegistry, Capability};
use baggage_core::models::{BagState, ConnectionLeg, CustomerTier, Node, TripFacts};
use baggage_core::{BaggageService, Database, OrchestratorConfig};
use rust_decimal::Decimal;

/// Test config: no retry back-off to wait for.
pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        agent_retry_base_delay_ms: 1,
        ..Default::default()
    }
}

pub fn service() -> BaggageService {
    service_with(config(), AgentRegistry::builtin())
}

pub fn service_with(config: OrchestratorConfig, registry: AgentRegistry) -> BaggageService {
    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    BaggageService::open(db, config, registry)
}

/// Direct PTY → MIA trip.
pub fn direct_trip(tag: &str, declared_value: Decimal) -> TripFacts {
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
        declared_value,
        customer_tier: CustomerTier::Standard,
    }
}

/// BOG → PTY → MIA with the given connection window at PTY.
pub fn connecting_trip(tag: &str, window_minutes: u32) -> TripFacts {
    TripFacts {
        origin_airport: "BOG".to_string(),
        connection_flight: Some("CM202".to_string()),
        connection_airport: Some("PTY".to_string()),
        connection_time_minutes: Some(window_minutes),
        ..direct_trip(tag, Decimal::from(150))
    }
}

/// A connecting trip with `onward` extra hub legs, each with a 60 minute window.
pub fn multi_leg_trip(tag: &str, onward: usize) -> TripFacts {
    let hubs = ["SJO", "SAL", "GUA", "MEX", "CUN"];
    TripFacts {
        onward_legs: (0..onward)
            .map(|i| ConnectionLeg {
                flight: format!("CM3{:02}", i),
                airport: hubs[i % hubs.len()].to_string(),
                connection_time_minutes: Some(60),
            })
            .collect(),
        ..connecting_trip(tag, 60)
    }
}

/// Node sequence of a bag's checkpoints with consecutive repeats removed.
pub fn visited(history: &[baggage_core::models::Checkpoint]) -> Vec<Node> {
    let mut nodes: Vec<Node> = history.iter().map(|c| c.node).collect();
    nodes.dedup();
    nodes
}

/// Persist a hand-built state, as if recovered mid-journey.
pub async fn seed_state(service: &BaggageService, mut state: BagState) -> BagState {
    service
        .state_store
        .save(&mut state)
        .await
        .expect("Failed to seed state");
    state
}

// ─── Scripted agents ──────────────────────────────────────────────────────

/// Always answers with the same result.
pub struct FixedAgent {
    result: serde_json::Value,
}

impl FixedAgent {
    pub fn new(result: serde_json::Value) -> Arc<Self> {
        Arc::new(Self { result })
    }
}

#[async_trait]
impl Agent for FixedAgent {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn invoke(
        &self,
        _capability: Capability,
        _input: &serde_json::Value,
    ) -> Result<AgentInvocation, AgentError> {
        Ok(AgentInvocation::success(self.result.clone(), 0.9))
    }
}

/// Sleeps past any reasonable timeout, counting calls.
#[derive(Default)]
pub struct SlowAgent {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Agent for SlowAgent {
    fn name(&self) -> &str {
        "slow"
    }

    async fn invoke(
        &self,
        _capability: Capability,
        _input: &serde_json::Value,
    ) -> Result<AgentInvocation, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(AgentError::Unavailable("slow".to_string()))
    }
}
