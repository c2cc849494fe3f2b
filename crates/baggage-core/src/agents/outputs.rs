//! Typed per-capability outputs, validated at the agent boundary.
//!
//! Field names follow the agents' snake_case wire format.

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{AgentError, Capability};

/// An output structure bound to one capability.
pub trait CapabilityOutput: DeserializeOwned + Send + 'static {
    const CAPABILITY: Capability;

    /// Semantic checks beyond the shape enforced by serde.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }

    fn parse(result: &serde_json::Value) -> Result<Self, AgentError> {
        let invalid = |e: String| {
            AgentError::InvalidOutput(format!("{}: {}", Self::CAPABILITY.as_str(), e))
        };
        let output: Self =
            serde_json::from_value(result.clone()).map_err(|e| invalid(e.to_string()))?;
        output.validate().map_err(invalid)?;
        Ok(output)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub risk_score: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub recommended_action: Option<String>,
}

impl CapabilityOutput for PredictionOutput {
    const CAPABILITY: Capability = Capability::Prediction;

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.risk_score) {
            return Err(format!("risk_score {} outside 0..=100", self.risk_score));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureHealthOutput {
    pub overall_health: f64,
    #[serde(default = "default_true")]
    pub operational: bool,
    #[serde(default)]
    pub alerts: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl CapabilityOutput for InfrastructureHealthOutput {
    const CAPABILITY: Capability = Capability::InfrastructureHealth;

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.overall_health) {
            return Err(format!("overall_health {} outside 0..=100", self.overall_health));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub path: Vec<String>,
    pub total_time_minutes: u32,
    /// Hub handling time for transfer routes.
    #[serde(default)]
    pub transfer_minutes: Option<u32>,
    pub reliability_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOptimizationOutput {
    /// `None` when no viable route exists.
    pub optimal_route: Option<Route>,
    #[serde(default)]
    pub alternative_routes: Vec<Route>,
}

impl CapabilityOutput for RouteOptimizationOutput {
    const CAPABILITY: Capability = Capability::RouteOptimization;

    fn validate(&self) -> Result<(), String> {
        if let Some(route) = &self.optimal_route {
            if route.path.is_empty() {
                return Err("optimal_route.path is empty".to_string());
            }
            if !(0.0..=1.0).contains(&route.reliability_score) {
                return Err(format!(
                    "reliability_score {} outside 0..=1",
                    route.reliability_score
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandForecastOutput {
    pub expected_volume: u32,
    #[serde(default)]
    pub peak_period: bool,
}

impl CapabilityOutput for DemandForecastOutput {
    const CAPABILITY: Capability = Capability::DemandForecast;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseOutput {
    pub root_cause: String,
    #[serde(default)]
    pub contributing_factors: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl CapabilityOutput for RootCauseOutput {
    const CAPABILITY: Capability = Capability::RootCause;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerServiceOutput {
    pub notification_sent: bool,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CapabilityOutput for CustomerServiceOutput {
    const CAPABILITY: Capability = Capability::CustomerService;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompensationOutput {
    pub eligible: bool,
    pub compensation_amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl CapabilityOutput for CompensationOutput {
    const CAPABILITY: Capability = Capability::Compensation;

    fn validate(&self) -> Result<(), String> {
        if self.compensation_amount.is_sign_negative() {
            return Err("compensation_amount is negative".to_string());
        }
        Ok(())
    }
}
