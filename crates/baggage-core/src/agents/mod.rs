//! Agent invocation contract.
//!
//! Agents are opaque capability providers. The orchestrator resolves them
//! through an [`AgentRegistry`] handed to it at construction, and always
//! calls them through the [`AgentInvoker`], which applies the timeout and
//! retry policy and validates outputs into the typed structures in
//! [`outputs`].

pub mod builtin;
pub mod http;
pub mod invoker;
pub mod outputs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub use builtin::BuiltinAgent;
pub use http::{HttpAgent, HttpAgentConfig};
pub use invoker::{AgentInvoker, InvocationReport};

// ─── Capabilities ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Prediction,
    RootCause,
    CustomerService,
    Compensation,
    InfrastructureHealth,
    RouteOptimization,
    DemandForecast,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::Prediction,
        Capability::RootCause,
        Capability::CustomerService,
        Capability::Compensation,
        Capability::InfrastructureHealth,
        Capability::RouteOptimization,
        Capability::DemandForecast,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prediction => "prediction",
            Self::RootCause => "root_cause",
            Self::CustomerService => "customer_service",
            Self::Compensation => "compensation",
            Self::InfrastructureHealth => "infrastructure_health",
            Self::RouteOptimization => "route_optimization",
            Self::DemandForecast => "demand_forecast",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Envelope ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Success,
    Error,
}

/// Fixed result envelope every agent returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub result: serde_json::Value,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub status: InvocationStatus,
    #[serde(default)]
    pub duration_ms: u64,
}

impl AgentInvocation {
    pub fn success(result: serde_json::Value, confidence: f64) -> Self {
        Self {
            result,
            confidence,
            status: InvocationStatus::Success,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("agent call timed out after {0} ms")]
    Timeout(u64),

    #[error("no agent registered for capability '{0}'")]
    Unavailable(String),

    #[error("agent error: {message}")]
    Remote { message: String, retryable: bool },

    #[error("invalid agent output: {0}")]
    InvalidOutput(String),
}

impl AgentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Remote { retryable, .. } => *retryable,
            Self::Unavailable(_) | Self::InvalidOutput(_) => false,
        }
    }
}

// ─── Agent trait ──────────────────────────────────────────────────────────

#[async_trait]
pub trait Agent: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        capability: Capability,
        input: &serde_json::Value,
    ) -> Result<AgentInvocation, AgentError>;
}

// ─── Registry ─────────────────────────────────────────────────────────────

/// Resolves a capability to the agent that serves it.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<Capability, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the deterministic rule-based agents for every capability.
    pub fn builtin() -> Self {
        Self::new().with_all(Arc::new(BuiltinAgent::new()))
    }

    /// Serve every capability with the same agent.
    pub fn with_all(mut self, agent: Arc<dyn Agent>) -> Self {
        for capability in Capability::ALL {
            self.agents.insert(capability, agent.clone());
        }
        self
    }

    pub fn register(&mut self, capability: Capability, agent: Arc<dyn Agent>) {
        self.agents.insert(capability, agent);
    }

    /// Builder-style `register`.
    pub fn with(mut self, capability: Capability, agent: Arc<dyn Agent>) -> Self {
        self.register(capability, agent);
        self
    }

    pub fn unregister(&mut self, capability: Capability) -> Option<Arc<dyn Agent>> {
        self.agents.remove(&capability)
    }

    pub fn resolve(&self, capability: Capability) -> Result<Arc<dyn Agent>, AgentError> {
        self.agents
            .get(&capability)
            .cloned()
            .ok_or_else(|| AgentError::Unavailable(capability.as_str().to_string()))
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|c| self.agents.contains_key(c))
            .collect()
    }
}
