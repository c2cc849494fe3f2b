//! Orchestrator configuration.
//!
//! Loaded from YAML with every field defaulted, then overridden by
//! `BAGGAGE_*` environment variables.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::BaggageError;
use crate::models::Decision;

/// One week. Longer approval windows are rejected at load time.
pub const MAX_APPROVAL_TIMEOUT_MINUTES: i64 = 7 * 24 * 60;

/// What happens to a pending approval once its timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    AutoApprove,
    AutoReject,
    /// No automatic verdict: the bag is routed to mishandling.
    Abandon,
}

impl TimeoutPolicy {
    pub fn resolution(&self) -> Option<Decision> {
        match self {
            Self::AutoApprove => Some(Decision::Approve),
            Self::AutoReject => Some(Decision::Reject),
            Self::Abandon => None,
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auto_approve" | "approve" => Some(Self::AutoApprove),
            "auto_reject" | "reject" => Some(Self::AutoReject),
            "abandon" | "none" => Some(Self::Abandon),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Declared values strictly above this need a supervisor sign-off.
    pub high_value_threshold: Decimal,
    /// Compensation strictly above this needs a manager sign-off.
    pub compensation_threshold: Decimal,
    pub approval_timeout_minutes: i64,
    pub timeout_policy: TimeoutPolicy,
    pub max_transfer_reentries: u32,
    pub max_approval_rounds: u32,
    /// Fallback transfer estimate when no route is available.
    pub minimum_connection_minutes: u32,
    /// Remaining connection time below which a delayed bag is re-assessed.
    pub connection_buffer_minutes: i64,
    pub flight_hold_minutes: i64,
    pub agent_timeout_secs: u64,
    pub agent_max_attempts: u32,
    pub agent_retry_base_delay_ms: u64,
    pub conflict_retry_limit: u32,
    pub sweep_interval_secs: u64,
    /// Events that may wait for the processor before submissions are refused.
    pub event_queue_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: Decimal::from(5000),
            compensation_threshold: Decimal::from(500),
            approval_timeout_minutes: 30,
            timeout_policy: TimeoutPolicy::AutoApprove,
            max_transfer_reentries: 3,
            max_approval_rounds: 3,
            minimum_connection_minutes: 45,
            connection_buffer_minutes: 30,
            flight_hold_minutes: 15,
            agent_timeout_secs: 30,
            agent_max_attempts: 3,
            agent_retry_base_delay_ms: 200,
            conflict_retry_limit: 5,
            sweep_interval_secs: 60,
            event_queue_capacity: 1000,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, BaggageError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| {
            BaggageError::BadRequest(format!("Failed to parse config YAML: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file and apply environment overrides.
    pub fn from_file(path: &str) -> Result<Self, BaggageError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BaggageError::BadRequest(format!("Failed to read config file '{}': {}", path, e))
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, BaggageError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), BaggageError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `BAGGAGE_*` overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), BaggageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, BaggageError> {
            raw.trim().parse().map_err(|_| {
                BaggageError::BadRequest(format!("Invalid value for {}: '{}'", key, raw))
            })
        }

        macro_rules! override_field {
            ($key:literal, $field:ident) => {
                if let Some(raw) = lookup($key) {
                    self.$field = parse($key, &raw)?;
                }
            };
        }

        override_field!("BAGGAGE_HIGH_VALUE_THRESHOLD", high_value_threshold);
        override_field!("BAGGAGE_COMPENSATION_THRESHOLD", compensation_threshold);
        override_field!("BAGGAGE_APPROVAL_TIMEOUT_MINUTES", approval_timeout_minutes);
        override_field!("BAGGAGE_MAX_TRANSFER_REENTRIES", max_transfer_reentries);
        override_field!("BAGGAGE_MAX_APPROVAL_ROUNDS", max_approval_rounds);
        override_field!("BAGGAGE_MINIMUM_CONNECTION_MINUTES", minimum_connection_minutes);
        override_field!("BAGGAGE_CONNECTION_BUFFER_MINUTES", connection_buffer_minutes);
        override_field!("BAGGAGE_FLIGHT_HOLD_MINUTES", flight_hold_minutes);
        override_field!("BAGGAGE_AGENT_TIMEOUT_SECS", agent_timeout_secs);
        override_field!("BAGGAGE_AGENT_MAX_ATTEMPTS", agent_max_attempts);
        override_field!("BAGGAGE_AGENT_RETRY_BASE_DELAY_MS", agent_retry_base_delay_ms);
        override_field!("BAGGAGE_CONFLICT_RETRY_LIMIT", conflict_retry_limit);
        override_field!("BAGGAGE_SWEEP_INTERVAL_SECS", sweep_interval_secs);
        override_field!("BAGGAGE_EVENT_QUEUE_CAPACITY", event_queue_capacity);

        if let Some(raw) = lookup("BAGGAGE_TIMEOUT_POLICY") {
            self.timeout_policy = TimeoutPolicy::from_str(&raw).ok_or_else(|| {
                BaggageError::BadRequest(format!(
                    "Invalid value for BAGGAGE_TIMEOUT_POLICY: '{}'",
                    raw
                ))
            })?;
        }
        self.validate()
    }

    /// Reject values that parse but cannot be used.
    pub fn validate(&self) -> Result<(), BaggageError> {
        if !(0..=MAX_APPROVAL_TIMEOUT_MINUTES).contains(&self.approval_timeout_minutes) {
            return Err(BaggageError::BadRequest(format!(
                "approval_timeout_minutes must be between 0 and {}, got {}",
                MAX_APPROVAL_TIMEOUT_MINUTES, self.approval_timeout_minutes
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(BaggageError::BadRequest(
                "event_queue_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn approval_timeout(&self) -> chrono::Duration {
        let minutes = self
            .approval_timeout_minutes
            .clamp(0, MAX_APPROVAL_TIMEOUT_MINUTES);
        chrono::Duration::minutes(minutes)
    }

    pub fn agent_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.agent_timeout_secs)
    }
}
