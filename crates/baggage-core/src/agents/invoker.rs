use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sha2::{Digest, Sha256};

use super::outputs::CapabilityOutput;
use super::{AgentError, AgentInvocation, AgentRegistry, Capability, InvocationStatus};
use crate::config::OrchestratorConfig;
use crate::models::{AgentCallRecord, Node};

/// Outcome of one logical agent call: the typed output (or the final
/// error after retries) plus the audit record to append to the bag.
#[derive(Debug)]
pub struct InvocationReport<T> {
    pub output: Result<T, AgentError>,
    pub record: AgentCallRecord,
}

/// Upper bound for a single backoff sleep between attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Calls agents with a bounded timeout and exponential-backoff retries.
#[derive(Clone)]
pub struct AgentInvoker {
    registry: Arc<AgentRegistry>,
    timeout: Duration,
    max_attempts: u32,
    base_delay: Duration,
}

impl AgentInvoker {
    pub fn new(registry: Arc<AgentRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            registry,
            timeout: config.agent_timeout(),
            max_attempts: config.agent_max_attempts.max(1),
            base_delay: Duration::from_millis(config.agent_retry_base_delay_ms),
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub async fn invoke<T: CapabilityOutput>(
        &self,
        node: Node,
        input: serde_json::Value,
    ) -> InvocationReport<T> {
        let capability = T::CAPABILITY;
        let started = Instant::now();
        let (result, attempts) = self.call_with_retry(capability, &input).await;

        let output = result
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|inv| T::parse(&inv.result));

        let (confidence, raw, error) = match (&result, &output) {
            (Ok(inv), Ok(_)) => (inv.confidence, inv.result.clone(), None),
            (Ok(inv), Err(e)) => (inv.confidence, inv.result.clone(), Some(e.to_string())),
            (Err(e), _) => (0.0, serde_json::Value::Null, Some(e.to_string())),
        };

        if let Some(err) = &error {
            tracing::warn!(
                capability = capability.as_str(),
                node = node.as_str(),
                attempts,
                "[AgentInvoker] Call failed: {}",
                err
            );
        }

        let record = AgentCallRecord {
            capability,
            node,
            input_digest: input_digest(&input),
            status: if output.is_ok() {
                InvocationStatus::Success
            } else {
                InvocationStatus::Error
            },
            confidence,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts,
            output: raw,
            error,
            timestamp: Utc::now(),
        };

        InvocationReport { output, record }
    }

    async fn call_with_retry(
        &self,
        capability: Capability,
        input: &serde_json::Value,
    ) -> (Result<AgentInvocation, AgentError>, u32) {
        let agent = match self.registry.resolve(capability) {
            Ok(agent) => agent,
            Err(e) => return (Err(e), 0),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let call = agent.invoke(capability, input);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result.and_then(|mut inv| {
                    inv.duration_ms = started.elapsed().as_millis() as u64;
                    check_envelope(inv)
                }),
                Err(_) => Err(AgentError::Timeout(self.timeout.as_millis() as u64)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff_delay(attempt);
                    tracing::debug!(
                        capability = capability.as_str(),
                        agent = agent.name(),
                        "[AgentInvoker] Attempt {} failed ({}), retrying in {:?}",
                        attempt,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return (other, attempt),
            }
        }
    }

    /// Sleep before retrying after failed attempt number `attempt` (1-based).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

fn check_envelope(inv: AgentInvocation) -> Result<AgentInvocation, AgentError> {
    if inv.status == InvocationStatus::Error {
        let message = inv
            .result
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("agent reported an error")
            .to_string();
        return Err(AgentError::Remote {
            message,
            retryable: false,
        });
    }
    if !(0.0..=1.0).contains(&inv.confidence) {
        return Err(AgentError::InvalidOutput(format!(
            "confidence {} outside 0..=1",
            inv.confidence
        )));
    }
    Ok(inv)
}

/// SHA-256 hex digest of the input's canonical JSON (keys sorted).
pub fn input_digest(input: &serde_json::Value) -> String {
    let canonical = serde_json::to_string(input).unwrap_or_default();
    Sha256::digest(canonical.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
