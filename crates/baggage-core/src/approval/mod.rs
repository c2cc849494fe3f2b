//! Approval gate: pending human decisions with timeouts.
//!
//! The gate never blocks a workflow. A bag parks at `wait_approval` and the
//! gate's resolution (a human decision, or the timeout sweep) comes back
//! into the lifecycle as an `approval_decision` event on the processor
//! queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::config::OrchestratorConfig;
use crate::error::BaggageError;
use crate::models::{ApprovalReason, ApprovalRequest, ApprovalStatus, ApproverRole, Decision};
use crate::processor::{EventQueue, EventType, ExternalEvent, Priority};
use crate::store::{ApprovalStore, Resolution};

#[derive(Clone)]
pub struct ApprovalGate {
    store: ApprovalStore,
    config: Arc<OrchestratorConfig>,
    sink: Option<EventQueue>,
}

impl ApprovalGate {
    pub fn new(store: ApprovalStore, config: Arc<OrchestratorConfig>) -> Self {
        Self {
            store,
            config,
            sink: None,
        }
    }

    /// Route timeout resolutions into the given processor queue.
    pub fn with_event_sink(mut self, queue: EventQueue) -> Self {
        self.sink = Some(queue);
        self
    }

    /// Create a pending request, or return the one already pending for the
    /// same bag, reason and workflow run.
    pub async fn request_approval(
        &self,
        bag_id: &str,
        workflow_id: &str,
        reason: ApprovalReason,
        payload: serde_json::Value,
    ) -> Result<ApprovalRequest, BaggageError> {
        self.request_approval_at(bag_id, workflow_id, reason, payload, Utc::now())
            .await
    }

    pub async fn request_approval_at(
        &self,
        bag_id: &str,
        workflow_id: &str,
        reason: ApprovalReason,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, BaggageError> {
        let request = ApprovalRequest::new(
            bag_id.to_string(),
            workflow_id.to_string(),
            reason,
            payload,
            now,
            self.config.approval_timeout(),
        );
        let (stored, created) = self.store.create_if_absent(&request).await?;
        if created {
            tracing::info!(
                bag_id,
                approval_id = %stored.approval_id,
                "[ApprovalGate] Requested {} approval from {} (timeout {})",
                reason.as_str(),
                stored.approver_role.as_str(),
                stored.timeout_at
            );
        }
        Ok(stored)
    }

    /// Record a human decision. Returns the stored request and whether this
    /// call resolved it; a request that is no longer pending comes back
    /// unchanged with `false`.
    pub async fn decide(
        &self,
        approval_id: &str,
        decision: Decision,
        decided_by: &str,
        comments: Option<String>,
    ) -> Result<(ApprovalRequest, bool), BaggageError> {
        if decided_by.trim().is_empty() {
            return Err(BaggageError::BadRequest("decidedBy is required".to_string()));
        }
        let resolution = Resolution {
            status: match decision {
                Decision::Approve => ApprovalStatus::Approved,
                Decision::Reject => ApprovalStatus::Rejected,
            },
            timeout_resolution: None,
            decided_by: Some(decided_by.to_string()),
            comments,
            decided_at: Utc::now(),
        };
        let (stored, changed) = self.store.resolve(approval_id, resolution).await?;
        if changed {
            tracing::info!(
                bag_id = %stored.bag_id,
                approval_id,
                "[ApprovalGate] {} by {}",
                stored.status.as_str(),
                decided_by
            );
        } else {
            tracing::debug!(
                approval_id,
                "[ApprovalGate] Ignoring decision on {} request",
                stored.status.as_str()
            );
        }
        Ok((stored, changed))
    }

    pub async fn resolve_timeouts(&self) -> Result<Vec<ApprovalRequest>, BaggageError> {
        self.resolve_timeouts_at(Utc::now()).await
    }

    /// Time out every pending request whose deadline has passed at `now`,
    /// applying the configured policy, and notify the processor.
    pub async fn resolve_timeouts_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, BaggageError> {
        let expired = self.store.list_expired(now).await?;
        let mut resolved = Vec::with_capacity(expired.len());

        for request in expired {
            let resolution = Resolution {
                status: ApprovalStatus::TimedOut,
                timeout_resolution: self.config.timeout_policy.resolution(),
                decided_by: None,
                comments: None,
                decided_at: now,
            };
            let (stored, changed) = self.store.resolve(&request.approval_id, resolution).await?;
            if !changed {
                // Decided concurrently by a human.
                continue;
            }
            tracing::info!(
                bag_id = %stored.bag_id,
                approval_id = %stored.approval_id,
                "[ApprovalGate] Timed out, resolution: {}",
                stored
                    .timeout_resolution
                    .map(|d| d.as_str())
                    .unwrap_or("abandon")
            );

            if let Some(queue) = &self.sink {
                let event = ExternalEvent::new(
                    &stored.bag_id,
                    EventType::ApprovalDecision.as_str(),
                    serde_json::json!({ "approvalId": stored.approval_id }),
                    Priority::High,
                );
                if let Err(e) = queue.push(event).await {
                    tracing::warn!("[ApprovalGate] Could not enqueue timeout event: {}", e);
                }
            }
            resolved.push(stored);
        }
        Ok(resolved)
    }

    pub async fn list_pending(
        &self,
        role: Option<ApproverRole>,
    ) -> Result<Vec<ApprovalRequest>, BaggageError> {
        self.store.list_pending(role).await
    }

    pub async fn get(&self, approval_id: &str) -> Result<ApprovalRequest, BaggageError> {
        self.store
            .get(approval_id)
            .await?
            .ok_or_else(|| BaggageError::NotFound(format!("Approval {} not found", approval_id)))
    }

    /// Hand the resolved request to the workflow. Returns `true` only for
    /// the first call.
    pub async fn consume(
        &self,
        approval_id: &str,
    ) -> Result<(ApprovalRequest, bool), BaggageError> {
        let (stored, consumed) = self.store.consume(approval_id, Utc::now()).await?;
        if stored.is_pending() {
            return Err(BaggageError::Conflict(format!(
                "Approval {} is still pending",
                approval_id
            )));
        }
        Ok((stored, consumed))
    }

    pub async fn list_for_bag(&self, bag_id: &str) -> Result<Vec<ApprovalRequest>, BaggageError> {
        self.store.list_by_bag(bag_id).await
    }

    /// Run `resolve_timeouts` every `interval` until the handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let gate = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match gate.resolve_timeouts().await {
                    Ok(resolved) if !resolved.is_empty() => {
                        tracing::info!(
                            "[ApprovalGate] Sweep resolved {} approvals",
                            resolved.len()
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("[ApprovalGate] Sweep failed: {}", e),
                }
            }
        })
    }
}
