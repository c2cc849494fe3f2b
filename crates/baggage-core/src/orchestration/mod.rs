//! LifecycleOrchestrator: drives a bag through the lifecycle state machine.
//!
//! Every node execution is followed by a checkpoint write, so a crash at any
//! point resumes from the last completed node. A workflow halts when it
//! reaches `delivered` or parks at `wait_approval`; it is resumed by the
//! event processor, never by a parked task.
//!
//! One logical writer per bag: callers take the per-bag lock from
//! [`LifecycleOrchestrator::lock_bag`] before loading state. Different bags
//! proceed in parallel.

mod nodes;
pub mod transitions;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::agents::AgentInvoker;
use crate::approval::ApprovalGate;
use crate::config::OrchestratorConfig;
use crate::error::BaggageError;
use crate::events::{EventBus, StateUpdate, UpdateKind};
use crate::models::{
    BagState, BagStateSummary, Checkpoint, MishandlingKind, Node, RiskLevel, TripFacts,
    WorkflowStatus,
};
use crate::store::BagStateStore;

use nodes::NodeOutcome;
use transitions::next_node;

pub(crate) use nodes::{alert_on_elevated_risk, default_window, prediction_input};

type LockMap = Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Guard against a routing bug spinning forever inside one run.
const MAX_STEPS_PER_RUN: usize = 128;

// ─── Results ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub bag_id: String,
    pub workflow_id: String,
    pub current_node: Node,
    pub risk_score: Option<f64>,
    pub risk_level: RiskLevel,
    pub status: WorkflowStatus,
}

impl InitializeResult {
    fn of(state: &BagState) -> Self {
        Self {
            bag_id: state.bag_id.clone(),
            workflow_id: state.workflow_id.clone(),
            current_node: state.current_node,
            risk_score: state.risk_score,
            risk_level: state.risk_level,
            status: state.status,
        }
    }
}

// ─── Per-bag locks ────────────────────────────────────────────────────────

/// Held while one bag is being driven. Releasing the last handle on a bag
/// removes its entry from the lock map.
pub struct BagGuard {
    bag_id: String,
    lock: Arc<Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for BagGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this guard are the only holders: no caller is waiting.
        let idle = locks
            .get(&self.bag_id)
            .is_some_and(|l| {
                Arc::ptr_eq(l, &self.lock) && Arc::strong_count(&self.lock) == 2
            });
        if idle {
            locks.remove(&self.bag_id);
        }
    }
}

// ─── Lifecycle Orchestrator ───────────────────────────────────────────────

#[derive(Clone)]
pub struct LifecycleOrchestrator {
    store: BagStateStore,
    gate: ApprovalGate,
    invoker: AgentInvoker,
    bus: EventBus,
    config: Arc<OrchestratorConfig>,
    locks: LockMap,
}

impl LifecycleOrchestrator {
    pub fn new(
        store: BagStateStore,
        gate: ApprovalGate,
        invoker: AgentInvoker,
        bus: EventBus,
        config: Arc<OrchestratorConfig>,
    ) -> Self {
        Self {
            store,
            gate,
            invoker,
            bus,
            config,
            locks: Arc::new(std::sync::Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &BagStateStore {
        &self.store
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn invoker(&self) -> &AgentInvoker {
        &self.invoker
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Exclusive access to one bag for node execution or event application.
    pub async fn lock_bag(&self, bag_id: &str) -> BagGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(bag_id.to_string()).or_default().clone()
        };
        let guard = lock.clone().lock_owned().await;
        BagGuard {
            bag_id: bag_id.to_string(),
            lock,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ─── Public API ────────────────────────────────────────────────────

    /// Create a bag at check-in with a generated id and run it until it halts.
    pub async fn initialize(&self, trip: TripFacts) -> Result<InitializeResult, BaggageError> {
        let bag_id = format!("BAG-{}", uuid::Uuid::new_v4().simple());
        self.initialize_bag(&bag_id, trip).await
    }

    /// Like [`initialize`](Self::initialize) with a caller-chosen bag id.
    pub async fn initialize_bag(
        &self,
        bag_id: &str,
        trip: TripFacts,
    ) -> Result<InitializeResult, BaggageError> {
        trip.validate()?;
        let _guard = self.lock_bag(bag_id).await;

        if self.store.load_latest(bag_id).await?.is_some() {
            return Err(BaggageError::BadRequest(format!(
                "Bag {} already exists; use restart for a new lifecycle run",
                bag_id
            )));
        }

        let workflow_id = uuid::Uuid::new_v4().to_string();
        let mut state = BagState::new(bag_id.to_string(), workflow_id.clone(), trip);
        self.persist(&mut state).await?;
        tracing::info!(
            bag_id,
            workflow_id = %workflow_id,
            "[Orchestrator] Bag {} checked in at {}",
            state.trip.tag_number,
            state.current_location
        );

        let state = self.resume_locked(bag_id, Some(state)).await?;
        Ok(InitializeResult::of(&state))
    }

    /// Start a new lifecycle run for an existing bag.
    pub async fn restart(
        &self,
        bag_id: &str,
        trip: Option<TripFacts>,
    ) -> Result<InitializeResult, BaggageError> {
        if let Some(trip) = &trip {
            trip.validate()?;
        }
        let _guard = self.lock_bag(bag_id).await;

        let state = self
            .with_conflict_retry(bag_id, || {
                let trip = trip.clone();
                async move {
                    let mut state = self.store.require(bag_id).await?;
                    let workflow_id = uuid::Uuid::new_v4().to_string();
                    tracing::info!(
                        bag_id,
                        "[Orchestrator] Restarting lifecycle (previous workflow {}, new {})",
                        state.workflow_id,
                        workflow_id
                    );
                    state.restart(workflow_id, trip);
                    self.persist(&mut state).await?;
                    Ok(state)
                }
            })
            .await?;

        let state = self.resume_locked(bag_id, Some(state)).await?;
        Ok(InitializeResult::of(&state))
    }

    /// Resume a bag's workflow until it halts.
    pub async fn advance(&self, bag_id: &str) -> Result<BagStateSummary, BaggageError> {
        let _guard = self.lock_bag(bag_id).await;
        let state = self.resume_locked(bag_id, None).await?;
        Ok(state.summary())
    }

    pub async fn get_state(&self, bag_id: &str) -> Result<BagStateSummary, BaggageError> {
        Ok(self.store.require(bag_id).await?.summary())
    }

    pub async fn load_full_state(&self, bag_id: &str) -> Result<BagState, BaggageError> {
        self.store.require(bag_id).await
    }

    /// Every checkpoint of the bag, in version order.
    pub async fn history(&self, bag_id: &str) -> Result<Vec<Checkpoint>, BaggageError> {
        let history = self.store.load_history(bag_id).await?;
        if history.is_empty() {
            return Err(BaggageError::NotFound(format!("Bag {} not found", bag_id)));
        }
        Ok(history)
    }

    /// Checkpoints of one lifecycle run of the bag.
    pub async fn workflow_history(
        &self,
        bag_id: &str,
        workflow_id: &str,
    ) -> Result<Vec<Checkpoint>, BaggageError> {
        let history = self.store.load_workflow_history(bag_id, workflow_id).await?;
        if history.is_empty() {
            return Err(BaggageError::NotFound(format!(
                "Workflow {} of bag {} not found",
                workflow_id, bag_id
            )));
        }
        Ok(history)
    }

    /// Mark an alert as seen. Already-acknowledged alerts are left alone
    /// and write no checkpoint.
    pub async fn acknowledge_alert(
        &self,
        bag_id: &str,
        alert_id: &str,
    ) -> Result<BagStateSummary, BaggageError> {
        let _guard = self.lock_bag(bag_id).await;
        let state = self
            .with_conflict_retry(bag_id, || async move {
                let mut state = self.store.require(bag_id).await?;
                if !state.alerts.iter().any(|a| a.alert_id == alert_id) {
                    return Err(BaggageError::NotFound(format!(
                        "Alert {} not found on bag {}",
                        alert_id, bag_id
                    )));
                }
                if state.acknowledge_alert(alert_id) {
                    self.persist(&mut state).await?;
                }
                Ok(state)
            })
            .await?;
        Ok(state.summary())
    }

    // ─── Internals shared with the event processor ────────────────────

    /// Drive the bag (caller holds its lock), reloading and re-running on
    /// write conflicts. `initial` skips the first load.
    pub(crate) async fn resume_locked(
        &self,
        bag_id: &str,
        initial: Option<BagState>,
    ) -> Result<BagState, BaggageError> {
        let mut initial = initial;
        self.with_conflict_retry(bag_id, || {
            let preloaded = initial.take();
            async move {
                let mut state = match preloaded {
                    Some(state) => state,
                    None => self.store.require(bag_id).await?,
                };
                self.drive(&mut state).await?;
                Ok(state)
            }
        })
        .await
    }

    /// Retry `attempt` while it fails with a write conflict, up to the
    /// configured limit. Exhaustion becomes an internal error.
    pub(crate) async fn with_conflict_retry<T, F, Fut>(
        &self,
        bag_id: &str,
        mut attempt: F,
    ) -> Result<T, BaggageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BaggageError>>,
    {
        let limit = self.config.conflict_retry_limit.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Err(BaggageError::Conflict(msg)) if tries < limit => {
                    tracing::warn!(
                        bag_id,
                        "[Orchestrator] Write conflict ({}), reloading (attempt {}/{})",
                        msg,
                        tries,
                        limit
                    );
                }
                Err(BaggageError::Conflict(msg)) => {
                    return Err(BaggageError::Internal(format!(
                        "Bag {} kept conflicting after {} attempts: {}",
                        bag_id, tries, msg
                    )));
                }
                other => return other,
            }
        }
    }

    /// Execute nodes until the bag reaches a terminal node or suspends.
    pub(crate) async fn drive(&self, state: &mut BagState) -> Result<(), BaggageError> {
        for _ in 0..MAX_STEPS_PER_RUN {
            if state.current_node.is_terminal() {
                if state.is_dirty() {
                    self.persist(state).await?;
                }
                return Ok(());
            }

            let from = state.current_node;
            match self.execute_node(state).await? {
                NodeOutcome::Next(signal) => {
                    let to = next_node(from, signal)?;
                    self.enter(state, to);
                }
                NodeOutcome::Fatal { kind, reason } => {
                    tracing::warn!(
                        bag_id = %state.bag_id,
                        "[Orchestrator] Fatal outcome at {}: {}",
                        from,
                        reason
                    );
                    self.fail(state, kind, reason);
                }
                NodeOutcome::Suspend => {
                    if state.is_dirty() {
                        self.persist(state).await?;
                    }
                    tracing::debug!(
                        bag_id = %state.bag_id,
                        "[Orchestrator] Suspended at {}",
                        from
                    );
                    return Ok(());
                }
            }
            self.persist(state).await?;
        }

        Err(BaggageError::Internal(format!(
            "Bag {} exceeded {} steps in one run",
            state.bag_id, MAX_STEPS_PER_RUN
        )))
    }

    /// Move to `to`, recording the arrival at a terminal node.
    pub(crate) fn enter(&self, state: &mut BagState, to: Node) {
        tracing::info!(
            bag_id = %state.bag_id,
            "[Orchestrator] {} → {}",
            state.current_node,
            to
        );
        state.move_to(to);
        if to == Node::Delivered {
            let destination = state.trip.destination_airport.clone();
            state.record_event(
                "status_update",
                destination,
                serde_json::json!({ "status": "delivered" }),
            );
        }
    }

    /// Force the bag into the mishandling branch.
    pub(crate) fn fail(&self, state: &mut BagState, kind: MishandlingKind, reason: &str) {
        let kind = state.mishandling.as_ref().map(|m| m.kind).unwrap_or(kind);
        state.record_mishandling(kind, reason);
        self.enter(state, Node::Mishandled);
    }

    /// Save a checkpoint and stream the change.
    pub(crate) async fn persist(&self, state: &mut BagState) -> Result<Checkpoint, BaggageError> {
        let new_alerts = state.unpersisted_alerts().to_vec();
        let checkpoint = self.store.save(state).await?;

        self.bus
            .publish(StateUpdate::new(state, UpdateKind::StateChanged));
        for alert in new_alerts {
            self.bus
                .publish(StateUpdate::new(state, UpdateKind::AlertRaised { alert }));
        }
        Ok(checkpoint)
    }
}
