//! Shared service state: one wired-up orchestrator per database.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::agents::{AgentInvoker, AgentRegistry};
use crate::approval::ApprovalGate;
use crate::config::OrchestratorConfig;
use crate::db::Database;
use crate::error::BaggageError;
use crate::events::{EventBus, Subscription};
use crate::models::{
    ApprovalRequest, ApproverRole, BagStateSummary, Checkpoint, Decision, TripFacts,
};
use crate::orchestration::{InitializeResult, LifecycleOrchestrator};
use crate::processor::{
    EventOutcome, EventProcessor, EventQueue, EventType, ExternalEvent, Priority,
};
use crate::store::{ApprovalStore, BagStateStore};

/// The library facade. Owns the queue worker; dropping the service stops it.
pub struct BaggageService {
    pub db: Database,
    pub config: Arc<OrchestratorConfig>,
    pub state_store: BagStateStore,
    pub approval_gate: ApprovalGate,
    pub orchestrator: LifecycleOrchestrator,
    pub processor: EventProcessor,
    pub event_bus: EventBus,
    worker: JoinHandle<()>,
}

impl BaggageService {
    /// Wire every component and start the event worker. Must be called
    /// from within a tokio runtime.
    pub fn open(db: Database, config: OrchestratorConfig, registry: AgentRegistry) -> Self {
        let config = Arc::new(config);
        let (queue, rx) = EventQueue::channel(config.event_queue_capacity);

        let state_store = BagStateStore::new(db.clone());
        let approval_gate = ApprovalGate::new(ApprovalStore::new(db.clone()), config.clone())
            .with_event_sink(queue.clone());
        let invoker = AgentInvoker::new(Arc::new(registry), &config);
        let event_bus = EventBus::new();

        let orchestrator = LifecycleOrchestrator::new(
            state_store.clone(),
            approval_gate.clone(),
            invoker,
            event_bus.clone(),
            config.clone(),
        );
        let processor = EventProcessor::new(orchestrator.clone(), queue);
        let worker = processor.start(rx);

        tracing::info!(
            capabilities = %registry_summary(&orchestrator),
            "[BaggageService] Ready"
        );

        Self {
            db,
            config,
            state_store,
            approval_gate,
            orchestrator,
            processor,
            event_bus,
            worker,
        }
    }

    /// In-memory database with the built-in agents.
    pub fn in_memory(config: OrchestratorConfig) -> Result<Self, BaggageError> {
        Ok(Self::open(
            Database::open_in_memory()?,
            config,
            AgentRegistry::builtin(),
        ))
    }

    pub async fn initialize(&self, trip: TripFacts) -> Result<InitializeResult, BaggageError> {
        self.orchestrator.initialize(trip).await
    }

    pub async fn get_state(&self, bag_id: &str) -> Result<BagStateSummary, BaggageError> {
        self.orchestrator.get_state(bag_id).await
    }

    pub async fn history(&self, bag_id: &str) -> Result<Vec<Checkpoint>, BaggageError> {
        self.orchestrator.history(bag_id).await
    }

    pub async fn submit_event(
        &self,
        bag_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<EventOutcome, BaggageError> {
        self.processor
            .process_event(bag_id, event_type, payload, priority)
            .await
    }

    /// Record a human decision and, when it resolved the request, resume
    /// the bag it belongs to before returning. A repeated decision is a
    /// no-op returning the stored record and leaves the bag untouched.
    pub async fn decide_approval(
        &self,
        approval_id: &str,
        decision: Decision,
        decided_by: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRequest, BaggageError> {
        let (request, changed) = self
            .approval_gate
            .decide(approval_id, decision, decided_by, comments)
            .await?;
        if !changed {
            return Ok(request);
        }
        self.processor
            .queue()
            .submit(ExternalEvent::new(
                &request.bag_id,
                EventType::ApprovalDecision.as_str(),
                serde_json::json!({ "approvalId": request.approval_id }),
                Priority::High,
            ))
            .await?;
        self.approval_gate.get(approval_id).await
    }

    pub async fn list_pending_approvals(
        &self,
        role: Option<ApproverRole>,
    ) -> Result<Vec<ApprovalRequest>, BaggageError> {
        self.approval_gate.list_pending(role).await
    }

    pub fn subscribe(&self, bag_id: Option<&str>) -> Subscription {
        self.event_bus.subscribe(bag_id)
    }

    /// Time out overdue approvals and wait until the affected bags have
    /// been resumed.
    pub async fn sweep(&self) -> Result<Vec<ApprovalRequest>, BaggageError> {
        let resolved = self.approval_gate.resolve_timeouts().await?;
        self.processor.queue().flush().await?;
        Ok(resolved)
    }

    /// Background timeout sweeper on the configured interval.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.approval_gate
            .spawn_sweeper(Duration::from_secs(self.config.sweep_interval_secs.max(1)))
    }
}

impl Drop for BaggageService {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

fn registry_summary(orchestrator: &LifecycleOrchestrator) -> String {
    orchestrator
        .invoker()
        .registry()
        .capabilities()
        .iter()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
