//! Event processor: applies external events to bags.
//!
//! Events arrive through an [`EventQueue`]. The worker drains whatever is
//! queued into one batch, orders it by priority (stable, so arrival order
//! holds within a priority), and processes each bag's events in order on
//! its own task. Different bags are processed in parallel.
//!
//! Every event is applied under the bag's lock and checkpointed. When the
//! event re-routes the bag (forced mishandling, or the approval a parked bag
//! waits on), the workflow is resumed until it halts again; otherwise the
//! bag stays where it is until the next `advance`.

mod handlers;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::BaggageError;
use crate::events::{StateUpdate, UpdateKind};
use crate::models::Node;
use crate::orchestration::LifecycleOrchestrator;

// ─── Event Types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Scan,
    FlightDelay,
    StatusOverride,
    ApprovalDecision,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::FlightDelay => "flight_delay",
            Self::StatusOverride => "status_override",
            Self::ApprovalDecision => "approval_decision",
        }
    }

    /// Parse an event type name, accepting the scanner-side aliases.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scan" | "rfid_scan" | "location_update" => Some(Self::Scan),
            "flight_delay" => Some(Self::FlightDelay),
            "status_override" | "status_update" | "mishandling_detected" => {
                Some(Self::StatusOverride)
            }
            "approval_decision" | "approval_received" => Some(Self::ApprovalDecision),
            _ => None,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    fn notifies(&self) -> bool {
        *self >= Self::High
    }
}

/// An event as submitted. The type stays a raw string until processing so
/// unsupported types can be reported rather than rejected at the door.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEvent {
    pub bag_id: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
}

impl ExternalEvent {
    pub fn new(
        bag_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Self {
        Self {
            bag_id: bag_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            priority,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventOutcome {
    pub bag_id: String,
    pub event_type: EventType,
    /// Journey-log sequence assigned to the event.
    pub sequence: Option<u64>,
    /// `false` when the event was recorded but changed nothing.
    pub applied: bool,
    pub current_node: Node,
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignored_reason: Option<String>,
}

// ─── Queue ────────────────────────────────────────────────────────────────

type Reply = oneshot::Sender<Result<EventOutcome, BaggageError>>;

pub enum QueueItem {
    Event {
        event: ExternalEvent,
        reply: Option<Reply>,
    },
    /// Acknowledged once everything queued before it has been processed.
    Flush(oneshot::Sender<()>),
}

impl QueueItem {
    pub fn into_event(self) -> Option<ExternalEvent> {
        match self {
            Self::Event { event, .. } => Some(event),
            Self::Flush(_) => None,
        }
    }
}

/// Bounded handle to the processor's queue.
///
/// External submissions are refused with `BadRequest` once `capacity`
/// items are waiting. Internally generated events (approval timeouts) and
/// flushes wait for room instead, so they are never lost.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<QueueItem>,
    capacity: usize,
}

impl EventQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<QueueItem>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, rx)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Fire-and-forget submission. Fails immediately when the queue is full.
    pub fn enqueue(&self, event: ExternalEvent) -> Result<(), BaggageError> {
        self.try_send(QueueItem::Event { event, reply: None })
    }

    /// Fire-and-forget submission that waits for room in the queue.
    pub async fn push(&self, event: ExternalEvent) -> Result<(), BaggageError> {
        self.tx
            .send(QueueItem::Event { event, reply: None })
            .await
            .map_err(|_| stopped())
    }

    /// Submit and wait for the event to be processed. Fails immediately
    /// when the queue is full.
    pub async fn submit(&self, event: ExternalEvent) -> Result<EventOutcome, BaggageError> {
        let (tx, rx) = oneshot::channel();
        self.try_send(QueueItem::Event {
            event,
            reply: Some(tx),
        })?;
        rx.await.map_err(|_| stopped())?
    }

    /// Wait until every event queued so far has been processed.
    pub async fn flush(&self) -> Result<(), BaggageError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(QueueItem::Flush(tx))
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    fn try_send(&self, item: QueueItem) -> Result<(), BaggageError> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BaggageError::BadRequest(format!(
                "event queue is full ({} pending), retry later",
                self.capacity
            )),
            mpsc::error::TrySendError::Closed(_) => stopped(),
        })
    }
}

fn stopped() -> BaggageError {
    BaggageError::Internal("event processor is not running".to_string())
}

// ─── Processor ────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EventProcessor {
    orchestrator: LifecycleOrchestrator,
    queue: EventQueue,
}

impl EventProcessor {
    pub fn new(orchestrator: LifecycleOrchestrator, queue: EventQueue) -> Self {
        Self {
            orchestrator,
            queue,
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn orchestrator(&self) -> &LifecycleOrchestrator {
        &self.orchestrator
    }

    /// Queue an event and wait for its outcome.
    pub async fn process_event(
        &self,
        bag_id: &str,
        event_type: &str,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<EventOutcome, BaggageError> {
        self.queue
            .submit(ExternalEvent::new(bag_id, event_type, payload, priority))
            .await
    }

    /// Spawn the queue worker.
    pub fn start(&self, rx: mpsc::Receiver<QueueItem>) -> JoinHandle<()> {
        let processor = self.clone();
        tokio::spawn(async move { processor.run(rx).await })
    }

    /// Process queued items until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<QueueItem>) {
        tracing::info!("[EventProcessor] Worker started");
        while let Some(first) = rx.recv().await {
            let mut batch = vec![first];
            while let Ok(item) = rx.try_recv() {
                batch.push(item);
            }

            let mut events = Vec::with_capacity(batch.len());
            let mut flushes = Vec::new();
            for item in batch {
                match item {
                    QueueItem::Event { event, reply } => events.push((event, reply)),
                    QueueItem::Flush(ack) => flushes.push(ack),
                }
            }

            if !events.is_empty() {
                self.process_batch(events).await;
            }
            for ack in flushes {
                let _ = ack.send(());
            }
        }
        tracing::info!("[EventProcessor] Queue closed, worker stopping");
    }

    async fn process_batch(&self, mut events: Vec<(ExternalEvent, Option<Reply>)>) {
        events.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));

        let mut order: Vec<String> = Vec::new();
        let mut by_bag: HashMap<String, Vec<(ExternalEvent, Option<Reply>)>> = HashMap::new();
        for (event, reply) in events {
            if !by_bag.contains_key(&event.bag_id) {
                order.push(event.bag_id.clone());
            }
            by_bag
                .entry(event.bag_id.clone())
                .or_default()
                .push((event, reply));
        }
        tracing::debug!(
            "[EventProcessor] Processing batch across {} bags",
            order.len()
        );

        let mut tasks = JoinSet::new();
        for bag_id in order {
            let Some(group) = by_bag.remove(&bag_id) else {
                continue;
            };
            let processor = self.clone();
            tasks.spawn(async move {
                for (event, reply) in group {
                    let result = processor.handle(event).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("[EventProcessor] Bag task failed: {}", e);
            }
        }
    }

    /// Apply one event directly, bypassing the queue.
    pub async fn handle(&self, event: ExternalEvent) -> Result<EventOutcome, BaggageError> {
        let Some(event_type) = EventType::from_str(&event.event_type) else {
            tracing::warn!(
                bag_id = %event.bag_id,
                "[EventProcessor] Unsupported event type '{}', nothing applied",
                event.event_type
            );
            return Err(BaggageError::UnsupportedEvent(event.event_type));
        };

        let result = self.apply(event_type, &event).await;
        match &result {
            Ok(outcome) => tracing::info!(
                bag_id = %event.bag_id,
                "[EventProcessor] {} applied={} now at {} (v{})",
                event_type.as_str(),
                outcome.applied,
                outcome.current_node,
                outcome.version
            ),
            Err(e) if e.is_client_error() => tracing::warn!(
                bag_id = %event.bag_id,
                "[EventProcessor] {} rejected: {}",
                event_type.as_str(),
                e
            ),
            Err(e) => tracing::error!(
                bag_id = %event.bag_id,
                "[EventProcessor] {} failed: {}",
                event_type.as_str(),
                e
            ),
        }
        result
    }

    async fn apply(
        &self,
        event_type: EventType,
        event: &ExternalEvent,
    ) -> Result<EventOutcome, BaggageError> {
        let orchestrator = &self.orchestrator;
        let _guard = orchestrator.lock_bag(&event.bag_id).await;

        let (outcome, state) = orchestrator
            .with_conflict_retry(&event.bag_id, || async move {
                let mut state = orchestrator.store().require(&event.bag_id).await?;
                let before = state.current_node;
                let mut outcome =
                    handlers::apply_event(orchestrator, &mut state, event_type, event).await?;

                let rerouted = state.current_node != before;
                let resolves_wait = event_type == EventType::ApprovalDecision
                    && outcome.applied
                    && state.current_node == Node::WaitApproval;
                if rerouted || resolves_wait {
                    orchestrator.drive(&mut state).await?;
                } else if state.is_dirty() {
                    orchestrator.persist(&mut state).await?;
                }
                outcome.current_node = state.current_node;
                outcome.version = state.version;
                Ok((outcome, state))
            })
            .await?;

        if event.priority.notifies() {
            orchestrator.bus().publish(StateUpdate::new(
                &state,
                UpdateKind::Notification {
                    event_type: event_type.as_str().to_string(),
                    priority: event.priority.as_str().to_string(),
                    message: handlers::describe(event_type, &event.payload),
                },
            ));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_aliases() {
        assert_eq!(EventType::from_str("rfid_scan"), Some(EventType::Scan));
        assert_eq!(EventType::from_str("location_update"), Some(EventType::Scan));
        assert_eq!(
            EventType::from_str("mishandling_detected"),
            Some(EventType::StatusOverride)
        );
        assert_eq!(
            EventType::from_str("status_update"),
            Some(EventType::StatusOverride)
        );
        assert_eq!(
            EventType::from_str("approval_received"),
            Some(EventType::ApprovalDecision)
        );
        assert_eq!(EventType::from_str("teleport"), None);
        for t in [
            EventType::Scan,
            EventType::FlightDelay,
            EventType::StatusOverride,
            EventType::ApprovalDecision,
        ] {
            assert_eq!(EventType::from_str(t.as_str()), Some(t));
        }
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
        assert!(Priority::High.notifies());
        assert!(!Priority::Medium.notifies());
    }

    #[test]
    fn test_event_defaults_when_deserialized() {
        let event: ExternalEvent =
            serde_json::from_str(r#"{"bagId":"BAG-1","eventType":"scan"}"#).unwrap();
        assert_eq!(event.priority, Priority::Medium);
        assert!(event.payload.is_null());
    }

    #[tokio::test]
    async fn test_submit_without_worker_fails() {
        let (queue, rx) = EventQueue::channel(8);
        drop(rx);
        let err = queue
            .submit(ExternalEvent::new("BAG-1", "scan", serde_json::json!({}), Priority::Low))
            .await
            .unwrap_err();
        assert!(matches!(err, BaggageError::Internal(_)));
    }

    #[tokio::test]
    async fn test_flush_item_is_not_an_event() {
        let (queue, mut rx) = EventQueue::channel(8);
        let flush = tokio::spawn({
            let queue = queue.clone();
            async move { queue.flush().await }
        });
        let item = rx.recv().await.unwrap();
        match item {
            QueueItem::Flush(ack) => ack.send(()).unwrap(),
            QueueItem::Event { .. } => panic!("expected flush"),
        }
        flush.await.unwrap().unwrap();
    }

    fn scan(bag_id: &str) -> ExternalEvent {
        ExternalEvent::new(bag_id, "scan", serde_json::json!({}), Priority::Low)
    }

    #[tokio::test]
    async fn test_full_queue_refuses_submissions() {
        let (queue, mut rx) = EventQueue::channel(2);
        assert_eq!(queue.capacity(), 2);

        queue.enqueue(scan("BAG-1")).unwrap();
        queue.enqueue(scan("BAG-2")).unwrap();
        let err = queue.enqueue(scan("BAG-3")).unwrap_err();
        assert!(matches!(err, BaggageError::BadRequest(_)));
        let err = queue.submit(scan("BAG-3")).await.unwrap_err();
        assert!(matches!(err, BaggageError::BadRequest(_)));

        // Draining one item makes room again.
        let first = rx.recv().await.unwrap().into_event().unwrap();
        assert_eq!(first.bag_id, "BAG-1");
        queue.enqueue(scan("BAG-3")).unwrap();
    }

    #[tokio::test]
    async fn test_push_waits_for_room() {
        let (queue, mut rx) = EventQueue::channel(1);
        queue.enqueue(scan("BAG-1")).unwrap();

        let pushed = tokio::spawn({
            let queue = queue.clone();
            async move { queue.push(scan("BAG-2")).await }
        });
        tokio::task::yield_now().await;
        assert!(!pushed.is_finished());

        assert_eq!(rx.recv().await.unwrap().into_event().unwrap().bag_id, "BAG-1");
        pushed.await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().into_event().unwrap().bag_id, "BAG-2");
    }
}
