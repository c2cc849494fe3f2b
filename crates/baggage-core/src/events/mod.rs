//! Push-based streaming of state mutations, alerts and notifications.
//!
//! One broadcast channel carries every update; subscribers filter by bag.
//! A slow subscriber that falls behind skips the missed updates rather
//! than blocking writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{Alert, BagState, Node, RiskLevel, WorkflowStatus};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateKind {
    /// A new checkpoint was persisted.
    StateChanged,
    AlertRaised { alert: Alert },
    /// High-priority external event, surfaced for operators.
    Notification {
        event_type: String,
        priority: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub bag_id: String,
    pub workflow_id: String,
    pub version: u64,
    pub node: Node,
    pub risk_level: RiskLevel,
    pub status: WorkflowStatus,
    #[serde(flatten)]
    pub kind: UpdateKind,
    pub timestamp: DateTime<Utc>,
}

impl StateUpdate {
    pub fn new(state: &BagState, kind: UpdateKind) -> Self {
        Self {
            bag_id: state.bag_id.clone(),
            workflow_id: state.workflow_id.clone(),
            version: state.version,
            node: state.current_node,
            risk_level: state.risk_level,
            status: state.status,
            kind,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StateUpdate>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an update. Having no subscribers is not an error.
    pub fn publish(&self, update: StateUpdate) {
        let _ = self.tx.send(update);
    }

    /// Subscribe to one bag's updates, or to all bags with `None`.
    pub fn subscribe(&self, bag_id: Option<&str>) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            bag_id: bag_id.map(str::to_string),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<StateUpdate>,
    bag_id: Option<String>,
}

impl Subscription {
    /// Next matching update; `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<StateUpdate> {
        loop {
            match self.rx.recv().await {
                Ok(update) => {
                    if self.matches(&update) {
                        return Some(update);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("[EventBus] Subscriber lagged, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StateUpdate> {
        loop {
            match self.rx.try_recv() {
                Ok(update) => {
                    if self.matches(&update) {
                        return Some(update);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    fn matches(&self, update: &StateUpdate) -> bool {
        self.bag_id
            .as_deref()
            .map_or(true, |id| id == update.bag_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomerTier, TripFacts};

    fn state(bag_id: &str) -> BagState {
        BagState::new(
            bag_id.to_string(),
            "WF-1".to_string(),
            TripFacts {
                tag_number: "T1".into(),
                passenger_id: "P1".into(),
                origin_flight: "CM101".into(),
                origin_airport: "PTY".into(),
                destination_airport: "MIA".into(),
                connection_flight: None,
                connection_airport: None,
                connection_time_minutes: None,
                onward_legs: vec![],
                weight_kg: 20.0,
                declared_value: Default::default(),
                customer_tier: CustomerTier::Standard,
            },
        )
    }

    #[tokio::test]
    async fn test_bag_filter() {
        let bus = EventBus::new();
        let mut one = bus.subscribe(Some("BAG-1"));
        let mut all = bus.subscribe(None);

        bus.publish(StateUpdate::new(&state("BAG-2"), UpdateKind::StateChanged));
        bus.publish(StateUpdate::new(&state("BAG-1"), UpdateKind::StateChanged));

        assert_eq!(one.recv().await.unwrap().bag_id, "BAG-1");
        assert_eq!(all.recv().await.unwrap().bag_id, "BAG-2");
        assert_eq!(all.recv().await.unwrap().bag_id, "BAG-1");
        assert!(one.try_recv().is_none());
    }

    #[test]
    fn test_update_serializes_flat() {
        let update = StateUpdate::new(
            &state("BAG-1"),
            UpdateKind::Notification {
                event_type: "flight_delay".into(),
                priority: "high".into(),
                message: "delayed 45 minutes".into(),
            },
        );
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["bagId"], "BAG-1");
        assert_eq!(json["node"], "check_in");
        assert_eq!(json["event_type"], "flight_delay");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(StateUpdate::new(&state("BAG-1"), UpdateKind::StateChanged));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
