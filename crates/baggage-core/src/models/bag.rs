use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::agents::{Capability, InvocationStatus};
use crate::error::BaggageError;
use crate::models::approval::ApprovalReason;

// ─── Lifecycle Nodes ──────────────────────────────────────────────────────

/// A named state in the bag lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    CheckIn,
    SecurityScreening,
    Sorting,
    Loading,
    InFlight,
    Transfer,
    Arrival,
    Claim,
    Delivered,
    Mishandled,
    RootCauseAnalysis,
    Compensation,
    RequestApproval,
    WaitApproval,
}

impl Node {
    pub const ALL: [Node; 14] = [
        Node::CheckIn,
        Node::SecurityScreening,
        Node::Sorting,
        Node::Loading,
        Node::InFlight,
        Node::Transfer,
        Node::Arrival,
        Node::Claim,
        Node::Delivered,
        Node::Mishandled,
        Node::RootCauseAnalysis,
        Node::Compensation,
        Node::RequestApproval,
        Node::WaitApproval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::SecurityScreening => "security_screening",
            Self::Sorting => "sorting",
            Self::Loading => "loading",
            Self::InFlight => "in_flight",
            Self::Transfer => "transfer",
            Self::Arrival => "arrival",
            Self::Claim => "claim",
            Self::Delivered => "delivered",
            Self::Mishandled => "mishandled",
            Self::RootCauseAnalysis => "root_cause_analysis",
            Self::Compensation => "compensation",
            Self::RequestApproval => "request_approval",
            Self::WaitApproval => "wait_approval",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|n| n.as_str() == s)
    }

    /// Terminal nodes never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// Nodes belonging to the mishandling sub-flow.
    pub fn is_mishandling_branch(&self) -> bool {
        matches!(
            self,
            Self::Mishandled | Self::RootCauseAnalysis | Self::Compensation
        )
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Risk ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    /// No usable prediction; routed and alerted as `Medium`.
    Unknown,
}

impl RiskLevel {
    pub fn from_score(score: Option<f64>) -> Self {
        match score {
            None => Self::Unknown,
            Some(s) if s > 80.0 => Self::Critical,
            Some(s) if s >= 60.0 => Self::High,
            Some(s) if s >= 30.0 => Self::Medium,
            Some(_) => Self::Low,
        }
    }

    /// The band used for decisions: unknown risk is treated as medium.
    pub fn effective(&self) -> Self {
        match self {
            Self::Unknown => Self::Medium,
            other => *other,
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self.effective(), Self::High | Self::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

// ─── Trip Facts ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerTier {
    #[default]
    Standard,
    Silver,
    Gold,
    Platinum,
}

impl CustomerTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }
}

/// An onward connection beyond the first hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionLeg {
    pub flight: String,
    pub airport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_time_minutes: Option<u32>,
}

/// Immutable facts about the trip, fixed at check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripFacts {
    pub tag_number: String,
    pub passenger_id: String,
    pub origin_flight: String,
    pub origin_airport: String,
    pub destination_airport: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_flight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_airport: Option<String>,
    /// Scheduled connection window at the first hub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_time_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub onward_legs: Vec<ConnectionLeg>,
    pub weight_kg: f64,
    #[serde(default)]
    pub declared_value: Decimal,
    #[serde(default)]
    pub customer_tier: CustomerTier,
}

impl TripFacts {
    /// Reject malformed trip facts before any state is created.
    pub fn validate(&self) -> Result<(), BaggageError> {
        let required = [
            ("tagNumber", &self.tag_number),
            ("passengerId", &self.passenger_id),
            ("originFlight", &self.origin_flight),
            ("originAirport", &self.origin_airport),
            ("destinationAirport", &self.destination_airport),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(BaggageError::BadRequest(format!("{} is required", name)));
            }
        }
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            return Err(BaggageError::BadRequest(format!(
                "weightKg must be positive, got {}",
                self.weight_kg
            )));
        }
        if self.declared_value.is_sign_negative() {
            return Err(BaggageError::BadRequest(
                "declaredValue must not be negative".to_string(),
            ));
        }
        if self.connection_flight.is_none() && !self.onward_legs.is_empty() {
            return Err(BaggageError::BadRequest(
                "onwardLegs require a connectionFlight".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of hub transfers this itinerary requires.
    pub fn connection_count(&self) -> u32 {
        match self.connection_flight {
            Some(_) => 1 + self.onward_legs.len() as u32,
            None => 0,
        }
    }

    /// Scheduled window for the transfer with the given zero-based index.
    pub fn connection_window(&self, transfer_index: u32) -> Option<u32> {
        if transfer_index == 0 {
            self.connection_time_minutes
        } else {
            self.onward_legs
                .get(transfer_index as usize - 1)
                .and_then(|leg| leg.connection_time_minutes)
        }
    }

    /// Hub airport for the transfer with the given zero-based index.
    pub fn connection_hub(&self, transfer_index: u32) -> Option<&str> {
        if transfer_index == 0 {
            self.connection_airport.as_deref()
        } else {
            self.onward_legs
                .get(transfer_index as usize - 1)
                .map(|leg| leg.airport.as_str())
        }
    }
}

// ─── Journey Records ──────────────────────────────────────────────────────

/// One invocation of an agent, kept as an append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCallRecord {
    pub capability: Capability,
    pub node: Node,
    pub input_digest: String,
    pub status: InvocationStatus,
    pub confidence: f64,
    pub duration_ms: u64,
    pub attempts: u32,
    pub output: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub alert_id: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// An entry in the journey log. Ordered by `sequence`, never by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BagEvent {
    pub sequence: u64,
    pub event_type: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MishandlingKind {
    Delayed,
    Lost,
    Damaged,
}

impl MishandlingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delayed => "delayed",
            Self::Lost => "lost",
            Self::Damaged => "damaged",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "delayed" => Some(Self::Delayed),
            "lost" => Some(Self::Lost),
            "damaged" => Some(Self::Damaged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MishandlingRecord {
    pub kind: MishandlingKind,
    pub reason: String,
    pub detected_at_node: Node,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Waiting,
    Completed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
        }
    }
}

// ─── Bag State ────────────────────────────────────────────────────────────

/// The unit of work: everything known about one bag's lifecycle.
///
/// Fields are read through getters; every mutation goes through an accessor
/// that bumps `version`, so the store can enforce monotonic checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BagState {
    pub(crate) bag_id: String,
    pub(crate) workflow_id: String,
    pub(crate) trip: TripFacts,

    pub(crate) current_node: Node,
    pub(crate) current_location: String,
    pub(crate) risk_score: Option<f64>,
    pub(crate) risk_level: RiskLevel,
    #[serde(default)]
    pub(crate) risk_factors: Vec<String>,
    pub(crate) status: WorkflowStatus,

    #[serde(default)]
    pub(crate) mishandling: Option<MishandlingRecord>,
    #[serde(default)]
    pub(crate) transfer_count: u32,
    #[serde(default)]
    pub(crate) connection_delay_minutes: i64,
    #[serde(default)]
    pub(crate) flight_hold_minutes: i64,
    #[serde(default)]
    pub(crate) transfer_deadline_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) compensation_amount: Option<Decimal>,
    #[serde(default)]
    pub(crate) approval_rounds: u32,
    #[serde(default)]
    pub(crate) pending_approval_reason: Option<ApprovalReason>,
    #[serde(default)]
    pub(crate) active_approval_id: Option<String>,

    #[serde(default)]
    pub(crate) agents_invoked: Vec<AgentCallRecord>,
    #[serde(default)]
    pub(crate) alerts: Vec<Alert>,
    #[serde(default)]
    pub(crate) events: Vec<BagEvent>,

    pub(crate) version: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,

    /// Version this value was loaded at (`None` until first persisted).
    #[serde(skip)]
    persisted_version: Option<u64>,
    #[serde(skip)]
    persisted_alerts: usize,
}

impl BagState {
    /// Create the initial state for a bag entering the system at check-in.
    pub fn new(bag_id: String, workflow_id: String, trip: TripFacts) -> Self {
        let now = Utc::now();
        let location = trip.origin_airport.clone();
        Self {
            bag_id,
            workflow_id,
            trip,
            current_node: Node::CheckIn,
            current_location: location,
            risk_score: Some(0.0),
            risk_level: RiskLevel::Low,
            risk_factors: Vec::new(),
            status: WorkflowStatus::Running,
            mishandling: None,
            transfer_count: 0,
            connection_delay_minutes: 0,
            flight_hold_minutes: 0,
            transfer_deadline_at: None,
            compensation_amount: None,
            approval_rounds: 0,
            pending_approval_reason: None,
            active_approval_id: None,
            agents_invoked: Vec::new(),
            alerts: Vec::new(),
            events: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            persisted_version: None,
            persisted_alerts: 0,
        }
    }

    /// Start a new lifecycle run for the same bag (e.g. re-check-in after
    /// recovery). Trip facts and journey history are retained.
    pub fn restart(&mut self, workflow_id: String, trip: Option<TripFacts>) {
        self.workflow_id = workflow_id;
        if let Some(trip) = trip {
            self.trip = trip;
        }
        self.current_node = Node::CheckIn;
        self.current_location = self.trip.origin_airport.clone();
        self.risk_score = Some(0.0);
        self.risk_level = RiskLevel::Low;
        self.risk_factors.clear();
        self.status = WorkflowStatus::Running;
        self.mishandling = None;
        self.transfer_count = 0;
        self.connection_delay_minutes = 0;
        self.flight_hold_minutes = 0;
        self.transfer_deadline_at = None;
        self.compensation_amount = None;
        self.approval_rounds = 0;
        self.pending_approval_reason = None;
        self.active_approval_id = None;
        self.touch();
    }

    pub fn persisted_version(&self) -> Option<u64> {
        self.persisted_version
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted_version = Some(self.version);
        self.persisted_alerts = self.alerts.len();
    }

    /// Alerts raised since the state was last loaded or saved.
    pub fn unpersisted_alerts(&self) -> &[Alert] {
        &self.alerts[self.persisted_alerts.min(self.alerts.len())..]
    }

    pub fn is_dirty(&self) -> bool {
        self.persisted_version != Some(self.version)
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    // ─── Getters ───────────────────────────────────────────────────────

    pub fn bag_id(&self) -> &str {
        &self.bag_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn trip(&self) -> &TripFacts {
        &self.trip
    }

    pub fn current_node(&self) -> Node {
        self.current_node
    }

    pub fn current_location(&self) -> &str {
        &self.current_location
    }

    pub fn risk_score(&self) -> Option<f64> {
        self.risk_score
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn risk_factors(&self) -> &[String] {
        &self.risk_factors
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn mishandling(&self) -> Option<&MishandlingRecord> {
        self.mishandling.as_ref()
    }

    /// Hub connections made so far on this run.
    pub fn transfer_count(&self) -> u32 {
        self.transfer_count
    }

    pub fn connection_delay_minutes(&self) -> i64 {
        self.connection_delay_minutes
    }

    pub fn flight_hold_minutes(&self) -> i64 {
        self.flight_hold_minutes
    }

    pub fn transfer_deadline_at(&self) -> Option<DateTime<Utc>> {
        self.transfer_deadline_at
    }

    pub fn compensation_amount(&self) -> Option<Decimal> {
        self.compensation_amount
    }

    /// Rejected approvals so far, bounded by `max_approval_rounds`.
    pub fn approval_rounds(&self) -> u32 {
        self.approval_rounds
    }

    pub fn pending_approval_reason(&self) -> Option<ApprovalReason> {
        self.pending_approval_reason
    }

    pub fn active_approval_id(&self) -> Option<&str> {
        self.active_approval_id.as_deref()
    }

    pub fn agents_invoked(&self) -> &[AgentCallRecord] {
        &self.agents_invoked
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn events(&self) -> &[BagEvent] {
        &self.events
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    // ─── Mutation accessors ────────────────────────────────────────────

    pub fn move_to(&mut self, node: Node) {
        self.current_node = node;
        self.status = match node {
            Node::Delivered => WorkflowStatus::Completed,
            Node::WaitApproval => WorkflowStatus::Waiting,
            _ => WorkflowStatus::Running,
        };
        self.touch();
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.current_location = location.into();
        self.touch();
    }

    /// Set (or clear) the risk score and re-derive the band.
    pub fn set_risk_score(&mut self, score: Option<f64>, factors: Vec<String>) {
        self.risk_score = score.map(|s| s.clamp(0.0, 100.0));
        self.risk_level = RiskLevel::from_score(self.risk_score);
        if !factors.is_empty() {
            self.risk_factors = factors;
        }
        self.touch();
    }

    /// Append a journey event stamped now.
    pub fn record_event(
        &mut self,
        event_type: impl Into<String>,
        location: impl Into<String>,
        metadata: serde_json::Value,
    ) -> u64 {
        self.record_event_at(event_type, location, Utc::now(), metadata)
    }

    /// Append a journey event with an explicit timestamp. The returned
    /// sequence number is the canonical order.
    pub fn record_event_at(
        &mut self,
        event_type: impl Into<String>,
        location: impl Into<String>,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    ) -> u64 {
        let sequence = self.events.last().map(|e| e.sequence + 1).unwrap_or(1);
        self.events.push(BagEvent {
            sequence,
            event_type: event_type.into(),
            location: location.into(),
            timestamp,
            metadata,
        });
        self.touch();
        sequence
    }

    pub fn raise_alert(&mut self, severity: AlertSeverity, message: impl Into<String>) -> &Alert {
        self.alerts.push(Alert {
            alert_id: uuid::Uuid::new_v4().to_string(),
            severity,
            message: message.into(),
            created_at: Utc::now(),
            acknowledged_at: None,
        });
        self.touch();
        // Just pushed, so the vector is non-empty.
        &self.alerts[self.alerts.len() - 1]
    }

    /// Acknowledge an alert. Alerts are never removed.
    pub fn acknowledge_alert(&mut self, alert_id: &str) -> bool {
        let found = self
            .alerts
            .iter_mut()
            .find(|a| a.alert_id == alert_id && a.acknowledged_at.is_none());
        match found {
            Some(alert) => {
                alert.acknowledged_at = Some(Utc::now());
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn record_agent_call(&mut self, record: AgentCallRecord) {
        self.agents_invoked.push(record);
        self.touch();
    }

    pub fn record_mishandling(&mut self, kind: MishandlingKind, reason: impl Into<String>) {
        self.mishandling = Some(MishandlingRecord {
            kind,
            reason: reason.into(),
            detected_at_node: self.current_node,
            detected_at: Utc::now(),
        });
        self.touch();
    }

    /// Count a made connection. Delays and holds belong to the connection
    /// just made, so they reset for the next leg.
    pub fn complete_transfer(&mut self) {
        self.transfer_count += 1;
        self.transfer_deadline_at = None;
        self.connection_delay_minutes = 0;
        self.flight_hold_minutes = 0;
        self.touch();
    }

    pub fn set_transfer_deadline(&mut self, deadline: Option<DateTime<Utc>>) {
        self.transfer_deadline_at = deadline;
        self.touch();
    }

    pub fn add_connection_delay(&mut self, minutes: i64) {
        self.connection_delay_minutes += minutes;
        self.touch();
    }

    pub fn grant_flight_hold(&mut self, minutes: i64) {
        self.flight_hold_minutes += minutes;
        if let Some(deadline) = self.transfer_deadline_at {
            self.transfer_deadline_at = Some(deadline + chrono::Duration::minutes(minutes));
        }
        self.touch();
    }

    pub fn set_compensation_amount(&mut self, amount: Option<Decimal>) {
        self.compensation_amount = amount;
        self.touch();
    }

    pub fn begin_approval(&mut self, reason: ApprovalReason) {
        self.pending_approval_reason = Some(reason);
        self.touch();
    }

    pub fn attach_approval(&mut self, approval_id: String) {
        self.active_approval_id = Some(approval_id);
        self.touch();
    }

    /// Clear the approval in flight. A rejection counts towards the
    /// approval-round bound.
    pub fn finish_approval(&mut self, rejected: bool) {
        self.active_approval_id = None;
        self.pending_approval_reason = None;
        if rejected {
            self.approval_rounds += 1;
        }
        self.touch();
    }

    // ─── Derived views ─────────────────────────────────────────────────

    /// Whether the bag still has a hub transfer ahead of it.
    pub fn has_pending_connection(&self) -> bool {
        self.trip.connection_flight.is_some() && self.transfer_count < self.trip.connection_count()
    }

    /// Remaining connection window for the current transfer, after delays
    /// and granted flight holds.
    pub fn available_connection_minutes(&self, default_window: u32) -> i64 {
        let scheduled = self
            .trip
            .connection_window(self.transfer_count)
            .unwrap_or(default_window) as i64;
        scheduled - self.connection_delay_minutes + self.flight_hold_minutes
    }

    /// Scheduled window of the connection currently relevant to risk: the
    /// next one while a transfer is pending, otherwise the last one made.
    pub fn relevant_connection_window(&self) -> Option<u32> {
        let count = self.trip.connection_count();
        if count == 0 {
            return None;
        }
        self.trip.connection_window(self.transfer_count.min(count - 1))
    }

    /// Latest agent call for a capability, if any.
    pub fn last_call(&self, capability: Capability) -> Option<&AgentCallRecord> {
        self.agents_invoked
            .iter()
            .rev()
            .find(|r| r.capability == capability)
    }

    pub fn summary(&self) -> BagStateSummary {
        BagStateSummary {
            bag_id: self.bag_id.clone(),
            workflow_id: self.workflow_id.clone(),
            current_node: self.current_node,
            current_location: self.current_location.clone(),
            risk_score: self.risk_score,
            risk_level: self.risk_level,
            status: self.status,
            alert_count: self.alerts.len(),
            event_count: self.events.len(),
            version: self.version,
            last_updated: self.updated_at,
        }
    }
}

/// Compact view returned by `get_state`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BagStateSummary {
    pub bag_id: String,
    pub workflow_id: String,
    pub current_node: Node,
    pub current_location: String,
    pub risk_score: Option<f64>,
    pub risk_level: RiskLevel,
    pub status: WorkflowStatus,
    pub alert_count: usize,
    pub event_count: usize,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_trip() -> TripFacts {
        TripFacts {
            tag_number: "0230556789".to_string(),
            passenger_id: "PNR-ABC123".to_string(),
            origin_flight: "CM101".to_string(),
            origin_airport: "PTY".to_string(),
            destination_airport: "MIA".to_string(),
            connection_flight: None,
            connection_airport: None,
            connection_time_minutes: None,
            onward_legs: Vec::new(),
            weight_kg: 23.0,
            declared_value: Decimal::from(100),
            customer_tier: CustomerTier::Standard,
        }
    }

    #[test]
    fn test_node_round_trip_names() {
        for node in Node::ALL {
            assert_eq!(Node::from_str(node.as_str()), Some(node));
        }
        assert_eq!(Node::from_str("wait_for_approval"), None);
        assert!(Node::Delivered.is_terminal());
        assert!(!Node::WaitApproval.is_terminal());
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskLevel::from_score(Some(10.0)), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(Some(30.0)), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(Some(60.0)), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(Some(80.0)), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(Some(80.5)), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(None), RiskLevel::Unknown);
        assert_eq!(RiskLevel::Unknown.effective(), RiskLevel::Medium);
    }

    #[test]
    fn test_every_accessor_bumps_version() {
        let mut state = BagState::new("BAG-1".into(), "WF-1".into(), sample_trip());
        assert_eq!(state.version, 1);
        assert_eq!(state.risk_score, Some(0.0));

        state.record_event("status_update", "PTY", serde_json::json!({}));
        state.raise_alert(AlertSeverity::High, "test");
        state.move_to(Node::SecurityScreening);
        state.set_risk_score(Some(91.0), vec!["short connection".into()]);
        assert_eq!(state.version, 5);
        assert_eq!(state.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_getters_follow_accessors() {
        let mut state = BagState::new("BAG-1".into(), "WF-1".into(), sample_trip());
        assert_eq!(state.current_node(), Node::CheckIn);
        assert_eq!(state.current_location(), "PTY");
        assert_eq!(state.status(), WorkflowStatus::Running);

        state.move_to(Node::WaitApproval);
        state.begin_approval(ApprovalReason::HighValueDelivery);
        state.attach_approval("APR-1".into());
        assert_eq!(state.status(), WorkflowStatus::Waiting);
        assert_eq!(state.active_approval_id(), Some("APR-1"));
        assert_eq!(
            state.pending_approval_reason(),
            Some(ApprovalReason::HighValueDelivery)
        );

        state.finish_approval(true);
        state.record_mishandling(MishandlingKind::Damaged, "approval_rejected");
        assert_eq!(state.approval_rounds(), 1);
        assert_eq!(state.active_approval_id(), None);
        let mishandling = state.mishandling().unwrap();
        assert_eq!(mishandling.detected_at_node, Node::WaitApproval);
        assert_eq!(state.version(), 6);
    }

    #[test]
    fn test_event_sequence_is_monotonic() {
        let mut state = BagState::new("BAG-1".into(), "WF-1".into(), sample_trip());
        let later = Utc::now();
        let earlier = later - chrono::Duration::minutes(5);
        let first = state.record_event_at("scan", "PTY-T1", later, serde_json::json!({}));
        let second = state.record_event_at("scan", "PTY-T2", earlier, serde_json::json!({}));
        assert_eq!((first, second), (1, 2));
        assert_eq!(state.events[1].location, "PTY-T2");
    }

    #[test]
    fn test_alerts_are_acknowledged_not_removed() {
        let mut state = BagState::new("BAG-1".into(), "WF-1".into(), sample_trip());
        let alert_id = state.raise_alert(AlertSeverity::Medium, "degraded").alert_id.clone();
        assert!(state.acknowledge_alert(&alert_id));
        assert!(!state.acknowledge_alert(&alert_id));
        assert_eq!(state.alerts.len(), 1);
        assert!(state.alerts[0].acknowledged_at.is_some());
    }

    #[test]
    fn test_pending_connection_counts_legs() {
        let mut trip = sample_trip();
        trip.connection_flight = Some("CM645".into());
        trip.connection_airport = Some("PTY".into());
        trip.onward_legs.push(ConnectionLeg {
            flight: "CM800".into(),
            airport: "BOG".into(),
            connection_time_minutes: Some(50),
        });
        let mut state = BagState::new("BAG-1".into(), "WF-1".into(), trip);
        assert!(state.has_pending_connection());
        state.complete_transfer();
        assert!(state.has_pending_connection());
        assert_eq!(state.available_connection_minutes(45), 50);
        state.complete_transfer();
        assert!(!state.has_pending_connection());
    }

    #[test]
    fn test_trip_validation() {
        let mut trip = sample_trip();
        assert!(trip.validate().is_ok());
        trip.weight_kg = 0.0;
        assert!(matches!(trip.validate(), Err(BaggageError::BadRequest(_))));

        let mut trip = sample_trip();
        trip.tag_number = "  ".into();
        assert!(trip.validate().is_err());
    }
}
