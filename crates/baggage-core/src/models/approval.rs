use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a human decision is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalReason {
    HighValueDelivery,
    HighCompensation,
    FlightHold,
}

impl ApprovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighValueDelivery => "high_value_delivery",
            Self::HighCompensation => "high_compensation",
            Self::FlightHold => "flight_hold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "high_value_delivery" => Some(Self::HighValueDelivery),
            "high_compensation" => Some(Self::HighCompensation),
            "flight_hold" => Some(Self::FlightHold),
            _ => None,
        }
    }

    /// Role expected to decide requests of this kind.
    pub fn approver_role(&self) -> ApproverRole {
        match self {
            Self::HighValueDelivery | Self::FlightHold => ApproverRole::Supervisor,
            Self::HighCompensation => ApproverRole::Manager,
        }
    }

    /// Advisory requests do not gate the lifecycle.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::FlightHold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApproverRole {
    Supervisor,
    Manager,
}

impl ApproverRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "supervisor" => Some(Self::Supervisor),
            "manager" => Some(Self::Manager),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    TimedOut,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }
}

/// A human (or timeout policy) verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "approve" | "approved" => Some(Self::Approve),
            "reject" | "rejected" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// How a resolved request routes the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub approval_id: String,
    pub bag_id: String,
    pub workflow_id: String,
    pub reason: ApprovalReason,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub approver_role: ApproverRole,
    pub status: ApprovalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_resolution: Option<Decision>,
    pub requested_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        bag_id: String,
        workflow_id: String,
        reason: ApprovalReason,
        payload: serde_json::Value,
        requested_at: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Self {
        Self {
            approval_id: uuid::Uuid::new_v4().to_string(),
            bag_id,
            workflow_id,
            reason,
            payload,
            approver_role: reason.approver_role(),
            status: ApprovalStatus::Pending,
            timeout_resolution: None,
            requested_at,
            timeout_at: requested_at + timeout,
            decided_by: None,
            decided_at: None,
            comments: None,
            consumed_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    /// Routing outcome once resolved; `None` while pending.
    pub fn outcome(&self) -> Option<ApprovalOutcome> {
        match self.status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(ApprovalOutcome::Approved),
            ApprovalStatus::Rejected => Some(ApprovalOutcome::Rejected),
            ApprovalStatus::TimedOut => Some(match self.timeout_resolution {
                Some(Decision::Approve) => ApprovalOutcome::Approved,
                Some(Decision::Reject) => ApprovalOutcome::Rejected,
                None => ApprovalOutcome::Abandoned,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ApprovalRequest {
        ApprovalRequest::new(
            "BAG-1".into(),
            "WF-1".into(),
            ApprovalReason::HighCompensation,
            serde_json::json!({"amount": "800"}),
            Utc::now(),
            chrono::Duration::minutes(30),
        )
    }

    #[test]
    fn test_roles_follow_reason() {
        assert_eq!(
            ApprovalReason::HighValueDelivery.approver_role(),
            ApproverRole::Supervisor
        );
        assert_eq!(ApprovalReason::FlightHold.approver_role(), ApproverRole::Supervisor);
        assert_eq!(ApprovalReason::HighCompensation.approver_role(), ApproverRole::Manager);
    }

    #[test]
    fn test_timeout_outcomes() {
        let mut req = request();
        assert_eq!(req.outcome(), None);
        assert_eq!(req.timeout_at - req.requested_at, chrono::Duration::minutes(30));

        req.status = ApprovalStatus::TimedOut;
        assert_eq!(req.outcome(), Some(ApprovalOutcome::Abandoned));
        req.timeout_resolution = Some(Decision::Approve);
        assert_eq!(req.outcome(), Some(ApprovalOutcome::Approved));
        req.timeout_resolution = Some(Decision::Reject);
        assert_eq!(req.outcome(), Some(ApprovalOutcome::Rejected));
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(request()).unwrap();
        assert_eq!(json["reason"], "high_compensation");
        assert_eq!(json["approverRole"], "manager");
        assert_eq!(json["status"], "pending");
        assert!(json.get("decidedBy").is_none());
    }
}
