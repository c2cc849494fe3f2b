//! `baggage approval`: the human side of the gate.

use baggage_core::models::{ApproverRole, Decision};
use baggage_core::BaggageService;

use super::to_json;

pub async fn list(
    service: &BaggageService,
    role: Option<&str>,
) -> Result<serde_json::Value, String> {
    let role = role
        .map(|r| {
            ApproverRole::from_str(r)
                .ok_or_else(|| format!("Unknown role '{}' (expected supervisor or manager)", r))
        })
        .transpose()?;
    let pending = service
        .list_pending_approvals(role)
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "approvals": to_json(&pending)? }))
}

pub async fn decide(
    service: &BaggageService,
    approval_id: &str,
    decision: &str,
    decided_by: &str,
    comments: Option<&str>,
) -> Result<serde_json::Value, String> {
    let decision = Decision::from_str(decision)
        .ok_or_else(|| format!("Unknown decision '{}' (expected approve or reject)", decision))?;
    let request = service
        .decide_approval(
            approval_id,
            decision,
            decided_by,
            comments.map(str::to_string),
        )
        .await
        .map_err(|e| e.to_string())?;
    let bag = service
        .get_state(&request.bag_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "approval": to_json(&request)?,
        "bag": to_json(&bag)?,
    }))
}
