//! `baggage event`: submit an external event.

use baggage_core::processor::Priority;
use baggage_core::BaggageService;

use super::to_json;

pub async fn submit(
    service: &BaggageService,
    bag_id: &str,
    event_type: &str,
    payload: &str,
    priority: &str,
) -> Result<serde_json::Value, String> {
    let payload: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| format!("Invalid payload JSON: {}", e))?;
    let priority = Priority::from_str(priority).ok_or_else(|| {
        format!(
            "Unknown priority '{}' (expected low, medium, high or critical)",
            priority
        )
    })?;

    let outcome = service
        .submit_event(bag_id, event_type, payload, priority)
        .await
        .map_err(|e| e.to_string())?;
    to_json(&outcome)
}
