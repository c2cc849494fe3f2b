//! `baggage bag`: inspect and resume bags.

use baggage_core::models::Node;
use baggage_core::BaggageService;

use super::to_json;

pub async fn get(service: &BaggageService, bag_id: &str) -> Result<serde_json::Value, String> {
    let summary = service.get_state(bag_id).await.map_err(|e| e.to_string())?;
    to_json(&summary)
}

/// The full state, including the journey log and agent calls.
pub async fn full(service: &BaggageService, bag_id: &str) -> Result<serde_json::Value, String> {
    let state = service
        .orchestrator
        .load_full_state(bag_id)
        .await
        .map_err(|e| e.to_string())?;
    to_json(&state)
}

/// Checkpoint log without the snapshots, optionally for one lifecycle run.
pub async fn history(
    service: &BaggageService,
    bag_id: &str,
    workflow_id: Option<&str>,
) -> Result<serde_json::Value, String> {
    let history = match workflow_id {
        Some(workflow_id) => service
            .orchestrator
            .workflow_history(bag_id, workflow_id)
            .await,
        None => service.history(bag_id).await,
    }
    .map_err(|e| e.to_string())?;
    let checkpoints: Vec<serde_json::Value> = history
        .iter()
        .map(|c| {
            serde_json::json!({
                "version": c.version,
                "node": c.node,
                "workflowId": c.workflow_id,
                "riskLevel": c.state_snapshot.risk_level(),
                "writtenAt": c.written_at,
            })
        })
        .collect();
    Ok(serde_json::json!({ "bagId": bag_id, "checkpoints": checkpoints }))
}

/// All bags, or only the ids of bags parked at `node`.
pub async fn list(
    service: &BaggageService,
    node: Option<&str>,
) -> Result<serde_json::Value, String> {
    if let Some(name) = node {
        let node = Node::from_str(name).ok_or_else(|| format!("Unknown node '{}'", name))?;
        let ids = service
            .state_store
            .list_at_node(node)
            .await
            .map_err(|e| e.to_string())?;
        return Ok(serde_json::json!({ "node": node, "bagIds": ids }));
    }
    let bags = service
        .state_store
        .list_bags()
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "bags": to_json(&bags)? }))
}

pub async fn advance(service: &BaggageService, bag_id: &str) -> Result<serde_json::Value, String> {
    let summary = service
        .orchestrator
        .advance(bag_id)
        .await
        .map_err(|e| e.to_string())?;
    to_json(&summary)
}

pub async fn acknowledge(
    service: &BaggageService,
    bag_id: &str,
    alert_id: &str,
) -> Result<serde_json::Value, String> {
    let summary = service
        .orchestrator
        .acknowledge_alert(bag_id, alert_id)
        .await
        .map_err(|e| e.to_string())?;
    to_json(&summary)
}
