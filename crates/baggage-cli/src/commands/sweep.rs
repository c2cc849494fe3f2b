//! `baggage sweep`: resolve overdue approvals once, or keep sweeping.

use baggage_core::BaggageService;

use super::to_json;

pub async fn once(service: &BaggageService) -> Result<serde_json::Value, String> {
    let swept_at = chrono::Utc::now();
    let resolved = service.sweep().await.map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "sweptAt": swept_at,
        "resolved": resolved.len(),
        "approvals": to_json(&resolved)?,
    }))
}

/// Run the background sweeper until Ctrl-C.
pub async fn watch(service: &BaggageService) -> Result<(), String> {
    tracing::info!(
        "[CLI] Sweeping every {}s, Ctrl-C to stop",
        service.config.sweep_interval_secs
    );
    let sweeper = service.spawn_sweeper();
    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;
    sweeper.abort();
    Ok(())
}
