//! `baggage init`: check a bag in and run it until it halts.

use baggage_core::models::TripFacts;
use baggage_core::BaggageService;

use super::to_json;

/// `trip` is a TripFacts JSON document, or `@path` to read one from a file.
pub async fn run(service: &BaggageService, trip: &str) -> Result<serde_json::Value, String> {
    let raw = match trip.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read trip file '{}': {}", path, e))?,
        None => trip.to_string(),
    };
    let facts: TripFacts =
        serde_json::from_str(&raw).map_err(|e| format!("Invalid trip facts: {}", e))?;

    let result = service.initialize(facts).await.map_err(|e| e.to_string())?;
    to_json(&result)
}
