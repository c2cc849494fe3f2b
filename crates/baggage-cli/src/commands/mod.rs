//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! baggage-core domain logic through [`BaggageService`]. Commands return
//! the JSON document the binary prints.

pub mod approvals;
pub mod demo;
pub mod event;
pub mod init;
pub mod state;
pub mod sweep;

use std::sync::Arc;

use baggage_core::agents::{AgentRegistry, HttpAgent, HttpAgentConfig};
use baggage_core::{BaggageService, Database, OrchestratorConfig};

/// Open the database and wire a [`BaggageService`].
///
/// Agents are served over HTTP when `BAGGAGE_AGENT_URL` is set, otherwise
/// by the built-in rule-based agents.
pub fn init_service(db_path: &str, config_path: Option<&str>) -> Result<BaggageService, String> {
    let config = match config_path {
        Some(path) => OrchestratorConfig::from_file(path),
        None => OrchestratorConfig::from_env(),
    }
    .map_err(|e| e.to_string())?;

    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;

    let registry = match HttpAgentConfig::from_env() {
        Some(agent_config) => {
            tracing::info!("[CLI] Using remote agents at {}", agent_config.base_url);
            AgentRegistry::new().with_all(Arc::new(HttpAgent::new(agent_config)))
        }
        None => AgentRegistry::builtin(),
    };

    Ok(BaggageService::open(db, config, registry))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}
