//! Baggage Core: lifecycle orchestration for airline baggage operations.
//!
//! This crate contains the state machine that drives a bag from check-in to
//! delivery (or through the mishandling branch), the agent invocation
//! contract, the human approval gate, the event processor and the SQLite
//! checkpoint log. It has **no HTTP framework dependency**, making it
//! suitable for use in:
//!
//! - CLI tools (via `baggage-cli`)
//! - HTTP or WebSocket adapters built on top of [`BaggageService`]
//! - Tests and demos with the deterministic built-in agents
//!
//! # Architecture
//!
//! ```text
//! submit_event ──► EventProcessor ──► LifecycleOrchestrator ──► AgentInvoker ──► Agent
//!                       ▲                   │     │
//!       ApprovalGate ───┘ (timeout sweep)   │     └──► ApprovalGate
//!                                           ▼
//!                                BagStateStore (checkpoints) ──► EventBus
//! ```

pub mod agents;
pub mod approval;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod orchestration;
pub mod processor;
pub mod state;
pub mod store;

// Convenience re-exports
pub use config::OrchestratorConfig;
pub use db::Database;
pub use error::{BaggageError, ErrorResult};
pub use state::BaggageService;
