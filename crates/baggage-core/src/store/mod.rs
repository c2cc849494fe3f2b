pub mod approval_store;
pub mod state_store;

pub use approval_store::{ApprovalStore, Resolution};
pub use state_store::BagStateStore;
