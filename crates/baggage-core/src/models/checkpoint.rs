use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bag::{BagState, Node};

/// Immutable snapshot of a bag state as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub workflow_id: String,
    pub bag_id: String,
    pub node: Node,
    pub version: u64,
    pub state_snapshot: BagState,
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn of(state: &BagState) -> Self {
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: state.workflow_id.clone(),
            bag_id: state.bag_id.clone(),
            node: state.current_node,
            version: state.version,
            state_snapshot: state.clone(),
            written_at: Utc::now(),
        }
    }
}
