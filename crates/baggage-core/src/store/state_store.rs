use chrono::Utc;
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::BaggageError;
use crate::models::{BagState, BagStateSummary, Checkpoint, Node};

/// Current-state table plus append-only checkpoint log.
///
/// Writes are guarded by optimistic concurrency: a state may only be saved
/// on top of the version it was loaded at, and only with a higher version.
#[derive(Clone)]
pub struct BagStateStore {
    db: Database,
}

impl BagStateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist the state and append a checkpoint in one transaction.
    ///
    /// Fails with `Conflict` if another writer persisted a newer version in
    /// the meantime, or if the state has not advanced since it was loaded.
    pub async fn save(&self, state: &mut BagState) -> Result<Checkpoint, BaggageError> {
        let checkpoint = Checkpoint::of(state);
        let base_version = state.persisted_version();
        let cp = checkpoint.clone();

        self.db
            .with_tx_async(move |tx| {
                let stored: Option<i64> = tx
                    .query_row(
                        "SELECT version FROM bag_states WHERE bag_id = ?1",
                        rusqlite::params![cp.bag_id],
                        |row| row.get(0),
                    )
                    .optional()?;

                let stored = stored.map(|v| v as u64);
                let accepted = match (stored, base_version) {
                    (None, None) => true,
                    (Some(current), Some(base)) => current == base && cp.version > current,
                    _ => false,
                };
                if !accepted {
                    return Err(BaggageError::Conflict(format!(
                        "bag {} is at version {:?}, write of version {} was based on {:?}",
                        cp.bag_id, stored, cp.version, base_version
                    )));
                }

                let state_json = serde_json::to_string(&cp.state_snapshot)?;
                tx.execute(
                    "INSERT INTO bag_states
                         (bag_id, workflow_id, current_node, version, state, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(bag_id) DO UPDATE SET
                       workflow_id = excluded.workflow_id,
                       current_node = excluded.current_node,
                       version = excluded.version,
                       state = excluded.state,
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        cp.bag_id,
                        cp.workflow_id,
                        cp.node.as_str(),
                        cp.version as i64,
                        state_json,
                        cp.state_snapshot.updated_at.timestamp_millis(),
                    ],
                )?;
                tx.execute(
                    "INSERT INTO bag_checkpoints
                         (checkpoint_id, workflow_id, bag_id, node, version, state, written_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        cp.checkpoint_id,
                        cp.workflow_id,
                        cp.bag_id,
                        cp.node.as_str(),
                        cp.version as i64,
                        state_json,
                        cp.written_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await?;

        state.mark_persisted();
        tracing::debug!(
            bag_id = %checkpoint.bag_id,
            version = checkpoint.version,
            "[StateStore] Checkpoint written at {}",
            checkpoint.node
        );
        Ok(checkpoint)
    }

    /// Latest persisted state for a bag, ready to be mutated and saved.
    pub async fn load_latest(&self, bag_id: &str) -> Result<Option<BagState>, BaggageError> {
        let id = bag_id.to_string();
        let state = self
            .db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT state FROM bag_states WHERE bag_id = ?1",
                    rusqlite::params![id],
                    |row| parse_state(row, 0),
                )
                .optional()
            })
            .await?;

        Ok(state.map(|mut s| {
            s.mark_persisted();
            s
        }))
    }

    /// Like `load_latest`, but an unknown bag is an error.
    pub async fn require(&self, bag_id: &str) -> Result<BagState, BaggageError> {
        self.load_latest(bag_id)
            .await?
            .ok_or_else(|| BaggageError::NotFound(format!("Bag {} not found", bag_id)))
    }

    /// All checkpoints for a bag, ordered by version.
    pub async fn load_history(&self, bag_id: &str) -> Result<Vec<Checkpoint>, BaggageError> {
        let id = bag_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT checkpoint_id, workflow_id, bag_id, node, version, state, written_at
                     FROM bag_checkpoints WHERE bag_id = ?1 ORDER BY version ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id], row_to_checkpoint)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Checkpoints of a single lifecycle run.
    pub async fn load_workflow_history(
        &self,
        bag_id: &str,
        workflow_id: &str,
    ) -> Result<Vec<Checkpoint>, BaggageError> {
        let id = bag_id.to_string();
        let wf = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT checkpoint_id, workflow_id, bag_id, node, version, state, written_at
                     FROM bag_checkpoints WHERE bag_id = ?1 AND workflow_id = ?2
                     ORDER BY version ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![id, wf], row_to_checkpoint)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_bags(&self) -> Result<Vec<BagStateSummary>, BaggageError> {
        self.db
            .with_conn_async(|conn| {
                let mut stmt =
                    conn.prepare("SELECT state FROM bag_states ORDER BY updated_at DESC")?;
                let rows = stmt
                    .query_map([], |row| parse_state(row, 0).map(|s| s.summary()))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Bag ids currently parked at the given node.
    pub async fn list_at_node(&self, node: Node) -> Result<Vec<String>, BaggageError> {
        let node_str = node.as_str().to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT bag_id FROM bag_states WHERE current_node = ?1 ORDER BY updated_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![node_str], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn parse_state(row: &Row<'_>, idx: usize) -> rusqlite::Result<BagState> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_checkpoint(row: &Row<'_>) -> rusqlite::Result<Checkpoint> {
    let node_str: String = row.get(3)?;
    let node = Node::from_str(&node_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown node '{}'", node_str).into(),
        )
    })?;
    let version: i64 = row.get(4)?;
    let written_ms: i64 = row.get(6)?;

    Ok(Checkpoint {
        checkpoint_id: row.get(0)?,
        workflow_id: row.get(1)?,
        bag_id: row.get(2)?,
        node,
        version: version as u64,
        state_snapshot: parse_state(row, 5)?,
        written_at: chrono::DateTime::from_timestamp_millis(written_ms)
            .unwrap_or_else(Utc::now),
    })
}
