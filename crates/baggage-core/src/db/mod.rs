//! SQLite database layer for the baggage orchestrator.
//!
//! Uses rusqlite with WAL mode for concurrent read performance.
//! All database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::BaggageError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, BaggageError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| BaggageError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| BaggageError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, BaggageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| BaggageError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| BaggageError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, BaggageError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| BaggageError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| BaggageError::Database(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, BaggageError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| BaggageError::Database(format!("Task join error: {}", e)))?
    }

    /// Run a closure inside a single SQLite transaction.
    ///
    /// The closure may fail with any `BaggageError` (e.g. a version
    /// conflict); the transaction is rolled back in that case.
    pub async fn with_tx_async<F, T>(&self, f: F) -> Result<T, BaggageError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, BaggageError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .conn
                .lock()
                .map_err(|e| BaggageError::Database(format!("Lock poisoned: {}", e)))?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
        .map_err(|e| BaggageError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), BaggageError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS bag_states (
                    bag_id          TEXT PRIMARY KEY,
                    workflow_id     TEXT NOT NULL,
                    current_node    TEXT NOT NULL,
                    version         INTEGER NOT NULL,
                    state           TEXT NOT NULL,
                    updated_at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_bag_states_node ON bag_states(current_node);

                CREATE TABLE IF NOT EXISTS bag_checkpoints (
                    checkpoint_id   TEXT PRIMARY KEY,
                    workflow_id     TEXT NOT NULL,
                    bag_id          TEXT NOT NULL,
                    node            TEXT NOT NULL,
                    version         INTEGER NOT NULL,
                    state           TEXT NOT NULL,
                    written_at      INTEGER NOT NULL,
                    UNIQUE (bag_id, version)
                );
                CREATE INDEX IF NOT EXISTS idx_checkpoints_bag ON bag_checkpoints(bag_id, version);
                CREATE INDEX IF NOT EXISTS idx_checkpoints_workflow ON bag_checkpoints(workflow_id);

                CREATE TABLE IF NOT EXISTS approval_requests (
                    approval_id         TEXT PRIMARY KEY,
                    bag_id              TEXT NOT NULL,
                    workflow_id         TEXT NOT NULL,
                    reason              TEXT NOT NULL,
                    payload             TEXT NOT NULL DEFAULT '{}',
                    approver_role       TEXT NOT NULL,
                    status              TEXT NOT NULL DEFAULT 'pending',
                    timeout_resolution  TEXT,
                    requested_at        INTEGER NOT NULL,
                    timeout_at          INTEGER NOT NULL,
                    decided_by          TEXT,
                    decided_at          INTEGER,
                    comments            TEXT,
                    consumed_at         INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_approvals_status
                    ON approval_requests(status, timeout_at);
                CREATE INDEX IF NOT EXISTS idx_approvals_bag
                    ON approval_requests(bag_id, workflow_id, reason);
                ",
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_on_disk_creates_tables() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("bags.db");
        let db = Database::open(path.to_str().unwrap()).expect("open");

        let tables: Vec<String> = db
            .with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .unwrap();

        assert!(tables.contains(&"bag_states".to_string()));
        assert!(tables.contains(&"bag_checkpoints".to_string()));
        assert!(tables.contains(&"approval_requests".to_string()));
    }

    #[tokio::test]
    async fn test_with_tx_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<(), BaggageError> = db
            .with_tx_async(|tx| {
                tx.execute(
                    "INSERT INTO bag_states
                         (bag_id, workflow_id, current_node, version, state, updated_at)
                     VALUES ('b', 'w', 'check_in', 1, '{}', 0)",
                    [],
                )?;
                Err(BaggageError::Conflict("forced".to_string()))
            })
            .await;
        assert!(matches!(result, Err(BaggageError::Conflict(_))));

        let count: i64 = db
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM bag_states", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }
}
