use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};

use crate::db::Database;
use crate::error::BaggageError;
use crate::models::{
    ApprovalReason, ApprovalRequest, ApprovalStatus, ApproverRole, Decision,
};

const COLUMNS: &str = "approval_id, bag_id, workflow_id, reason, payload, approver_role, status,
     timeout_resolution, requested_at, timeout_at, decided_by, decided_at, comments, consumed_at";

/// Verdict written by `ApprovalStore::resolve`.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub status: ApprovalStatus,
    pub timeout_resolution: Option<Decision>,
    pub decided_by: Option<String>,
    pub comments: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ApprovalStore {
    db: Database,
}

impl ApprovalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert the request unless a pending one already exists for the same
    /// `(bag_id, workflow_id, reason)`. Returns the stored request and
    /// whether it was newly created.
    pub async fn create_if_absent(
        &self,
        request: &ApprovalRequest,
    ) -> Result<(ApprovalRequest, bool), BaggageError> {
        let r = request.clone();
        self.db
            .with_tx_async(move |tx| {
                let existing = tx
                    .query_row(
                        &format!(
                            "SELECT {} FROM approval_requests
                             WHERE bag_id = ?1 AND workflow_id = ?2 AND reason = ?3
                               AND status = 'pending'
                             ORDER BY requested_at ASC LIMIT 1",
                            COLUMNS
                        ),
                        rusqlite::params![r.bag_id, r.workflow_id, r.reason.as_str()],
                        row_to_request,
                    )
                    .optional()?;
                if let Some(existing) = existing {
                    return Ok((existing, false));
                }

                tx.execute(
                    &format!(
                        "INSERT INTO approval_requests ({})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                        COLUMNS
                    ),
                    rusqlite::params![
                        r.approval_id,
                        r.bag_id,
                        r.workflow_id,
                        r.reason.as_str(),
                        serde_json::to_string(&r.payload)?,
                        r.approver_role.as_str(),
                        r.status.as_str(),
                        r.timeout_resolution.map(|d| d.as_str()),
                        r.requested_at.timestamp_millis(),
                        r.timeout_at.timestamp_millis(),
                        r.decided_by,
                        r.decided_at.map(|t| t.timestamp_millis()),
                        r.comments,
                        r.consumed_at.map(|t| t.timestamp_millis()),
                    ],
                )?;
                Ok((r, true))
            })
            .await
    }

    pub async fn get(&self, approval_id: &str) -> Result<Option<ApprovalRequest>, BaggageError> {
        let id = approval_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM approval_requests WHERE approval_id = ?1", COLUMNS),
                    rusqlite::params![id],
                    row_to_request,
                )
                .optional()
            })
            .await
    }

    /// Move a pending request to a resolved status. Returns the stored
    /// request and whether this call performed the transition.
    pub async fn resolve(
        &self,
        approval_id: &str,
        resolution: Resolution,
    ) -> Result<(ApprovalRequest, bool), BaggageError> {
        let id = approval_id.to_string();
        self.db
            .with_tx_async(move |tx| {
                let changed = tx.execute(
                    "UPDATE approval_requests
                     SET status = ?1, timeout_resolution = ?2, decided_by = ?3,
                         comments = ?4, decided_at = ?5
                     WHERE approval_id = ?6 AND status = 'pending'",
                    rusqlite::params![
                        resolution.status.as_str(),
                        resolution.timeout_resolution.map(|d| d.as_str()),
                        resolution.decided_by,
                        resolution.comments,
                        resolution.decided_at.timestamp_millis(),
                        id,
                    ],
                )?;
                let stored = fetch(tx, &id)?;
                Ok((stored, changed == 1))
            })
            .await
    }

    /// Mark a resolved request as consumed. Only the first call succeeds;
    /// later calls return the stored record with `false`.
    pub async fn consume(
        &self,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ApprovalRequest, bool), BaggageError> {
        let id = approval_id.to_string();
        self.db
            .with_tx_async(move |tx| {
                let changed = tx.execute(
                    "UPDATE approval_requests SET consumed_at = ?1
                     WHERE approval_id = ?2 AND status != 'pending' AND consumed_at IS NULL",
                    rusqlite::params![now.timestamp_millis(), id],
                )?;
                let stored = fetch(tx, &id)?;
                Ok((stored, changed == 1))
            })
            .await
    }

    pub async fn list_pending(
        &self,
        role: Option<ApproverRole>,
    ) -> Result<Vec<ApprovalRequest>, BaggageError> {
        let role_str = role.map(|r| r.as_str().to_string());
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM approval_requests
                     WHERE status = 'pending' AND (?1 IS NULL OR approver_role = ?1)
                     ORDER BY requested_at ASC",
                    COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![role_str], row_to_request)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Pending requests whose timeout has elapsed at `now`.
    pub async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, BaggageError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM approval_requests
                     WHERE status = 'pending' AND timeout_at <= ?1
                     ORDER BY timeout_at ASC",
                    COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![now.timestamp_millis()], row_to_request)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_by_bag(&self, bag_id: &str) -> Result<Vec<ApprovalRequest>, BaggageError> {
        let id = bag_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM approval_requests WHERE bag_id = ?1 ORDER BY requested_at ASC",
                    COLUMNS
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![id], row_to_request)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

fn fetch(conn: &rusqlite::Connection, approval_id: &str) -> Result<ApprovalRequest, BaggageError> {
    conn.query_row(
        &format!("SELECT {} FROM approval_requests WHERE approval_id = ?1", COLUMNS),
        rusqlite::params![approval_id],
        row_to_request,
    )
    .optional()?
    .ok_or_else(|| BaggageError::NotFound(format!("Approval {} not found", approval_id)))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(DateTime::from_timestamp_millis)
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let reason_str: String = row.get(3)?;
    let reason = ApprovalReason::from_str(&reason_str)
        .ok_or_else(|| conversion_error(3, format!("unknown reason '{}'", reason_str)))?;
    let payload_str: String = row.get(4)?;
    let role_str: String = row.get(5)?;
    let approver_role = ApproverRole::from_str(&role_str)
        .ok_or_else(|| conversion_error(5, format!("unknown role '{}'", role_str)))?;
    let status_str: String = row.get(6)?;
    let status = ApprovalStatus::from_str(&status_str)
        .ok_or_else(|| conversion_error(6, format!("unknown status '{}'", status_str)))?;
    let resolution: Option<String> = row.get(7)?;
    let requested_ms: i64 = row.get(8)?;
    let timeout_ms: i64 = row.get(9)?;

    Ok(ApprovalRequest {
        approval_id: row.get(0)?,
        bag_id: row.get(1)?,
        workflow_id: row.get(2)?,
        reason,
        payload: serde_json::from_str(&payload_str).unwrap_or_default(),
        approver_role,
        status,
        timeout_resolution: resolution.as_deref().and_then(Decision::from_str),
        requested_at: DateTime::from_timestamp_millis(requested_ms).unwrap_or_else(Utc::now),
        timeout_at: DateTime::from_timestamp_millis(timeout_ms).unwrap_or_else(Utc::now),
        decided_by: row.get(10)?,
        decided_at: millis(row.get(11)?),
        comments: row.get(12)?,
        consumed_at: millis(row.get(13)?),
    })
}
