//! The sync ledger: one durable record per source document.
//!
//! The `processing` status doubles as a per-document mutual-exclusion flag.
//! Claiming is a guarded single-statement update on the ledger row rather
//! than an in-memory lock, so exclusivity survives process restarts and
//! holds across multiple workers. A `synced` record's checksum always
//! matches the chunk set currently in the vector index for that document.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio_rusqlite::{Connection, OptionalExtension};

use crate::config::LedgerConfig;
use crate::error::VaultError;

/// Per-document sync state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStatus {
    Pending,
    Processing,
    Synced,
    Failed,
    Deleted,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Deleted => "deleted",
        }
    }

    fn parse(value: &str) -> Result<Self, VaultError> {
        match value {
            "pending" => Ok(SyncStatus::Pending),
            "processing" => Ok(SyncStatus::Processing),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            "deleted" => Ok(SyncStatus::Deleted),
            other => Err(VaultError::Storage(format!("unknown sync status '{other}'"))),
        }
    }
}

/// Read-only view of one ledger row, also the operational status surface.
#[derive(Clone, Debug)]
pub struct SyncRecord {
    pub document_id: String,
    pub display_name: String,
    pub checksum: Option<String>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub retry_count: u32,
    /// Whether a `failed` record is eligible for the retry sweep. Fatal
    /// per-document errors (unsupported format) clear this.
    pub retryable: bool,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Outcome of attempting to claim a document for processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This caller now owns the sync run for the document.
    Claimed,
    /// Another run is already `processing`; the notification coalesces.
    Coalesced,
}

#[derive(Clone)]
pub struct SyncLedger {
    conn: Connection,
}

impl SyncLedger {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let conn = Connection::open(path)
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS document_sync (
                     document_id TEXT PRIMARY KEY,
                     display_name TEXT NOT NULL,
                     checksum TEXT,
                     status TEXT NOT NULL,
                     error_message TEXT,
                     retry_count INTEGER NOT NULL DEFAULT 0,
                     retryable INTEGER NOT NULL DEFAULT 1,
                     created_at TEXT NOT NULL,
                     last_attempt_at TEXT,
                     last_synced_at TEXT
                 );",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)
        })
        .await
        .map_err(|err| VaultError::Storage(err.to_string()))?;
        Ok(Self { conn })
    }

    /// Opens the ledger at the configured (or environment-resolved) path.
    pub async fn open_with(config: &LedgerConfig) -> Result<Self, VaultError> {
        Self::open(&config.db_path).await
    }

    /// Claims `document_id` for processing.
    ///
    /// Inserts a `pending` row when none exists, then flips it to
    /// `processing` unless it already is — in which case the caller must
    /// coalesce instead of starting a second concurrent run.
    pub async fn claim(
        &self,
        document_id: &str,
        display_name: &str,
    ) -> Result<ClaimOutcome, VaultError> {
        let document_id = document_id.to_string();
        let display_name = display_name.to_string();
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT OR IGNORE INTO document_sync
                         (document_id, display_name, status, retry_count, created_at)
                     VALUES (?1, ?2, 'pending', 0, ?3)",
                    (&document_id, &display_name, &now),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let updated = tx
                    .execute(
                        "UPDATE document_sync
                         SET status = 'processing',
                             display_name = ?2,
                             last_attempt_at = ?3
                         WHERE document_id = ?1 AND status != 'processing'",
                        (&document_id, &display_name, &now),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;

                Ok(if updated == 1 {
                    ClaimOutcome::Claimed
                } else {
                    ClaimOutcome::Coalesced
                })
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))
    }

    /// `processing → synced`: checksum recorded, error cleared, retries reset.
    ///
    /// The transition is guarded on `status = 'processing'`: if a removal
    /// notification flipped the row to `deleted` while the sync run was in
    /// flight, this returns `false` and the caller must tear down whatever
    /// it just wrote instead of reporting success.
    pub async fn mark_synced(&self, document_id: &str, checksum: &str) -> Result<bool, VaultError> {
        let document_id = document_id.to_string();
        let checksum = checksum.to_string();
        let now = Utc::now().to_rfc3339();
        let updated = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE document_sync
                     SET status = 'synced',
                         checksum = ?2,
                         error_message = NULL,
                         retry_count = 0,
                         retryable = 1,
                         last_synced_at = ?3
                     WHERE document_id = ?1 AND status = 'processing'",
                    (&document_id, &checksum, &now),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?;
        Ok(updated == 1)
    }

    /// Any live state → `failed`: error recorded, retry count incremented,
    /// retry eligibility taken from the error. A `deleted` row stays deleted,
    /// and an unknown document gets a row so the failure is visible.
    pub async fn mark_failed(&self, document_id: &str, error: &VaultError) -> Result<(), VaultError> {
        let document_id = document_id.to_string();
        let message = error.to_string();
        let retryable = i64::from(error.is_retryable());
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT OR IGNORE INTO document_sync
                         (document_id, display_name, status, retry_count, created_at)
                     VALUES (?1, ?1, 'pending', 0, ?2)",
                    (&document_id, &now),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "UPDATE document_sync
                     SET status = 'failed',
                         error_message = ?2,
                         retry_count = retry_count + 1,
                         retryable = ?3
                     WHERE document_id = ?1 AND status != 'deleted'",
                    (&document_id, &message, retryable),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?;
        Ok(())
    }

    /// Any state → `deleted`. The row is retained as an audit trail, and is
    /// created if the removal notification arrives for an unknown document.
    pub async fn mark_deleted(&self, document_id: &str) -> Result<(), VaultError> {
        let document_id = document_id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT OR IGNORE INTO document_sync
                         (document_id, display_name, status, retry_count, created_at)
                     VALUES (?1, ?1, 'pending', 0, ?2)",
                    (&document_id, &now),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "UPDATE document_sync SET status = 'deleted' WHERE document_id = ?1",
                    [&document_id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(())
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))
    }

    /// Current record for one document, if any.
    pub async fn status(&self, document_id: &str) -> Result<Option<SyncRecord>, VaultError> {
        let document_id = document_id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT document_id, display_name, checksum, status, error_message,
                            retry_count, retryable, created_at, last_attempt_at, last_synced_at
                     FROM document_sync WHERE document_id = ?1",
                    [&document_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                            row.get(9)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?
            .map(raw_to_record)
            .transpose()
    }

    /// Every ledger row, ordered by document id.
    pub async fn list(&self) -> Result<Vec<SyncRecord>, VaultError> {
        self.conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT document_id, display_name, checksum, status, error_message,
                                retry_count, retryable, created_at, last_attempt_at, last_synced_at
                         FROM document_sync ORDER BY document_id ASC",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                            row.get(8)?,
                            row.get(9)?,
                        ))
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut raws = Vec::new();
                for row in rows {
                    raws.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(raws)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))?
            .into_iter()
            .map(raw_to_record)
            .collect()
    }

    /// `failed` documents still under the retry budget and whose last error
    /// was transient, oldest attempts first; input to scheduled retry sweeps.
    pub async fn retryable_failures(&self, max_retries: u32) -> Result<Vec<String>, VaultError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT document_id FROM document_sync
                         WHERE status = 'failed' AND retryable = 1
                           AND retry_count <= {max_retries}
                         ORDER BY last_attempt_at ASC"
                    ))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(ids)
            })
            .await
            .map_err(|err| VaultError::Storage(err.to_string()))
    }
}

type RawRecord = (
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    i64,
    i64,
    String,
    Option<String>,
    Option<String>,
);

fn raw_to_record(raw: RawRecord) -> Result<SyncRecord, VaultError> {
    let (
        document_id,
        display_name,
        checksum,
        status,
        error_message,
        retry_count,
        retryable,
        created_at,
        last_attempt_at,
        last_synced_at,
    ) = raw;
    Ok(SyncRecord {
        document_id,
        display_name,
        checksum,
        status: SyncStatus::parse(&status)?,
        error_message,
        retry_count: retry_count.max(0) as u32,
        retryable: retryable != 0,
        created_at: parse_timestamp(&created_at)?,
        last_attempt_at: last_attempt_at.as_deref().map(parse_timestamp).transpose()?,
        last_synced_at: last_synced_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, VaultError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| VaultError::Storage(format!("bad timestamp '{value}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn ledger() -> (tempfile::TempDir, SyncLedger) {
        let dir = tempdir().unwrap();
        let ledger = SyncLedger::open(dir.path().join("ledger.db")).await.unwrap();
        (dir, ledger)
    }

    #[tokio::test]
    async fn claim_then_coalesce() {
        let (_dir, ledger) = ledger().await;
        assert_eq!(
            ledger.claim("d1", "doc.txt").await.unwrap(),
            ClaimOutcome::Claimed
        );
        assert_eq!(
            ledger.claim("d1", "doc.txt").await.unwrap(),
            ClaimOutcome::Coalesced
        );
        let record = ledger.status("d1").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Processing);
    }

    fn transient_error() -> VaultError {
        VaultError::Embedding("boom".into())
    }

    #[tokio::test]
    async fn synced_record_resets_error_and_retries() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("d1", "doc.txt").await.unwrap();
        ledger.mark_failed("d1", &transient_error()).await.unwrap();
        let failed = ledger.status("d1").await.unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("embedding failed: boom"));

        ledger.claim("d1", "doc.txt").await.unwrap();
        assert!(ledger.mark_synced("d1", "abc123").await.unwrap());
        let synced = ledger.status("d1").await.unwrap().unwrap();
        assert_eq!(synced.status, SyncStatus::Synced);
        assert_eq!(synced.checksum.as_deref(), Some("abc123"));
        assert_eq!(synced.retry_count, 0);
        assert!(synced.error_message.is_none());
        assert!(synced.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn failed_record_can_be_reclaimed() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("d1", "doc.txt").await.unwrap();
        ledger.mark_failed("d1", &transient_error()).await.unwrap();
        assert_eq!(
            ledger.claim("d1", "doc.txt").await.unwrap(),
            ClaimOutcome::Claimed
        );
    }

    #[tokio::test]
    async fn synced_transition_requires_processing_status() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("d1", "doc.txt").await.unwrap();
        ledger.mark_deleted("d1").await.unwrap();
        // The in-flight run finishes after the removal landed.
        assert!(!ledger.mark_synced("d1", "abc").await.unwrap());
        let record = ledger.status("d1").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Deleted);
        assert!(record.checksum.is_none());
    }

    #[tokio::test]
    async fn failure_does_not_resurrect_deleted_row() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("d1", "doc.txt").await.unwrap();
        ledger.mark_deleted("d1").await.unwrap();
        ledger.mark_failed("d1", &transient_error()).await.unwrap();
        let record = ledger.status("d1").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Deleted);
    }

    #[tokio::test]
    async fn failure_of_unknown_document_creates_a_row() {
        let (_dir, ledger) = ledger().await;
        ledger.mark_failed("ghost", &transient_error()).await.unwrap();
        let record = ledger.status("ghost").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.retry_count, 1);
    }

    #[tokio::test]
    async fn deleted_record_is_retained_for_audit() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("d1", "doc.txt").await.unwrap();
        ledger.mark_synced("d1", "abc").await.unwrap();
        ledger.mark_deleted("d1").await.unwrap();
        let record = ledger.status("d1").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Deleted);
        // Audit trail survives: checksum from the last successful sync stays.
        assert_eq!(record.checksum.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn deletion_of_unknown_document_creates_audit_row() {
        let (_dir, ledger) = ledger().await;
        ledger.mark_deleted("ghost").await.unwrap();
        let record = ledger.status("ghost").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Deleted);
    }

    #[tokio::test]
    async fn retryable_failures_respect_budget() {
        let (_dir, ledger) = ledger().await;
        for id in ["a", "b"] {
            ledger.claim(id, "doc").await.unwrap();
            ledger.mark_failed(id, &transient_error()).await.unwrap();
        }
        // Push "b" over the budget.
        for _ in 0..3 {
            ledger.claim("b", "doc").await.unwrap();
            ledger.mark_failed("b", &transient_error()).await.unwrap();
        }
        let retryable = ledger.retryable_failures(2).await.unwrap();
        assert_eq!(retryable, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn non_retryable_failures_are_excluded_from_sweep() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("blob", "blob.bin").await.unwrap();
        ledger
            .mark_failed(
                "blob",
                &VaultError::UnsupportedFormat {
                    mime_type: "application/octet-stream".into(),
                },
            )
            .await
            .unwrap();
        let record = ledger.status("blob").await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert!(!record.retryable);
        assert!(ledger.retryable_failures(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_orders_by_document_id() {
        let (_dir, ledger) = ledger().await;
        ledger.claim("b", "b.txt").await.unwrap();
        ledger.claim("a", "a.txt").await.unwrap();
        let all = ledger.list().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
