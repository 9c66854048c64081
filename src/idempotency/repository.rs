//! Idempotency Repository
//!
//! Guards mutating operations keyed by `(actor_scope, key)`: the first
//! request to claim a key executes the operation and stores its result;
//! replays under the same key return the stored result without
//! re-executing side effects.
//!
//! The claim is an `INSERT ... ON CONFLICT DO NOTHING`: two concurrent
//! first-time requests race on the primary key and the storage layer
//! picks the winner; the loser observes zero inserted rows and re-fetches
//! the winner's record. There is no application-level read-then-write.
//!
//! The completion record is written strictly after the operation's own
//! transaction commits. A crash in between leaves the key `processing`;
//! it becomes retryable again after the stale takeover window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// A key stuck in `processing` longer than this is considered abandoned
/// and can be taken over by a retry
const STALE_AFTER_MINUTES: i64 = 5;

/// Idempotency key status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<String> for IdempotencyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => IdempotencyStatus::Pending,
            "processing" => IdempotencyStatus::Processing,
            "completed" => IdempotencyStatus::Completed,
            "failed" => IdempotencyStatus::Failed,
            _ => IdempotencyStatus::Pending,
        }
    }
}

impl std::fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdempotencyStatus::Pending => write!(f, "pending"),
            IdempotencyStatus::Processing => write!(f, "processing"),
            IdempotencyStatus::Completed => write!(f, "completed"),
            IdempotencyStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Stored idempotency record
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub actor_scope: String,
    pub key: String,
    pub request_hash: String,
    pub response_status: Option<i32>,
    pub response_body: Option<serde_json::Value>,
    pub status: IdempotencyStatus,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of claiming a key
#[derive(Debug)]
pub enum BeginOutcome {
    /// This request owns the key; execute the operation, then call
    /// `complete` (or `fail`)
    Started,
    /// A completed record exists; return its stored response verbatim
    Replayed(IdempotencyRecord),
}

/// Idempotency Repository Error
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Key already exists and is being processed")]
    KeyInProgress,

    #[error("Request hash mismatch for key {0}")]
    HashMismatch(String),

    #[error("Key not found: {0}")]
    NotFound(String),
}

/// Repository for managing idempotency keys
#[derive(Debug, Clone)]
pub struct IdempotencyRepository {
    pool: PgPool,
}

type RecordRow = (
    String,
    String,
    String,
    Option<i32>,
    Option<serde_json::Value>,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_record(row: RecordRow) -> IdempotencyRecord {
    let (
        actor_scope,
        key,
        request_hash,
        response_status,
        response_body,
        status,
        processing_started_at,
        created_at,
        expires_at,
    ) = row;
    IdempotencyRecord {
        actor_scope,
        key,
        request_hash,
        response_status,
        response_body,
        status: IdempotencyStatus::from(status),
        processing_started_at,
        created_at,
        expires_at,
    }
}

impl IdempotencyRepository {
    /// Create a new IdempotencyRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get an existing record
    pub async fn get(
        &self,
        actor_scope: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT actor_scope, key, request_hash, response_status, response_body,
                   processing_status, processing_started_at, created_at, expires_at
            FROM idempotency_keys
            WHERE actor_scope = $1 AND key = $2
            "#,
        )
        .bind(actor_scope)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_record))
    }

    /// Claim a key for processing.
    ///
    /// The insert races on the `(actor_scope, key)` primary key; exactly
    /// one concurrent caller wins. Losers re-fetch the winner's record:
    /// completed records replay, fresh `processing` records surface
    /// `KeyInProgress`, and stale or failed records are taken over with a
    /// guarded UPDATE so only one retrier resumes.
    pub async fn begin(
        &self,
        actor_scope: &str,
        key: &str,
        request_hash: &str,
    ) -> Result<BeginOutcome, IdempotencyError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys
                (actor_scope, key, request_hash, processing_status, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (actor_scope, key) DO NOTHING
            "#,
        )
        .bind(actor_scope)
        .bind(key)
        .bind(request_hash)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(BeginOutcome::Started);
        }

        // Lost the insert race (or the key pre-existed): read the winner
        let existing = self
            .get(actor_scope, key)
            .await?
            .ok_or_else(|| IdempotencyError::NotFound(key.to_string()))?;

        // Same key must mean the same request
        if existing.request_hash != request_hash {
            return Err(IdempotencyError::HashMismatch(key.to_string()));
        }

        match existing.status {
            IdempotencyStatus::Completed => Ok(BeginOutcome::Replayed(existing)),
            IdempotencyStatus::Processing => {
                let stale = existing
                    .processing_started_at
                    .map(|started| (Utc::now() - started).num_minutes() >= STALE_AFTER_MINUTES)
                    .unwrap_or(true);

                if !stale {
                    return Err(IdempotencyError::KeyInProgress);
                }

                // Stale: take over, guarded so only one retrier wins
                let taken = sqlx::query(
                    r#"
                    UPDATE idempotency_keys
                    SET processing_status = 'processing', processing_started_at = NOW()
                    WHERE actor_scope = $1 AND key = $2
                      AND processing_status = 'processing'
                      AND processing_started_at < NOW() - make_interval(mins => $3)
                    "#,
                )
                .bind(actor_scope)
                .bind(key)
                .bind(STALE_AFTER_MINUTES as i32)
                .execute(&self.pool)
                .await?
                .rows_affected();

                if taken == 1 {
                    Ok(BeginOutcome::Started)
                } else {
                    Err(IdempotencyError::KeyInProgress)
                }
            }
            IdempotencyStatus::Failed | IdempotencyStatus::Pending => {
                // Previous attempt failed; allow exactly one retry to resume
                let taken = sqlx::query(
                    r#"
                    UPDATE idempotency_keys
                    SET processing_status = 'processing', processing_started_at = NOW()
                    WHERE actor_scope = $1 AND key = $2
                      AND processing_status IN ('failed', 'pending')
                    "#,
                )
                .bind(actor_scope)
                .bind(key)
                .execute(&self.pool)
                .await?
                .rows_affected();

                if taken == 1 {
                    Ok(BeginOutcome::Started)
                } else {
                    Err(IdempotencyError::KeyInProgress)
                }
            }
        }
    }

    /// Mark a key as completed with its response. Call this strictly
    /// after the side effect's transaction has committed.
    pub async fn complete(
        &self,
        actor_scope: &str,
        key: &str,
        response_status: i32,
        response_body: serde_json::Value,
    ) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'completed',
                response_status = $3,
                response_body = $4
            WHERE actor_scope = $1 AND key = $2
            "#,
        )
        .bind(actor_scope)
        .bind(key)
        .bind(response_status)
        .bind(response_body)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key.to_string()));
        }

        Ok(())
    }

    /// Mark a key as failed so a retry can run the operation again
    pub async fn fail(
        &self,
        actor_scope: &str,
        key: &str,
        response_status: Option<i32>,
        response_body: Option<serde_json::Value>,
    ) -> Result<(), IdempotencyError> {
        let rows = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET processing_status = 'failed',
                response_status = $3,
                response_body = $4
            WHERE actor_scope = $1 AND key = $2
            "#,
        )
        .bind(actor_scope)
        .bind(key)
        .bind(response_status)
        .bind(response_body)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(IdempotencyError::NotFound(key.to_string()));
        }

        Ok(())
    }

    /// Delete expired idempotency keys
    pub async fn cleanup_expired(&self) -> Result<u64, IdempotencyError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    /// Compute SHA-256 hash of the request body for conflict detection
    pub fn compute_request_hash(body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_status_from_string() {
        assert_eq!(
            IdempotencyStatus::from("pending".to_string()),
            IdempotencyStatus::Pending
        );
        assert_eq!(
            IdempotencyStatus::from("processing".to_string()),
            IdempotencyStatus::Processing
        );
        assert_eq!(
            IdempotencyStatus::from("completed".to_string()),
            IdempotencyStatus::Completed
        );
        assert_eq!(
            IdempotencyStatus::from("failed".to_string()),
            IdempotencyStatus::Failed
        );
        assert_eq!(
            IdempotencyStatus::from("unknown".to_string()),
            IdempotencyStatus::Pending
        );
    }

    #[test]
    fn test_idempotency_status_display() {
        assert_eq!(IdempotencyStatus::Pending.to_string(), "pending");
        assert_eq!(IdempotencyStatus::Processing.to_string(), "processing");
        assert_eq!(IdempotencyStatus::Completed.to_string(), "completed");
        assert_eq!(IdempotencyStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_compute_request_hash() {
        let body = b"{\"amount\": \"100.00\"}";
        let hash = IdempotencyRepository::compute_request_hash(body);

        // Hash should be 64 hex characters (SHA-256)
        assert_eq!(hash.len(), 64);

        // Same input should produce same hash
        let hash2 = IdempotencyRepository::compute_request_hash(body);
        assert_eq!(hash, hash2);

        // Different input should produce different hash
        let hash3 = IdempotencyRepository::compute_request_hash(b"{\"amount\": \"200.00\"}");
        assert_ne!(hash, hash3);
    }

    #[test]
    fn test_idempotency_error_display() {
        let err = IdempotencyError::KeyInProgress;
        assert!(err.to_string().contains("being processed"));

        let err = IdempotencyError::HashMismatch("k-1".to_string());
        assert!(err.to_string().contains("hash mismatch"));

        let err = IdempotencyError::NotFound("k-2".to_string());
        assert!(err.to_string().contains("not found"));
    }
}
