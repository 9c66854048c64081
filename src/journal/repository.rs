//! Transaction Journal Repository
//!
//! One immutable row per credit/debit movement, unique per
//! `(actor_id, idempotency_key)`. Rows are write-once: there is no update
//! path, and duplicate create attempts resolve to the existing row via
//! the unique index rather than surfacing an error.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Direction of a journal movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Outstanding increased (reservation)
    Credit,
    /// Outstanding decreased (release)
    Debit,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Credit => "credit",
            EntryKind::Debit => "debit",
        }
    }
}

impl From<String> for EntryKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "debit" => EntryKind::Debit,
            _ => EntryKind::Credit,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted journal row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub customer_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A journal row to be appended
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub actor_id: Uuid,
    pub customer_id: Uuid,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub idempotency_key: String,
    pub metadata: serde_json::Value,
}

/// Journal repository errors
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for append-only journal rows
#[derive(Debug, Clone)]
pub struct JournalRepository {
    pool: PgPool,
}

type JournalRow = (
    Uuid,
    Uuid,
    Uuid,
    String,
    Decimal,
    String,
    serde_json::Value,
    DateTime<Utc>,
);

fn row_to_entry(row: JournalRow) -> JournalEntry {
    let (id, actor_id, customer_id, kind, amount, idempotency_key, metadata, created_at) = row;
    JournalEntry {
        id,
        actor_id,
        customer_id,
        kind: EntryKind::from(kind),
        amount,
        idempotency_key,
        metadata,
        created_at,
    }
}

impl JournalRepository {
    /// Create a new JournalRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a row inside an open transaction.
    ///
    /// Returns `None` when a row for `(actor_id, idempotency_key)`
    /// already exists; the unique index decides the winner of a
    /// duplicate-create race; the loser rolls back its transaction and
    /// re-fetches via [`get_by_key`](Self::get_by_key).
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        entry: &NewJournalEntry,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let row: Option<JournalRow> = sqlx::query_as(
            r#"
            INSERT INTO journal_entries (
                actor_id, customer_id, kind, amount, idempotency_key, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (actor_id, idempotency_key) DO NOTHING
            RETURNING id, actor_id, customer_id, kind, amount,
                      idempotency_key, metadata, created_at
            "#,
        )
        .bind(entry.actor_id)
        .bind(entry.customer_id)
        .bind(entry.kind.as_str())
        .bind(entry.amount)
        .bind(&entry.idempotency_key)
        .bind(&entry.metadata)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(row_to_entry))
    }

    /// Fetch the row stored under `(actor_id, idempotency_key)`
    pub async fn get_by_key(
        &self,
        actor_id: Uuid,
        idempotency_key: &str,
    ) -> Result<Option<JournalEntry>, JournalError> {
        let row: Option<JournalRow> = sqlx::query_as(
            r#"
            SELECT id, actor_id, customer_id, kind, amount,
                   idempotency_key, metadata, created_at
            FROM journal_entries
            WHERE actor_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(actor_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_entry))
    }

    /// List recent movements for a customer, newest first
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<JournalEntry>, JournalError> {
        let rows: Vec<JournalRow> = sqlx::query_as(
            r#"
            SELECT id, actor_id, customer_id, kind, amount,
                   idempotency_key, metadata, created_at
            FROM journal_entries
            WHERE customer_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(customer_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    /// Recompute a customer's outstanding from the journal:
    /// sum of credits minus sum of debits, floored at zero to mirror
    /// clamped releases.
    pub async fn sum_for_customer(&self, customer_id: Uuid) -> Result<Decimal, JournalError> {
        let sum: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(CASE WHEN kind = 'credit' THEN amount ELSE -amount END)
            FROM journal_entries
            WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(sum.unwrap_or(Decimal::ZERO).max(Decimal::ZERO))
    }
}
