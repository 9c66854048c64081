//! Audit Trail Service
//!
//! Append-only record of every credit decision, keyed by request id for
//! tracing. Rows are never updated in place; they are consumed by the
//! reconciliation process and by operators explaining refusals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::OperationContext;

/// Persisted audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub entity_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub request_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    ReservePassed,
    ReserveBlocked,
    OverrideUsed,
    ReleaseApplied,
    ReleaseAnomaly,
    CustomerCreated,
    LimitUpdated,
    DriftDetected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ReservePassed => "credit.reserve_passed",
            AuditAction::ReserveBlocked => "credit.reserve_blocked",
            AuditAction::OverrideUsed => "credit.override_used",
            AuditAction::ReleaseApplied => "credit.release_applied",
            AuditAction::ReleaseAnomaly => "credit.release_anomaly",
            AuditAction::CustomerCreated => "customer.created",
            AuditAction::LimitUpdated => "customer.limit_updated",
            AuditAction::DriftDetected => "reconcile.drift_detected",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Builder for audit events
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
    action: String,
    entity_id: Option<Uuid>,
    metadata: serde_json::Map<String, serde_json::Value>,
}

impl AuditEventBuilder {
    /// Create a new audit event builder
    pub fn new(action: AuditAction) -> Self {
        Self {
            action: action.as_str().to_string(),
            entity_id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create with a custom action string
    pub fn custom(action: &str) -> Self {
        Self {
            action: action.to_string(),
            entity_id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the entity this event is about
    pub fn entity_id(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Record the balance before and after the decision
    pub fn balances(
        mut self,
        before: rust_decimal::Decimal,
        after: rust_decimal::Decimal,
    ) -> Self {
        self.metadata
            .insert("outstanding_before".to_string(), json!(before));
        self.metadata
            .insert("outstanding_after".to_string(), json!(after));
        self
    }

    /// Attach an arbitrary metadata field
    pub fn detail<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.metadata.insert(key.to_string(), v);
        }
        self
    }
}

/// Audit Trail Service
#[derive(Debug, Clone)]
pub struct AuditTrail {
    pool: PgPool,
}

type AuditRow = (
    Uuid,
    String,
    Option<Uuid>,
    Option<Uuid>,
    serde_json::Value,
    Option<Uuid>,
    DateTime<Utc>,
);

fn row_to_event(row: AuditRow) -> AuditEvent {
    let (id, action, actor_id, entity_id, metadata, request_id, created_at) = row;
    AuditEvent {
        id,
        action,
        actor_id,
        entity_id,
        metadata,
        request_id,
        created_at,
    }
}

impl AuditTrail {
    /// Create a new AuditTrail
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an audit event
    pub async fn record(
        &self,
        builder: AuditEventBuilder,
        context: &OperationContext,
    ) -> Result<Uuid, AuditError> {
        let id = Uuid::new_v4();

        let result: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO audit_events (id, action, actor_id, entity_id, metadata, request_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&builder.action)
        .bind(context.actor_id)
        .bind(builder.entity_id)
        .bind(serde_json::Value::Object(builder.metadata.clone()))
        .bind(context.request_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = %result.0,
            action = %builder.action,
            "Audit event recorded"
        );

        Ok(result.0)
    }

    /// Append an audit event without failing the calling operation.
    /// An audit write failure never flips a decision: a block already
    /// declined to mutate, and a committed mutation stays committed.
    pub async fn record_best_effort(
        &self,
        builder: AuditEventBuilder,
        context: &OperationContext,
    ) {
        let action = builder.action.clone();
        if let Err(e) = self.record(builder, context).await {
            tracing::warn!(
                action = %action,
                error = %e,
                "Audit write failed; decision already enforced"
            );
        }
    }

    /// Get recent audit events, newest first
    pub async fn get_recent(&self, limit: i64) -> Result<Vec<AuditEvent>, AuditError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, action, actor_id, entity_id, metadata, request_id, created_at
            FROM audit_events
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    /// Get audit events for a specific entity, newest first
    pub async fn get_by_entity(
        &self,
        entity_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, action, actor_id, entity_id, metadata, request_id, created_at
            FROM audit_events
            WHERE entity_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_event).collect())
    }
}

/// Audit errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
