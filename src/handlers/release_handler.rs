//! Release Handler
//!
//! Wraps the credit engine's Release in the idempotency guard. A retried
//! release under the same key replays the stored outcome instead of
//! decrementing twice, which is what keeps the rollback contract safe to
//! retry.

use sqlx::PgPool;
use uuid::Uuid;

use crate::credit::{CreditDecision, CreditEngine, ReleaseReason};
use crate::domain::{Amount, DomainError, OperationContext};
use crate::error::AppError;
use crate::idempotency::{BeginOutcome, IdempotencyRepository};

use super::ReleaseCommand;

/// Handler for credit releases
pub struct ReleaseHandler {
    engine: CreditEngine,
    idempotency: IdempotencyRepository,
}

impl ReleaseHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            engine: CreditEngine::new(pool.clone()),
            idempotency: IdempotencyRepository::new(pool),
        }
    }

    /// Execute the release command.
    ///
    /// Returns the decision and whether it was replayed from a previous
    /// request with the same idempotency key.
    pub async fn execute(
        &self,
        command: ReleaseCommand,
        idempotency_key: Option<String>,
        context: &OperationContext,
    ) -> Result<(CreditDecision, bool), AppError> {
        let actor_id = context
            .actor_id
            .ok_or_else(|| AppError::MissingHeader("X-Actor-Id".to_string()))?;

        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e: crate::domain::AmountError| {
                AppError::Domain(DomainError::InvalidAmount(e.to_string()))
            })?;

        let reason: ReleaseReason = command
            .reason
            .parse()
            .map_err(|e: String| AppError::InvalidRequest(e))?;

        let (key, key_supplied) = match idempotency_key {
            Some(k) => (k, true),
            None => (format!("oneshot-{}", Uuid::new_v4()), false),
        };
        if !key_supplied {
            tracing::debug!(
                customer_id = %command.customer_id,
                "No idempotency key supplied; release is best-effort"
            );
        }

        let scope = release_scope(actor_id);
        let body = serde_json::to_vec(&command)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let request_hash = IdempotencyRepository::compute_request_hash(&body);

        match self.idempotency.begin(&scope, &key, &request_hash).await? {
            BeginOutcome::Replayed(record) => {
                let stored = record
                    .response_body
                    .ok_or_else(|| AppError::Internal("completed key without response".to_string()))?;
                let decision: CreditDecision = serde_json::from_value(stored)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                return Ok((decision, true));
            }
            BeginOutcome::Started => {}
        }

        let result = self
            .engine
            .release(command.customer_id, &amount, reason, actor_id, &key, context)
            .await;

        match result {
            Ok(decision) => {
                let stored = serde_json::to_value(&decision)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                self.idempotency.complete(&scope, &key, 200, stored).await?;
                Ok((decision, false))
            }
            Err(e) => {
                if let Err(mark) = self.idempotency.fail(&scope, &key, None, None).await {
                    tracing::warn!(error = %mark, "Failed to mark idempotency key as failed");
                }
                Err(e.into())
            }
        }
    }
}

/// Idempotency scope for releases, per actor
pub(crate) fn release_scope(actor_id: Uuid) -> String {
    format!("release:{}", actor_id)
}
