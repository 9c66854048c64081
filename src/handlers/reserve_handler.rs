//! Reserve Handler
//!
//! Wraps the credit engine's Reserve in the idempotency guard: a
//! completed record for (actor, key) short-circuits to the stored
//! decision; otherwise the reservation runs and its result is persisted
//! under the key strictly after the mutation commits.

use sqlx::PgPool;
use uuid::Uuid;

use crate::credit::{CreditDecision, CreditEngine};
use crate::domain::{Amount, DomainError, OperationContext};
use crate::error::AppError;
use crate::idempotency::{BeginOutcome, IdempotencyRepository};

use super::ReserveCommand;

/// Handler for credit reservations
pub struct ReserveHandler {
    engine: CreditEngine,
    idempotency: IdempotencyRepository,
}

impl ReserveHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            engine: CreditEngine::new(pool.clone()),
            idempotency: IdempotencyRepository::new(pool),
        }
    }

    /// Execute the reserve command.
    ///
    /// Returns the decision and whether it was replayed from a previous
    /// request with the same idempotency key.
    pub async fn execute(
        &self,
        command: ReserveCommand,
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

        // A missing key cannot deduplicate retries: a generated one-shot
        // key makes this request best-effort only.
        let (key, key_supplied) = match idempotency_key {
            Some(k) => (k, true),
            None => (format!("oneshot-{}", Uuid::new_v4()), false),
        };
        if !key_supplied {
            tracing::debug!(
                customer_id = %command.customer_id,
                "No idempotency key supplied; reservation is best-effort"
            );
        }

        let scope = reserve_scope(actor_id);
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
            .reserve(
                command.customer_id,
                &amount,
                command.override_requested,
                command.override_reason.as_deref(),
                actor_id,
                &key,
                context,
            )
            .await;

        match result {
            Ok(decision) => {
                let stored = serde_json::to_value(&decision)
                    .map_err(|e| AppError::Internal(e.to_string()))?;
                // The durable "this happened" record is written only after
                // the mutation's transaction committed
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

/// Idempotency scope for reservations, per actor
pub(crate) fn reserve_scope(actor_id: Uuid) -> String {
    format!("reserve:{}", actor_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_scope_is_per_actor() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_ne!(reserve_scope(a), reserve_scope(b));
        assert!(reserve_scope(a).starts_with("reserve:"));
    }
}
