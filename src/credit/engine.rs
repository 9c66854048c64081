//! Credit Engine
//!
//! Orchestrates Reserve and Release: validates input, runs the atomic
//! balance primitive and the journal append in one transaction, and
//! records the decision on the audit trail after commit.
//!
//! Audit writes on the success and blocked paths are best-effort: the
//! guard has already enforced the decision by the time audit runs, so an
//! audit failure can never flip a block into an approval.

use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEventBuilder, AuditTrail};
use crate::customer::{CustomerError, CustomerRepository};
use crate::domain::{Amount, DomainError, OperationContext};
use crate::journal::{EntryKind, JournalError, JournalRepository, NewJournalEntry};

use super::{CreditDecision, DecisionCode, ReleaseReason};

/// Errors from the credit engine. A blocked reservation is not an error;
/// it comes back as a [`CreditDecision`] with `blocked = true`.
#[derive(Debug, thiserror::Error)]
pub enum CreditEngineError {
    #[error("Customer not found: {0}")]
    CustomerNotFound(Uuid),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Customer(#[from] CustomerError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The reservation/release core
#[derive(Debug, Clone)]
pub struct CreditEngine {
    customers: CustomerRepository,
    journal: JournalRepository,
    audit: AuditTrail,
    pool: PgPool,
}

impl CreditEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            customers: CustomerRepository::new(pool.clone()),
            journal: JournalRepository::new(pool.clone()),
            audit: AuditTrail::new(pool.clone()),
            pool,
        }
    }

    /// Reserve credit against a customer's limit.
    ///
    /// The guard (limit + grace, override policy) and the increment run
    /// as one storage statement; concurrent reservations on the same
    /// customer are totally ordered by the row lock, so exactly one of
    /// them observes any given would-breach transition. The journal row
    /// commits in the same transaction as the increment.
    pub async fn reserve(
        &self,
        customer_id: Uuid,
        amount: &Amount,
        override_requested: bool,
        override_reason: Option<&str>,
        actor_id: Uuid,
        idempotency_key: &str,
        context: &OperationContext,
    ) -> Result<CreditDecision, CreditEngineError> {
        // Validation happens before any storage call
        if override_requested && !matches!(override_reason, Some(r) if !r.trim().is_empty()) {
            return Err(DomainError::MissingOverrideReason.into());
        }

        let mut tx = self.pool.begin().await?;

        let change = self
            .customers
            .try_reserve(&mut tx, customer_id, amount, override_requested)
            .await?;

        let Some(change) = change else {
            tx.rollback().await?;
            return self
                .blocked_or_not_found(customer_id, amount, override_requested, context)
                .await;
        };

        let metadata = json!({
            "override": override_requested,
            "override_reason": override_reason,
        });
        let entry = NewJournalEntry {
            actor_id,
            customer_id,
            kind: EntryKind::Credit,
            amount: amount.value(),
            idempotency_key: idempotency_key.to_string(),
            metadata,
        };

        let Some(_row) = self.journal.insert(&mut tx, &entry).await? else {
            // Lost the duplicate-create race: a row for this (actor, key)
            // already exists. Roll back the increment and return the
            // winner's outcome.
            tx.rollback().await?;
            return self.replay_existing(customer_id, actor_id, idempotency_key).await;
        };

        tx.commit().await?;

        let customer = change.customer.clone();
        let code = if customer.limit_enabled && customer.outstanding > customer.threshold() {
            DecisionCode::OverrideUsed
        } else {
            DecisionCode::Passed
        };

        let action = match code {
            DecisionCode::OverrideUsed => AuditAction::OverrideUsed,
            _ => AuditAction::ReservePassed,
        };
        let mut builder = AuditEventBuilder::new(action)
            .entity_id(customer_id)
            .balances(change.before, change.after())
            .detail("amount", amount.value())
            .detail("code", code.as_str())
            .detail("idempotency_key", idempotency_key);
        if let Some(reason) = override_reason {
            builder = builder.detail("override_reason", reason);
        }
        self.audit.record_best_effort(builder, context).await;

        Ok(CreditDecision::approved(customer, code))
    }

    /// Release previously reserved credit.
    ///
    /// Releases never fail for business reasons: an over-release clamps
    /// the balance at zero, emits one ANOMALY audit event, and still
    /// reports success so callers can retry safely.
    pub async fn release(
        &self,
        customer_id: Uuid,
        amount: &Amount,
        reason: ReleaseReason,
        actor_id: Uuid,
        idempotency_key: &str,
        context: &OperationContext,
    ) -> Result<CreditDecision, CreditEngineError> {
        let mut tx = self.pool.begin().await?;

        let change = self
            .customers
            .release_clamped(&mut tx, customer_id, amount)
            .await?;

        let Some(change) = change else {
            tx.rollback().await?;
            return Err(CreditEngineError::CustomerNotFound(customer_id));
        };

        let clamped = change.clamped_by(amount);

        let metadata = json!({
            "reason": reason.as_str(),
            "clamped": clamped,
        });
        let entry = NewJournalEntry {
            actor_id,
            customer_id,
            kind: EntryKind::Debit,
            amount: amount.value(),
            idempotency_key: idempotency_key.to_string(),
            metadata,
        };

        let Some(_row) = self.journal.insert(&mut tx, &entry).await? else {
            // A release under an already-used key is a benign retry:
            // undo the decrement and return the stored outcome. No
            // anomaly is recorded for this path.
            tx.rollback().await?;
            return self.replay_existing(customer_id, actor_id, idempotency_key).await;
        };

        tx.commit().await?;

        let customer = change.customer.clone();
        let code = if clamped {
            DecisionCode::Anomaly
        } else {
            DecisionCode::Passed
        };

        let action = if clamped {
            AuditAction::ReleaseAnomaly
        } else {
            AuditAction::ReleaseApplied
        };
        let builder = AuditEventBuilder::new(action)
            .entity_id(customer_id)
            .balances(change.before, change.after())
            .detail("amount", amount.value())
            .detail("reason", reason.as_str())
            .detail("code", code.as_str())
            .detail("idempotency_key", idempotency_key);

        if clamped {
            tracing::warn!(
                customer_id = %customer_id,
                amount = %amount,
                outstanding_before = %change.before,
                "Over-release clamped to zero"
            );
        }
        self.audit.record_best_effort(builder, context).await;

        Ok(CreditDecision::approved(customer, code))
    }

    /// A reservation UPDATE matched no row: either the customer is
    /// missing (NotFound) or the guard declined. Re-fetch to tell the
    /// two apart and assemble blocked diagnostics.
    async fn blocked_or_not_found(
        &self,
        customer_id: Uuid,
        amount: &Amount,
        override_requested: bool,
        context: &OperationContext,
    ) -> Result<CreditDecision, CreditEngineError> {
        let customer = self
            .customers
            .get(customer_id)
            .await?
            .ok_or(CreditEngineError::CustomerNotFound(customer_id))?;

        let builder = AuditEventBuilder::new(AuditAction::ReserveBlocked)
            .entity_id(customer_id)
            .balances(customer.outstanding, customer.outstanding)
            .detail("amount", amount.value())
            .detail("code", DecisionCode::Blocked.as_str())
            .detail("override_requested", override_requested)
            .detail("threshold", customer.threshold());
        self.audit.record_best_effort(builder, context).await;

        Ok(CreditDecision::blocked(customer))
    }

    /// Return the outcome already stored for `(actor, key)` after losing
    /// a duplicate-create race. The journal row is the durable record of
    /// the first application; the replay applies nothing.
    async fn replay_existing(
        &self,
        customer_id: Uuid,
        actor_id: Uuid,
        idempotency_key: &str,
    ) -> Result<CreditDecision, CreditEngineError> {
        let entry = self
            .journal
            .get_by_key(actor_id, idempotency_key)
            .await?
            .ok_or_else(|| {
                CreditEngineError::Internal(format!(
                    "journal row vanished for key {}",
                    idempotency_key
                ))
            })?;

        let customer = self
            .customers
            .get(customer_id)
            .await?
            .ok_or(CreditEngineError::CustomerNotFound(customer_id))?;

        tracing::debug!(
            customer_id = %customer_id,
            idempotency_key = %idempotency_key,
            journal_id = %entry.id,
            "Duplicate journal key; returning existing row"
        );

        Ok(CreditDecision::approved(customer, DecisionCode::Passed))
    }
}
