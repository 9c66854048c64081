//! Reconciliation Service
//!
//! The cached `customers.outstanding` is a denormalized accelerator; the
//! journal is the source of truth. This service recomputes the balance
//! from journal rows, compares it against the cache, and flags drift as
//! audit events for operators to investigate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEventBuilder, AuditTrail};
use crate::customer::{CustomerError, CustomerRepository};
use crate::domain::OperationContext;
use crate::journal::{JournalError, JournalRepository};

/// Drift check result for one customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub customer_id: Uuid,
    pub cached_outstanding: Decimal,
    pub journal_outstanding: Decimal,
    /// cached minus recomputed; zero means the cache is consistent
    pub drift: Decimal,
}

impl DriftReport {
    pub fn is_drifting(&self) -> bool {
        self.drift != Decimal::ZERO
    }
}

/// Result of a full reconciliation sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub customers_checked: u64,
    pub drifting: Vec<DriftReport>,
    pub completed_at: DateTime<Utc>,
}

/// Reconciliation errors
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Customer not found: {0}")]
    CustomerNotFound(Uuid),

    #[error(transparent)]
    Customer(#[from] CustomerError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Recomputes cached balances from the journal and flags drift
#[derive(Debug, Clone)]
pub struct ReconciliationService {
    customers: CustomerRepository,
    journal: JournalRepository,
    audit: AuditTrail,
    pool: PgPool,
}

impl ReconciliationService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            customers: CustomerRepository::new(pool.clone()),
            journal: JournalRepository::new(pool.clone()),
            audit: AuditTrail::new(pool.clone()),
            pool,
        }
    }

    /// Check one customer's cached balance against the journal.
    /// Drift is flagged on the audit trail; the cache is not repaired
    /// automatically.
    pub async fn check_customer(
        &self,
        customer_id: Uuid,
        context: &OperationContext,
    ) -> Result<DriftReport, ReconcileError> {
        let customer = self
            .customers
            .get(customer_id)
            .await?
            .ok_or(ReconcileError::CustomerNotFound(customer_id))?;

        let journal_outstanding = self.journal.sum_for_customer(customer_id).await?;

        let report = DriftReport {
            customer_id,
            cached_outstanding: customer.outstanding,
            journal_outstanding,
            drift: customer.outstanding - journal_outstanding,
        };

        if report.is_drifting() {
            tracing::warn!(
                customer_id = %customer_id,
                cached = %report.cached_outstanding,
                recomputed = %report.journal_outstanding,
                "Cached outstanding drifts from journal"
            );

            let builder = AuditEventBuilder::new(AuditAction::DriftDetected)
                .entity_id(customer_id)
                .detail("cached_outstanding", report.cached_outstanding)
                .detail("journal_outstanding", report.journal_outstanding)
                .detail("drift", report.drift);
            self.audit.record_best_effort(builder, context).await;
        }

        Ok(report)
    }

    /// Sweep every customer and report those whose cache drifts
    pub async fn sweep(&self, context: &OperationContext) -> Result<SweepReport, ReconcileError> {
        let customer_ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM customers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut drifting = Vec::new();
        let checked = customer_ids.len() as u64;

        for id in customer_ids {
            let report = self.check_customer(id, context).await?;
            if report.is_drifting() {
                drifting.push(report);
            }
        }

        if !drifting.is_empty() {
            tracing::warn!(
                drifting = drifting.len(),
                checked = checked,
                "Reconciliation sweep found drifting customers"
            );
        }

        Ok(SweepReport {
            customers_checked: checked,
            drifting,
            completed_at: Utc::now(),
        })
    }
}
