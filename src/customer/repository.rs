//! Customer Repository
//!
//! Customer rows hold the cached running balance (`outstanding`) together
//! with the credit-limit configuration. The balance is mutated only
//! through the two atomic primitives in this file: a guarded increment
//! and a clamped decrement. Each is a single UPDATE statement that locks
//! the row, evaluates the guard server-side, and returns the prior value
//! alongside the updated row. Application code never does
//! read-compare-write on `outstanding`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::Amount;

/// A customer with credit-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    /// Cached running balance; always >= 0, re-derivable from the journal
    pub outstanding: Decimal,
    pub limit_enabled: bool,
    pub limit_amount: Decimal,
    pub grace_amount: Decimal,
    pub allow_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    /// The blocking threshold: limit plus grace
    pub fn threshold(&self) -> Decimal {
        self.limit_amount + self.grace_amount
    }
}

/// Credit-limit configuration for create/update operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    pub limit_enabled: bool,
    pub limit_amount: Decimal,
    pub grace_amount: Decimal,
    pub allow_override: bool,
}

/// Result of an atomic balance mutation: the outstanding before the
/// update and the customer row after it
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub before: Decimal,
    pub customer: Customer,
}

impl BalanceChange {
    pub fn after(&self) -> Decimal {
        self.customer.outstanding
    }

    /// A release clamped iff the unclamped result would have been negative
    pub fn clamped_by(&self, amount: &Amount) -> bool {
        self.before - amount.value() < Decimal::ZERO
    }
}

/// Customer repository errors
#[derive(Debug, thiserror::Error)]
pub enum CustomerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Customer not found: {0}")]
    NotFound(Uuid),

    #[error("Customer already exists: {0}")]
    AlreadyExists(Uuid),
}

/// Repository for customer rows
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: PgPool,
}

type CustomerRow = (
    Uuid,
    String,
    Decimal,
    bool,
    Decimal,
    Decimal,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

type ChangeRow = (
    Decimal,
    Uuid,
    String,
    Decimal,
    bool,
    Decimal,
    Decimal,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn row_to_customer(row: CustomerRow) -> Customer {
    let (
        id,
        name,
        outstanding,
        limit_enabled,
        limit_amount,
        grace_amount,
        allow_override,
        created_at,
        updated_at,
    ) = row;
    Customer {
        id,
        name,
        outstanding,
        limit_enabled,
        limit_amount,
        grace_amount,
        allow_override,
        created_at,
        updated_at,
    }
}

fn row_to_change(row: ChangeRow) -> BalanceChange {
    let (before, id, name, outstanding, limit_enabled, limit_amount, grace_amount, allow_override, created_at, updated_at) =
        row;
    BalanceChange {
        before,
        customer: row_to_customer((
            id,
            name,
            outstanding,
            limit_enabled,
            limit_amount,
            grace_amount,
            allow_override,
            created_at,
            updated_at,
        )),
    }
}

impl CustomerRepository {
    /// Create a new CustomerRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a customer with an initial outstanding of zero
    pub async fn create(
        &self,
        id: Uuid,
        name: &str,
        settings: &LimitSettings,
    ) -> Result<Customer, CustomerError> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            INSERT INTO customers (
                id, name, outstanding,
                limit_enabled, limit_amount, grace_amount, allow_override
            )
            VALUES ($1, $2, 0, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, name, outstanding,
                      limit_enabled, limit_amount, grace_amount, allow_override,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(settings.limit_enabled)
        .bind(settings.limit_amount)
        .bind(settings.grace_amount)
        .bind(settings.allow_override)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_customer)
            .ok_or(CustomerError::AlreadyExists(id))
    }

    /// Get a customer by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<Customer>, CustomerError> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            SELECT id, name, outstanding,
                   limit_enabled, limit_amount, grace_amount, allow_override,
                   created_at, updated_at
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_customer))
    }

    /// Replace a customer's credit-limit configuration
    pub async fn update_limits(
        &self,
        id: Uuid,
        settings: &LimitSettings,
    ) -> Result<Customer, CustomerError> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            UPDATE customers
            SET limit_enabled = $2,
                limit_amount = $3,
                grace_amount = $4,
                allow_override = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, outstanding,
                      limit_enabled, limit_amount, grace_amount, allow_override,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(settings.limit_enabled)
        .bind(settings.limit_amount)
        .bind(settings.grace_amount)
        .bind(settings.allow_override)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_customer).ok_or(CustomerError::NotFound(id))
    }

    /// Atomically reserve credit: increment `outstanding` by `amount` iff
    /// the guard passes. The guard and the increment execute as one
    /// statement, so no other writer can interleave between check and
    /// mutate. Passes when the limit is disabled, when the override flag
    /// is set and the customer allows overrides, or when the projected
    /// balance stays within limit + grace.
    ///
    /// Returns `None` when no row was updated: the customer is missing
    /// or the reservation is blocked; the caller re-fetches to tell the
    /// two apart.
    pub async fn try_reserve(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        amount: &Amount,
        use_override: bool,
    ) -> Result<Option<BalanceChange>, CustomerError> {
        let row: Option<ChangeRow> = sqlx::query_as(
            r#"
            UPDATE customers AS c
            SET outstanding = c.outstanding + $2,
                updated_at = NOW()
            FROM (
                SELECT id, outstanding FROM customers WHERE id = $1 FOR UPDATE
            ) AS prev
            WHERE c.id = prev.id
              AND (
                    NOT c.limit_enabled
                    OR ($3 AND c.allow_override)
                    OR c.outstanding + $2 <= c.limit_amount + c.grace_amount
              )
            RETURNING prev.outstanding,
                      c.id, c.name, c.outstanding,
                      c.limit_enabled, c.limit_amount, c.grace_amount, c.allow_override,
                      c.created_at, c.updated_at
            "#,
        )
        .bind(id)
        .bind(amount.value())
        .bind(use_override)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(row_to_change))
    }

    /// Atomically release credit: decrement `outstanding` by `amount`,
    /// floored at zero. Never fails on an over-release; the caller
    /// detects clamping from the returned change and records the anomaly.
    ///
    /// Returns `None` when the customer does not exist.
    pub async fn release_clamped(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        amount: &Amount,
    ) -> Result<Option<BalanceChange>, CustomerError> {
        let row: Option<ChangeRow> = sqlx::query_as(
            r#"
            UPDATE customers AS c
            SET outstanding = GREATEST(c.outstanding - $2, 0),
                updated_at = NOW()
            FROM (
                SELECT id, outstanding FROM customers WHERE id = $1 FOR UPDATE
            ) AS prev
            WHERE c.id = prev.id
            RETURNING prev.outstanding,
                      c.id, c.name, c.outstanding,
                      c.limit_enabled, c.limit_amount, c.grace_amount, c.allow_override,
                      c.created_at, c.updated_at
            "#,
        )
        .bind(id)
        .bind(amount.value())
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(row_to_change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn customer_with_outstanding(outstanding: Decimal) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            name: "acme".to_string(),
            outstanding,
            limit_enabled: true,
            limit_amount: Decimal::new(1000, 0),
            grace_amount: Decimal::new(50, 0),
            allow_override: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_threshold() {
        let customer = customer_with_outstanding(Decimal::ZERO);
        assert_eq!(customer.threshold(), Decimal::new(1050, 0));
    }

    #[test]
    fn test_balance_change_clamped_by() {
        let amount = Amount::from_str("100").unwrap();

        let clamped = BalanceChange {
            before: Decimal::new(50, 0),
            customer: customer_with_outstanding(Decimal::ZERO),
        };
        assert!(clamped.clamped_by(&amount));

        let exact = BalanceChange {
            before: Decimal::new(100, 0),
            customer: customer_with_outstanding(Decimal::ZERO),
        };
        assert!(!exact.clamped_by(&amount));
        assert_eq!(exact.after(), Decimal::ZERO);
    }
}
