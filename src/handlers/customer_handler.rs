//! Customer Handler
//!
//! Onboarding and credit-limit configuration changes.

use rust_decimal::Decimal;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEventBuilder, AuditTrail};
use crate::customer::{Customer, CustomerRepository, LimitSettings};
use crate::domain::OperationContext;
use crate::error::AppError;

use super::{CreateCustomerCommand, UpdateLimitsCommand};

/// Handler for customer onboarding and limit configuration
pub struct CustomerHandler {
    customers: CustomerRepository,
    audit: AuditTrail,
}

impl CustomerHandler {
    pub fn new(pool: PgPool) -> Self {
        Self {
            customers: CustomerRepository::new(pool.clone()),
            audit: AuditTrail::new(pool),
        }
    }

    /// Create a customer with an initial outstanding of zero
    pub async fn create(
        &self,
        command: CreateCustomerCommand,
        context: &OperationContext,
    ) -> Result<Customer, AppError> {
        let settings = LimitSettings {
            limit_enabled: command.limit_enabled,
            limit_amount: parse_limit_field(&command.limit_amount, "limit_amount")?,
            grace_amount: parse_limit_field(&command.grace_amount, "grace_amount")?,
            allow_override: command.allow_override,
        };

        if command.name.trim().is_empty() {
            return Err(AppError::InvalidRequest("name must not be empty".to_string()));
        }

        let customer = self
            .customers
            .create(command.customer_id, command.name.trim(), &settings)
            .await?;

        let builder = AuditEventBuilder::new(AuditAction::CustomerCreated)
            .entity_id(customer.id)
            .detail("name", &customer.name)
            .detail("limit_enabled", customer.limit_enabled)
            .detail("limit_amount", customer.limit_amount)
            .detail("grace_amount", customer.grace_amount)
            .detail("allow_override", customer.allow_override);
        self.audit.record_best_effort(builder, context).await;

        Ok(customer)
    }

    /// Get a customer by ID
    pub async fn get(&self, customer_id: Uuid) -> Result<Customer, AppError> {
        self.customers
            .get(customer_id)
            .await?
            .ok_or_else(|| AppError::CustomerNotFound(customer_id.to_string()))
    }

    /// Replace a customer's credit-limit configuration
    pub async fn update_limits(
        &self,
        customer_id: Uuid,
        command: UpdateLimitsCommand,
        context: &OperationContext,
    ) -> Result<Customer, AppError> {
        let settings = LimitSettings {
            limit_enabled: command.limit_enabled,
            limit_amount: parse_limit_field(&command.limit_amount, "limit_amount")?,
            grace_amount: parse_limit_field(&command.grace_amount, "grace_amount")?,
            allow_override: command.allow_override,
        };

        let before = self
            .customers
            .get(customer_id)
            .await?
            .ok_or_else(|| AppError::CustomerNotFound(customer_id.to_string()))?;

        let customer = self.customers.update_limits(customer_id, &settings).await?;

        let builder = AuditEventBuilder::new(AuditAction::LimitUpdated)
            .entity_id(customer_id)
            .detail("limit_enabled_before", before.limit_enabled)
            .detail("limit_amount_before", before.limit_amount)
            .detail("grace_amount_before", before.grace_amount)
            .detail("limit_enabled", customer.limit_enabled)
            .detail("limit_amount", customer.limit_amount)
            .detail("grace_amount", customer.grace_amount)
            .detail("allow_override", customer.allow_override);
        self.audit.record_best_effort(builder, context).await;

        Ok(customer)
    }
}

/// Limit configuration values are non-negative with at most two decimals
fn parse_limit_field(value: &str, field: &str) -> Result<Decimal, AppError> {
    let parsed = Decimal::from_str(value)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid {}: {}", field, e)))?;

    if parsed < Decimal::ZERO {
        return Err(AppError::InvalidRequest(format!(
            "{} must not be negative",
            field
        )));
    }
    if parsed.scale() > 2 {
        return Err(AppError::InvalidRequest(format!(
            "{} has too many decimal places",
            field
        )));
    }

    Ok(parsed)
}
