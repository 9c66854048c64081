//! Command definitions
//!
//! Commands represent intentions to change the system state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command to create a new customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerCommand {
    pub customer_id: Uuid,
    pub name: String,
    pub limit_enabled: bool,
    /// Amount as string for precise decimals
    pub limit_amount: String,
    pub grace_amount: String,
    pub allow_override: bool,
}

impl CreateCustomerCommand {
    pub fn new(customer_id: Uuid, name: String) -> Self {
        Self {
            customer_id,
            name,
            limit_enabled: false,
            limit_amount: "0".to_string(),
            grace_amount: "0".to_string(),
            allow_override: false,
        }
    }

    pub fn with_limit(mut self, limit_amount: String, grace_amount: String) -> Self {
        self.limit_enabled = true;
        self.limit_amount = limit_amount;
        self.grace_amount = grace_amount;
        self
    }

    pub fn with_override_allowed(mut self) -> Self {
        self.allow_override = true;
        self
    }
}

/// Command to update a customer's credit-limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateLimitsCommand {
    pub limit_enabled: bool,
    pub limit_amount: String,
    pub grace_amount: String,
    pub allow_override: bool,
}

/// Command to reserve credit against a customer's limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveCommand {
    pub customer_id: Uuid,
    /// Amount to reserve (as string for precise decimals)
    pub amount: String,
    /// Bypass the limit check; requires a non-empty reason
    pub override_requested: bool,
    pub override_reason: Option<String>,
}

impl ReserveCommand {
    pub fn new(customer_id: Uuid, amount: String) -> Self {
        Self {
            customer_id,
            amount,
            override_requested: false,
            override_reason: None,
        }
    }

    pub fn with_override(mut self, reason: String) -> Self {
        self.override_requested = true;
        self.override_reason = Some(reason);
        self
    }
}

/// Command to release previously reserved credit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseCommand {
    pub customer_id: Uuid,
    /// Amount to release (as string for precise decimals)
    pub amount: String,
    /// Why the credit is given back: payment, rollback, adjustment
    pub reason: String,
}

impl ReleaseCommand {
    pub fn new(customer_id: Uuid, amount: String, reason: String) -> Self {
        Self {
            customer_id,
            amount,
            reason,
        }
    }
}
