//! Credit decisions
//!
//! Decision codes, the structured result returned to callers, and the
//! pure guard evaluation. The storage layer enforces the guard inside a
//! single UPDATE; `evaluate` is the same rule as plain code, used for
//! blocked-path diagnostics and unit testing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::customer::Customer;
use crate::domain::Amount;

/// Outcome code of a credit decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionCode {
    Passed,
    Blocked,
    OverrideUsed,
    Anomaly,
}

impl DecisionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionCode::Passed => "PASSED",
            DecisionCode::Blocked => "BLOCKED",
            DecisionCode::OverrideUsed => "OVERRIDE_USED",
            DecisionCode::Anomaly => "ANOMALY",
        }
    }
}

impl std::fmt::Display for DecisionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why credit is being released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// Customer paid down their balance
    Payment,
    /// Compensation for a failed dependent write after a reservation
    Rollback,
    /// Manual correction by an operator
    Adjustment,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseReason::Payment => "payment",
            ReleaseReason::Rollback => "rollback",
            ReleaseReason::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReleaseReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payment" => Ok(ReleaseReason::Payment),
            "rollback" => Ok(ReleaseReason::Rollback),
            "adjustment" => Ok(ReleaseReason::Adjustment),
            other => Err(format!("unknown release reason: {}", other)),
        }
    }
}

/// Diagnostics attached to every decision so a caller can explain a
/// refusal and what an override would take
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditDetails {
    pub limit_amount: Decimal,
    pub grace_amount: Decimal,
    pub threshold: Decimal,
    pub current_outstanding: Decimal,
    /// Remaining room under the threshold, floored at zero
    pub headroom: Decimal,
    pub code: DecisionCode,
}

impl CreditDetails {
    /// Build details from a customer's current state
    pub fn for_customer(customer: &Customer, code: DecisionCode) -> Self {
        let threshold = customer.threshold();
        let headroom = (threshold - customer.outstanding).max(Decimal::ZERO);
        Self {
            limit_amount: customer.limit_amount,
            grace_amount: customer.grace_amount,
            threshold,
            current_outstanding: customer.outstanding,
            headroom,
            code,
        }
    }
}

/// The structured result of a Reserve or Release operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditDecision {
    pub success: bool,
    pub blocked: bool,
    /// Customer state after the operation (unchanged when blocked)
    pub customer: Customer,
    pub details: CreditDetails,
}

impl CreditDecision {
    pub fn approved(customer: Customer, code: DecisionCode) -> Self {
        let details = CreditDetails::for_customer(&customer, code);
        Self {
            success: true,
            blocked: false,
            customer,
            details,
        }
    }

    pub fn blocked(customer: Customer) -> Self {
        let details = CreditDetails::for_customer(&customer, DecisionCode::Blocked);
        Self {
            success: false,
            blocked: true,
            customer,
            details,
        }
    }
}

/// Pure form of the reservation guard. Mirrors the SQL predicate in
/// `CustomerRepository::try_reserve`: a disabled limit always passes, a
/// projection within limit + grace passes, and an override only counts
/// when the customer permits it.
pub fn evaluate(customer: &Customer, amount: &Amount, override_requested: bool) -> DecisionCode {
    if !customer.limit_enabled {
        return DecisionCode::Passed;
    }

    let projected = customer.outstanding + amount.value();
    if projected <= customer.threshold() {
        return DecisionCode::Passed;
    }

    if override_requested && customer.allow_override {
        return DecisionCode::OverrideUsed;
    }

    DecisionCode::Blocked
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn customer(outstanding: i64, limit: i64, grace: i64) -> Customer {
        Customer {
            id: Uuid::new_v4(),
            name: "test".to_string(),
            outstanding: Decimal::new(outstanding, 0),
            limit_enabled: true,
            limit_amount: Decimal::new(limit, 0),
            grace_amount: Decimal::new(grace, 0),
            allow_override: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_decision_code_as_str() {
        assert_eq!(DecisionCode::Passed.as_str(), "PASSED");
        assert_eq!(DecisionCode::Blocked.as_str(), "BLOCKED");
        assert_eq!(DecisionCode::OverrideUsed.as_str(), "OVERRIDE_USED");
        assert_eq!(DecisionCode::Anomaly.as_str(), "ANOMALY");
    }

    #[test]
    fn test_release_reason_round_trip() {
        for reason in [
            ReleaseReason::Payment,
            ReleaseReason::Rollback,
            ReleaseReason::Adjustment,
        ] {
            let parsed: ReleaseReason = reason.as_str().parse().unwrap();
            assert_eq!(parsed, reason);
        }

        assert!("refund".parse::<ReleaseReason>().is_err());
    }

    #[test]
    fn test_evaluate_within_threshold_passes() {
        let c = customer(900, 1000, 0);
        let amount = Amount::from_str("100").unwrap();
        assert_eq!(evaluate(&c, &amount, false), DecisionCode::Passed);
    }

    #[test]
    fn test_evaluate_breach_blocks() {
        // Scenario A without override: 900 + 200 > 1000
        let c = customer(900, 1000, 0);
        let amount = Amount::from_str("200").unwrap();
        assert_eq!(evaluate(&c, &amount, false), DecisionCode::Blocked);
    }

    #[test]
    fn test_evaluate_grace_extends_threshold() {
        let c = customer(900, 1000, 150);
        let amount = Amount::from_str("200").unwrap();
        assert_eq!(evaluate(&c, &amount, false), DecisionCode::Passed);
    }

    #[test]
    fn test_evaluate_override_bypasses_block() {
        // Scenario A with override: succeeds past the threshold
        let c = customer(900, 1000, 0);
        let amount = Amount::from_str("200").unwrap();
        assert_eq!(evaluate(&c, &amount, true), DecisionCode::OverrideUsed);
    }

    #[test]
    fn test_evaluate_override_not_counted_when_unneeded() {
        // Override requested but projection is within threshold
        let c = customer(100, 1000, 0);
        let amount = Amount::from_str("100").unwrap();
        assert_eq!(evaluate(&c, &amount, true), DecisionCode::Passed);
    }

    #[test]
    fn test_evaluate_override_denied_by_customer_policy() {
        let mut c = customer(900, 1000, 0);
        c.allow_override = false;
        let amount = Amount::from_str("200").unwrap();
        assert_eq!(evaluate(&c, &amount, true), DecisionCode::Blocked);
    }

    #[test]
    fn test_evaluate_disabled_limit_always_passes() {
        let mut c = customer(900, 10, 0);
        c.limit_enabled = false;
        let amount = Amount::from_str("5000").unwrap();
        assert_eq!(evaluate(&c, &amount, false), DecisionCode::Passed);
    }

    #[test]
    fn test_details_headroom() {
        let c = customer(900, 1000, 0);
        let details = CreditDetails::for_customer(&c, DecisionCode::Blocked);
        assert_eq!(details.threshold, Decimal::new(1000, 0));
        assert_eq!(details.headroom, Decimal::new(100, 0));
    }

    #[test]
    fn test_details_headroom_floors_at_zero() {
        // Outstanding pushed past threshold by an earlier override
        let c = customer(1100, 1000, 0);
        let details = CreditDetails::for_customer(&c, DecisionCode::Passed);
        assert_eq!(details.headroom, Decimal::ZERO);
    }

    #[test]
    fn test_blocked_decision_shape() {
        let c = customer(900, 1000, 0);
        let decision = CreditDecision::blocked(c);
        assert!(!decision.success);
        assert!(decision.blocked);
        assert_eq!(decision.details.code, DecisionCode::Blocked);
    }
}
