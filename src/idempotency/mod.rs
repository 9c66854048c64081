//! Idempotency module
//!
//! Deduplicates mutating operations keyed by (actor scope, key).

mod repository;

pub use repository::{
    BeginOutcome, IdempotencyError, IdempotencyRecord, IdempotencyRepository, IdempotencyStatus,
};
