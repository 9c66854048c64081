//! Customer module
//!
//! Customer records and the atomic balance primitives.

mod repository;

pub use repository::{BalanceChange, Customer, CustomerError, CustomerRepository, LimitSettings};
