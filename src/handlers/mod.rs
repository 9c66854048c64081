//! Command Handlers module
//!
//! Handlers orchestrate business operations: they validate commands,
//! wrap the credit engine in the idempotency guard, and shape results
//! for the boundary layer.

mod commands;
mod customer_handler;
mod release_handler;
mod reserve_handler;


pub use commands::*;
pub use customer_handler::CustomerHandler;
pub use release_handler::ReleaseHandler;
pub use reserve_handler::ReserveHandler;
