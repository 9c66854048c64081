//! Transaction Journal module
//!
//! Append-only ledger of credit/debit movements; the reconciliation
//! source of truth for cached customer balances.

mod repository;

pub use repository::{EntryKind, JournalEntry, JournalError, JournalRepository, NewJournalEntry};
