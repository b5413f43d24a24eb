//! Ledger integration module
//!
//! This module provides the typed call/query surface over the external settlement ledger: the
//! `LedgerClient` trait, the HTTP gateway client, an in-process ledger, and the validated record types.
//! The ledger is the source of truth for exchange status and for every irreversible settlement step.

/// Trait and HTTP gateway client for the ledger surface
mod client;
/// In-process ledger with the same surface
pub mod memory;
/// Type definitions for ledger records and errors
mod types;

pub use client::{HttpLedgerClient, LedgerClient, RetryConfig, TradeSubmission};
pub use memory::{InMemoryLedger, InjectedFailure};
pub use types::*;
