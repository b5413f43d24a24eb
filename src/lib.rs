//! Item settlement and reconciliation engine.
//!
//! Wallet-identified users exchange items peer-to-peer, buy items for the ledger's native currency, and
//! record donations. The ledger is the irreversible source of truth for every settlement; the
//! ownership registry is a fast, mutable mirror that is brought in line after each ledger commit.
//! Divergence between the two is always reported and stored for retry, never hidden.

pub mod error;
pub mod join;
pub mod ledger;
pub mod pricing;
pub mod registry;
pub mod settlement;
pub mod types;
pub mod utils;

pub use error::SettlementError;
