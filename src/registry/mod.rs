//! Ownership registry module
//!
//! The registry is the off-chain, mutable store of items, their current owners, and users. It backs
//! browsing and ownership lookups, and receives ownership changes only after the ledger has confirmed
//! them. Writes are single-item; the conditional `set_owner` guards against racing settlements.

/// HTTP client for the registry service
pub mod http;
/// In-memory registry
pub mod memory;
/// The registry trait
mod repository;
/// Item, user and error types
mod types;

pub use http::HttpRegistryClient;
pub use memory::InMemoryRegistry;
pub use repository::OwnershipRegistry;
pub use types::*;
