//!
//! Utility module for the settlement engine.
//!
//! Re-exports amount formatting helpers and random identifier generation used by the in-memory
//! collaborators.
/// Utility functions for formatting and display
pub mod format;

pub use format::format_token_amount;

use rand::Rng;

/// Random 32 bytes, used for synthetic transaction hashes.
pub fn random_bytes32() -> [u8; 32] {
	let mut bytes = [0u8; 32];
	rand::rng().fill(&mut bytes);
	bytes
}

/// Random 24-character hex identifier in the shape of a document-store object id.
pub fn random_object_id() -> String {
	let mut bytes = [0u8; 12];
	rand::rng().fill(&mut bytes);
	hex::encode(bytes)
}
