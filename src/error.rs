use crate::ledger::{ExchangeStatus, LedgerError};
use crate::pricing::PriceFeedError;
use crate::registry::RegistryError;
use crate::types::{ExchangeId, ItemId, ParseIdError, WalletAddress};

/// Error types for settlement operations.
///
/// Returned only when nothing was committed, or when the committed state is already final. Work left
/// half-done after a ledger commit is reported as an outcome, never as an error.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
	#[error("Validation error: {0}")]
	Validation(String),

	#[error("{kind} not found: {id}")]
	NotFound { kind: &'static str, id: String },

	#[error("Exchange {exchange_id} is already {status}")]
	AlreadyResolved {
		exchange_id: ExchangeId,
		status: ExchangeStatus,
	},

	#[error("Offer is stale: item {item_id} {reason}")]
	StaleOffer { item_id: ItemId, reason: String },

	#[error("Ownership conflict on item {item_id}: expected {expected}, found {actual}")]
	Conflict {
		item_id: ItemId,
		expected: WalletAddress,
		actual: WalletAddress,
	},

	#[error("{caller} is not the counterparty of exchange {exchange_id}")]
	NotCounterparty {
		exchange_id: ExchangeId,
		caller: WalletAddress,
	},

	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Registry error: {0}")]
	Registry(RegistryError),

	#[error("Price feed error: {0}")]
	PriceFeed(#[from] PriceFeedError),

	#[error("Persistence error: {0}")]
	Persistence(String),
}

impl SettlementError {
	pub fn exchange_not_found(exchange_id: ExchangeId) -> Self {
		SettlementError::NotFound {
			kind: "exchange",
			id: exchange_id.to_string(),
		}
	}
}

impl From<RegistryError> for SettlementError {
	fn from(err: RegistryError) -> Self {
		match err {
			RegistryError::NotFound { kind, id } => SettlementError::NotFound { kind, id },
			RegistryError::Conflict {
				item_id,
				expected,
				actual,
			} => SettlementError::Conflict {
				item_id,
				expected,
				actual,
			},
			RegistryError::Validation(reason) => SettlementError::Validation(reason),
			other => SettlementError::Registry(other),
		}
	}
}

impl From<ParseIdError> for SettlementError {
	fn from(err: ParseIdError) -> Self {
		SettlementError::Validation(err.to_string())
	}
}

impl From<std::io::Error> for SettlementError {
	fn from(err: std::io::Error) -> Self {
		SettlementError::Persistence(err.to_string())
	}
}
