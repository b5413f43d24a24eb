//! Types for the ledger call/query surface
//!
//! Records come off the wire as loosely typed `Raw*Record` payloads and are validated into the tagged
//! `ExchangeEvent`, `TradeEvent` and `DonationEvent` variants before any other component sees them.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{ExchangeId, ItemId, NativeAmount, ParseIdError, TxHash, Usd, WalletAddress};

/// Exchange request status as stored by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ExchangeStatus {
	/// Created by the initiator, awaiting the counterparty
	Pending,
	/// Accepted by the counterparty (terminal)
	Confirmed,
	/// Declined by the counterparty (terminal)
	Rejected,
}

impl ExchangeStatus {
	/// Confirmed and Rejected never change again
	pub fn is_terminal(&self) -> bool {
		matches!(self, ExchangeStatus::Confirmed | ExchangeStatus::Rejected)
	}

	/// Wire encoding used by the ledger contract
	pub fn code(&self) -> u8 {
		match self {
			ExchangeStatus::Pending => 0,
			ExchangeStatus::Confirmed => 1,
			ExchangeStatus::Rejected => 2,
		}
	}
}

impl TryFrom<u8> for ExchangeStatus {
	type Error = LedgerError;

	fn try_from(code: u8) -> Result<Self, Self::Error> {
		match code {
			0 => Ok(ExchangeStatus::Pending),
			1 => Ok(ExchangeStatus::Confirmed),
			2 => Ok(ExchangeStatus::Rejected),
			other => Err(LedgerError::MalformedRecord {
				record: "exchange",
				reason: format!("unknown status code {}", other),
			}),
		}
	}
}

impl fmt::Display for ExchangeStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let label = match self {
			ExchangeStatus::Pending => "pending",
			ExchangeStatus::Confirmed => "confirmed",
			ExchangeStatus::Rejected => "rejected",
		};
		f.write_str(label)
	}
}

/// A validated exchange request record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeEvent {
	pub exchange_id: ExchangeId,
	pub initiator: WalletAddress,
	pub counterparty: WalletAddress,
	pub offered_item: ItemId,
	pub requested_item: ItemId,
	pub status: ExchangeStatus,
	/// Hash of the settling transaction, set by a follow-up call after confirm/reject
	pub transaction_hash: Option<TxHash>,
	pub created_at: DateTime<Utc>,
}

/// A validated purchase record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
	pub trade_id: u64,
	pub buyer: WalletAddress,
	pub seller: WalletAddress,
	pub item_id: ItemId,
	pub price_usd: Usd,
	pub price_native: NativeAmount,
	pub timestamp: DateTime<Utc>,
	/// Hash of the payment transfer this trade settles
	pub transaction_hash: TxHash,
}

/// A validated donation record. The USD figure is self-reported and never checked against `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationEvent {
	pub donation_id: u64,
	pub donor: WalletAddress,
	pub amount: NativeAmount,
	pub reported_usd: Usd,
	pub timestamp: DateTime<Utc>,
	pub transaction_hash: Option<TxHash>,
}

/// Exchange record as returned by the ledger gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExchangeRecord {
	pub exchange_id: u64,
	pub user_1_wallet: String,
	pub user_2_wallet: String,
	pub item_1_id: String,
	pub item_2_id: String,
	/// Seconds since the epoch
	pub timestamp: i64,
	/// Empty until `updateTransactionHash` runs
	#[serde(default)]
	pub transaction_hash: String,
	pub status: u8,
}

/// Trade record as returned by the ledger gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTradeRecord {
	pub trade_id: u64,
	pub buyer: String,
	pub seller: String,
	pub item_id: String,
	pub price_usd_cents: u64,
	pub price_native: NativeAmount,
	pub timestamp: i64,
	pub transaction_hash: String,
}

/// Donation record as returned by the ledger gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDonationRecord {
	pub donation_id: u64,
	pub donor: String,
	pub amount: NativeAmount,
	pub usd_amount_cents: u64,
	pub timestamp: i64,
	#[serde(default)]
	pub transaction_hash: String,
}

fn malformed(record: &'static str) -> impl Fn(ParseIdError) -> LedgerError {
	move |e| LedgerError::MalformedRecord {
		record,
		reason: e.to_string(),
	}
}

fn parse_timestamp(record: &'static str, seconds: i64) -> Result<DateTime<Utc>, LedgerError> {
	Utc.timestamp_opt(seconds, 0)
		.single()
		.ok_or_else(|| LedgerError::MalformedRecord {
			record,
			reason: format!("timestamp {} is out of range", seconds),
		})
}

fn parse_optional_hash(record: &'static str, raw: &str) -> Result<Option<TxHash>, LedgerError> {
	if raw.trim().is_empty() {
		Ok(None)
	} else {
		TxHash::parse(raw).map(Some).map_err(malformed(record))
	}
}

impl TryFrom<RawExchangeRecord> for ExchangeEvent {
	type Error = LedgerError;

	fn try_from(raw: RawExchangeRecord) -> Result<Self, Self::Error> {
		const RECORD: &str = "exchange";
		if raw.exchange_id == 0 {
			return Err(LedgerError::MalformedRecord {
				record: RECORD,
				reason: "exchange id 0 is never assigned".to_string(),
			});
		}

		Ok(ExchangeEvent {
			exchange_id: ExchangeId(raw.exchange_id),
			initiator: WalletAddress::parse(&raw.user_1_wallet).map_err(malformed(RECORD))?,
			counterparty: WalletAddress::parse(&raw.user_2_wallet).map_err(malformed(RECORD))?,
			offered_item: ItemId::parse(&raw.item_1_id).map_err(malformed(RECORD))?,
			requested_item: ItemId::parse(&raw.item_2_id).map_err(malformed(RECORD))?,
			status: ExchangeStatus::try_from(raw.status)?,
			transaction_hash: parse_optional_hash(RECORD, &raw.transaction_hash)?,
			created_at: parse_timestamp(RECORD, raw.timestamp)?,
		})
	}
}

impl From<&ExchangeEvent> for RawExchangeRecord {
	fn from(event: &ExchangeEvent) -> Self {
		RawExchangeRecord {
			exchange_id: event.exchange_id.0,
			user_1_wallet: event.initiator.to_string(),
			user_2_wallet: event.counterparty.to_string(),
			item_1_id: event.offered_item.to_string(),
			item_2_id: event.requested_item.to_string(),
			timestamp: event.created_at.timestamp(),
			transaction_hash: event
				.transaction_hash
				.as_ref()
				.map(|h| h.to_string())
				.unwrap_or_default(),
			status: event.status.code(),
		}
	}
}

impl TryFrom<RawTradeRecord> for TradeEvent {
	type Error = LedgerError;

	fn try_from(raw: RawTradeRecord) -> Result<Self, Self::Error> {
		const RECORD: &str = "trade";
		Ok(TradeEvent {
			trade_id: raw.trade_id,
			buyer: WalletAddress::parse(&raw.buyer).map_err(malformed(RECORD))?,
			seller: WalletAddress::parse(&raw.seller).map_err(malformed(RECORD))?,
			item_id: ItemId::parse(&raw.item_id).map_err(malformed(RECORD))?,
			price_usd: Usd::from_cents(raw.price_usd_cents),
			price_native: raw.price_native,
			timestamp: parse_timestamp(RECORD, raw.timestamp)?,
			transaction_hash: TxHash::parse(&raw.transaction_hash).map_err(malformed(RECORD))?,
		})
	}
}

impl TryFrom<RawDonationRecord> for DonationEvent {
	type Error = LedgerError;

	fn try_from(raw: RawDonationRecord) -> Result<Self, Self::Error> {
		const RECORD: &str = "donation";
		Ok(DonationEvent {
			donation_id: raw.donation_id,
			donor: WalletAddress::parse(&raw.donor).map_err(malformed(RECORD))?,
			amount: raw.amount,
			reported_usd: Usd::from_cents(raw.usd_amount_cents),
			timestamp: parse_timestamp(RECORD, raw.timestamp)?,
			transaction_hash: parse_optional_hash(RECORD, &raw.transaction_hash)?,
		})
	}
}

/// Proof that a submission was mined
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
	pub tx_hash: TxHash,
	pub block_number: u64,
}

/// A mined submission together with the value the ledger returned for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitted<T> {
	pub value: T,
	pub receipt: TxReceipt,
}

/// Named operations of the ledger surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerOperation {
	RequestExchange,
	ConfirmExchange,
	RejectExchange,
	UpdateTransactionHash,
	GetExchange,
	GetAllExchanges,
	GetPendingExchanges,
	GetExchangeHistory,
	Transfer,
	RecordTrade,
	GetAllTrades,
	GetTradesByBuyer,
	Donate,
	RegisterTxHash,
	GetAllDonations,
	GetDonationsByAddress,
}

impl LedgerOperation {
	/// Method name on the ledger gateway
	pub fn method_name(&self) -> &'static str {
		match self {
			LedgerOperation::RequestExchange => "requestExchange",
			LedgerOperation::ConfirmExchange => "confirmExchange",
			LedgerOperation::RejectExchange => "rejectExchange",
			LedgerOperation::UpdateTransactionHash => "updateTransactionHash",
			LedgerOperation::GetExchange => "getExchange",
			LedgerOperation::GetAllExchanges => "getAllExchanges",
			LedgerOperation::GetPendingExchanges => "getPendingExchanges",
			LedgerOperation::GetExchangeHistory => "getExchangeHistory",
			LedgerOperation::Transfer => "transfer",
			LedgerOperation::RecordTrade => "recordTrade",
			LedgerOperation::GetAllTrades => "getAllTrades",
			LedgerOperation::GetTradesByBuyer => "getTradesByBuyer",
			LedgerOperation::Donate => "donate",
			LedgerOperation::RegisterTxHash => "registerTxHash",
			LedgerOperation::GetAllDonations => "getAllDonations",
			LedgerOperation::GetDonationsByAddress => "getDonationsByAddress",
		}
	}

	/// Whether the operation changes ledger state. Only read-only operations may be retried.
	pub fn is_mutating(&self) -> bool {
		matches!(
			self,
			LedgerOperation::RequestExchange
				| LedgerOperation::ConfirmExchange
				| LedgerOperation::RejectExchange
				| LedgerOperation::UpdateTransactionHash
				| LedgerOperation::Transfer
				| LedgerOperation::RecordTrade
				| LedgerOperation::Donate
				| LedgerOperation::RegisterTxHash
		)
	}
}

impl fmt::Display for LedgerOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.method_name())
	}
}

/// Error types for ledger submissions and queries
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
	#[error("{operation} was rejected by the signer: {reason}")]
	SignerRejected {
		operation: LedgerOperation,
		reason: String,
	},

	#[error("{operation} reverted: {reason}")]
	Reverted {
		operation: LedgerOperation,
		reason: String,
	},

	#[error("{operation} submission failed: {reason}")]
	Submission {
		operation: LedgerOperation,
		reason: String,
	},

	#[error("Malformed {record} record: {reason}")]
	MalformedRecord { record: &'static str, reason: String },

	#[error("No data returned")]
	NoData,

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}

impl LedgerError {
	/// The ledger executed and refused the operation
	pub fn is_revert(&self) -> bool {
		matches!(self, LedgerError::Reverted { .. })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn raw_exchange() -> RawExchangeRecord {
		RawExchangeRecord {
			exchange_id: 7,
			user_1_wallet: "0x1111111111111111111111111111111111111111".to_string(),
			user_2_wallet: "0x2222222222222222222222222222222222222222".to_string(),
			item_1_id: "65f1c0ffee0000000000aaaa".to_string(),
			item_2_id: "65f1c0ffee0000000000bbbb".to_string(),
			timestamp: 1_700_000_000,
			transaction_hash: String::new(),
			status: 0,
		}
	}

	#[test]
	fn raw_exchange_with_empty_hash_validates() {
		let event = ExchangeEvent::try_from(raw_exchange()).unwrap();
		assert_eq!(event.exchange_id, ExchangeId(7));
		assert_eq!(event.status, ExchangeStatus::Pending);
		assert!(event.transaction_hash.is_none());

		let back = RawExchangeRecord::from(&event);
		assert_eq!(back.status, 0);
		assert_eq!(back.timestamp, 1_700_000_000);
	}

	#[test]
	fn unknown_status_code_is_malformed() {
		let mut raw = raw_exchange();
		raw.status = 9;
		let err = ExchangeEvent::try_from(raw).unwrap_err();
		assert!(matches!(err, LedgerError::MalformedRecord { record: "exchange", .. }));
	}

	#[test]
	fn bad_wallet_in_trade_is_malformed() {
		let raw = RawTradeRecord {
			trade_id: 1,
			buyer: "not-a-wallet".to_string(),
			seller: "0x2222222222222222222222222222222222222222".to_string(),
			item_id: "item".to_string(),
			price_usd_cents: 5000,
			price_native: NativeAmount::from_base_units(1),
			timestamp: 0,
			transaction_hash: format!("0x{}", "ab".repeat(32)),
		};
		assert!(matches!(
			TradeEvent::try_from(raw),
			Err(LedgerError::MalformedRecord { record: "trade", .. })
		));
	}

	#[test]
	fn only_submissions_are_mutating() {
		assert!(LedgerOperation::ConfirmExchange.is_mutating());
		assert!(!LedgerOperation::GetExchangeHistory.is_mutating());
		assert_eq!(LedgerOperation::RegisterTxHash.method_name(), "registerTxHash");
	}
}
