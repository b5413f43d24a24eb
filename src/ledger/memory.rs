//! In-process ledger implementing the same call/query surface as the gateway.
//!
//! All state sits behind one async mutex, which gives the single-writer arbitration the real ledger
//! provides: of two racing resolutions of the same exchange, the second one reverts. Failures can be
//! injected per operation to exercise post-commit recovery paths.

use super::client::{LedgerClient, TradeSubmission};
use super::types::*;
use crate::types::{ExchangeId, ItemId, NativeAmount, TxHash, Usd, WalletAddress};
use crate::utils::random_bytes32;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;

/// A failure to return from the next call of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
	SignerRejected,
	Reverted(String),
	Unavailable,
}

impl InjectedFailure {
	fn into_error(self, operation: LedgerOperation) -> LedgerError {
		match self {
			InjectedFailure::SignerRejected => LedgerError::SignerRejected {
				operation,
				reason: "user rejected the request".to_string(),
			},
			InjectedFailure::Reverted(reason) => LedgerError::Reverted { operation, reason },
			InjectedFailure::Unavailable => LedgerError::Submission {
				operation,
				reason: "ledger gateway unavailable".to_string(),
			},
		}
	}
}

#[derive(Default)]
struct LedgerState {
	exchanges: BTreeMap<u64, ExchangeEvent>,
	trades: Vec<TradeEvent>,
	donations: Vec<DonationEvent>,
	balances: HashMap<WalletAddress, NativeAmount>,
	block_number: u64,
	failures: HashMap<LedgerOperation, VecDeque<InjectedFailure>>,
	submissions: HashMap<LedgerOperation, usize>,
}

impl LedgerState {
	/// Consume an injected failure or count a submission attempt.
	fn begin(&mut self, operation: LedgerOperation) -> Result<(), LedgerError> {
		if let Some(failure) = self
			.failures
			.get_mut(&operation)
			.and_then(|queue| queue.pop_front())
		{
			debug!("Injected failure for {}: {:?}", operation, failure);
			return Err(failure.into_error(operation));
		}
		Ok(())
	}

	/// Mine a successful submission.
	fn mine(&mut self, operation: LedgerOperation) -> TxReceipt {
		*self.submissions.entry(operation).or_default() += 1;
		self.block_number += 1;
		TxReceipt {
			tx_hash: TxHash::from_bytes(random_bytes32()),
			block_number: self.block_number,
		}
	}

	fn debit(
		&mut self,
		operation: LedgerOperation,
		from: &WalletAddress,
		amount: NativeAmount,
	) -> Result<(), LedgerError> {
		let balance = self.balances.get(from).copied().unwrap_or_default();
		let remaining = balance
			.checked_sub(amount)
			.ok_or_else(|| LedgerError::Reverted {
				operation,
				reason: format!("insufficient funds: {} holds {}", from, balance),
			})?;
		self.balances.insert(from.clone(), remaining);
		Ok(())
	}

	fn pending_exchange_mut(
		&mut self,
		operation: LedgerOperation,
		exchange_id: ExchangeId,
	) -> Result<&mut ExchangeEvent, LedgerError> {
		let exchange = self
			.exchanges
			.get_mut(&exchange_id.0)
			.ok_or_else(|| LedgerError::Reverted {
				operation,
				reason: format!("exchange {} does not exist", exchange_id),
			})?;

		if exchange.status.is_terminal() {
			return Err(LedgerError::Reverted {
				operation,
				reason: format!("exchange {} is already {}", exchange_id, exchange.status),
			});
		}
		Ok(exchange)
	}
}

/// In-memory ledger
#[derive(Default)]
pub struct InMemoryLedger {
	state: Mutex<LedgerState>,
}

impl InMemoryLedger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Credit native currency to a wallet.
	pub async fn fund(&self, wallet: &WalletAddress, amount: NativeAmount) {
		let mut state = self.state.lock().await;
		let balance = state.balances.entry(wallet.clone()).or_default();
		*balance = balance.saturating_add(amount);
	}

	pub async fn balance_of(&self, wallet: &WalletAddress) -> NativeAmount {
		let state = self.state.lock().await;
		state.balances.get(wallet).copied().unwrap_or_default()
	}

	/// Make the next call of `operation` fail. Queued failures are consumed in order.
	pub async fn fail_next(&self, operation: LedgerOperation, failure: InjectedFailure) {
		let mut state = self.state.lock().await;
		state
			.failures
			.entry(operation)
			.or_default()
			.push_back(failure);
	}

	/// Number of mined submissions of `operation`.
	pub async fn submissions(&self, operation: LedgerOperation) -> usize {
		let state = self.state.lock().await;
		state.submissions.get(&operation).copied().unwrap_or(0)
	}

	/// Number of mined submissions across every state-changing operation.
	pub async fn total_submissions(&self) -> usize {
		let state = self.state.lock().await;
		state.submissions.values().sum()
	}

	async fn resolve(
		&self,
		operation: LedgerOperation,
		exchange_id: ExchangeId,
		status: ExchangeStatus,
	) -> Result<TxReceipt, LedgerError> {
		let mut state = self.state.lock().await;
		state.begin(operation)?;
		state.pending_exchange_mut(operation, exchange_id)?.status = status;
		Ok(state.mine(operation))
	}
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
	async fn request_exchange(
		&self,
		signer: &WalletAddress,
		counterparty: &WalletAddress,
		offered_item: &ItemId,
		requested_item: &ItemId,
	) -> Result<Submitted<ExchangeId>, LedgerError> {
		let operation = LedgerOperation::RequestExchange;
		let mut state = self.state.lock().await;
		state.begin(operation)?;

		if signer == counterparty {
			return Err(LedgerError::Reverted {
				operation,
				reason: "cannot exchange with yourself".to_string(),
			});
		}

		let exchange_id = ExchangeId(state.exchanges.len() as u64 + 1);
		state.exchanges.insert(
			exchange_id.0,
			ExchangeEvent {
				exchange_id,
				initiator: signer.clone(),
				counterparty: counterparty.clone(),
				offered_item: offered_item.clone(),
				requested_item: requested_item.clone(),
				status: ExchangeStatus::Pending,
				transaction_hash: None,
				created_at: Utc::now(),
			},
		);

		Ok(Submitted {
			value: exchange_id,
			receipt: state.mine(operation),
		})
	}

	async fn confirm_exchange(
		&self,
		_signer: &WalletAddress,
		exchange_id: ExchangeId,
	) -> Result<TxReceipt, LedgerError> {
		self.resolve(
			LedgerOperation::ConfirmExchange,
			exchange_id,
			ExchangeStatus::Confirmed,
		)
		.await
	}

	async fn reject_exchange(
		&self,
		_signer: &WalletAddress,
		exchange_id: ExchangeId,
	) -> Result<TxReceipt, LedgerError> {
		self.resolve(
			LedgerOperation::RejectExchange,
			exchange_id,
			ExchangeStatus::Rejected,
		)
		.await
	}

	async fn update_transaction_hash(
		&self,
		_signer: &WalletAddress,
		exchange_id: ExchangeId,
		tx_hash: &TxHash,
	) -> Result<TxReceipt, LedgerError> {
		let operation = LedgerOperation::UpdateTransactionHash;
		let mut state = self.state.lock().await;
		state.begin(operation)?;

		let exchange = state
			.exchanges
			.get_mut(&exchange_id.0)
			.ok_or_else(|| LedgerError::Reverted {
				operation,
				reason: format!("exchange {} does not exist", exchange_id),
			})?;
		exchange.transaction_hash = Some(tx_hash.clone());

		Ok(state.mine(operation))
	}

	async fn get_exchange(
		&self,
		exchange_id: ExchangeId,
	) -> Result<Option<ExchangeEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state.exchanges.get(&exchange_id.0).cloned())
	}

	async fn get_all_exchanges(&self) -> Result<Vec<ExchangeEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state.exchanges.values().cloned().collect())
	}

	async fn get_pending_exchanges(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<ExchangeEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state
			.exchanges
			.values()
			.filter(|e| &e.counterparty == wallet && e.status == ExchangeStatus::Pending)
			.cloned()
			.collect())
	}

	async fn get_exchange_history(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<ExchangeEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state
			.exchanges
			.values()
			.filter(|e| &e.initiator == wallet || &e.counterparty == wallet)
			.cloned()
			.collect())
	}

	async fn transfer(
		&self,
		from: &WalletAddress,
		to: &WalletAddress,
		amount: NativeAmount,
	) -> Result<TxReceipt, LedgerError> {
		let operation = LedgerOperation::Transfer;
		let mut state = self.state.lock().await;
		state.begin(operation)?;
		state.debit(operation, from, amount)?;

		let balance = state.balances.entry(to.clone()).or_default();
		*balance = balance.saturating_add(amount);

		Ok(state.mine(operation))
	}

	async fn record_trade(
		&self,
		buyer: &WalletAddress,
		trade: &TradeSubmission,
	) -> Result<Submitted<u64>, LedgerError> {
		let operation = LedgerOperation::RecordTrade;
		let mut state = self.state.lock().await;
		state.begin(operation)?;

		let trade_id = state.trades.len() as u64 + 1;
		state.trades.push(TradeEvent {
			trade_id,
			buyer: buyer.clone(),
			seller: trade.seller.clone(),
			item_id: trade.item_id.clone(),
			price_usd: trade.price_usd,
			price_native: trade.price_native,
			timestamp: Utc::now(),
			transaction_hash: trade.payment_tx.clone(),
		});

		Ok(Submitted {
			value: trade_id,
			receipt: state.mine(operation),
		})
	}

	async fn get_all_trades(&self) -> Result<Vec<TradeEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state.trades.clone())
	}

	async fn get_trades_by_buyer(
		&self,
		buyer: &WalletAddress,
	) -> Result<Vec<TradeEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state
			.trades
			.iter()
			.filter(|t| &t.buyer == buyer)
			.cloned()
			.collect())
	}

	async fn donate(
		&self,
		donor: &WalletAddress,
		amount: NativeAmount,
		reported_usd: Usd,
	) -> Result<Submitted<u64>, LedgerError> {
		let operation = LedgerOperation::Donate;
		let mut state = self.state.lock().await;
		state.begin(operation)?;

		if amount.is_zero() {
			return Err(LedgerError::Reverted {
				operation,
				reason: "donation must carry value".to_string(),
			});
		}
		state.debit(operation, donor, amount)?;

		let donation_id = state.donations.len() as u64 + 1;
		state.donations.push(DonationEvent {
			donation_id,
			donor: donor.clone(),
			amount,
			reported_usd,
			timestamp: Utc::now(),
			transaction_hash: None,
		});

		Ok(Submitted {
			value: donation_id,
			receipt: state.mine(operation),
		})
	}

	async fn register_tx_hash(
		&self,
		donor: &WalletAddress,
		tx_hash: &TxHash,
	) -> Result<TxReceipt, LedgerError> {
		let operation = LedgerOperation::RegisterTxHash;
		let mut state = self.state.lock().await;
		state.begin(operation)?;

		let donation = state
			.donations
			.iter_mut()
			.rev()
			.find(|d| &d.donor == donor && d.transaction_hash.is_none())
			.ok_or_else(|| LedgerError::Reverted {
				operation,
				reason: format!("{} has no donation awaiting a hash", donor),
			})?;
		donation.transaction_hash = Some(tx_hash.clone());

		Ok(state.mine(operation))
	}

	async fn get_all_donations(&self) -> Result<Vec<DonationEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state.donations.clone())
	}

	async fn get_donations_by_address(
		&self,
		donor: &WalletAddress,
	) -> Result<Vec<DonationEvent>, LedgerError> {
		let state = self.state.lock().await;
		Ok(state
			.donations
			.iter()
			.filter(|d| &d.donor == donor)
			.cloned()
			.collect())
	}
}
