//! Recovery service for stored settlements.
//!
//! Replays the outstanding steps of a `PendingSettlement`. Every ledger step is checked against the
//! ledger before it is resubmitted, so running recovery twice, or after a step that actually landed
//! despite reporting an error, never writes a second record.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::SettlementContext;
use super::events::SettlementEvent;
use super::pending::{PendingSettlement, PendingStep};
use super::reconciliation::ReconciliationService;
use crate::error::SettlementError;
use crate::ledger::{LedgerError, TradeSubmission};
use crate::types::{ExchangeId, TxHash, WalletAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
	/// Every step now holds; the record was removed
	Completed { key: String },
	/// Some steps are still outstanding; the record was updated
	StillPending { pending: PendingSettlement },
}

/// Service retrying stored settlements.
#[derive(Clone)]
pub struct RecoveryService {
	ctx: SettlementContext,
	reconciliation: ReconciliationService,
}

impl RecoveryService {
	pub fn new(ctx: SettlementContext) -> Self {
		let reconciliation = ctx.reconciliation();
		Self {
			ctx,
			reconciliation,
		}
	}

	pub async fn pending(&self) -> Result<Vec<PendingSettlement>, SettlementError> {
		self.ctx.pending.list().await
	}

	/// Retry one stored settlement.
	pub async fn retry(&self, key: &str) -> Result<RecoveryOutcome, SettlementError> {
		let pending = self
			.ctx
			.pending
			.load(key)
			.await?
			.ok_or_else(|| SettlementError::NotFound {
				kind: "pending settlement",
				id: key.to_string(),
			})?;
		self.retry_settlement(pending).await
	}

	/// Retry every stored settlement, oldest first. A failure on one record does not stop the others.
	pub async fn retry_all(&self) -> Result<Vec<RecoveryOutcome>, SettlementError> {
		let settlements = self.ctx.pending.list().await?;
		info!("Retrying {} pending settlements", settlements.len());

		let mut outcomes = Vec::with_capacity(settlements.len());
		for pending in settlements {
			let key = pending.key.clone();
			match self.retry_settlement(pending).await {
				Ok(outcome) => outcomes.push(outcome),
				Err(e) => error!("Recovery of {} failed: {}", key, e),
			}
		}
		Ok(outcomes)
	}

	async fn retry_settlement(
		&self,
		mut pending: PendingSettlement,
	) -> Result<RecoveryOutcome, SettlementError> {
		debug!("Retrying {} ({} steps)", pending.key, pending.steps.len());

		let mut remaining = Vec::new();
		let mut errors = Vec::new();

		for step in std::mem::take(&mut pending.steps) {
			if let Some((step, reason)) = self.run_step(step).await {
				errors.push(reason);
				remaining.push(step);
			}
		}

		if remaining.is_empty() {
			self.ctx.pending.remove(&pending.key).await?;
			info!("Pending settlement {} completed", pending.key);
			self.ctx
				.events
				.dispatch(SettlementEvent::SettlementRecovered {
					key: pending.key.clone(),
				})
				.await;
			return Ok(RecoveryOutcome::Completed { key: pending.key });
		}

		pending.steps = remaining;
		pending.last_error = errors.join("; ");
		pending.attempts += 1;
		pending.updated_at = chrono::Utc::now();
		self.ctx.pending.save(&pending).await?;
		warn!(
			"Pending settlement {} still has {} step(s) outstanding after {} attempts",
			pending.key,
			pending.steps.len(),
			pending.attempts
		);

		Ok(RecoveryOutcome::StillPending { pending })
	}

	/// Run a step. Returns the part of the step still outstanding and why, or `None` once it holds.
	async fn run_step(&self, step: PendingStep) -> Option<(PendingStep, String)> {
		let result = match &step {
			PendingStep::RecordExchangeHash {
				exchange_id,
				signer,
				tx_hash,
			} => self.record_exchange_hash(*exchange_id, signer, tx_hash).await,
			PendingStep::RecordTrade { buyer, trade } => self.record_trade(buyer, trade).await,
			PendingStep::RegisterDonationHash {
				donor,
				donation_id,
				tx_hash,
			} => self.register_donation_hash(donor, *donation_id, tx_hash).await,
			PendingStep::ApplyOwnership { updates } => {
				let report = self.reconciliation.reconcile(updates).await;
				if report.is_reconciled() {
					return None;
				}
				return Some((
					PendingStep::ApplyOwnership {
						updates: report.failed_updates(),
					},
					report.failure_summary(),
				));
			}
		};

		match result {
			Ok(()) => None,
			Err(e) => {
				warn!("Retry step failed: {}", e);
				Some((step, e.to_string()))
			}
		}
	}

	async fn record_exchange_hash(
		&self,
		exchange_id: ExchangeId,
		signer: &WalletAddress,
		tx_hash: &TxHash,
	) -> Result<(), LedgerError> {
		let current = self.ctx.ledger.get_exchange(exchange_id).await?;
		if current.is_some_and(|e| e.transaction_hash.as_ref() == Some(tx_hash)) {
			debug!("Exchange {} already carries {}", exchange_id, tx_hash);
			return Ok(());
		}

		self.ctx
			.ledger
			.update_transaction_hash(signer, exchange_id, tx_hash)
			.await
			.map(|_| ())
	}

	async fn record_trade(
		&self,
		buyer: &WalletAddress,
		trade: &TradeSubmission,
	) -> Result<(), LedgerError> {
		let existing = self.ctx.ledger.get_trades_by_buyer(buyer).await?;
		if let Some(recorded) = existing
			.iter()
			.find(|t| t.transaction_hash == trade.payment_tx)
		{
			debug!(
				"Payment {} already recorded as trade {}",
				trade.payment_tx, recorded.trade_id
			);
			return Ok(());
		}

		let recorded = self.ctx.ledger.record_trade(buyer, trade).await?;
		self.ctx
			.events
			.dispatch(SettlementEvent::TradeRecorded {
				trade_id: recorded.value,
				item_id: trade.item_id.clone(),
			})
			.await;
		Ok(())
	}

	async fn register_donation_hash(
		&self,
		donor: &WalletAddress,
		donation_id: u64,
		tx_hash: &TxHash,
	) -> Result<(), LedgerError> {
		let donations = self.ctx.ledger.get_donations_by_address(donor).await?;
		let registered = donations
			.iter()
			.find(|d| d.donation_id == donation_id)
			.is_some_and(|d| d.transaction_hash.is_some());
		if registered {
			debug!("Donation {} already carries a hash", donation_id);
			return Ok(());
		}

		self.ctx
			.ledger
			.register_tx_hash(donor, tx_hash)
			.await
			.map(|_| ())
	}
}
