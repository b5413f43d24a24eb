//! Exchange orchestrator.
//!
//! Drives the exchange state machine `Pending → Confirmed | Rejected`. The ledger holds the
//! authoritative status and arbitrates racing resolutions; the registry is only written after the
//! ledger has confirmed, through the reconciliation service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::SettlementContext;
use super::events::SettlementEvent;
use super::pending::{PendingSettlement, PendingStep, SettlementKind};
use super::reconciliation::{OwnershipUpdate, ReconciliationReport, ReconciliationService};
use crate::error::SettlementError;
use crate::ledger::{ExchangeEvent, ExchangeStatus, LedgerError};
use crate::registry::RegistryError;
use crate::types::{ExchangeId, ItemId, TxHash, WalletAddress};

/// The counterparty's answer to an exchange request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeDecision {
	Confirm,
	Reject,
}

impl FromStr for ExchangeDecision {
	type Err = SettlementError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"confirm" | "accept" => Ok(ExchangeDecision::Confirm),
			"reject" | "decline" => Ok(ExchangeDecision::Reject),
			other => Err(SettlementError::Validation(format!(
				"unknown decision '{}', expected confirm or reject",
				other
			))),
		}
	}
}

impl fmt::Display for ExchangeDecision {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ExchangeDecision::Confirm => f.write_str("confirm"),
			ExchangeDecision::Reject => f.write_str("reject"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequestReceipt {
	pub exchange_id: ExchangeId,
	pub tx_hash: TxHash,
}

/// Outcome of a successful `resolve_exchange`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExchangeResolution {
	/// Ledger confirmed, hash recorded, both owners swapped in the registry
	Confirmed {
		exchange_id: ExchangeId,
		tx_hash: TxHash,
		report: ReconciliationReport,
	},
	/// Ledger confirmed, but follow-up work is outstanding and was stored under `pending.key`
	ConfirmedReconciliationPending {
		exchange_id: ExchangeId,
		tx_hash: TxHash,
		report: ReconciliationReport,
		pending: PendingSettlement,
	},
	/// Ledger rejected. No registry change.
	Rejected {
		exchange_id: ExchangeId,
		tx_hash: TxHash,
		hash_recorded: bool,
	},
}

/// A pending request together with whether it could still be confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
	pub exchange: ExchangeEvent,
	/// `None` when the registry could not be read
	pub offer_valid: Option<bool>,
}

/// Service driving exchange requests.
#[derive(Clone)]
pub struct ExchangeOrchestrator {
	ctx: SettlementContext,
	reconciliation: ReconciliationService,
}

impl ExchangeOrchestrator {
	pub fn new(ctx: SettlementContext) -> Self {
		let reconciliation = ctx.reconciliation();
		Self {
			ctx,
			reconciliation,
		}
	}

	/// Create a Pending request offering `offered_item` for `requested_item`.
	pub async fn request_exchange(
		&self,
		initiator: &WalletAddress,
		counterparty: &WalletAddress,
		offered_item: &ItemId,
		requested_item: &ItemId,
	) -> Result<ExchangeRequestReceipt, SettlementError> {
		if initiator == counterparty {
			return Err(SettlementError::Validation(
				"cannot exchange with yourself".to_string(),
			));
		}
		if offered_item == requested_item {
			return Err(SettlementError::Validation(
				"offered and requested items must differ".to_string(),
			));
		}

		self.check_ownership(offered_item, initiator).await?;
		self.check_ownership(requested_item, counterparty).await?;

		let submitted = self
			.ctx
			.ledger
			.request_exchange(initiator, counterparty, offered_item, requested_item)
			.await?;

		info!(
			"Exchange {} requested: {} offers {} for {}'s {}",
			submitted.value, initiator, offered_item, counterparty, requested_item
		);
		self.ctx
			.events
			.dispatch(SettlementEvent::ExchangeRequested {
				exchange_id: submitted.value,
				initiator: initiator.clone(),
				counterparty: counterparty.clone(),
			})
			.await;

		Ok(ExchangeRequestReceipt {
			exchange_id: submitted.value,
			tx_hash: submitted.receipt.tx_hash,
		})
	}

	/// Confirm or reject a Pending request. Only the counterparty may resolve it.
	pub async fn resolve_exchange(
		&self,
		caller: &WalletAddress,
		exchange_id: ExchangeId,
		decision: ExchangeDecision,
	) -> Result<ExchangeResolution, SettlementError> {
		let exchange = self
			.ctx
			.ledger
			.get_exchange(exchange_id)
			.await?
			.ok_or_else(|| SettlementError::exchange_not_found(exchange_id))?;

		if exchange.status.is_terminal() {
			return Err(SettlementError::AlreadyResolved {
				exchange_id,
				status: exchange.status,
			});
		}
		if caller != &exchange.counterparty {
			return Err(SettlementError::NotCounterparty {
				exchange_id,
				caller: caller.clone(),
			});
		}

		match decision {
			ExchangeDecision::Confirm => self.confirm(caller, &exchange).await,
			ExchangeDecision::Reject => self.reject(caller, &exchange).await,
		}
	}

	async fn confirm(
		&self,
		caller: &WalletAddress,
		exchange: &ExchangeEvent,
	) -> Result<ExchangeResolution, SettlementError> {
		let exchange_id = exchange.exchange_id;
		if let Err(stale) = self.check_offer_validity(exchange).await {
			return Err(self.recheck_status(exchange_id, stale).await);
		}

		let receipt = match self.ctx.ledger.confirm_exchange(caller, exchange_id).await {
			Ok(receipt) => receipt,
			Err(e) => return Err(self.classify_resolution_failure(exchange_id, e).await),
		};
		self.emit_resolved(exchange_id, ExchangeStatus::Confirmed, &receipt.tx_hash)
			.await;

		let mut steps = Vec::new();
		let mut errors = Vec::new();

		if let Err(e) = self
			.ctx
			.ledger
			.update_transaction_hash(caller, exchange_id, &receipt.tx_hash)
			.await
		{
			warn!("Exchange {} confirmed but hash update failed: {}", exchange_id, e);
			errors.push(e.to_string());
			steps.push(PendingStep::RecordExchangeHash {
				exchange_id,
				signer: caller.clone(),
				tx_hash: receipt.tx_hash.clone(),
			});
		}

		let updates = [
			OwnershipUpdate::new(
				exchange.offered_item.clone(),
				exchange.counterparty.clone(),
				exchange.initiator.clone(),
			),
			OwnershipUpdate::new(
				exchange.requested_item.clone(),
				exchange.initiator.clone(),
				exchange.counterparty.clone(),
			),
		];
		let report = self.reconciliation.reconcile(&updates).await;
		if !report.is_reconciled() {
			errors.push(report.failure_summary());
			steps.push(PendingStep::ApplyOwnership {
				updates: report.failed_updates(),
			});
		}

		if steps.is_empty() {
			info!("Exchange {} confirmed and reconciled", exchange_id);
			return Ok(ExchangeResolution::Confirmed {
				exchange_id,
				tx_hash: receipt.tx_hash,
				report,
			});
		}

		let pending = PendingSettlement::new(
			PendingSettlement::exchange_key(exchange_id),
			SettlementKind::Exchange,
			steps,
			errors.join("; "),
		);
		self.ctx.store_pending(&pending).await;

		Ok(ExchangeResolution::ConfirmedReconciliationPending {
			exchange_id,
			tx_hash: receipt.tx_hash,
			report,
			pending,
		})
	}

	async fn reject(
		&self,
		caller: &WalletAddress,
		exchange: &ExchangeEvent,
	) -> Result<ExchangeResolution, SettlementError> {
		let exchange_id = exchange.exchange_id;

		let receipt = match self.ctx.ledger.reject_exchange(caller, exchange_id).await {
			Ok(receipt) => receipt,
			Err(e) => return Err(self.classify_resolution_failure(exchange_id, e).await),
		};
		self.emit_resolved(exchange_id, ExchangeStatus::Rejected, &receipt.tx_hash)
			.await;

		let hash_recorded = match self
			.ctx
			.ledger
			.update_transaction_hash(caller, exchange_id, &receipt.tx_hash)
			.await
		{
			Ok(_) => true,
			Err(e) => {
				warn!("Exchange {} rejected but hash update failed: {}", exchange_id, e);
				let pending = PendingSettlement::new(
					PendingSettlement::exchange_key(exchange_id),
					SettlementKind::Exchange,
					vec![PendingStep::RecordExchangeHash {
						exchange_id,
						signer: caller.clone(),
						tx_hash: receipt.tx_hash.clone(),
					}],
					e.to_string(),
				);
				self.ctx.store_pending(&pending).await;
				false
			}
		};

		info!("Exchange {} rejected", exchange_id);
		Ok(ExchangeResolution::Rejected {
			exchange_id,
			tx_hash: receipt.tx_hash,
			hash_recorded,
		})
	}

	/// A revert may mean another resolver won the race; the ledger decides.
	async fn classify_resolution_failure(
		&self,
		exchange_id: ExchangeId,
		err: LedgerError,
	) -> SettlementError {
		if !err.is_revert() {
			return err.into();
		}
		self.recheck_status(exchange_id, err.into()).await
	}

	/// Replace `err` with `AlreadyResolved` if the exchange turned terminal since it was read.
	///
	/// Covers a racing resolver whose confirm has already swapped the items, which would otherwise
	/// surface here as a stale offer or a revert.
	async fn recheck_status(&self, exchange_id: ExchangeId, err: SettlementError) -> SettlementError {
		match self.ctx.ledger.get_exchange(exchange_id).await {
			Ok(Some(current)) if current.status.is_terminal() => {
				info!(
					"Exchange {} was resolved concurrently as {}",
					exchange_id, current.status
				);
				SettlementError::AlreadyResolved {
					exchange_id,
					status: current.status,
				}
			}
			Ok(_) => err,
			Err(query_err) => {
				warn!("Could not re-check exchange {}: {}", exchange_id, query_err);
				err
			}
		}
	}

	async fn emit_resolved(&self, exchange_id: ExchangeId, status: ExchangeStatus, tx_hash: &TxHash) {
		self.ctx
			.events
			.dispatch(SettlementEvent::ExchangeResolved {
				exchange_id,
				status,
				tx_hash: tx_hash.clone(),
			})
			.await;
	}

	/// Both items must still be held by the parties named in the request.
	pub async fn check_offer_validity(&self, exchange: &ExchangeEvent) -> Result<(), SettlementError> {
		self.check_ownership(&exchange.offered_item, &exchange.initiator)
			.await?;
		self.check_ownership(&exchange.requested_item, &exchange.counterparty)
			.await
	}

	async fn check_ownership(
		&self,
		item_id: &ItemId,
		expected_owner: &WalletAddress,
	) -> Result<(), SettlementError> {
		match self.ctx.registry.get_owner(item_id).await {
			Ok(owner) if &owner == expected_owner => Ok(()),
			Ok(owner) => Err(SettlementError::StaleOffer {
				item_id: item_id.clone(),
				reason: format!("is owned by {}, not {}", owner, expected_owner),
			}),
			Err(RegistryError::NotFound { .. }) => Err(SettlementError::StaleOffer {
				item_id: item_id.clone(),
				reason: "no longer exists".to_string(),
			}),
			Err(e) => Err(e.into()),
		}
	}

	/// Pending requests addressed to `wallet`, each flagged with whether it can still be confirmed.
	///
	/// A registry failure leaves that request's validity unknown rather than hiding the listing.
	pub async fn pending_requests(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<PendingRequest>, SettlementError> {
		let exchanges = self.ctx.ledger.get_pending_exchanges(wallet).await?;

		let mut requests = Vec::with_capacity(exchanges.len());
		for exchange in exchanges {
			let offer_valid = match self.check_offer_validity(&exchange).await {
				Ok(()) => Some(true),
				Err(SettlementError::StaleOffer { .. }) => Some(false),
				Err(e) => {
					warn!(
						"Could not check validity of exchange {}: {}",
						exchange.exchange_id, e
					);
					None
				}
			};
			requests.push(PendingRequest {
				exchange,
				offer_valid,
			});
		}
		Ok(requests)
	}

	/// Every request `wallet` took part in, any status
	pub async fn history(&self, wallet: &WalletAddress) -> Result<Vec<ExchangeEvent>, SettlementError> {
		Ok(self.ctx.ledger.get_exchange_history(wallet).await?)
	}

	pub async fn all_exchanges(&self) -> Result<Vec<ExchangeEvent>, SettlementError> {
		Ok(self.ctx.ledger.get_all_exchanges().await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decisions_parse_case_insensitively() {
		assert_eq!("Confirm".parse::<ExchangeDecision>().unwrap(), ExchangeDecision::Confirm);
		assert_eq!("reject".parse::<ExchangeDecision>().unwrap(), ExchangeDecision::Reject);
		assert!("maybe".parse::<ExchangeDecision>().is_err());
	}
}
