//! Direct purchase settlement.
//!
//! A purchase is three steps: the payment transfer, the `recordTrade` entry referencing it, and the
//! registry update moving the item to the buyer. Only a failed payment aborts. Once the payment is
//! mined both follow-up steps are always attempted, and whatever is left is stored for retry without
//! paying again.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::SettlementContext;
use super::events::SettlementEvent;
use super::pending::{PendingSettlement, PendingStep, SettlementKind};
use super::reconciliation::{OwnershipUpdate, ReconciliationReport, ReconciliationService};
use crate::error::SettlementError;
use crate::ledger::{TradeEvent, TradeSubmission};
use crate::pricing::{self, PriceFeed, Quote};
use crate::registry::Item;
use crate::types::{ItemId, TxHash, WalletAddress};

/// A fully settled purchase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeReceipt {
	pub trade_id: u64,
	pub item_id: ItemId,
	pub buyer: WalletAddress,
	pub seller: WalletAddress,
	pub quote: Quote,
	pub payment_tx: TxHash,
	pub record_tx: TxHash,
}

/// Outcome of a `settle_trade` whose payment went through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TradeOutcome {
	Settled(TradeReceipt),
	/// Paid, but the trade record or the ownership update is outstanding
	PaymentSucceededSettlementIncomplete {
		item_id: ItemId,
		payment_tx: TxHash,
		trade_id: Option<u64>,
		report: ReconciliationReport,
		pending: PendingSettlement,
	},
}

/// Service settling direct purchases.
#[derive(Clone)]
pub struct TradeSettlement {
	ctx: SettlementContext,
	reconciliation: ReconciliationService,
	price_feed: Arc<dyn PriceFeed>,
}

impl TradeSettlement {
	pub fn new(ctx: SettlementContext, price_feed: Arc<dyn PriceFeed>) -> Self {
		let reconciliation = ctx.reconciliation();
		Self {
			ctx,
			reconciliation,
			price_feed,
		}
	}

	/// Price of `item_id` in native units at the current rate.
	pub async fn quote(&self, item_id: &ItemId) -> Result<Quote, SettlementError> {
		let item = self.ctx.registry.get_item(item_id).await?;
		self.quote_item(&item).await
	}

	async fn quote_item(&self, item: &Item) -> Result<Quote, SettlementError> {
		let rate = self.price_feed.current_rate().await?;
		Ok(pricing::quote(item.price, &rate)?)
	}

	/// Buy `item_id` from its current registry owner.
	pub async fn settle_trade(
		&self,
		buyer: &WalletAddress,
		item_id: &ItemId,
	) -> Result<TradeOutcome, SettlementError> {
		let item = self.ctx.registry.get_item(item_id).await?;
		let seller = item.current_owner.clone();
		if buyer == &seller {
			return Err(SettlementError::Validation(format!(
				"{} already owns item {}",
				buyer, item_id
			)));
		}

		let quote = self.quote_item(&item).await?;
		info!(
			"Settling purchase of {} by {}: {} = {} native",
			item_id, buyer, quote.usd, quote.native
		);

		// The only step whose failure aborts the purchase.
		let payment = self.ctx.ledger.transfer(buyer, &seller, quote.native).await?;
		self.ctx
			.events
			.dispatch(SettlementEvent::PaymentSent {
				from: buyer.clone(),
				to: seller.clone(),
				tx_hash: payment.tx_hash.clone(),
			})
			.await;

		let submission = TradeSubmission {
			seller: seller.clone(),
			item_id: item_id.clone(),
			price_usd: item.price,
			price_native: quote.native,
			payment_tx: payment.tx_hash.clone(),
		};

		let mut steps = Vec::new();
		let mut errors = Vec::new();

		let recorded = match self.ctx.ledger.record_trade(buyer, &submission).await {
			Ok(recorded) => {
				self.ctx
					.events
					.dispatch(SettlementEvent::TradeRecorded {
						trade_id: recorded.value,
						item_id: item_id.clone(),
					})
					.await;
				Some(recorded)
			}
			Err(e) => {
				warn!("Payment {} mined but trade record failed: {}", payment.tx_hash, e);
				errors.push(e.to_string());
				steps.push(PendingStep::RecordTrade {
					buyer: buyer.clone(),
					trade: submission.clone(),
				});
				None
			}
		};

		let report = self
			.reconciliation
			.reconcile(&[OwnershipUpdate::new(
				item_id.clone(),
				buyer.clone(),
				seller.clone(),
			)])
			.await;
		if !report.is_reconciled() {
			errors.push(report.failure_summary());
			steps.push(PendingStep::ApplyOwnership {
				updates: report.failed_updates(),
			});
		}

		match recorded {
			Some(recorded) if steps.is_empty() => {
				info!("Trade {} settled", recorded.value);
				Ok(TradeOutcome::Settled(TradeReceipt {
					trade_id: recorded.value,
					item_id: item_id.clone(),
					buyer: buyer.clone(),
					seller,
					quote,
					payment_tx: payment.tx_hash,
					record_tx: recorded.receipt.tx_hash,
				}))
			}
			recorded => {
				let pending = PendingSettlement::new(
					PendingSettlement::trade_key(&payment.tx_hash),
					SettlementKind::Trade,
					steps,
					errors.join("; "),
				);
				self.ctx.store_pending(&pending).await;

				Ok(TradeOutcome::PaymentSucceededSettlementIncomplete {
					item_id: item_id.clone(),
					payment_tx: payment.tx_hash,
					trade_id: recorded.map(|r| r.value),
					report,
					pending,
				})
			}
		}
	}

	pub async fn all_trades(&self) -> Result<Vec<TradeEvent>, SettlementError> {
		Ok(self.ctx.ledger.get_all_trades().await?)
	}

	pub async fn trades_by_buyer(
		&self,
		buyer: &WalletAddress,
	) -> Result<Vec<TradeEvent>, SettlementError> {
		Ok(self.ctx.ledger.get_trades_by_buyer(buyer).await?)
	}
}
