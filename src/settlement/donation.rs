use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::SettlementContext;
use super::events::SettlementEvent;
use super::pending::{PendingSettlement, PendingStep, SettlementKind};
use crate::error::SettlementError;
use crate::ledger::DonationEvent;
use crate::types::{NativeAmount, TxHash, Usd, WalletAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DonationReceipt {
	pub donation_id: u64,
	pub donor: WalletAddress,
	pub amount: NativeAmount,
	pub reported_usd: Usd,
	pub tx_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DonationOutcome {
	Recorded(DonationReceipt),
	/// Donation mined; its hash registration was stored for retry
	HashRegistrationPending {
		receipt: DonationReceipt,
		pending: PendingSettlement,
	},
}

/// Which donations to list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DonationFilter {
	pub donor: Option<WalletAddress>,
}

/// Append-only donation record. The reported USD figure is stored as given and never checked against
/// the native amount.
#[derive(Clone)]
pub struct DonationLedger {
	ctx: SettlementContext,
}

impl DonationLedger {
	pub fn new(ctx: SettlementContext) -> Self {
		Self { ctx }
	}

	pub async fn record_donation(
		&self,
		donor: &WalletAddress,
		amount: NativeAmount,
		reported_usd: Usd,
	) -> Result<DonationOutcome, SettlementError> {
		if amount.is_zero() {
			return Err(SettlementError::Validation(
				"donation amount must be positive".to_string(),
			));
		}

		let submitted = self.ctx.ledger.donate(donor, amount, reported_usd).await?;
		let receipt = DonationReceipt {
			donation_id: submitted.value,
			donor: donor.clone(),
			amount,
			reported_usd,
			tx_hash: submitted.receipt.tx_hash,
		};
		self.ctx
			.events
			.dispatch(SettlementEvent::DonationRecorded {
				donation_id: receipt.donation_id,
				donor: donor.clone(),
			})
			.await;

		match self.ctx.ledger.register_tx_hash(donor, &receipt.tx_hash).await {
			Ok(_) => {
				info!(
					"Donation {} of {} ({} reported) recorded",
					receipt.donation_id, amount, reported_usd
				);
				Ok(DonationOutcome::Recorded(receipt))
			}
			Err(e) => {
				warn!("Donation {} mined but hash registration failed: {}", receipt.donation_id, e);
				let pending = PendingSettlement::new(
					PendingSettlement::donation_key(receipt.donation_id),
					SettlementKind::Donation,
					vec![PendingStep::RegisterDonationHash {
						donor: donor.clone(),
						donation_id: receipt.donation_id,
						tx_hash: receipt.tx_hash.clone(),
					}],
					e.to_string(),
				);
				self.ctx.store_pending(&pending).await;
				Ok(DonationOutcome::HashRegistrationPending { receipt, pending })
			}
		}
	}

	pub async fn list_donations(
		&self,
		filter: &DonationFilter,
	) -> Result<Vec<DonationEvent>, SettlementError> {
		let donations = match &filter.donor {
			Some(donor) => self.ctx.ledger.get_donations_by_address(donor).await?,
			None => self.ctx.ledger.get_all_donations().await?,
		};
		Ok(donations)
	}
}
