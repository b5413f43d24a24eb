//! Reconciliation service.
//!
//! Applies ledger-confirmed ownership changes to the registry. Each update is applied on its own with
//! the registry's conditional write; nothing is rolled back when a sibling update fails. Re-applying an
//! update whose target already holds is reported as `AlreadyApplied`.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::events::{EventDispatcher, SettlementEvent};
use crate::registry::{OwnershipRegistry, RegistryError};
use crate::types::{ItemId, WalletAddress};

/// One ledger-confirmed ownership change to mirror in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipUpdate {
	pub item_id: ItemId,
	pub new_owner: WalletAddress,
	pub expected_current_owner: WalletAddress,
}

impl OwnershipUpdate {
	pub fn new(item_id: ItemId, new_owner: WalletAddress, expected_current_owner: WalletAddress) -> Self {
		Self {
			item_id,
			new_owner,
			expected_current_owner,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
	Applied,
	AlreadyApplied,
	Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
	pub update: OwnershipUpdate,
	pub outcome: UpdateOutcome,
}

impl UpdateResult {
	pub fn is_failed(&self) -> bool {
		matches!(self.outcome, UpdateOutcome::Failed { .. })
	}
}

/// Result of applying a batch of ownership updates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconciliationReport {
	/// Every update now holds in the registry
	Reconciled { results: Vec<UpdateResult> },
	/// At least one update failed; `results` names which and why
	PartialFailure { results: Vec<UpdateResult> },
}

impl ReconciliationReport {
	fn from_results(results: Vec<UpdateResult>) -> Self {
		if results.iter().any(UpdateResult::is_failed) {
			ReconciliationReport::PartialFailure { results }
		} else {
			ReconciliationReport::Reconciled { results }
		}
	}

	pub fn is_reconciled(&self) -> bool {
		matches!(self, ReconciliationReport::Reconciled { .. })
	}

	pub fn results(&self) -> &[UpdateResult] {
		match self {
			ReconciliationReport::Reconciled { results }
			| ReconciliationReport::PartialFailure { results } => results,
		}
	}

	/// The updates that still have to be applied
	pub fn failed_updates(&self) -> Vec<OwnershipUpdate> {
		self.results()
			.iter()
			.filter(|r| r.is_failed())
			.map(|r| r.update.clone())
			.collect()
	}

	/// Failure reasons of the failed updates, joined for display
	pub fn failure_summary(&self) -> String {
		self.results()
			.iter()
			.filter_map(|r| match &r.outcome {
				UpdateOutcome::Failed { reason } => Some(format!("{}: {}", r.update.item_id, reason)),
				_ => None,
			})
			.collect::<Vec<_>>()
			.join("; ")
	}
}

/// Service applying ownership updates to the registry.
#[derive(Clone)]
pub struct ReconciliationService {
	registry: Arc<dyn OwnershipRegistry>,
	events: Arc<EventDispatcher>,
}

impl ReconciliationService {
	pub fn new(registry: Arc<dyn OwnershipRegistry>, events: Arc<EventDispatcher>) -> Self {
		Self { registry, events }
	}

	/// Apply every update independently and report the outcome of each.
	pub async fn reconcile(&self, updates: &[OwnershipUpdate]) -> ReconciliationReport {
		let mut results = Vec::with_capacity(updates.len());

		for update in updates {
			let outcome = self.apply(update).await;

			let event = match &outcome {
				UpdateOutcome::Failed { reason } => SettlementEvent::OwnershipFailed {
					item_id: update.item_id.clone(),
					reason: reason.clone(),
				},
				applied => SettlementEvent::OwnershipApplied {
					item_id: update.item_id.clone(),
					new_owner: update.new_owner.clone(),
					already_applied: *applied == UpdateOutcome::AlreadyApplied,
				},
			};
			self.events.dispatch(event).await;

			results.push(UpdateResult {
				update: update.clone(),
				outcome,
			});
		}

		ReconciliationReport::from_results(results)
	}

	async fn apply(&self, update: &OwnershipUpdate) -> UpdateOutcome {
		match self.registry.get_owner(&update.item_id).await {
			Ok(owner) if owner == update.new_owner => {
				debug!("Item {} already owned by {}", update.item_id, owner);
				return UpdateOutcome::AlreadyApplied;
			}
			Ok(_) => {}
			Err(e) => {
				warn!("Could not read owner of item {}: {}", update.item_id, e);
				return UpdateOutcome::Failed {
					reason: e.to_string(),
				};
			}
		}

		match self
			.registry
			.set_owner(
				&update.item_id,
				&update.new_owner,
				&update.expected_current_owner,
			)
			.await
		{
			Ok(_) => UpdateOutcome::Applied,
			// Another writer got there first with the same target.
			Err(RegistryError::Conflict { actual, .. }) if actual == update.new_owner => {
				UpdateOutcome::AlreadyApplied
			}
			Err(e) => {
				warn!("Owner update for item {} failed: {}", update.item_id, e);
				UpdateOutcome::Failed {
					reason: e.to_string(),
				}
			}
		}
	}
}
