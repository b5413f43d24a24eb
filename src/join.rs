//! Validity/aggregation join.
//!
//! Read-only. Resolves the wallet and item identifiers in ledger records to registry display names.
//! An identifier the registry cannot resolve, whether deleted or unreachable, is shown as itself.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ledger::{DonationEvent, ExchangeEvent, ExchangeStatus, TradeEvent};
use crate::registry::{OwnershipRegistry, RegistryError};
use crate::settlement::PendingRequest;
use crate::types::{ExchangeId, ItemId, NativeAmount, TxHash, Usd, WalletAddress};

/// An identifier and the name to show for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labeled<T> {
	pub id: T,
	pub label: String,
	/// False when `label` is the raw identifier
	pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayExchange {
	pub exchange_id: ExchangeId,
	pub status: ExchangeStatus,
	pub initiator: Labeled<WalletAddress>,
	pub counterparty: Labeled<WalletAddress>,
	pub offered_item: Labeled<ItemId>,
	pub requested_item: Labeled<ItemId>,
	pub transaction_hash: Option<TxHash>,
	pub created_at: DateTime<Utc>,
	/// Only set for pending requests whose validity could be checked
	#[serde(skip_serializing_if = "Option::is_none")]
	pub offer_valid: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayTrade {
	pub trade_id: u64,
	pub buyer: Labeled<WalletAddress>,
	pub seller: Labeled<WalletAddress>,
	pub item: Labeled<ItemId>,
	pub price_usd: Usd,
	pub price_native: NativeAmount,
	pub timestamp: DateTime<Utc>,
	pub transaction_hash: TxHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayDonation {
	pub donation_id: u64,
	pub donor: Labeled<WalletAddress>,
	pub amount: NativeAmount,
	pub reported_usd: Usd,
	pub timestamp: DateTime<Utc>,
	pub transaction_hash: Option<TxHash>,
}

#[derive(Default)]
struct Names {
	users: HashMap<WalletAddress, String>,
	items: HashMap<ItemId, String>,
}

impl Names {
	fn user(&self, wallet: &WalletAddress) -> Labeled<WalletAddress> {
		match self.users.get(wallet) {
			Some(name) => Labeled {
				id: wallet.clone(),
				label: name.clone(),
				resolved: true,
			},
			None => Labeled {
				id: wallet.clone(),
				label: wallet.to_string(),
				resolved: false,
			},
		}
	}

	fn item(&self, item_id: &ItemId) -> Labeled<ItemId> {
		match self.items.get(item_id) {
			Some(name) => Labeled {
				id: item_id.clone(),
				label: name.clone(),
				resolved: true,
			},
			None => Labeled {
				id: item_id.clone(),
				label: item_id.to_string(),
				resolved: false,
			},
		}
	}
}

/// Resolves ledger records against the registry for display
#[derive(Clone)]
pub struct DisplayResolver {
	registry: Arc<dyn OwnershipRegistry>,
}

impl DisplayResolver {
	pub fn new(registry: Arc<dyn OwnershipRegistry>) -> Self {
		Self { registry }
	}

	fn note_miss(kind: &str, id: &str, err: &RegistryError) {
		if err.is_not_found() {
			debug!("No {} {} in the registry", kind, id);
		} else {
			warn!("Could not resolve {} {}: {}", kind, id, err);
		}
	}

	async fn lookup(&self, wallets: BTreeSet<WalletAddress>, items: BTreeSet<ItemId>) -> Names {
		let user_lookups = wallets.into_iter().map(|wallet| async move {
			match self.registry.get_user(&wallet).await {
				Ok(user) => Some((wallet, user.name)),
				Err(e) => {
					Self::note_miss("user", wallet.as_str(), &e);
					None
				}
			}
		});
		let item_lookups = items.into_iter().map(|item_id| async move {
			match self.registry.get_item(&item_id).await {
				Ok(item) => Some((item_id, item.name)),
				Err(e) => {
					Self::note_miss("item", item_id.as_str(), &e);
					None
				}
			}
		});

		let (users, items) = futures::join!(join_all(user_lookups), join_all(item_lookups));
		Names {
			users: users.into_iter().flatten().collect(),
			items: items.into_iter().flatten().collect(),
		}
	}

	pub async fn exchanges(&self, exchanges: &[ExchangeEvent]) -> Vec<DisplayExchange> {
		let wallets = exchanges
			.iter()
			.flat_map(|e| [e.initiator.clone(), e.counterparty.clone()])
			.collect();
		let items = exchanges
			.iter()
			.flat_map(|e| [e.offered_item.clone(), e.requested_item.clone()])
			.collect();
		let names = self.lookup(wallets, items).await;

		exchanges
			.iter()
			.map(|e| DisplayExchange {
				exchange_id: e.exchange_id,
				status: e.status,
				initiator: names.user(&e.initiator),
				counterparty: names.user(&e.counterparty),
				offered_item: names.item(&e.offered_item),
				requested_item: names.item(&e.requested_item),
				transaction_hash: e.transaction_hash.clone(),
				created_at: e.created_at,
				offer_valid: None,
			})
			.collect()
	}

	/// Pending requests keep their validity flag
	pub async fn pending_requests(&self, requests: &[PendingRequest]) -> Vec<DisplayExchange> {
		let exchanges: Vec<ExchangeEvent> = requests.iter().map(|r| r.exchange.clone()).collect();
		let mut display = self.exchanges(&exchanges).await;
		for (row, request) in display.iter_mut().zip(requests) {
			row.offer_valid = request.offer_valid;
		}
		display
	}

	pub async fn trades(&self, trades: &[TradeEvent]) -> Vec<DisplayTrade> {
		let wallets = trades
			.iter()
			.flat_map(|t| [t.buyer.clone(), t.seller.clone()])
			.collect();
		let items = trades.iter().map(|t| t.item_id.clone()).collect();
		let names = self.lookup(wallets, items).await;

		trades
			.iter()
			.map(|t| DisplayTrade {
				trade_id: t.trade_id,
				buyer: names.user(&t.buyer),
				seller: names.user(&t.seller),
				item: names.item(&t.item_id),
				price_usd: t.price_usd,
				price_native: t.price_native,
				timestamp: t.timestamp,
				transaction_hash: t.transaction_hash.clone(),
			})
			.collect()
	}

	pub async fn donations(&self, donations: &[DonationEvent]) -> Vec<DisplayDonation> {
		let wallets = donations.iter().map(|d| d.donor.clone()).collect();
		let names = self.lookup(wallets, BTreeSet::new()).await;

		donations
			.iter()
			.map(|d| DisplayDonation {
				donation_id: d.donation_id,
				donor: names.user(&d.donor),
				amount: d.amount,
				reported_usd: d.reported_usd,
				timestamp: d.timestamp,
				transaction_hash: d.transaction_hash.clone(),
			})
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::{InMemoryRegistry, NewItem, NewUser};

	fn wallet(c: char) -> WalletAddress {
		WalletAddress::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap()
	}

	#[tokio::test]
	async fn unknown_identifiers_fall_back_to_raw_values() {
		let registry = Arc::new(InMemoryRegistry::new());
		registry
			.create_user(NewUser {
				wallet: wallet('a'),
				name: "Alice".to_string(),
				email: "alice@example.com".to_string(),
				credential_hash: "hash".to_string(),
			})
			.await
			.unwrap();
		let lamp = registry
			.create_item(NewItem {
				owner: wallet('a'),
				name: "Lamp".to_string(),
				description: "Desk lamp".to_string(),
				price: Usd::from_dollars(20),
				image_url: "https://img.example/lamp.png".to_string(),
			})
			.await
			.unwrap();

		let exchange = ExchangeEvent {
			exchange_id: ExchangeId(1),
			initiator: wallet('a'),
			counterparty: wallet('b'),
			offered_item: lamp.id.clone(),
			requested_item: ItemId::parse("deleted-item").unwrap(),
			status: ExchangeStatus::Pending,
			transaction_hash: None,
			created_at: Utc::now(),
		};

		let resolver = DisplayResolver::new(registry);
		let rows = resolver.exchanges(&[exchange]).await;

		assert_eq!(rows[0].initiator.label, "Alice");
		assert!(!rows[0].counterparty.resolved);
		assert_eq!(rows[0].counterparty.label, wallet('b').to_string());
		assert_eq!(rows[0].offered_item.label, "Lamp");
		assert_eq!(rows[0].requested_item.label, "deleted-item");
	}
}
