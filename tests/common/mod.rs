#![allow(dead_code)]

use std::sync::Arc;

use item_settlement::ledger::InMemoryLedger;
use item_settlement::pricing::{CachedPriceFeed, DEFAULT_RATE_TTL, FixedRate};
use item_settlement::registry::{InMemoryRegistry, NewItem, NewUser, OwnershipRegistry};
use item_settlement::settlement::{
	CollectingEventHandler, EventDispatcher, InMemoryPendingSettlementRepository, SettlementContext,
	SettlementEngine,
};
use item_settlement::types::{ItemId, NATIVE_UNIT, NativeAmount, Usd, WalletAddress};

pub fn wallet(c: char) -> WalletAddress {
	WalletAddress::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap()
}

pub struct Harness {
	pub ledger: Arc<InMemoryLedger>,
	pub registry: Arc<InMemoryRegistry>,
	pub pending: Arc<InMemoryPendingSettlementRepository>,
	pub events: Arc<CollectingEventHandler>,
	pub engine: SettlementEngine,
}

impl Harness {
	/// Engine over in-memory collaborators with a fixed rate of 2500 USD per native unit.
	pub fn new() -> Self {
		let ledger = Arc::new(InMemoryLedger::new());
		let registry = Arc::new(InMemoryRegistry::new());
		let pending = Arc::new(InMemoryPendingSettlementRepository::new());
		let events = Arc::new(CollectingEventHandler::new());

		let mut dispatcher = EventDispatcher::new();
		dispatcher.register_handler(events.clone());

		let context = SettlementContext::new(
			ledger.clone(),
			registry.clone(),
			pending.clone(),
			dispatcher,
		);
		let price_feed = Arc::new(CachedPriceFeed::new(FixedRate::usd(2500), DEFAULT_RATE_TTL));

		Self {
			ledger,
			registry,
			pending,
			events,
			engine: SettlementEngine::new(context, price_feed),
		}
	}

	pub async fn user(&self, c: char, name: &str) -> WalletAddress {
		let wallet = wallet(c);
		self.registry
			.create_user(NewUser {
				wallet: wallet.clone(),
				name: name.to_string(),
				email: format!("{}@example.com", name.to_lowercase()),
				credential_hash: "bcrypt-hash".to_string(),
			})
			.await
			.unwrap();
		wallet
	}

	pub async fn item(&self, owner: &WalletAddress, name: &str, price: Usd) -> ItemId {
		self.registry
			.create_item(NewItem {
				owner: owner.clone(),
				name: name.to_string(),
				description: format!("{} for sale", name),
				price,
				image_url: format!("https://img.example/{}.png", name.to_lowercase()),
			})
			.await
			.unwrap()
			.id
	}

	pub async fn owner(&self, item_id: &ItemId) -> WalletAddress {
		self.registry.get_owner(item_id).await.unwrap()
	}

	pub async fn fund(&self, wallet: &WalletAddress, whole_units: u128) {
		self.ledger
			.fund(wallet, NativeAmount::from_base_units(whole_units * NATIVE_UNIT))
			.await;
	}
}
