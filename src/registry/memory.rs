use super::repository::OwnershipRegistry;
use super::types::*;
use crate::types::{ItemId, WalletAddress};
use crate::utils::random_object_id;

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// In-memory implementation of OwnershipRegistry
///
/// The item map's write lock makes each conditional owner update atomic. Individual items can be
/// marked unavailable (writes fail) or unreadable (reads fail too) to simulate a registry outage.
#[derive(Default)]
pub struct InMemoryRegistry {
	items: RwLock<HashMap<ItemId, Item>>,
	users: RwLock<HashMap<WalletAddress, User>>,
	unavailable: RwLock<HashSet<ItemId>>,
	unreadable: RwLock<HashSet<ItemId>>,
}

impl InMemoryRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Fail every write to `item_id` until `restore_item` is called.
	pub async fn make_unavailable(&self, item_id: &ItemId) {
		self.unavailable.write().await.insert(item_id.clone());
	}

	/// Also fail reads of `item_id` until `restore_item` is called.
	pub async fn make_unreadable(&self, item_id: &ItemId) {
		self.unreadable.write().await.insert(item_id.clone());
	}

	pub async fn restore_item(&self, item_id: &ItemId) {
		self.unavailable.write().await.remove(item_id);
		self.unreadable.write().await.remove(item_id);
	}

	async fn ensure_available(&self, item_id: &ItemId) -> Result<(), RegistryError> {
		if self.unavailable.read().await.contains(item_id) {
			return Err(RegistryError::Unavailable(format!(
				"write to item {} timed out",
				item_id
			)));
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl OwnershipRegistry for InMemoryRegistry {
	async fn list_items(&self, owner: Option<&WalletAddress>) -> Result<Vec<Item>, RegistryError> {
		let items = self.items.read().await;
		let mut listed: Vec<Item> = items
			.values()
			.filter(|item| owner.is_none_or(|o| &item.current_owner == o))
			.cloned()
			.collect();
		listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(listed)
	}

	async fn create_item(&self, item: NewItem) -> Result<Item, RegistryError> {
		item.validate()?;
		// Held until the insert so a concurrent delete_user cannot orphan the item.
		let users = self.users.read().await;
		if !users.contains_key(&item.owner) {
			return Err(RegistryError::user_not_found(&item.owner));
		}

		let now = Utc::now();
		let id = ItemId::parse(&random_object_id())
			.map_err(|e| RegistryError::Validation(e.to_string()))?;
		let created = Item {
			id: id.clone(),
			name: item.name,
			description: item.description,
			price: item.price,
			image_url: item.image_url,
			current_owner: item.owner,
			created_at: now,
			updated_at: now,
		};

		self.items.write().await.insert(id, created.clone());
		drop(users);
		info!("Listed item {} for {}", created.id, created.current_owner);
		Ok(created)
	}

	async fn get_item(&self, item_id: &ItemId) -> Result<Item, RegistryError> {
		if self.unreadable.read().await.contains(item_id) {
			return Err(RegistryError::Unavailable(format!(
				"read of item {} timed out",
				item_id
			)));
		}
		self.items
			.read()
			.await
			.get(item_id)
			.cloned()
			.ok_or_else(|| RegistryError::item_not_found(item_id))
	}

	async fn update_item(
		&self,
		item_id: &ItemId,
		update: ItemUpdate,
	) -> Result<Item, RegistryError> {
		self.ensure_available(item_id).await?;
		let mut items = self.items.write().await;
		let item = items
			.get_mut(item_id)
			.ok_or_else(|| RegistryError::item_not_found(item_id))?;

		update.apply_to(item);
		item.updated_at = Utc::now();
		Ok(item.clone())
	}

	async fn delete_item(&self, item_id: &ItemId) -> Result<(), RegistryError> {
		self.ensure_available(item_id).await?;
		self.items
			.write()
			.await
			.remove(item_id)
			.map(|_| ())
			.ok_or_else(|| RegistryError::item_not_found(item_id))
	}

	async fn set_owner(
		&self,
		item_id: &ItemId,
		new_owner: &WalletAddress,
		expected_current_owner: &WalletAddress,
	) -> Result<OwnerChange, RegistryError> {
		self.ensure_available(item_id).await?;
		let mut items = self.items.write().await;
		let item = items
			.get_mut(item_id)
			.ok_or_else(|| RegistryError::item_not_found(item_id))?;

		if &item.current_owner != expected_current_owner {
			return Err(RegistryError::Conflict {
				item_id: item_id.clone(),
				expected: expected_current_owner.clone(),
				actual: item.current_owner.clone(),
			});
		}

		let previous_owner = std::mem::replace(&mut item.current_owner, new_owner.clone());
		item.updated_at = Utc::now();
		debug!(
			"Item {} moved from {} to {}",
			item_id, previous_owner, new_owner
		);

		Ok(OwnerChange {
			item_id: item_id.clone(),
			previous_owner,
			new_owner: new_owner.clone(),
		})
	}

	async fn create_user(&self, user: NewUser) -> Result<User, RegistryError> {
		user.validate()?;
		let mut users = self.users.write().await;

		if users.contains_key(&user.wallet) {
			return Err(RegistryError::Duplicate(format!("wallet {}", user.wallet)));
		}
		if users
			.values()
			.any(|u| u.email.eq_ignore_ascii_case(&user.email))
		{
			return Err(RegistryError::Duplicate(format!("email {}", user.email)));
		}

		let now = Utc::now();
		let created = User {
			wallet: user.wallet.clone(),
			name: user.name,
			email: user.email,
			credential_hash: user.credential_hash,
			balance: DEFAULT_USER_BALANCE,
			role: Role::User,
			created_at: now,
			updated_at: now,
		};
		users.insert(user.wallet, created.clone());
		Ok(created)
	}

	async fn get_user(&self, wallet: &WalletAddress) -> Result<User, RegistryError> {
		self.users
			.read()
			.await
			.get(wallet)
			.cloned()
			.ok_or_else(|| RegistryError::user_not_found(wallet))
	}

	async fn list_users(&self) -> Result<Vec<User>, RegistryError> {
		let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
		users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
		Ok(users)
	}

	async fn update_user(
		&self,
		wallet: &WalletAddress,
		update: UserUpdate,
	) -> Result<User, RegistryError> {
		let mut users = self.users.write().await;
		let user = users
			.get_mut(wallet)
			.ok_or_else(|| RegistryError::user_not_found(wallet))?;

		update.apply_to(user);
		user.updated_at = Utc::now();
		Ok(user.clone())
	}

	async fn delete_user(&self, wallet: &WalletAddress) -> Result<usize, RegistryError> {
		// Lock order is users then items, as in create_item.
		let mut users = self.users.write().await;
		if users.remove(wallet).is_none() {
			return Err(RegistryError::user_not_found(wallet));
		}

		let mut items = self.items.write().await;
		let before = items.len();
		items.retain(|_, item| &item.current_owner != wallet);
		let removed = before - items.len();

		drop(items);
		drop(users);
		info!("Deleted user {} and {} owned items", wallet, removed);
		Ok(removed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::Usd;

	fn wallet(c: char) -> WalletAddress {
		WalletAddress::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap()
	}

	async fn registry_with_user(c: char) -> InMemoryRegistry {
		let registry = InMemoryRegistry::new();
		registry
			.create_user(NewUser {
				wallet: wallet(c),
				name: format!("user-{}", c),
				email: format!("{}@example.com", c),
				credential_hash: "hash".to_string(),
			})
			.await
			.unwrap();
		registry
	}

	fn listing(owner: WalletAddress) -> NewItem {
		NewItem {
			owner,
			name: "Lamp".to_string(),
			description: "Brass desk lamp".to_string(),
			price: Usd::from_dollars(20),
			image_url: "https://img.example/lamp.png".to_string(),
		}
	}

	#[tokio::test]
	async fn conditional_set_owner_detects_stale_expectation() {
		let registry = registry_with_user('a').await;
		let item = registry.create_item(listing(wallet('a'))).await.unwrap();

		registry
			.set_owner(&item.id, &wallet('b'), &wallet('a'))
			.await
			.unwrap();

		let err = registry
			.set_owner(&item.id, &wallet('c'), &wallet('a'))
			.await
			.unwrap_err();
		match err {
			RegistryError::Conflict { actual, .. } => assert_eq!(actual, wallet('b')),
			other => panic!("expected conflict, got {other:?}"),
		}
		assert_eq!(registry.get_owner(&item.id).await.unwrap(), wallet('b'));
	}

	#[tokio::test]
	async fn deleting_user_cascades_to_owned_items() {
		let registry = registry_with_user('a').await;
		registry.create_item(listing(wallet('a'))).await.unwrap();
		registry.create_item(listing(wallet('a'))).await.unwrap();

		assert_eq!(registry.delete_user(&wallet('a')).await.unwrap(), 2);
		assert!(registry.list_items(None).await.unwrap().is_empty());
		assert!(registry.get_user(&wallet('a')).await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn duplicate_email_is_rejected() {
		let registry = registry_with_user('a').await;
		let err = registry
			.create_user(NewUser {
				wallet: wallet('b'),
				name: "other".to_string(),
				email: "A@example.com".to_string(),
				credential_hash: "hash".to_string(),
			})
			.await
			.unwrap_err();
		assert!(matches!(err, RegistryError::Duplicate(_)));
	}

	#[tokio::test]
	async fn owner_edit_keeps_blank_fields() {
		let registry = registry_with_user('a').await;
		let item = registry.create_item(listing(wallet('a'))).await.unwrap();

		let updated = registry
			.update_item(
				&item.id,
				ItemUpdate {
					name: Some("  ".to_string()),
					price: Some(Usd::from_dollars(25)),
					..ItemUpdate::default()
				},
			)
			.await
			.unwrap();
		assert_eq!(updated.name, "Lamp");
		assert_eq!(updated.price, Usd::from_dollars(25));
		assert_eq!(updated.current_owner, wallet('a'));
	}

	#[tokio::test]
	async fn profile_edit_keeps_blank_fields() {
		let registry = registry_with_user('a').await;

		let updated = registry
			.update_user(
				&wallet('a'),
				UserUpdate {
					name: Some("Alice".to_string()),
					credential_hash: Some(String::new()),
					balance: Some(250),
				},
			)
			.await
			.unwrap();
		assert_eq!(updated.name, "Alice");
		assert_eq!(updated.credential_hash, "hash");
		assert_eq!(updated.balance, 250);
		assert_eq!(registry.get_user(&wallet('a')).await.unwrap(), updated);

		let err = registry
			.update_user(&wallet('f'), UserUpdate::default())
			.await
			.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn item_creation_racing_user_deletion_leaves_no_orphan() {
		let registry = registry_with_user('a').await;

		let owner = wallet('a');
		let (created, deleted) = tokio::join!(
			registry.create_item(listing(wallet('a'))),
			registry.delete_user(&owner),
		);

		assert_eq!(deleted.unwrap(), created.is_ok() as usize);
		assert!(registry.list_items(None).await.unwrap().is_empty());
	}
}
