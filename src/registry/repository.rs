use super::types::*;
use crate::types::{ItemId, WalletAddress};

/// Off-chain registry of items, their current owners, and users.
///
/// Every write touches a single record and commits on its own; there is no cross-item transaction.
#[async_trait::async_trait]
pub trait OwnershipRegistry: Send + Sync {
	/// Items newest first, optionally only those owned by `owner`
	async fn list_items(&self, owner: Option<&WalletAddress>) -> Result<Vec<Item>, RegistryError>;

	async fn create_item(&self, item: NewItem) -> Result<Item, RegistryError>;

	async fn get_item(&self, item_id: &ItemId) -> Result<Item, RegistryError>;

	/// Owner edit of the listing fields. Never changes `current_owner`.
	async fn update_item(&self, item_id: &ItemId, update: ItemUpdate)
	-> Result<Item, RegistryError>;

	async fn delete_item(&self, item_id: &ItemId) -> Result<(), RegistryError>;

	async fn get_owner(&self, item_id: &ItemId) -> Result<WalletAddress, RegistryError> {
		Ok(self.get_item(item_id).await?.current_owner)
	}

	/// Move `item_id` to `new_owner` only if it is still owned by `expected_current_owner`.
	///
	/// Fails with `RegistryError::Conflict` when the stored owner differs.
	async fn set_owner(
		&self,
		item_id: &ItemId,
		new_owner: &WalletAddress,
		expected_current_owner: &WalletAddress,
	) -> Result<OwnerChange, RegistryError>;

	async fn create_user(&self, user: NewUser) -> Result<User, RegistryError>;

	async fn get_user(&self, wallet: &WalletAddress) -> Result<User, RegistryError>;

	async fn list_users(&self) -> Result<Vec<User>, RegistryError>;

	/// Profile edit: display name, credential hash and cached balance.
	async fn update_user(
		&self,
		wallet: &WalletAddress,
		update: UserUpdate,
	) -> Result<User, RegistryError>;

	/// Remove a user and every item they own. Returns the number of items removed.
	async fn delete_user(&self, wallet: &WalletAddress) -> Result<usize, RegistryError>;
}
