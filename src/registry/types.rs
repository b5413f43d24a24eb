use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ItemId, Usd, WalletAddress};

/// Starting cached balance of a newly registered user
pub const DEFAULT_USER_BALANCE: u64 = 100;

/// A listed item and its current owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
	pub id: ItemId,
	pub name: String,
	pub description: String,
	pub price: Usd,
	pub image_url: String,
	pub current_owner: WalletAddress,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// Fields for listing a new item. Every field is required.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
	pub owner: WalletAddress,
	pub name: String,
	pub description: String,
	pub price: Usd,
	pub image_url: String,
}

impl NewItem {
	pub fn validate(&self) -> Result<(), RegistryError> {
		for (field, value) in [
			("name", &self.name),
			("description", &self.description),
			("image_url", &self.image_url),
		] {
			if value.trim().is_empty() {
				return Err(RegistryError::Validation(format!("{} is required", field)));
			}
		}
		Ok(())
	}
}

/// Owner edit of an item's listing. Ownership itself only moves through settlement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemUpdate {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub price: Option<Usd>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub image_url: Option<String>,
}

impl ItemUpdate {
	/// Apply non-empty fields; blank strings keep the current value.
	pub fn apply_to(&self, item: &mut Item) {
		fn take(target: &mut String, value: &Option<String>) {
			if let Some(v) = value.as_ref().filter(|v| !v.trim().is_empty()) {
				*target = v.clone();
			}
		}

		take(&mut item.name, &self.name);
		take(&mut item.description, &self.description);
		take(&mut item.image_url, &self.image_url);
		if let Some(price) = self.price {
			item.price = price;
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	#[default]
	User,
	Admin,
}

/// A registered user, keyed by wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	pub wallet: WalletAddress,
	pub name: String,
	pub email: String,
	/// Hash produced by the authentication service; never interpreted here
	pub credential_hash: String,
	pub balance: u64,
	pub role: Role,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
	pub wallet: WalletAddress,
	pub name: String,
	pub email: String,
	pub credential_hash: String,
}

impl NewUser {
	pub fn validate(&self) -> Result<(), RegistryError> {
		if self.name.trim().is_empty() {
			return Err(RegistryError::Validation("name is required".to_string()));
		}
		if !self.email.contains('@') {
			return Err(RegistryError::Validation(format!(
				"'{}' is not an email address",
				self.email
			)));
		}
		if self.credential_hash.is_empty() {
			return Err(RegistryError::Validation(
				"credential hash is required".to_string(),
			));
		}
		Ok(())
	}
}

/// Profile edit of a user. The wallet and email never change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Replacement hash from the authentication service
	#[serde(skip_serializing_if = "Option::is_none")]
	pub credential_hash: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub balance: Option<u64>,
}

impl UserUpdate {
	/// Apply non-empty fields; blank strings keep the current value.
	pub fn apply_to(&self, user: &mut User) {
		if let Some(name) = self.name.as_ref().filter(|v| !v.trim().is_empty()) {
			user.name = name.clone();
		}
		if let Some(hash) = self.credential_hash.as_ref().filter(|v| !v.is_empty()) {
			user.credential_hash = hash.clone();
		}
		if let Some(balance) = self.balance {
			user.balance = balance;
		}
	}
}

/// Result of a conditional owner write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerChange {
	pub item_id: ItemId,
	pub previous_owner: WalletAddress,
	pub new_owner: WalletAddress,
}

/// Error types for registry reads and writes
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("{kind} not found: {id}")]
	NotFound { kind: &'static str, id: String },

	#[error(
		"owner of item {item_id} is {actual}, expected {expected}; a concurrent settlement won the race"
	)]
	Conflict {
		item_id: ItemId,
		expected: WalletAddress,
		actual: WalletAddress,
	},

	#[error("{0} already registered")]
	Duplicate(String),

	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Registry unavailable: {0}")]
	Unavailable(String),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}

impl RegistryError {
	pub fn item_not_found(id: &ItemId) -> Self {
		RegistryError::NotFound {
			kind: "item",
			id: id.to_string(),
		}
	}

	pub fn user_not_found(wallet: &WalletAddress) -> Self {
		RegistryError::NotFound {
			kind: "user",
			id: wallet.to_string(),
		}
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, RegistryError::NotFound { .. })
	}
}
