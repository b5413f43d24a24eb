//!
//! HTTP client for the registry service.
//!
//! Maps the registry's REST surface onto `OwnershipRegistry`. Status codes carry the error taxonomy:
//! 404 is `NotFound`, 409 on an owner update is `Conflict`, 400 is `Validation`. Timeouts are supplied
//! by the caller; the engine imposes none of its own.

use super::repository::OwnershipRegistry;
use super::types::*;
use crate::types::{ItemId, WalletAddress};

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Deserialize)]
struct ItemsEnvelope {
	orders: Vec<Item>,
}

#[derive(Deserialize)]
struct CreatedItemEnvelope {
	order: Item,
}

#[derive(Deserialize)]
struct UsersEnvelope {
	users: Vec<User>,
}

#[derive(Deserialize)]
struct CreatedUserEnvelope {
	user: User,
}

#[derive(Deserialize)]
struct DeletedUserEnvelope {
	deleted_items: usize,
}

#[derive(Deserialize)]
struct ConflictBody {
	current_owner: WalletAddress,
}

#[derive(Deserialize, Default)]
struct MessageBody {
	#[serde(default)]
	message: String,
}

#[derive(Serialize)]
struct UserUpdateBody<'a> {
	wallet: &'a WalletAddress,
	#[serde(flatten)]
	update: &'a UserUpdate,
}

#[derive(Deserialize)]
struct UpdatedUserEnvelope {
	user: User,
}

#[derive(Serialize)]
struct OwnerUpdateBody<'a> {
	new_owner: &'a WalletAddress,
	expected_current_owner: &'a WalletAddress,
}

/// Registry REST client
#[derive(Clone)]
pub struct HttpRegistryClient {
	http_client: Client,
	base_url: String,
}

impl HttpRegistryClient {
	/// Create a new registry client.
	///
	/// # Arguments
	/// * `base_url` - Root URL of the registry service.
	/// * `timeout` - Timeout for every registry request, chosen by the caller.
	pub fn new(base_url: String, timeout: Duration) -> Result<Self, RegistryError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	/// Turn a non-success response into the matching registry error.
	async fn error_for(
		response: Response,
		kind: &'static str,
		id: &str,
	) -> RegistryError {
		let status = response.status();
		let body: MessageBody = response.json().await.unwrap_or_default();

		match status {
			StatusCode::NOT_FOUND => RegistryError::NotFound {
				kind,
				id: id.to_string(),
			},
			StatusCode::BAD_REQUEST => RegistryError::Validation(body.message),
			StatusCode::CONFLICT => RegistryError::Duplicate(body.message),
			other => {
				warn!("Registry returned {} for {} {}: {}", other, kind, id, body.message);
				RegistryError::Unavailable(format!("HTTP error: {}", other))
			}
		}
	}

	async fn read<T: DeserializeOwned>(
		response: Response,
		kind: &'static str,
		id: &str,
	) -> Result<T, RegistryError> {
		if !response.status().is_success() {
			return Err(Self::error_for(response, kind, id).await);
		}
		Ok(response.json().await?)
	}
}

#[async_trait::async_trait]
impl OwnershipRegistry for HttpRegistryClient {
	async fn list_items(&self, owner: Option<&WalletAddress>) -> Result<Vec<Item>, RegistryError> {
		let mut request = self.http_client.get(self.url("/api/order"));
		if let Some(owner) = owner {
			request = request.query(&[("owner", owner.as_str())]);
		}

		let response = request.send().await?;
		let envelope: ItemsEnvelope = Self::read(response, "items", "*").await?;
		Ok(envelope.orders)
	}

	async fn create_item(&self, item: NewItem) -> Result<Item, RegistryError> {
		item.validate()?;
		let response = self
			.http_client
			.post(self.url("/api/order"))
			.json(&item)
			.send()
			.await?;

		let envelope: CreatedItemEnvelope = Self::read(response, "user", item.owner.as_str()).await?;
		Ok(envelope.order)
	}

	async fn get_item(&self, item_id: &ItemId) -> Result<Item, RegistryError> {
		debug!("Fetching item {}", item_id);
		let response = self
			.http_client
			.get(self.url(&format!("/api/order/{}", item_id)))
			.send()
			.await?;
		Self::read(response, "item", item_id.as_str()).await
	}

	async fn update_item(
		&self,
		item_id: &ItemId,
		update: ItemUpdate,
	) -> Result<Item, RegistryError> {
		let response = self
			.http_client
			.put(self.url(&format!("/api/order/{}", item_id)))
			.json(&update)
			.send()
			.await?;
		Self::read(response, "item", item_id.as_str()).await
	}

	async fn delete_item(&self, item_id: &ItemId) -> Result<(), RegistryError> {
		let response = self
			.http_client
			.delete(self.url(&format!("/api/order/{}", item_id)))
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(Self::error_for(response, "item", item_id.as_str()).await);
		}
		Ok(())
	}

	async fn set_owner(
		&self,
		item_id: &ItemId,
		new_owner: &WalletAddress,
		expected_current_owner: &WalletAddress,
	) -> Result<OwnerChange, RegistryError> {
		let response = self
			.http_client
			.post(self.url(&format!("/api/order/{}/owner", item_id)))
			.json(&OwnerUpdateBody {
				new_owner,
				expected_current_owner,
			})
			.send()
			.await?;

		if response.status() == StatusCode::CONFLICT {
			let body: ConflictBody = response.json().await?;
			return Err(RegistryError::Conflict {
				item_id: item_id.clone(),
				expected: expected_current_owner.clone(),
				actual: body.current_owner,
			});
		}

		Self::read(response, "item", item_id.as_str()).await
	}

	async fn create_user(&self, user: NewUser) -> Result<User, RegistryError> {
		user.validate()?;
		let response = self
			.http_client
			.post(self.url("/api/register"))
			.json(&user)
			.send()
			.await?;

		let envelope: CreatedUserEnvelope = Self::read(response, "user", user.wallet.as_str()).await?;
		Ok(envelope.user)
	}

	async fn get_user(&self, wallet: &WalletAddress) -> Result<User, RegistryError> {
		let response = self
			.http_client
			.get(self.url(&format!("/api/user/{}", wallet)))
			.send()
			.await?;
		Self::read(response, "user", wallet.as_str()).await
	}

	async fn list_users(&self) -> Result<Vec<User>, RegistryError> {
		let response = self
			.http_client
			.get(self.url("/api/user/allUsers"))
			.send()
			.await?;
		let envelope: UsersEnvelope = Self::read(response, "users", "*").await?;
		Ok(envelope.users)
	}

	async fn update_user(
		&self,
		wallet: &WalletAddress,
		update: UserUpdate,
	) -> Result<User, RegistryError> {
		let response = self
			.http_client
			.post(self.url("/api/user/updateNamePass"))
			.json(&UserUpdateBody {
				wallet,
				update: &update,
			})
			.send()
			.await?;
		let envelope: UpdatedUserEnvelope = Self::read(response, "user", wallet.as_str()).await?;
		Ok(envelope.user)
	}

	async fn delete_user(&self, wallet: &WalletAddress) -> Result<usize, RegistryError> {
		let response = self
			.http_client
			.delete(self.url(&format!("/api/user/{}", wallet)))
			.json(&json!({ "cascade": true }))
			.send()
			.await?;
		let envelope: DeletedUserEnvelope = Self::read(response, "user", wallet.as_str()).await?;
		Ok(envelope.deleted_items)
	}
}
