//! Durable record of committed-but-incomplete settlements.
//!
//! A `PendingSettlement` is written only after the ledger has accepted the irreversible step of a
//! settlement, and lists the follow-up steps that still have to succeed. The recovery service replays
//! those steps and removes the record once nothing is left.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::reconciliation::OwnershipUpdate;
use crate::error::SettlementError;
use crate::ledger::TradeSubmission;
use crate::types::{ExchangeId, TxHash, WalletAddress};

const FILE_PREFIX: &str = "pending_";
const FILE_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
	Exchange,
	Trade,
	Donation,
}

/// A follow-up step left outstanding after a ledger commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PendingStep {
	/// `updateTransactionHash` after a confirm or reject
	RecordExchangeHash {
		exchange_id: ExchangeId,
		signer: WalletAddress,
		tx_hash: TxHash,
	},
	/// `recordTrade` for a payment that was already mined
	RecordTrade {
		buyer: WalletAddress,
		trade: TradeSubmission,
	},
	/// `registerTxHash` for a donation that was already mined
	RegisterDonationHash {
		donor: WalletAddress,
		donation_id: u64,
		tx_hash: TxHash,
	},
	/// Registry owner updates the ledger has already authorized
	ApplyOwnership { updates: Vec<OwnershipUpdate> },
}

/// Committed settlement with outstanding steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
	/// Stable key derived from the ledger identifiers, safe to use in a file name
	pub key: String,
	pub kind: SettlementKind,
	pub steps: Vec<PendingStep>,
	pub last_error: String,
	pub attempts: u32,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl PendingSettlement {
	pub fn new(
		key: String,
		kind: SettlementKind,
		steps: Vec<PendingStep>,
		last_error: String,
	) -> Self {
		let now = Utc::now();
		Self {
			key,
			kind,
			steps,
			last_error,
			attempts: 1,
			created_at: now,
			updated_at: now,
		}
	}

	pub fn exchange_key(exchange_id: ExchangeId) -> String {
		format!("exchange-{}", exchange_id)
	}

	/// Trades are keyed by their payment, the one identifier that exists before `recordTrade`.
	pub fn trade_key(payment_tx: &TxHash) -> String {
		format!("trade-{}", payment_tx)
	}

	pub fn donation_key(donation_id: u64) -> String {
		format!("donation-{}", donation_id)
	}
}

/// Repository for pending settlement persistence
#[async_trait::async_trait]
pub trait PendingSettlementRepository: Send + Sync {
	/// Insert or replace the record with the same key.
	async fn save(&self, pending: &PendingSettlement) -> Result<(), SettlementError>;
	async fn load(&self, key: &str) -> Result<Option<PendingSettlement>, SettlementError>;
	/// All records, oldest first
	async fn list(&self) -> Result<Vec<PendingSettlement>, SettlementError>;
	/// Remove a record. Removing a missing key is not an error.
	async fn remove(&self, key: &str) -> Result<(), SettlementError>;
}

/// File-based implementation of PendingSettlementRepository
pub struct FilePendingSettlementRepository {
	data_dir: PathBuf,
}

impl FilePendingSettlementRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_filename(&self, key: &str) -> PathBuf {
		self.data_dir
			.join(format!("{}{}{}", FILE_PREFIX, key, FILE_SUFFIX))
	}
}

#[async_trait::async_trait]
impl PendingSettlementRepository for FilePendingSettlementRepository {
	async fn save(&self, pending: &PendingSettlement) -> Result<(), SettlementError> {
		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.map_err(|e| {
				SettlementError::Persistence(format!("Failed to create data directory: {}", e))
			})?;

		let content = serde_json::to_string_pretty(pending).map_err(|e| {
			SettlementError::Persistence(format!("Failed to serialize pending settlement: {}", e))
		})?;

		let filename = self.get_filename(&pending.key);
		tokio::fs::write(&filename, content).await.map_err(|e| {
			SettlementError::Persistence(format!("Failed to write pending settlement file: {}", e))
		})?;

		info!("Saved pending settlement {} to {:?}", pending.key, filename);
		Ok(())
	}

	async fn load(&self, key: &str) -> Result<Option<PendingSettlement>, SettlementError> {
		let filename = self.get_filename(key);
		if !tokio::fs::try_exists(&filename).await? {
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await.map_err(|e| {
			SettlementError::Persistence(format!("Failed to read pending settlement file: {}", e))
		})?;

		let pending = serde_json::from_str(&content).map_err(|e| {
			SettlementError::Persistence(format!("Failed to parse {:?}: {}", filename, e))
		})?;
		Ok(Some(pending))
	}

	async fn list(&self) -> Result<Vec<PendingSettlement>, SettlementError> {
		if !tokio::fs::try_exists(&self.data_dir).await? {
			return Ok(Vec::new());
		}

		let mut entries = tokio::fs::read_dir(&self.data_dir).await.map_err(|e| {
			SettlementError::Persistence(format!("Failed to read directory: {}", e))
		})?;

		let mut settlements = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(|e| {
			SettlementError::Persistence(format!("Failed to read directory entry: {}", e))
		})? {
			let path = entry.path();
			let Some(key) = path
				.file_name()
				.and_then(|f| f.to_str())
				.and_then(|f| f.strip_prefix(FILE_PREFIX))
				.and_then(|f| f.strip_suffix(FILE_SUFFIX))
			else {
				continue;
			};

			match self.load(key).await {
				Ok(Some(pending)) => settlements.push(pending),
				Ok(None) => {}
				// One corrupt file must not hide the others.
				Err(e) => warn!("Skipping {:?}: {}", path, e),
			}
		}

		settlements.sort_by_key(|p| p.created_at);
		debug!("Found {} pending settlements", settlements.len());
		Ok(settlements)
	}

	async fn remove(&self, key: &str) -> Result<(), SettlementError> {
		let filename = self.get_filename(key);
		match tokio::fs::remove_file(&filename).await {
			Ok(()) => {
				info!("Removed pending settlement {:?}", filename);
				Ok(())
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(SettlementError::Persistence(format!(
				"Failed to remove pending settlement file: {}",
				e
			))),
		}
	}
}

/// In-memory implementation of PendingSettlementRepository
#[derive(Default)]
pub struct InMemoryPendingSettlementRepository {
	settlements: RwLock<BTreeMap<String, PendingSettlement>>,
}

impl InMemoryPendingSettlementRepository {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait::async_trait]
impl PendingSettlementRepository for InMemoryPendingSettlementRepository {
	async fn save(&self, pending: &PendingSettlement) -> Result<(), SettlementError> {
		self.settlements
			.write()
			.await
			.insert(pending.key.clone(), pending.clone());
		Ok(())
	}

	async fn load(&self, key: &str) -> Result<Option<PendingSettlement>, SettlementError> {
		Ok(self.settlements.read().await.get(key).cloned())
	}

	async fn list(&self) -> Result<Vec<PendingSettlement>, SettlementError> {
		let mut settlements: Vec<_> = self.settlements.read().await.values().cloned().collect();
		settlements.sort_by_key(|p| p.created_at);
		Ok(settlements)
	}

	async fn remove(&self, key: &str) -> Result<(), SettlementError> {
		self.settlements.write().await.remove(key);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::ItemId;

	fn sample() -> PendingSettlement {
		let wallet = |c: char| WalletAddress::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap();
		PendingSettlement::new(
			PendingSettlement::exchange_key(ExchangeId(4)),
			SettlementKind::Exchange,
			vec![
				PendingStep::RecordExchangeHash {
					exchange_id: ExchangeId(4),
					signer: wallet('b'),
					tx_hash: TxHash::from_bytes([7u8; 32]),
				},
				PendingStep::ApplyOwnership {
					updates: vec![OwnershipUpdate::new(
						ItemId::parse("item-x").unwrap(),
						wallet('b'),
						wallet('a'),
					)],
				},
			],
			"registry unavailable".to_string(),
		)
	}

	#[tokio::test]
	async fn file_repository_round_trips_and_removes() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FilePendingSettlementRepository::new(dir.path().join("pending"));
		let pending = sample();

		repo.save(&pending).await.unwrap();
		assert!(dir.path().join("pending/pending_exchange-4.json").exists());
		assert_eq!(repo.load("exchange-4").await.unwrap(), Some(pending.clone()));
		assert_eq!(repo.list().await.unwrap(), vec![pending]);

		repo.remove("exchange-4").await.unwrap();
		repo.remove("exchange-4").await.unwrap();
		assert!(repo.list().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn corrupt_file_is_skipped_by_list() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FilePendingSettlementRepository::new(dir.path().to_path_buf());
		repo.save(&sample()).await.unwrap();
		tokio::fs::write(dir.path().join("pending_broken.json"), "{not json")
			.await
			.unwrap();

		let listed = repo.list().await.unwrap();
		assert_eq!(listed.len(), 1);
		assert!(repo.load("broken").await.is_err());
	}

	#[tokio::test]
	async fn missing_directory_lists_nothing() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FilePendingSettlementRepository::new(dir.path().join("absent"));
		assert!(repo.list().await.unwrap().is_empty());
		assert_eq!(repo.load("exchange-1").await.unwrap(), None);
	}
}
