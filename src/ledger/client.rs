//!
//! Call/query client for the settlement ledger.
//!
//! `LedgerClient` is the typed surface every settlement service talks to. `HttpLedgerClient` drives a
//! JSON-RPC style ledger gateway: submissions are forwarded to the signer and block until mined, queries
//! are read-only and therefore retried with exponential backoff. Submissions are never retried here;
//! whether a failed submission may be resubmitted is the caller's decision.

use super::types::*;
use crate::types::{ExchangeId, ItemId, NativeAmount, TxHash, Usd, WalletAddress};

use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// EIP-1193 "user rejected request"
const SIGNER_REJECTED_CODE: i64 = 4001;
/// JSON-RPC code used by execution clients for reverted calls
const EXECUTION_REVERTED_CODE: i64 = 3;

/// Arguments of a `recordTrade` submission. The buyer is the signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSubmission {
	pub seller: WalletAddress,
	pub item_id: ItemId,
	pub price_usd: Usd,
	pub price_native: NativeAmount,
	/// Hash of the payment transfer being recorded
	pub payment_tx: TxHash,
}

/// Typed call/query surface over the external ledger.
///
/// Mutating methods take the signing wallet explicitly and return once the transaction is mined.
#[async_trait]
pub trait LedgerClient: Send + Sync {
	async fn request_exchange(
		&self,
		signer: &WalletAddress,
		counterparty: &WalletAddress,
		offered_item: &ItemId,
		requested_item: &ItemId,
	) -> Result<Submitted<ExchangeId>, LedgerError>;

	async fn confirm_exchange(
		&self,
		signer: &WalletAddress,
		exchange_id: ExchangeId,
	) -> Result<TxReceipt, LedgerError>;

	async fn reject_exchange(
		&self,
		signer: &WalletAddress,
		exchange_id: ExchangeId,
	) -> Result<TxReceipt, LedgerError>;

	async fn update_transaction_hash(
		&self,
		signer: &WalletAddress,
		exchange_id: ExchangeId,
		tx_hash: &TxHash,
	) -> Result<TxReceipt, LedgerError>;

	async fn get_exchange(&self, exchange_id: ExchangeId)
	-> Result<Option<ExchangeEvent>, LedgerError>;

	async fn get_all_exchanges(&self) -> Result<Vec<ExchangeEvent>, LedgerError>;

	/// Pending requests addressed to `wallet` as counterparty
	async fn get_pending_exchanges(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<ExchangeEvent>, LedgerError>;

	/// Every request `wallet` took part in, any status
	async fn get_exchange_history(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<ExchangeEvent>, LedgerError>;

	/// Native currency payment
	async fn transfer(
		&self,
		from: &WalletAddress,
		to: &WalletAddress,
		amount: NativeAmount,
	) -> Result<TxReceipt, LedgerError>;

	async fn record_trade(
		&self,
		buyer: &WalletAddress,
		trade: &TradeSubmission,
	) -> Result<Submitted<u64>, LedgerError>;

	async fn get_all_trades(&self) -> Result<Vec<TradeEvent>, LedgerError>;

	async fn get_trades_by_buyer(
		&self,
		buyer: &WalletAddress,
	) -> Result<Vec<TradeEvent>, LedgerError>;

	async fn donate(
		&self,
		donor: &WalletAddress,
		amount: NativeAmount,
		reported_usd: Usd,
	) -> Result<Submitted<u64>, LedgerError>;

	async fn register_tx_hash(
		&self,
		donor: &WalletAddress,
		tx_hash: &TxHash,
	) -> Result<TxReceipt, LedgerError>;

	async fn get_all_donations(&self) -> Result<Vec<DonationEvent>, LedgerError>;

	async fn get_donations_by_address(
		&self,
		donor: &WalletAddress,
	) -> Result<Vec<DonationEvent>, LedgerError>;
}

/// Backoff settings for read-only ledger queries
#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub initial_interval: Duration,
	pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			initial_interval: Duration::from_millis(200),
			max_elapsed_time: Duration::from_secs(10),
		}
	}
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
	#[serde(default)]
	result: Option<Value>,
	#[serde(default)]
	error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
	code: i64,
	message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmissionResult {
	transaction_hash: TxHash,
	block_number: u64,
	#[serde(default)]
	return_value: Value,
}

/// Ledger gateway client
#[derive(Clone)]
pub struct HttpLedgerClient {
	/// The underlying HTTP client. Carries no overall timeout: submissions wait on external signing.
	http_client: Client,
	/// The gateway RPC endpoint.
	gateway_url: String,
	/// Per-request timeout applied to queries only.
	query_timeout: Duration,
	retry: RetryConfig,
}

impl HttpLedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `gateway_url` - The RPC endpoint of the ledger gateway.
	/// * `query_timeout` - Timeout applied to each read-only query attempt.
	pub fn new(gateway_url: String, query_timeout: Duration) -> Result<Self, LedgerError> {
		let http_client = Client::builder().build()?;

		Ok(Self {
			http_client,
			gateway_url,
			query_timeout,
			retry: RetryConfig::default(),
		})
	}

	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			initial_interval: self.retry.initial_interval,
			max_elapsed_time: Some(self.retry.max_elapsed_time),
			..ExponentialBackoff::default()
		}
	}

	fn classify_rpc_error(operation: LedgerOperation, body: RpcErrorBody) -> LedgerError {
		if body.code == SIGNER_REJECTED_CODE {
			LedgerError::SignerRejected {
				operation,
				reason: body.message,
			}
		} else if body.code == EXECUTION_REVERTED_CODE
			|| body.message.to_ascii_lowercase().contains("revert")
		{
			LedgerError::Reverted {
				operation,
				reason: body.message,
			}
		} else {
			LedgerError::Submission {
				operation,
				reason: format!("gateway error {}: {}", body.code, body.message),
			}
		}
	}

	/// Submit a state-changing operation and wait for it to be mined.
	async fn submit(
		&self,
		operation: LedgerOperation,
		signer: &WalletAddress,
		params: Value,
	) -> Result<(Value, TxReceipt), LedgerError> {
		debug_assert!(operation.is_mutating());
		info!("Submitting {} signed by {}", operation, signer);

		let request_body = json!({
			"method": operation.method_name(),
			"from": signer,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.gateway_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await
			.map_err(|e| LedgerError::Submission {
				operation,
				reason: e.to_string(),
			})?;

		if !response.status().is_success() {
			return Err(LedgerError::Submission {
				operation,
				reason: format!("HTTP error: {}", response.status()),
			});
		}

		let envelope: RpcEnvelope = response.json().await?;
		if let Some(rpc_error) = envelope.error {
			let err = Self::classify_rpc_error(operation, rpc_error);
			error!("{}", err);
			return Err(err);
		}

		let result = envelope.result.ok_or(LedgerError::NoData)?;
		let submission: SubmissionResult = serde_json::from_value(result)?;

		info!(
			"{} mined in block {} as {}",
			operation, submission.block_number, submission.transaction_hash
		);

		Ok((
			submission.return_value,
			TxReceipt {
				tx_hash: submission.transaction_hash,
				block_number: submission.block_number,
			},
		))
	}

	async fn query_once(
		&self,
		operation: LedgerOperation,
		request_body: &Value,
	) -> Result<Value, backoff::Error<LedgerError>> {
		let response = self
			.http_client
			.post(&self.gateway_url)
			.header("Content-Type", "application/json")
			.timeout(self.query_timeout)
			.json(request_body)
			.send()
			.await
			.map_err(|e| {
				warn!("{} query failed, will retry: {}", operation, e);
				backoff::Error::transient(LedgerError::HttpError(e))
			})?;

		let status = response.status();
		if status.is_server_error() {
			warn!("{} query returned {}, will retry", operation, status);
			return Err(backoff::Error::transient(LedgerError::Submission {
				operation,
				reason: format!("HTTP error: {}", status),
			}));
		}
		if !status.is_success() {
			return Err(backoff::Error::permanent(LedgerError::Submission {
				operation,
				reason: format!("HTTP error: {}", status),
			}));
		}

		let envelope: RpcEnvelope = response
			.json()
			.await
			.map_err(|e| backoff::Error::permanent(LedgerError::HttpError(e)))?;

		if let Some(rpc_error) = envelope.error {
			return Err(backoff::Error::permanent(Self::classify_rpc_error(
				operation, rpc_error,
			)));
		}

		Ok(envelope.result.unwrap_or(Value::Null))
	}

	/// Run a read-only query, retrying transient failures.
	async fn query<T: DeserializeOwned>(
		&self,
		operation: LedgerOperation,
		params: Value,
	) -> Result<T, LedgerError> {
		debug_assert!(!operation.is_mutating());
		debug!("Querying {} with {}", operation, params);

		let request_body = json!({
			"method": operation.method_name(),
			"params": params,
		});
		let body = &request_body;

		let result = retry(self.backoff(), || async move {
			self.query_once(operation, body).await
		})
		.await?;

		Ok(serde_json::from_value(result)?)
	}

	fn validate_all<R, E>(records: Vec<R>) -> Result<Vec<E>, LedgerError>
	where
		E: TryFrom<R, Error = LedgerError>,
	{
		records.into_iter().map(E::try_from).collect()
	}

	fn return_id(operation: LedgerOperation, value: &Value) -> Result<u64, LedgerError> {
		value
			.as_u64()
			.or_else(|| value.as_str().and_then(|s| s.parse().ok()))
			.ok_or_else(|| LedgerError::Submission {
				operation,
				reason: format!("expected a numeric return value, got {}", value),
			})
	}
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
	async fn request_exchange(
		&self,
		signer: &WalletAddress,
		counterparty: &WalletAddress,
		offered_item: &ItemId,
		requested_item: &ItemId,
	) -> Result<Submitted<ExchangeId>, LedgerError> {
		let operation = LedgerOperation::RequestExchange;
		let (value, receipt) = self
			.submit(
				operation,
				signer,
				json!([counterparty, offered_item, requested_item]),
			)
			.await?;

		Ok(Submitted {
			value: ExchangeId(Self::return_id(operation, &value)?),
			receipt,
		})
	}

	async fn confirm_exchange(
		&self,
		signer: &WalletAddress,
		exchange_id: ExchangeId,
	) -> Result<TxReceipt, LedgerError> {
		self.submit(LedgerOperation::ConfirmExchange, signer, json!([exchange_id]))
			.await
			.map(|(_, receipt)| receipt)
	}

	async fn reject_exchange(
		&self,
		signer: &WalletAddress,
		exchange_id: ExchangeId,
	) -> Result<TxReceipt, LedgerError> {
		self.submit(LedgerOperation::RejectExchange, signer, json!([exchange_id]))
			.await
			.map(|(_, receipt)| receipt)
	}

	async fn update_transaction_hash(
		&self,
		signer: &WalletAddress,
		exchange_id: ExchangeId,
		tx_hash: &TxHash,
	) -> Result<TxReceipt, LedgerError> {
		self.submit(
			LedgerOperation::UpdateTransactionHash,
			signer,
			json!([exchange_id, tx_hash]),
		)
		.await
		.map(|(_, receipt)| receipt)
	}

	async fn get_exchange(
		&self,
		exchange_id: ExchangeId,
	) -> Result<Option<ExchangeEvent>, LedgerError> {
		let raw: Option<RawExchangeRecord> = self
			.query(LedgerOperation::GetExchange, json!([exchange_id]))
			.await?;
		raw.map(ExchangeEvent::try_from).transpose()
	}

	async fn get_all_exchanges(&self) -> Result<Vec<ExchangeEvent>, LedgerError> {
		let raw: Vec<RawExchangeRecord> =
			self.query(LedgerOperation::GetAllExchanges, json!([])).await?;
		Self::validate_all(raw)
	}

	async fn get_pending_exchanges(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<ExchangeEvent>, LedgerError> {
		let raw: Vec<RawExchangeRecord> = self
			.query(LedgerOperation::GetPendingExchanges, json!([wallet]))
			.await?;
		Self::validate_all(raw)
	}

	async fn get_exchange_history(
		&self,
		wallet: &WalletAddress,
	) -> Result<Vec<ExchangeEvent>, LedgerError> {
		let raw: Vec<RawExchangeRecord> = self
			.query(LedgerOperation::GetExchangeHistory, json!([wallet]))
			.await?;
		Self::validate_all(raw)
	}

	async fn transfer(
		&self,
		from: &WalletAddress,
		to: &WalletAddress,
		amount: NativeAmount,
	) -> Result<TxReceipt, LedgerError> {
		self.submit(LedgerOperation::Transfer, from, json!([to, amount]))
			.await
			.map(|(_, receipt)| receipt)
	}

	async fn record_trade(
		&self,
		buyer: &WalletAddress,
		trade: &TradeSubmission,
	) -> Result<Submitted<u64>, LedgerError> {
		let operation = LedgerOperation::RecordTrade;
		let (value, receipt) = self
			.submit(
				operation,
				buyer,
				json!([
					trade.seller,
					trade.item_id,
					trade.price_usd.cents(),
					trade.price_native,
					trade.payment_tx,
				]),
			)
			.await?;

		Ok(Submitted {
			value: Self::return_id(operation, &value)?,
			receipt,
		})
	}

	async fn get_all_trades(&self) -> Result<Vec<TradeEvent>, LedgerError> {
		let raw: Vec<RawTradeRecord> = self.query(LedgerOperation::GetAllTrades, json!([])).await?;
		Self::validate_all(raw)
	}

	async fn get_trades_by_buyer(
		&self,
		buyer: &WalletAddress,
	) -> Result<Vec<TradeEvent>, LedgerError> {
		let raw: Vec<RawTradeRecord> = self
			.query(LedgerOperation::GetTradesByBuyer, json!([buyer]))
			.await?;
		Self::validate_all(raw)
	}

	async fn donate(
		&self,
		donor: &WalletAddress,
		amount: NativeAmount,
		reported_usd: Usd,
	) -> Result<Submitted<u64>, LedgerError> {
		let operation = LedgerOperation::Donate;
		let (value, receipt) = self
			.submit(
				operation,
				donor,
				json!({ "value": amount, "args": [reported_usd.cents()] }),
			)
			.await?;

		Ok(Submitted {
			value: Self::return_id(operation, &value)?,
			receipt,
		})
	}

	async fn register_tx_hash(
		&self,
		donor: &WalletAddress,
		tx_hash: &TxHash,
	) -> Result<TxReceipt, LedgerError> {
		self.submit(LedgerOperation::RegisterTxHash, donor, json!([tx_hash]))
			.await
			.map(|(_, receipt)| receipt)
	}

	async fn get_all_donations(&self) -> Result<Vec<DonationEvent>, LedgerError> {
		let raw: Vec<RawDonationRecord> =
			self.query(LedgerOperation::GetAllDonations, json!([])).await?;
		Self::validate_all(raw)
	}

	async fn get_donations_by_address(
		&self,
		donor: &WalletAddress,
	) -> Result<Vec<DonationEvent>, LedgerError> {
		let raw: Vec<RawDonationRecord> = self
			.query(LedgerOperation::GetDonationsByAddress, json!([donor]))
			.await?;
		Self::validate_all(raw)
	}
}
