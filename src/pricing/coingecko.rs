//!
//! Rate source reading a CoinGecko-style simple price endpoint.
//!
//! The endpoint answers `{"<coin>": {"usd": <price>}}`. Transport failures and 5xx answers are retried with
//! exponential backoff; a well-formed answer without a usable price is not.

use super::{PriceFeedError, RateSnapshot, RateSource};
use crate::ledger::RetryConfig;

use backoff::{ExponentialBackoff, future::retry};
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PRICE_URL: &str =
	"https://api.coingecko.com/api/v3/simple/price?ids=ethereum&vs_currencies=usd";

/// Rate source backed by an HTTP price endpoint
#[derive(Clone)]
pub struct HttpRateSource {
	http_client: Client,
	url: String,
	coin_id: String,
	retry: RetryConfig,
}

impl HttpRateSource {
	/// Create a new rate source.
	///
	/// # Arguments
	/// * `url` - Full price endpoint URL including the query string.
	/// * `coin_id` - Key of the coin in the response body, e.g. `ethereum`.
	/// * `timeout` - Timeout for each request attempt.
	pub fn new(url: String, coin_id: String, timeout: Duration) -> Result<Self, PriceFeedError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			url,
			coin_id,
			retry: RetryConfig::default(),
		})
	}

	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	fn parse_rate(&self, body: &Value) -> Result<u64, PriceFeedError> {
		let usd = body
			.get(&self.coin_id)
			.and_then(|coin| coin.get("usd"))
			.and_then(Value::as_f64)
			.ok_or_else(|| {
				PriceFeedError::InvalidRate(format!("no usd price for {} in {}", self.coin_id, body))
			})?;

		Ok(RateSnapshot::from_usd(usd, Utc::now())?.usd_per_native_micros)
	}

	async fn fetch_once(&self) -> Result<Value, backoff::Error<PriceFeedError>> {
		let response = self.http_client.get(&self.url).send().await.map_err(|e| {
			warn!("Price request failed, will retry: {}", e);
			backoff::Error::transient(PriceFeedError::HttpError(e))
		})?;

		let status = response.status();
		if status.is_server_error() || status.as_u16() == 429 {
			warn!("Price endpoint returned {}, will retry", status);
			return Err(backoff::Error::transient(PriceFeedError::Unavailable(
				format!("HTTP error: {}", status),
			)));
		}
		if !status.is_success() {
			return Err(backoff::Error::permanent(PriceFeedError::Unavailable(
				format!("HTTP error: {}", status),
			)));
		}

		response
			.json()
			.await
			.map_err(|e| backoff::Error::permanent(PriceFeedError::HttpError(e)))
	}
}

#[async_trait::async_trait]
impl RateSource for HttpRateSource {
	async fn fetch_rate(&self) -> Result<u64, PriceFeedError> {
		let backoff = ExponentialBackoff {
			initial_interval: self.retry.initial_interval,
			max_elapsed_time: Some(self.retry.max_elapsed_time),
			..ExponentialBackoff::default()
		};

		let body = retry(backoff, || async { self.fetch_once().await }).await?;
		self.parse_rate(&body)
	}
}
