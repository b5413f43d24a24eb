//! Price feed module
//!
//! Converts USD prices to the ledger's native currency. A `RateSource` performs the single read of the
//! native→USD rate, `CachedPriceFeed` keeps the last reading as an explicit `RateSnapshot` for a fixed
//! interval, and `quote` is a pure function of a price and a snapshot.

/// HTTP rate source
pub mod coingecko;

pub use coingecko::HttpRateSource;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::{NATIVE_UNIT, NativeAmount, Usd};

/// Default lifetime of a cached rate
pub const DEFAULT_RATE_TTL: Duration = Duration::from_secs(60);

/// Micro-dollars per cent
const MICROS_PER_CENT: u128 = 10_000;

/// Error types for rate retrieval and conversion
#[derive(Debug, thiserror::Error)]
pub enum PriceFeedError {
	#[error("Rate source returned a zero rate")]
	ZeroRate,

	#[error("Invalid rate data: {0}")]
	InvalidRate(String),

	#[error("Amount {0} is too large to convert")]
	Overflow(Usd),

	#[error("Rate source unavailable: {0}")]
	Unavailable(String),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}

/// One reading of the native→USD rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
	/// USD per whole native unit, in millionths of a dollar
	pub usd_per_native_micros: u64,
	pub fetched_at: DateTime<Utc>,
}

impl RateSnapshot {
	pub fn new(usd_per_native_micros: u64, fetched_at: DateTime<Utc>) -> Self {
		Self {
			usd_per_native_micros,
			fetched_at,
		}
	}

	/// Build a snapshot from a decimal dollar rate such as `2500.0`.
	pub fn from_usd(usd_per_native: f64, fetched_at: DateTime<Utc>) -> Result<Self, PriceFeedError> {
		if !usd_per_native.is_finite() || usd_per_native < 0.0 {
			return Err(PriceFeedError::InvalidRate(format!(
				"{} is not a usable rate",
				usd_per_native
			)));
		}
		let micros = (usd_per_native * 1_000_000.0).round() as u64;
		if micros == 0 {
			return Err(PriceFeedError::ZeroRate);
		}
		Ok(Self::new(micros, fetched_at))
	}

	pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
		now.signed_duration_since(self.fetched_at)
			.to_std()
			.map(|age| age < ttl)
			// fetched_at in the future: clock skew, treat as fresh
			.unwrap_or(true)
	}
}

/// A USD price converted at a specific rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
	pub usd: Usd,
	pub native: NativeAmount,
	pub rate: RateSnapshot,
}

/// Convert `usd` to native units at `rate`, rounding up to the next smallest unit.
///
/// Rounding up guarantees the payment never falls short of the listed price.
pub fn quote(usd: Usd, rate: &RateSnapshot) -> Result<Quote, PriceFeedError> {
	if rate.usd_per_native_micros == 0 {
		return Err(PriceFeedError::ZeroRate);
	}

	let numerator = (usd.cents() as u128)
		.checked_mul(MICROS_PER_CENT)
		.and_then(|micros| micros.checked_mul(NATIVE_UNIT))
		.ok_or(PriceFeedError::Overflow(usd))?;
	let native = numerator.div_ceil(rate.usd_per_native_micros as u128);

	Ok(Quote {
		usd,
		native: NativeAmount::from_base_units(native),
		rate: *rate,
	})
}

/// Single read of the current native→USD rate, in micro-dollars per native unit.
#[async_trait::async_trait]
pub trait RateSource: Send + Sync {
	async fn fetch_rate(&self) -> Result<u64, PriceFeedError>;
}

/// A rate that never changes. Used for local runs and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub u64);

impl FixedRate {
	pub fn usd(dollars: u64) -> Self {
		Self(dollars * 1_000_000)
	}
}

#[async_trait::async_trait]
impl RateSource for FixedRate {
	async fn fetch_rate(&self) -> Result<u64, PriceFeedError> {
		Ok(self.0)
	}
}

/// Supplier of the rate to use for a quote
#[async_trait::async_trait]
pub trait PriceFeed: Send + Sync {
	async fn current_rate(&self) -> Result<RateSnapshot, PriceFeedError>;
}

/// Price feed that reuses a reading for `ttl` before asking the source again.
pub struct CachedPriceFeed<S> {
	source: S,
	ttl: Duration,
	cache: Mutex<Option<RateSnapshot>>,
}

impl<S: RateSource> CachedPriceFeed<S> {
	pub fn new(source: S, ttl: Duration) -> Self {
		Self {
			source,
			ttl,
			cache: Mutex::new(None),
		}
	}

	/// The cached snapshot, fresh or not
	pub async fn snapshot(&self) -> Option<RateSnapshot> {
		*self.cache.lock().await
	}
}

#[async_trait::async_trait]
impl<S: RateSource> PriceFeed for CachedPriceFeed<S> {
	async fn current_rate(&self) -> Result<RateSnapshot, PriceFeedError> {
		// Held across the fetch so concurrent callers share one read.
		let mut cache = self.cache.lock().await;
		let now = Utc::now();

		if let Some(snapshot) = cache.as_ref().filter(|s| s.is_fresh(now, self.ttl)) {
			debug!("Using cached rate from {}", snapshot.fetched_at);
			return Ok(*snapshot);
		}

		let micros = self.source.fetch_rate().await?;
		if micros == 0 {
			return Err(PriceFeedError::ZeroRate);
		}

		let snapshot = RateSnapshot::new(micros, now);
		info!(
			"Fetched rate: {} USD per native unit",
			micros as f64 / 1_000_000.0
		);
		*cache = Some(snapshot);
		Ok(snapshot)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingSource {
		calls: Arc<AtomicUsize>,
		rate: u64,
	}

	#[async_trait::async_trait]
	impl RateSource for CountingSource {
		async fn fetch_rate(&self) -> Result<u64, PriceFeedError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.rate)
		}
	}

	#[test]
	fn fifty_dollars_at_2500_is_two_hundredths() {
		let rate = RateSnapshot::from_usd(2500.0, Utc::now()).unwrap();
		let q = quote(Usd::from_dollars(50), &rate).unwrap();
		assert_eq!(q.native.base_units(), 20_000_000_000_000_000);
		assert_eq!(q.native.to_string(), "0.02");
	}

	#[test]
	fn quote_rounds_up_to_smallest_unit() {
		// $0.01 at $3 per unit is 1/300 of a unit, which does not divide evenly
		let rate = RateSnapshot::new(3_000_000, Utc::now());
		let q = quote(Usd::from_cents(1), &rate).unwrap();
		assert_eq!(q.native.base_units(), 3_333_333_333_333_334);
	}

	#[test]
	fn zero_rate_is_refused() {
		let rate = RateSnapshot::new(0, Utc::now());
		assert!(matches!(
			quote(Usd::from_dollars(1), &rate),
			Err(PriceFeedError::ZeroRate)
		));
		assert!(RateSnapshot::from_usd(0.0, Utc::now()).is_err());
	}

	#[tokio::test]
	async fn cached_feed_reads_source_once_within_ttl() {
		let calls = Arc::new(AtomicUsize::new(0));
		let feed = CachedPriceFeed::new(
			CountingSource {
				calls: calls.clone(),
				rate: 2_500_000_000,
			},
			DEFAULT_RATE_TTL,
		);

		let first = feed.current_rate().await.unwrap();
		let second = feed.current_rate().await.unwrap();
		assert_eq!(first, second);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn expired_snapshot_is_refetched() {
		let calls = Arc::new(AtomicUsize::new(0));
		let feed = CachedPriceFeed::new(
			CountingSource {
				calls: calls.clone(),
				rate: 2_500_000_000,
			},
			Duration::ZERO,
		);

		feed.current_rate().await.unwrap();
		feed.current_rate().await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
