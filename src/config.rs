//! Configuration for the settlement CLI
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use item_settlement::types::{ExchangeId, ItemId, NativeAmount, Usd, WalletAddress};

/// Settle item exchanges, purchases and donations against the ledger and the ownership registry
#[derive(Parser, Debug, Clone)]
#[command(name = "item-settlement")]
#[command(about = "Item settlement and reconciliation engine")]
pub struct Config {
	/// Ledger gateway RPC endpoint
	#[arg(long, env = "LEDGER_URL", default_value = "http://localhost:8545")]
	pub ledger_url: String,

	/// Ownership registry base URL
	#[arg(long, env = "REGISTRY_URL", default_value = "http://localhost:3000")]
	pub registry_url: String,

	/// Native→USD price endpoint
	#[arg(
		long,
		env = "PRICE_FEED_URL",
		default_value = item_settlement::pricing::coingecko::DEFAULT_PRICE_URL
	)]
	pub price_feed_url: String,

	/// Key of the native coin in the price endpoint's response
	#[arg(long, env = "PRICE_COIN_ID", default_value = "ethereum")]
	pub price_coin_id: String,

	/// Directory holding pending settlement records
	#[arg(long, env = "DATA_DIR", default_value = "./data")]
	pub data_dir: PathBuf,

	/// Seconds a fetched rate stays valid
	#[arg(long, env = "RATE_CACHE_TTL_SECS", default_value = "60")]
	pub rate_cache_ttl_secs: u64,

	/// Registry request timeout in milliseconds
	#[arg(long, env = "REGISTRY_TIMEOUT_MS", default_value = "10000")]
	pub registry_timeout_ms: u64,

	/// Price feed request timeout in milliseconds
	#[arg(long, env = "PRICE_FEED_TIMEOUT_MS", default_value = "5000")]
	pub price_feed_timeout_ms: u64,

	/// Timeout of each read-only ledger query attempt in milliseconds
	#[arg(long, env = "LEDGER_QUERY_TIMEOUT_MS", default_value = "10000")]
	pub ledger_query_timeout_ms: u64,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, env = "LOG_LEVEL", default_value = "info")]
	pub log_level: String,

	/// Wallet acting as signer for the command
	#[arg(long, env = "WALLET")]
	pub wallet: Option<WalletAddress>,

	#[command(subcommand)]
	pub command: Command,
}

impl Config {
	pub fn rate_cache_ttl(&self) -> Duration {
		Duration::from_secs(self.rate_cache_ttl_secs)
	}

	pub fn registry_timeout(&self) -> Duration {
		Duration::from_millis(self.registry_timeout_ms)
	}

	pub fn price_feed_timeout(&self) -> Duration {
		Duration::from_millis(self.price_feed_timeout_ms)
	}

	pub fn ledger_query_timeout(&self) -> Duration {
		Duration::from_millis(self.ledger_query_timeout_ms)
	}
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
	/// Offer one of your items for one of the counterparty's
	RequestExchange(RequestExchangeArgs),
	/// Confirm or reject a request addressed to you
	ResolveExchange(ResolveExchangeArgs),
	/// Requests awaiting your decision
	PendingExchanges,
	/// Requests you took part in, or every request with --all
	Exchanges {
		#[arg(long)]
		all: bool,
	},
	/// Current native price of an item
	Quote {
		#[arg(long)]
		item: ItemId,
	},
	/// Buy an item from its current owner
	Buy {
		#[arg(long)]
		item: ItemId,
	},
	/// Your purchases, or every purchase with --all
	Trades {
		#[arg(long)]
		all: bool,
	},
	/// Record a donation
	Donate(DonateArgs),
	/// List donations, optionally by donor
	Donations {
		#[arg(long)]
		donor: Option<WalletAddress>,
	},
	/// Settlements committed on the ledger with steps still outstanding
	PendingSettlements,
	/// Retry one pending settlement, or all of them
	Recover {
		#[arg(long)]
		key: Option<String>,
	},
}

#[derive(Args, Debug, Clone)]
pub struct RequestExchangeArgs {
	#[arg(long)]
	pub counterparty: WalletAddress,

	/// Your item
	#[arg(long)]
	pub offered: ItemId,

	/// The counterparty's item
	#[arg(long)]
	pub requested: ItemId,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveExchangeArgs {
	#[arg(long)]
	pub id: u64,

	/// confirm or reject
	#[arg(long)]
	pub decision: String,
}

impl ResolveExchangeArgs {
	pub fn exchange_id(&self) -> ExchangeId {
		ExchangeId(self.id)
	}
}

#[derive(Args, Debug, Clone)]
pub struct DonateArgs {
	/// Amount in the smallest native unit
	#[arg(long)]
	pub amount: NativeAmount,

	/// Self-reported USD value, e.g. 100 or 19.99
	#[arg(long)]
	pub usd: Usd,
}
