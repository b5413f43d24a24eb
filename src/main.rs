mod config;

use clap::Parser;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use item_settlement::error::SettlementError;
use item_settlement::join::DisplayResolver;
use item_settlement::ledger::HttpLedgerClient;
use item_settlement::pricing::{CachedPriceFeed, HttpRateSource};
use item_settlement::registry::HttpRegistryClient;
use item_settlement::settlement::{
	DonationFilter, EventDispatcher, ExchangeDecision, FilePendingSettlementRepository,
	LoggingEventHandler, SettlementContext, SettlementEngine,
};
use item_settlement::types::WalletAddress;

use crate::config::{Command, Config};

fn init_tracing(level: &str) {
	let default_level = level
		.parse::<tracing::Level>()
		.unwrap_or(tracing::Level::INFO);

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::builder()
				.with_default_directive(default_level.into())
				.from_env_lossy(),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_writer(std::io::stderr)
		.init();
}

fn build_engine(config: &Config) -> Result<(SettlementEngine, DisplayResolver), SettlementError> {
	let ledger = HttpLedgerClient::new(config.ledger_url.clone(), config.ledger_query_timeout())?;
	let registry = Arc::new(HttpRegistryClient::new(
		config.registry_url.clone(),
		config.registry_timeout(),
	)?);
	let source = HttpRateSource::new(
		config.price_feed_url.clone(),
		config.price_coin_id.clone(),
		config.price_feed_timeout(),
	)?;
	let price_feed = CachedPriceFeed::new(source, config.rate_cache_ttl());
	let pending = FilePendingSettlementRepository::new(config.data_dir.clone());

	let mut events = EventDispatcher::new();
	events.register_handler(Arc::new(LoggingEventHandler));

	let context = SettlementContext::new(Arc::new(ledger), registry.clone(), Arc::new(pending), events);
	Ok((
		SettlementEngine::new(context, Arc::new(price_feed)),
		DisplayResolver::new(registry),
	))
}

fn acting_wallet(config: &Config) -> Result<&WalletAddress, SettlementError> {
	config.wallet.as_ref().ok_or_else(|| {
		SettlementError::Validation("this command needs --wallet or WALLET".to_string())
	})
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SettlementError> {
	let rendered = serde_json::to_string_pretty(value)
		.map_err(|e| SettlementError::Validation(format!("could not render output: {}", e)))?;
	println!("{}", rendered);
	Ok(())
}

async fn run(config: Config) -> Result<(), SettlementError> {
	let (engine, resolver) = build_engine(&config)?;

	match &config.command {
		Command::RequestExchange(args) => {
			let wallet = acting_wallet(&config)?;
			let receipt = engine
				.exchanges
				.request_exchange(wallet, &args.counterparty, &args.offered, &args.requested)
				.await?;
			print_json(&receipt)
		}
		Command::ResolveExchange(args) => {
			let wallet = acting_wallet(&config)?;
			let decision: ExchangeDecision = args.decision.parse()?;
			let resolution = engine
				.exchanges
				.resolve_exchange(wallet, args.exchange_id(), decision)
				.await?;
			print_json(&resolution)
		}
		Command::PendingExchanges => {
			let wallet = acting_wallet(&config)?;
			let requests = engine.exchanges.pending_requests(wallet).await?;
			print_json(&resolver.pending_requests(&requests).await)
		}
		Command::Exchanges { all } => {
			let exchanges = if *all {
				engine.exchanges.all_exchanges().await?
			} else {
				engine.exchanges.history(acting_wallet(&config)?).await?
			};
			print_json(&resolver.exchanges(&exchanges).await)
		}
		Command::Quote { item } => print_json(&engine.trades.quote(item).await?),
		Command::Buy { item } => {
			let wallet = acting_wallet(&config)?;
			print_json(&engine.trades.settle_trade(wallet, item).await?)
		}
		Command::Trades { all } => {
			let trades = if *all {
				engine.trades.all_trades().await?
			} else {
				engine.trades.trades_by_buyer(acting_wallet(&config)?).await?
			};
			print_json(&resolver.trades(&trades).await)
		}
		Command::Donate(args) => {
			let wallet = acting_wallet(&config)?;
			print_json(
				&engine
					.donations
					.record_donation(wallet, args.amount, args.usd)
					.await?,
			)
		}
		Command::Donations { donor } => {
			let donations = engine
				.donations
				.list_donations(&DonationFilter {
					donor: donor.clone(),
				})
				.await?;
			print_json(&resolver.donations(&donations).await)
		}
		Command::PendingSettlements => print_json(&engine.recovery.pending().await?),
		Command::Recover { key } => match key {
			Some(key) => print_json(&engine.recovery.retry(key).await?),
			None => print_json(&engine.recovery.retry_all().await?),
		},
	}
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
	let config = Config::parse();
	init_tracing(&config.log_level);

	info!("Ledger at {}, registry at {}", config.ledger_url, config.registry_url);

	match run(config).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			error!("{}", e);
			ExitCode::FAILURE
		}
	}
}
