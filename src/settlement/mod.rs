//! Settlement & reconciliation engine
//!
//! Every settlement is a synchronous chain of remote calls started by a user action: the irreversible
//! ledger step first, then the best-effort registry update through the reconciliation service. Work
//! left incomplete after a ledger commit is returned as a distinct outcome and stored in the pending
//! settlement repository, from which the recovery service retries it.

pub mod donation;
pub mod events;
pub mod exchange;
pub mod pending;
pub mod reconciliation;
pub mod recovery;
pub mod trade;

pub use donation::{DonationFilter, DonationLedger, DonationOutcome, DonationReceipt};
pub use events::{
	CollectingEventHandler, EventDispatcher, LoggingEventHandler, SettlementEvent,
	SettlementEventHandler,
};
pub use exchange::{
	ExchangeDecision, ExchangeOrchestrator, ExchangeRequestReceipt, ExchangeResolution,
	PendingRequest,
};
pub use pending::{
	FilePendingSettlementRepository, InMemoryPendingSettlementRepository, PendingSettlement,
	PendingSettlementRepository, PendingStep, SettlementKind,
};
pub use reconciliation::{
	OwnershipUpdate, ReconciliationReport, ReconciliationService, UpdateOutcome, UpdateResult,
};
pub use recovery::{RecoveryOutcome, RecoveryService};
pub use trade::{TradeOutcome, TradeReceipt, TradeSettlement};

use std::sync::Arc;
use tracing::error;

use crate::ledger::LedgerClient;
use crate::pricing::PriceFeed;
use crate::registry::OwnershipRegistry;

/// Collaborators shared by every settlement service
#[derive(Clone)]
pub struct SettlementContext {
	pub ledger: Arc<dyn LedgerClient>,
	pub registry: Arc<dyn OwnershipRegistry>,
	pub pending: Arc<dyn PendingSettlementRepository>,
	pub events: Arc<EventDispatcher>,
}

impl SettlementContext {
	pub fn new(
		ledger: Arc<dyn LedgerClient>,
		registry: Arc<dyn OwnershipRegistry>,
		pending: Arc<dyn PendingSettlementRepository>,
		events: EventDispatcher,
	) -> Self {
		Self {
			ledger,
			registry,
			pending,
			events: Arc::new(events),
		}
	}

	pub fn reconciliation(&self) -> ReconciliationService {
		ReconciliationService::new(self.registry.clone(), self.events.clone())
	}

	/// Persist outstanding work. The ledger has already committed, so a storage failure is logged and
	/// the record still travels back to the caller inside the outcome.
	pub(crate) async fn store_pending(&self, pending: &PendingSettlement) {
		if let Err(e) = self.pending.save(pending).await {
			error!(
				"Could not persist pending settlement {}: {}. Outstanding steps: {:?}",
				pending.key, e, pending.steps
			);
		}
		self.events
			.dispatch(SettlementEvent::SettlementPending {
				key: pending.key.clone(),
				steps: pending.steps.len(),
			})
			.await;
	}
}

/// All settlement services wired to one set of collaborators.
#[derive(Clone)]
pub struct SettlementEngine {
	pub exchanges: ExchangeOrchestrator,
	pub trades: TradeSettlement,
	pub donations: DonationLedger,
	pub recovery: RecoveryService,
	context: SettlementContext,
}

impl SettlementEngine {
	pub fn new(context: SettlementContext, price_feed: Arc<dyn PriceFeed>) -> Self {
		Self {
			exchanges: ExchangeOrchestrator::new(context.clone()),
			trades: TradeSettlement::new(context.clone(), price_feed),
			donations: DonationLedger::new(context.clone()),
			recovery: RecoveryService::new(context.clone()),
			context,
		}
	}

	pub fn context(&self) -> &SettlementContext {
		&self.context
	}
}
