//! Event system for settlement.
//!
//! This module defines the settlement event type, the handler trait, and the dispatcher the
//! settlement services emit through. Events are emitted after each irreversible step and after each
//! registry write, so handlers see exactly what was committed where. Handlers are for observation
//! only: a failing handler is logged and never affects the settlement outcome.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::SettlementError;
use crate::ledger::ExchangeStatus;
use crate::types::{ExchangeId, ItemId, TxHash, WalletAddress};

/// Events that occur during settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// A Pending exchange request was created on the ledger
    ExchangeRequested {
        exchange_id: ExchangeId,
        initiator: WalletAddress,
        counterparty: WalletAddress,
    },
    /// The ledger accepted a confirm or reject
    ExchangeResolved {
        exchange_id: ExchangeId,
        status: ExchangeStatus,
        tx_hash: TxHash,
    },
    /// A payment transfer was mined
    PaymentSent {
        from: WalletAddress,
        to: WalletAddress,
        tx_hash: TxHash,
    },
    /// A trade record was written to the ledger
    TradeRecorded { trade_id: u64, item_id: ItemId },
    /// A donation was written to the ledger
    DonationRecorded { donation_id: u64, donor: WalletAddress },
    /// The registry now reflects a ledger-confirmed owner
    OwnershipApplied {
        item_id: ItemId,
        new_owner: WalletAddress,
        already_applied: bool,
    },
    /// A registry write failed after the ledger committed
    OwnershipFailed { item_id: ItemId, reason: String },
    /// Committed work was left incomplete and stored for retry
    SettlementPending { key: String, steps: usize },
    /// A stored settlement was completed
    SettlementRecovered { key: String },
}

/// Trait for handling settlement events.
#[async_trait::async_trait]
pub trait SettlementEventHandler: Send + Sync {
    /// Handle a settlement event.
    async fn handle(&self, event: &SettlementEvent) -> Result<(), SettlementError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are shared, so one dispatcher can be handed to every settlement service.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn SettlementEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Arc<dyn SettlementEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&self, event: SettlementEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(&event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Writes every event to the log.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SettlementEventHandler for LoggingEventHandler {
    async fn handle(&self, event: &SettlementEvent) -> Result<(), SettlementError> {
        match event {
            SettlementEvent::OwnershipFailed { item_id, reason } => {
                warn!("Registry update for item {} failed: {}", item_id, reason)
            }
            SettlementEvent::SettlementPending { key, steps } => {
                warn!("Settlement {} stored with {} step(s) outstanding", key, steps)
            }
            other => info!("{:?}", other),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}

/// Keeps every event in memory, in dispatch order.
#[derive(Default)]
pub struct CollectingEventHandler {
    events: Mutex<Vec<SettlementEvent>>,
}

impl CollectingEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<SettlementEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl SettlementEventHandler for CollectingEventHandler {
    async fn handle(&self, event: &SettlementEvent) -> Result<(), SettlementError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}
