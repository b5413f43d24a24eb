mod common;

use common::Harness;
use item_settlement::SettlementError;
use item_settlement::ledger::{InjectedFailure, LedgerOperation};
use item_settlement::ledger::TradeSubmission;
use item_settlement::settlement::{
	PendingSettlement, PendingSettlementRepository, PendingStep, RecoveryOutcome, SettlementKind,
	TradeOutcome,
};
use item_settlement::types::{NATIVE_UNIT, NativeAmount, Usd};

#[tokio::test]
async fn fifty_dollar_purchase_at_2500_settles_for_two_hundredths() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let buyer = h.user('c', "Carol").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;
	h.fund(&buyer, 1).await;

	let quote = h.engine.trades.quote(&z).await.unwrap();
	assert_eq!(quote.native.to_string(), "0.02");

	let outcome = h.engine.trades.settle_trade(&buyer, &z).await.unwrap();
	let receipt = match outcome {
		TradeOutcome::Settled(receipt) => receipt,
		other => panic!("expected Settled, got {other:?}"),
	};
	assert_eq!(receipt.seller, seller);
	assert_eq!(h.owner(&z).await, buyer);

	let trades = h.engine.trades.trades_by_buyer(&buyer).await.unwrap();
	assert_eq!(trades.len(), 1);
	assert_eq!(trades[0].price_usd, Usd::from_dollars(50));
	assert_eq!(trades[0].price_native.to_string(), "0.02");
	assert_eq!(trades[0].transaction_hash, receipt.payment_tx);

	let paid = NativeAmount::from_base_units(NATIVE_UNIT / 50);
	assert_eq!(h.ledger.balance_of(&seller).await, paid);
	assert_eq!(
		h.ledger.balance_of(&buyer).await,
		NativeAmount::from_base_units(NATIVE_UNIT - NATIVE_UNIT / 50)
	);
}

#[tokio::test]
async fn failed_payment_aborts_with_nothing_committed() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let buyer = h.user('c', "Carol").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;

	let err = h.engine.trades.settle_trade(&buyer, &z).await.unwrap_err();

	assert!(matches!(err, SettlementError::Ledger(_)));
	assert_eq!(h.owner(&z).await, seller);
	assert!(h.engine.trades.all_trades().await.unwrap().is_empty());
	assert!(h.pending.list().await.unwrap().is_empty());
	assert_eq!(h.ledger.total_submissions().await, 0);
}

#[tokio::test]
async fn signer_cancellation_of_payment_is_a_ledger_error() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let buyer = h.user('c', "Carol").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;
	h.fund(&buyer, 1).await;
	h.ledger
		.fail_next(LedgerOperation::Transfer, InjectedFailure::SignerRejected)
		.await;

	let err = h.engine.trades.settle_trade(&buyer, &z).await.unwrap_err();
	assert!(matches!(err, SettlementError::Ledger(_)));
	assert_eq!(h.owner(&z).await, seller);
}

#[tokio::test]
async fn failed_trade_record_is_completed_without_paying_again() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let buyer = h.user('c', "Carol").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;
	h.fund(&buyer, 1).await;
	h.ledger
		.fail_next(LedgerOperation::RecordTrade, InjectedFailure::Unavailable)
		.await;

	let outcome = h.engine.trades.settle_trade(&buyer, &z).await.unwrap();
	let (payment_tx, pending) = match outcome {
		TradeOutcome::PaymentSucceededSettlementIncomplete {
			payment_tx,
			trade_id,
			report,
			pending,
			..
		} => {
			assert_eq!(trade_id, None);
			// The ownership step is still attempted.
			assert!(report.is_reconciled());
			(payment_tx, pending)
		}
		other => panic!("expected PaymentSucceededSettlementIncomplete, got {other:?}"),
	};
	assert_eq!(h.owner(&z).await, buyer);
	assert!(matches!(
		pending.steps.as_slice(),
		[PendingStep::RecordTrade { .. }]
	));

	let outcome = h.engine.recovery.retry(&pending.key).await.unwrap();
	assert!(matches!(outcome, RecoveryOutcome::Completed { .. }));

	let trades = h.engine.trades.trades_by_buyer(&buyer).await.unwrap();
	assert_eq!(trades.len(), 1);
	assert_eq!(trades[0].transaction_hash, payment_tx);
	assert_eq!(h.ledger.submissions(LedgerOperation::Transfer).await, 1);
}

#[tokio::test]
async fn ownership_step_is_retried_until_registry_recovers() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let buyer = h.user('c', "Carol").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;
	h.fund(&buyer, 1).await;
	h.registry.make_unavailable(&z).await;

	let outcome = h.engine.trades.settle_trade(&buyer, &z).await.unwrap();
	let pending = match outcome {
		TradeOutcome::PaymentSucceededSettlementIncomplete {
			trade_id, pending, ..
		} => {
			assert!(trade_id.is_some());
			pending
		}
		other => panic!("expected PaymentSucceededSettlementIncomplete, got {other:?}"),
	};
	assert_eq!(h.owner(&z).await, seller);

	// Still down: the record stays, with one more attempt.
	match h.engine.recovery.retry(&pending.key).await.unwrap() {
		RecoveryOutcome::StillPending { pending } => assert_eq!(pending.attempts, 2),
		other => panic!("expected StillPending, got {other:?}"),
	}

	h.registry.restore_item(&z).await;
	let outcomes = h.engine.recovery.retry_all().await.unwrap();
	assert_eq!(outcomes.len(), 1);
	assert_eq!(h.owner(&z).await, buyer);
	assert_eq!(h.ledger.submissions(LedgerOperation::RecordTrade).await, 1);
	assert!(h.pending.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn owner_cannot_buy_their_own_item() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;
	h.fund(&seller, 1).await;

	let err = h.engine.trades.settle_trade(&seller, &z).await.unwrap_err();
	assert!(matches!(err, SettlementError::Validation(_)));
	assert_eq!(h.ledger.total_submissions().await, 0);
}

#[tokio::test]
async fn recovery_skips_a_trade_record_that_already_landed() {
	let h = Harness::new();
	let seller = h.user('d', "Dana").await;
	let buyer = h.user('c', "Carol").await;
	let z = h.item(&seller, "Bicycle", Usd::from_dollars(50)).await;
	h.fund(&buyer, 1).await;

	let receipt = match h.engine.trades.settle_trade(&buyer, &z).await.unwrap() {
		TradeOutcome::Settled(receipt) => receipt,
		other => panic!("expected Settled, got {other:?}"),
	};

	// A record left behind by a submission that reported failure but was mined.
	let stale = PendingSettlement::new(
		PendingSettlement::trade_key(&receipt.payment_tx),
		SettlementKind::Trade,
		vec![PendingStep::RecordTrade {
			buyer: buyer.clone(),
			trade: TradeSubmission {
				seller: seller.clone(),
				item_id: z.clone(),
				price_usd: Usd::from_dollars(50),
				price_native: receipt.quote.native,
				payment_tx: receipt.payment_tx.clone(),
			},
		}],
		"gateway timed out".to_string(),
	);
	h.pending.save(&stale).await.unwrap();

	let outcome = h.engine.recovery.retry(&stale.key).await.unwrap();
	assert!(matches!(outcome, RecoveryOutcome::Completed { .. }));
	assert_eq!(h.ledger.submissions(LedgerOperation::RecordTrade).await, 1);
}
