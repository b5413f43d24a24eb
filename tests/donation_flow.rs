mod common;

use common::{Harness, wallet};
use item_settlement::SettlementError;
use item_settlement::ledger::{InjectedFailure, LedgerOperation};
use item_settlement::settlement::{DonationFilter, DonationOutcome, RecoveryOutcome};
use item_settlement::types::{NativeAmount, Usd};

#[tokio::test]
async fn reported_usd_is_stored_as_given() {
	let h = Harness::new();
	let donor = wallet('e');
	h.fund(&donor, 1).await;

	// One smallest unit is worth far less than $100; the figure is kept regardless.
	let outcome = h
		.engine
		.donations
		.record_donation(&donor, NativeAmount::from_base_units(1), Usd::from_dollars(100))
		.await
		.unwrap();
	let receipt = match outcome {
		DonationOutcome::Recorded(receipt) => receipt,
		other => panic!("expected Recorded, got {other:?}"),
	};

	let donations = h
		.engine
		.donations
		.list_donations(&DonationFilter::default())
		.await
		.unwrap();
	assert_eq!(donations.len(), 1);
	assert_eq!(donations[0].reported_usd, Usd::from_dollars(100));
	assert_eq!(donations[0].amount, NativeAmount::from_base_units(1));
	assert_eq!(donations[0].transaction_hash, Some(receipt.tx_hash));
}

#[tokio::test]
async fn listing_filters_by_donor() {
	let h = Harness::new();
	let (e, f) = (wallet('e'), wallet('f'));
	h.fund(&e, 1).await;
	h.fund(&f, 1).await;

	for (donor, usd) in [(&e, 5), (&f, 7), (&e, 9)] {
		h.engine
			.donations
			.record_donation(donor, NativeAmount::from_base_units(1_000), Usd::from_dollars(usd))
			.await
			.unwrap();
	}

	let by_e = h
		.engine
		.donations
		.list_donations(&DonationFilter {
			donor: Some(e.clone()),
		})
		.await
		.unwrap();
	let reported: Vec<Usd> = by_e.iter().map(|d| d.reported_usd).collect();
	assert_eq!(reported, vec![Usd::from_dollars(5), Usd::from_dollars(9)]);
}

#[tokio::test]
async fn failed_hash_registration_is_retried() {
	let h = Harness::new();
	let donor = wallet('e');
	h.fund(&donor, 1).await;
	h.ledger
		.fail_next(LedgerOperation::RegisterTxHash, InjectedFailure::Unavailable)
		.await;

	let outcome = h
		.engine
		.donations
		.record_donation(&donor, NativeAmount::from_base_units(500), Usd::from_dollars(1))
		.await
		.unwrap();
	let (receipt, pending) = match outcome {
		DonationOutcome::HashRegistrationPending { receipt, pending } => (receipt, pending),
		other => panic!("expected HashRegistrationPending, got {other:?}"),
	};

	let before = h
		.engine
		.donations
		.list_donations(&DonationFilter::default())
		.await
		.unwrap();
	assert_eq!(before[0].transaction_hash, None);

	let outcome = h.engine.recovery.retry(&pending.key).await.unwrap();
	assert!(matches!(outcome, RecoveryOutcome::Completed { .. }));

	let after = h
		.engine
		.donations
		.list_donations(&DonationFilter::default())
		.await
		.unwrap();
	assert_eq!(after[0].transaction_hash, Some(receipt.tx_hash));
	assert_eq!(h.ledger.submissions(LedgerOperation::Donate).await, 1);
}

#[tokio::test]
async fn zero_donation_is_rejected_before_the_ledger() {
	let h = Harness::new();
	let err = h
		.engine
		.donations
		.record_donation(&wallet('e'), NativeAmount::ZERO, Usd::from_dollars(10))
		.await
		.unwrap_err();
	assert!(matches!(err, SettlementError::Validation(_)));
	assert_eq!(h.ledger.total_submissions().await, 0);
}
