use std::time::Duration;

use chrono::{TimeZone, Utc};
use item_settlement::ledger::{
	ExchangeEvent, ExchangeStatus, HttpLedgerClient, LedgerClient, LedgerError, LedgerOperation,
	RawExchangeRecord, RetryConfig,
};
use item_settlement::pricing::{CachedPriceFeed, HttpRateSource, PriceFeed, quote};
use item_settlement::registry::{HttpRegistryClient, OwnershipRegistry, RegistryError, UserUpdate};
use item_settlement::types::{ExchangeId, ItemId, Usd, WalletAddress};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn wallet(c: char) -> WalletAddress {
	WalletAddress::parse(&format!("0x{}", c.to_string().repeat(40))).unwrap()
}

fn fast_retry() -> RetryConfig {
	RetryConfig {
		initial_interval: Duration::from_millis(5),
		max_elapsed_time: Duration::from_secs(2),
	}
}

fn ledger(server: &MockServer) -> HttpLedgerClient {
	HttpLedgerClient::new(format!("{}/rpc", server.uri()), Duration::from_secs(2))
		.unwrap()
		.with_retry(fast_retry())
}

fn raw_exchange(id: u64, status: ExchangeStatus) -> serde_json::Value {
	let event = ExchangeEvent {
		exchange_id: ExchangeId(id),
		initiator: wallet('a'),
		counterparty: wallet('b'),
		offered_item: ItemId::parse("64f1c2a9e4b0a1b2c3d4e5f6").unwrap(),
		requested_item: ItemId::parse("64f1c2a9e4b0a1b2c3d4e5f7").unwrap(),
		status,
		transaction_hash: None,
		created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
	};
	let mut raw = serde_json::to_value(RawExchangeRecord::from(&event)).unwrap();
	// Gateways may return checksummed addresses.
	raw["user_1_wallet"] = json!(format!("0x{}", "A".repeat(40)));
	raw
}

#[tokio::test]
async fn ledger_exchange_records_are_validated() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/rpc"))
		.and(body_partial_json(json!({ "method": "getAllExchanges" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"result": [
				raw_exchange(1, ExchangeStatus::Pending),
				raw_exchange(2, ExchangeStatus::Confirmed),
			],
		})))
		.mount(&server)
		.await;

	let exchanges = ledger(&server).get_all_exchanges().await.unwrap();

	assert_eq!(exchanges.len(), 2);
	assert_eq!(exchanges[0].exchange_id, ExchangeId(1));
	assert_eq!(exchanges[0].initiator, wallet('a'));
	assert_eq!(exchanges[0].transaction_hash, None);
	assert_eq!(exchanges[1].status, ExchangeStatus::Confirmed);
}

#[tokio::test]
async fn ledger_rejects_unknown_status_codes() {
	let server = MockServer::start().await;
	let mut unknown_status = raw_exchange(3, ExchangeStatus::Pending);
	unknown_status["status"] = json!(7);
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "getExchange" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"result": unknown_status,
		})))
		.mount(&server)
		.await;

	let err = ledger(&server).get_exchange(ExchangeId(3)).await.unwrap_err();
	assert!(matches!(err, LedgerError::MalformedRecord { .. }));
}

#[tokio::test]
async fn ledger_missing_exchange_is_none() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "getExchange" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": null })))
		.mount(&server)
		.await;

	assert_eq!(ledger(&server).get_exchange(ExchangeId(9)).await.unwrap(), None);
}

#[tokio::test]
async fn ledger_signer_refusal_is_signer_rejected() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "confirmExchange" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"error": { "code": 4001, "message": "User denied transaction signature" },
		})))
		.expect(1)
		.mount(&server)
		.await;

	let err = ledger(&server)
		.confirm_exchange(&wallet('b'), ExchangeId(1))
		.await
		.unwrap_err();

	match err {
		LedgerError::SignerRejected { operation, .. } => {
			assert_eq!(operation, LedgerOperation::ConfirmExchange)
		}
		other => panic!("expected SignerRejected, got {other:?}"),
	}
}

#[tokio::test]
async fn ledger_revert_is_classified() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "rejectExchange" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"error": { "code": 3, "message": "execution reverted: already resolved" },
		})))
		.mount(&server)
		.await;

	let err = ledger(&server)
		.reject_exchange(&wallet('b'), ExchangeId(1))
		.await
		.unwrap_err();
	assert!(err.is_revert());
}

#[tokio::test]
async fn ledger_queries_retry_after_server_errors() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "getAllExchanges" })))
		.respond_with(ResponseTemplate::new(503))
		.up_to_n_times(1)
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "getAllExchanges" })))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"result": [raw_exchange(1, ExchangeStatus::Rejected)],
		})))
		.expect(1)
		.mount(&server)
		.await;

	let exchanges = ledger(&server).get_all_exchanges().await.unwrap();
	assert_eq!(exchanges[0].status, ExchangeStatus::Rejected);
}

#[tokio::test]
async fn ledger_submissions_are_not_retried() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_partial_json(json!({ "method": "confirmExchange" })))
		.respond_with(ResponseTemplate::new(503))
		.expect(1)
		.mount(&server)
		.await;

	let err = ledger(&server)
		.confirm_exchange(&wallet('b'), ExchangeId(1))
		.await
		.unwrap_err();
	assert!(matches!(err, LedgerError::Submission { .. }));
}

fn registry(server: &MockServer) -> HttpRegistryClient {
	HttpRegistryClient::new(server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn registry_owner_conflict_carries_actual_owner() {
	let server = MockServer::start().await;
	let item = ItemId::parse("64f1c2a9e4b0a1b2c3d4e5f6").unwrap();
	Mock::given(method("POST"))
		.and(path(format!("/api/order/{}/owner", item)))
		.and(body_partial_json(json!({
			"new_owner": wallet('b'),
			"expected_current_owner": wallet('a'),
		})))
		.respond_with(ResponseTemplate::new(409).set_body_json(json!({
			"current_owner": wallet('c'),
		})))
		.mount(&server)
		.await;

	let err = registry(&server)
		.set_owner(&item, &wallet('b'), &wallet('a'))
		.await
		.unwrap_err();

	match err {
		RegistryError::Conflict {
			item_id,
			expected,
			actual,
		} => {
			assert_eq!(item_id, item);
			assert_eq!(expected, wallet('a'));
			assert_eq!(actual, wallet('c'));
		}
		other => panic!("expected Conflict, got {other:?}"),
	}
}

#[tokio::test]
async fn registry_missing_item_is_not_found() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/api/order/missing"))
		.respond_with(ResponseTemplate::new(404).set_body_json(json!({ "message": "no such order" })))
		.mount(&server)
		.await;

	let err = registry(&server)
		.get_item(&ItemId::parse("missing").unwrap())
		.await
		.unwrap_err();
	assert!(matches!(err, RegistryError::NotFound { kind: "item", .. }));
}

#[tokio::test]
async fn registry_profile_edit_posts_only_given_fields() {
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/api/user/updateNamePass"))
		.and(body_json(json!({
			"wallet": wallet('a'),
			"name": "Alice B.",
			"balance": 250,
		})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"user": {
				"wallet": wallet('a'),
				"name": "Alice B.",
				"email": "alice@example.com",
				"credential_hash": "bcrypt-hash",
				"balance": 250,
				"role": "user",
				"created_at": "2024-03-01T10:00:00Z",
				"updated_at": "2024-03-02T10:00:00Z",
			},
		})))
		.expect(1)
		.mount(&server)
		.await;

	let user = registry(&server)
		.update_user(
			&wallet('a'),
			UserUpdate {
				name: Some("Alice B.".to_string()),
				balance: Some(250),
				..UserUpdate::default()
			},
		)
		.await
		.unwrap();

	assert_eq!(user.name, "Alice B.");
	assert_eq!(user.balance, 250);
	assert_eq!(user.credential_hash, "bcrypt-hash");
}

#[tokio::test]
async fn registry_server_error_is_unavailable() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/api/user/allUsers"))
		.respond_with(ResponseTemplate::new(502))
		.mount(&server)
		.await;

	let err = registry(&server).list_users().await.unwrap_err();
	assert!(matches!(err, RegistryError::Unavailable(_)));
}

#[tokio::test]
async fn price_feed_reads_endpoint_once_within_ttl() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/simple/price"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"ethereum": { "usd": 2500 },
		})))
		.expect(1)
		.mount(&server)
		.await;

	let source = HttpRateSource::new(
		format!("{}/simple/price", server.uri()),
		"ethereum".to_string(),
		Duration::from_secs(2),
	)
	.unwrap()
	.with_retry(fast_retry());
	let feed = CachedPriceFeed::new(source, Duration::from_secs(60));

	let first = feed.current_rate().await.unwrap();
	let second = feed.current_rate().await.unwrap();

	assert_eq!(first, second);
	assert_eq!(first.usd_per_native_micros, 2_500_000_000);
	let quoted = quote(Usd::from_dollars(50), &first).unwrap();
	assert_eq!(quoted.native.to_string(), "0.02");
}

#[tokio::test]
async fn price_feed_client_errors_are_not_retried() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(403))
		.expect(1)
		.mount(&server)
		.await;

	let source = HttpRateSource::new(
		server.uri(),
		"ethereum".to_string(),
		Duration::from_secs(2),
	)
	.unwrap()
	.with_retry(fast_retry());

	assert!(CachedPriceFeed::new(source, Duration::from_secs(60))
		.current_rate()
		.await
		.is_err());
}
