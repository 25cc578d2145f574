#![cfg(all(feature = "test", feature = "reqwest"))]

// crates.io
use httpmock::prelude::*;
// self
use atlassian_token_broker::{
	_preludet::*,
	broker::{MintContext, TokenBroker},
	clock::ManualClock,
	config::BrokerConfig,
	exchange::TokenExchangeRequest,
	store::{MemoryStore, RefreshTokenStore},
};

const ROTATED_BODY: &str = "{\"access_token\":\"access-new\",\"refresh_token\":\"refresh-2\",\
	\"token_type\":\"Bearer\",\"expires_in\":3600,\"scope\":\"read:jira-work offline_access\"}";
const STABLE_BODY: &str =
	"{\"access_token\":\"access-stable\",\"token_type\":\"Bearer\",\"expires_in\":3600}";

fn default_broker(server: &MockServer) -> (TokenBroker, Arc<MemoryStore>) {
	build_reqwest_test_broker(&server.url("/oauth/token"), BrokerConfig::default())
}

fn request(user: &str, site: &str) -> TokenExchangeRequest {
	test_key(user, site).into()
}

#[tokio::test]
async fn mint_rotates_refresh_token_and_serves_cache_afterwards() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-rotate", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", "refresh_token")
				.form_urlencoded_tuple("refresh_token", "refresh-1")
				.form_urlencoded_tuple("client_id", TEST_CLIENT_ID)
				.form_urlencoded_tuple("client_secret", TEST_CLIENT_SECRET);
			then.status(200).header("content-type", "application/json").body(ROTATED_BODY);
		})
		.await;
	let first = broker.mint_token(&key.clone().into()).await.expect("Refresh should succeed.");

	assert_eq!(first.access_token.expose(), "access-new");
	assert_eq!(first.expires_in, 3600);
	assert_eq!(first.user_id.as_ref(), "user-rotate");
	assert_eq!(first.site_id.as_ref(), "site-a");

	let stored = store
		.load(&key)
		.await
		.expect("Store load should succeed.")
		.expect("Payload should remain present.");

	assert_eq!(stored.refresh_token.expose(), "refresh-2");
	assert_eq!(stored.access_token.expose(), "access-new");
	assert_eq!(stored.rotation_counter, 1);

	let second = broker.mint_token(&key.into()).await.expect("Cached mint should succeed.");

	assert_eq!(second, first);

	mock.assert_calls_async(1).await;

	assert_eq!(broker.metrics().attempts(), 2);
	assert_eq!(broker.metrics().cache_hits(), 1);
	assert_eq!(broker.metrics().refreshes(), 1);
	assert_eq!(broker.metrics().rotations(), 1);
}

#[tokio::test]
async fn response_without_token_type_is_accepted() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-untyped", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-untyped\",\"refresh_token\":\"refresh-2\",\
				\"expires_in\":3600,\"scope\":\"read:jira-work\"}",
			);
		})
		.await;
	let response = broker.mint_token(&key.clone().into()).await.expect("Refresh should succeed.");

	mock.assert_async().await;

	assert_eq!(response.access_token.expose(), "access-untyped");
	assert_eq!(response.expires_in, 3600);

	let stored = store
		.load(&key)
		.await
		.expect("Store load should succeed.")
		.expect("Payload should remain present.");

	assert_eq!(stored.refresh_token.expose(), "refresh-2");
	assert_eq!(stored.rotation_counter, 1);
}

#[tokio::test]
async fn unchanged_refresh_token_is_not_written_back() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-stable", "");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(STABLE_BODY);
		})
		.await;
	let response = broker.mint_token(&key.clone().into()).await.expect("Refresh should succeed.");

	mock.assert_async().await;

	assert_eq!(response.access_token.expose(), "access-stable");

	let stored = store
		.load(&key)
		.await
		.expect("Store load should succeed.")
		.expect("Payload should remain present.");

	assert_eq!(stored.refresh_token.expose(), "refresh-1");
	assert_eq!(stored.access_token.expose(), "seed-access");
	assert_eq!(stored.rotation_counter, 0);
	assert_eq!(broker.metrics().rotations(), 0);
}

#[tokio::test]
async fn concurrent_mints_share_one_upstream_refresh() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-flight", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(100))
				.body(ROTATED_BODY);
		})
		.await;
	let tasks = (0..8)
		.map(|_| {
			let broker = broker.clone();
			let request = TokenExchangeRequest::from(key.clone());

			tokio::spawn(async move { broker.mint_token(&request).await })
		})
		.collect::<Vec<_>>();

	for task in tasks {
		let response = task
			.await
			.expect("Mint task should not panic.")
			.expect("Every concurrent mint should succeed.");

		assert_eq!(response.access_token.expose(), "access-new");
	}

	mock.assert_calls_async(1).await;

	assert_eq!(broker.metrics().refreshes(), 1);
	assert!(broker.guard().is_empty(), "Idle guard entries must be evicted.");
}

#[tokio::test]
async fn independent_keys_refresh_independently() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let with_site = test_key("user-1", "site-a");
	let without_site = test_key("user-1", "");

	seed_refresh_token(store.as_ref(), &with_site, "refresh-site").await;
	seed_refresh_token(store.as_ref(), &without_site, "refresh-none").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(STABLE_BODY);
		})
		.await;
	let with_site_request: TokenExchangeRequest = with_site.clone().into();
	let without_site_request: TokenExchangeRequest = without_site.clone().into();
	let (a, b) = tokio::join!(
		broker.mint_token(&with_site_request),
		broker.mint_token(&without_site_request),
	);

	assert_eq!(a.expect("Site-scoped mint should succeed.").site_id.as_ref(), "site-a");
	assert_eq!(b.expect("Unscoped mint should succeed.").site_id.as_ref(), "");

	mock.assert_calls_async(2).await;

	assert_eq!(broker.cache().len(), 2);
}

#[tokio::test]
async fn disabled_cache_sends_every_call_upstream() {
	let server = MockServer::start_async().await;
	let config = BrokerConfig::from_json_str(r#"{"cache":{"enabled":false}}"#)
		.expect("Config fixture should parse.");
	let (broker, store) = build_reqwest_test_broker(&server.url("/oauth/token"), config);
	let key = test_key("user-nocache", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(ROTATED_BODY);
		})
		.await;

	for _ in 0..3 {
		broker.mint_token(&key.clone().into()).await.expect("Uncached mint should succeed.");
	}

	mock.assert_calls_async(3).await;

	assert!(broker.cache().is_empty());
	assert_eq!(broker.metrics().cache_hits(), 0);
	// Only the first call rotated; later calls received the token already stored.
	assert_eq!(broker.metrics().rotations(), 1);
}

#[tokio::test]
async fn missing_refresh_token_fails_without_upstream_call() {
	let server = MockServer::start_async().await;
	let (broker, _store) = default_broker(&server);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(STABLE_BODY);
		})
		.await;
	let err = broker
		.mint_token(&request("user-unknown", "site-a"))
		.await
		.expect_err("Unknown user must fail.");

	assert!(matches!(err, Error::NoRefreshToken { .. }));
	assert!(err.requires_reconsent());
	assert!(!err.is_retriable());

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn invalid_grant_requires_reconsent_and_keeps_store() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-revoked", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-revoked").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(403)
				.header("content-type", "application/json")
				.body(
					"{\"error\":\"invalid_grant\",\
					\"error_description\":\"Unknown or invalid refresh token.\"}",
				);
		})
		.await;
	let err = broker.mint_token(&key.clone().into()).await.expect_err("Revoked token must fail.");

	mock.assert_async().await;

	assert!(matches!(err, Error::UpstreamInvalidRefreshToken { .. }));
	assert!(err.requires_reconsent());
	assert!(err.to_string().contains("invalid_grant"));
	assert_eq!(broker.metrics().failures(), 1);

	let stored = store
		.load(&key)
		.await
		.expect("Store load should succeed.")
		.expect("Payload should remain present.");

	assert_eq!(stored.refresh_token.expose(), "refresh-revoked");
	assert!(broker.cache().is_empty());
}

#[tokio::test]
async fn rate_limit_surfaces_retry_after() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-throttled", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(429).header("retry-after", "7").body("Too Many Requests");
		})
		.await;
	let err = broker.mint_token(&key.into()).await.expect_err("Throttled refresh must fail.");

	mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::UpstreamRateLimited { .. }));
	assert!(err.is_retriable());
	assert_eq!(err.retry_after(), Some(Duration::seconds(7)));
}

#[tokio::test]
async fn long_retry_after_releases_the_guard_immediately() {
	let server = MockServer::start_async().await;
	let config = BrokerConfig::from_json_str(
		r#"{"retry":{"maxAttempts":3,"baseDelayMs":1,"jitter":false},"guard":{"timeoutMs":2000}}"#,
	)
	.expect("Config fixture should parse.");
	let (broker, store) = build_reqwest_test_broker(&server.url("/oauth/token"), config);
	let key = test_key("user-day-throttled", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(429).header("retry-after", "86400").body("Too Many Requests");
		})
		.await;
	let started = std::time::Instant::now();
	let err = broker.mint_token(&key.into()).await.expect_err("Throttled refresh must fail.");

	mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::UpstreamRateLimited { .. }));
	assert_eq!(err.retry_after(), Some(Duration::days(1)));
	assert!(started.elapsed() < StdDuration::from_secs(2));
	assert!(broker.guard().is_empty());
}

#[tokio::test]
async fn gateway_errors_are_retried_up_to_max_attempts() {
	let server = MockServer::start_async().await;
	let config = BrokerConfig::from_json_str(
		r#"{"retry":{"maxAttempts":3,"baseDelayMs":1,"jitter":false}}"#,
	)
	.expect("Config fixture should parse.");
	let (broker, store) = build_reqwest_test_broker(&server.url("/oauth/token"), config);
	let key = test_key("user-gateway", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(503).body("upstream unavailable");
		})
		.await;
	let err = broker.mint_token(&key.into()).await.expect_err("Gateway failure must surface.");

	mock.assert_calls_async(3).await;

	assert!(matches!(err, Error::UpstreamUnknown { status: Some(503), retriable: true, .. }));
}

#[tokio::test]
async fn server_errors_are_not_retried() {
	let server = MockServer::start_async().await;
	let config = BrokerConfig::from_json_str(r#"{"retry":{"maxAttempts":3,"baseDelayMs":1}}"#)
		.expect("Config fixture should parse.");
	let (broker, store) = build_reqwest_test_broker(&server.url("/oauth/token"), config);
	let key = test_key("user-500", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(500)
				.header("content-type", "application/json")
				.body("{\"error\":\"server_error\"}");
		})
		.await;
	let err = broker.mint_token(&key.into()).await.expect_err("Server error must surface.");

	mock.assert_calls_async(1).await;

	assert!(matches!(err, Error::UpstreamUnknown { status: Some(500), retriable: false, .. }));
}

#[tokio::test]
async fn cached_token_expires_at_skew_boundary() {
	let server = MockServer::start_async().await;
	let start = OffsetDateTime::now_utc();
	let clock = Arc::new(ManualClock::new(start));
	let (broker, store) = build_reqwest_test_broker_with_clock(
		&server.url("/oauth/token"),
		BrokerConfig::default(),
		clock.clone(),
	);
	let key = test_key("user-clock", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(STABLE_BODY);
		})
		.await;
	let first = broker.mint_token(&key.clone().into()).await.expect("First mint should refresh.");

	assert_eq!(first.issued_at, start);

	clock.advance(Duration::seconds(3550));

	let cached = broker.mint_token(&key.clone().into()).await.expect("Mint at T+3550 should hit.");

	assert_eq!(cached.issued_at, start);

	mock.assert_calls_async(1).await;

	clock.advance(Duration::seconds(10));

	let refreshed =
		broker.mint_token(&key.clone().into()).await.expect("Mint at T+3560 should refresh.");

	assert_eq!(refreshed.issued_at, start + Duration::seconds(3560));

	mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn guard_wait_times_out_while_another_refresh_runs() {
	let server = MockServer::start_async().await;
	let config = BrokerConfig::from_json_str(r#"{"guard":{"timeoutMs":50}}"#)
		.expect("Config fixture should parse.");
	let (broker, store) = build_reqwest_test_broker(&server.url("/oauth/token"), config);
	let key = test_key("user-slow", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(500))
				.body(STABLE_BODY);
		})
		.await;
	let holder = {
		let broker = broker.clone();
		let request = TokenExchangeRequest::from(key.clone());

		tokio::spawn(async move { broker.mint_token(&request).await })
	};

	tokio::time::sleep(StdDuration::from_millis(100)).await;

	let err = broker.mint_token(&key.into()).await.expect_err("Waiter should time out.");

	assert!(matches!(err, Error::RotationTimeout { .. }));
	assert!(err.is_retriable());

	holder
		.await
		.expect("Holder task should not panic.")
		.expect("Holder refresh should succeed.");
	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn cancelled_context_interrupts_guard_wait() {
	let server = MockServer::start_async().await;
	let (broker, store) = default_broker(&server);
	let key = test_key("user-cancel", "site-a");

	seed_refresh_token(store.as_ref(), &key, "refresh-1").await;

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(StdDuration::from_millis(300))
				.body(STABLE_BODY);
		})
		.await;
	let holder = {
		let broker = broker.clone();
		let request = TokenExchangeRequest::from(key.clone());

		tokio::spawn(async move { broker.mint_token(&request).await })
	};

	tokio::time::sleep(StdDuration::from_millis(50)).await;

	let cancel = CancellationToken::new();
	let ctx = MintContext::new().with_cancellation(cancel.clone());

	cancel.cancel();

	let err = broker
		.mint_token_with(&key.into(), &ctx)
		.await
		.expect_err("Cancelled waiter should fail.");

	assert!(matches!(err, Error::RotationInterrupted { .. }));

	holder
		.await
		.expect("Holder task should not panic.")
		.expect("Holder refresh should succeed.");
	mock.assert_calls_async(1).await;
}
