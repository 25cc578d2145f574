//! Single-flight Atlassian OAuth token broker: cached access tokens, guarded refreshes, and
//! optimistic refresh-token rotation for many concurrent callers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod broker;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod guard;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod retry;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::{CacheKey, RefreshTokenPayload, SiteId, UserId},
		broker::TokenBroker,
		clock::{Clock, ManualClock},
		config::BrokerConfig,
		http::ReqwestHttpClient,
		oauth::{OAuth2RefreshClient, ReqwestTransportErrorMapper},
		store::{MemoryStore, RefreshTokenStore},
	};

	/// Client identifier used by reqwest-backed integration tests.
	pub const TEST_CLIENT_ID: &str = "client-broker";
	/// Client secret used by reqwest-backed integration tests.
	pub const TEST_CLIENT_SECRET: &str = "secret-broker";

	/// Builds a reqwest HTTP client with a short timeout for `httpmock` servers.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.timeout(StdDuration::from_secs(5))
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds a [`CacheKey`] from raw fixture strings.
	pub fn test_key(user: &str, site: &str) -> CacheKey {
		CacheKey::new(
			UserId::new(user).expect("User fixture should be valid."),
			SiteId::new(site).expect("Site fixture should be valid."),
		)
	}

	/// Seeds the store with a payload holding the provided refresh token.
	pub async fn seed_refresh_token(store: &dyn RefreshTokenStore, key: &CacheKey, refresh: &str) {
		let payload = RefreshTokenPayload::new(
			"seed-access",
			refresh,
			3600,
			Some("read:jira-work offline_access".into()),
			OffsetDateTime::now_utc() - Duration::hours(1),
		);

		store.put(key, payload).await.expect("Failed to seed refresh token payload.");
	}

	/// Constructs a [`TokenBroker`] wired to the reqwest refresh client, an in-memory store, and
	/// the provided token endpoint.
	pub fn build_reqwest_test_broker(
		token_uri: &str,
		mut config: BrokerConfig,
	) -> (TokenBroker, Arc<MemoryStore>) {
		config.upstream.token_uri = token_uri.into();

		let store = Arc::new(MemoryStore::default());
		let client = <OAuth2RefreshClient<ReqwestHttpClient, ReqwestTransportErrorMapper>>::new(
			&config.upstream,
			TEST_CLIENT_ID,
			Some(TEST_CLIENT_SECRET),
			test_reqwest_http_client(),
			ReqwestTransportErrorMapper,
		)
		.expect("Failed to build OAuth refresh client for tests.");
		let broker = TokenBroker::new(config, store.clone(), Arc::new(client))
			.expect("Failed to build token broker for tests.");

		(broker, store)
	}

	/// Same as [`build_reqwest_test_broker`] but driven by a [`ManualClock`].
	pub fn build_reqwest_test_broker_with_clock(
		token_uri: &str,
		config: BrokerConfig,
		clock: Arc<ManualClock>,
	) -> (TokenBroker, Arc<MemoryStore>) {
		let (broker, store) = build_reqwest_test_broker(token_uri, config);
		let clock: Arc<dyn Clock> = clock;

		(broker.with_clock(clock), store)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use dashmap::DashMap;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use tokio_util::sync::CancellationToken;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use tokio_util::sync::CancellationToken;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
