//! Token broker orchestrating the cache, rotation guard, refresh-token store, and upstream client.
//!
//! [`TokenBroker::mint_token`] answers from the access-token cache when it can and otherwise runs a
//! single-flight refresh per [`CacheKey`]: load the stored refresh token, take the key's guard,
//! call the authorization server, persist a rotated refresh token with an optimistic check, and
//! cache the new access token.

mod metrics;
mod rotation;

pub use metrics::BrokerMetrics;

// crates.io
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::{CacheKey, CachedAccessToken, SiteId, UserId},
	cache::AccessTokenCache,
	clock::{Clock, SystemClock},
	config::BrokerConfig,
	exchange::{TokenExchangeRequest, TokenResponse},
	guard::RotationGuard,
	oauth::RefreshClient,
	obs::{self, MintOutcome, MintSpan},
	retry::RetryPolicy,
	store::RefreshTokenStore,
};

/// Per-call context passed explicitly through the mint path.
#[derive(Clone, Debug, Default)]
pub struct MintContext {
	cancel: Option<CancellationToken>,
}
impl MintContext {
	/// Context without cancellation.
	pub fn new() -> Self {
		Self::default()
	}

	/// Attaches a token whose cancellation aborts guard waits and retry backoff.
	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);

		self
	}

	/// Cancellation token, if one was attached.
	pub fn cancellation(&self) -> Option<&CancellationToken> {
		self.cancel.as_ref()
	}
}

/// Mints Atlassian access tokens for many concurrent callers.
///
/// Cloning is cheap; clones share the cache, guard registry, store, client, and counters.
#[derive(Clone)]
pub struct TokenBroker {
	config: BrokerConfig,
	cache: Arc<AccessTokenCache>,
	guard: Arc<RotationGuard>,
	store: Arc<dyn RefreshTokenStore>,
	client: Arc<dyn RefreshClient>,
	retry: RetryPolicy,
	clock: Arc<dyn Clock>,
	metrics: Arc<BrokerMetrics>,
}
impl TokenBroker {
	/// Validates `config` and wires the broker around the provided store and refresh client.
	pub fn new(
		config: BrokerConfig,
		store: Arc<dyn RefreshTokenStore>,
		client: Arc<dyn RefreshClient>,
	) -> Result<Self> {
		config.validate()?;

		let clock: Arc<dyn Clock> = Arc::new(SystemClock);

		Ok(Self {
			cache: Arc::new(AccessTokenCache::with_clock(&config.cache, clock.clone())),
			guard: Arc::new(RotationGuard::new()),
			retry: RetryPolicy::new(&config.retry).with_max_delay(config.guard.timeout()),
			metrics: Arc::default(),
			config,
			store,
			client,
			clock,
		})
	}

	/// Replaces the time source; the cache is rebuilt empty around the new clock.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.cache = Arc::new(AccessTokenCache::with_clock(&self.config.cache, clock.clone()));
		self.clock = clock;

		self
	}

	/// Configuration the broker was built with.
	pub fn config(&self) -> &BrokerConfig {
		&self.config
	}

	/// Access-token cache.
	pub fn cache(&self) -> &AccessTokenCache {
		&self.cache
	}

	/// Rotation guard registry.
	pub fn guard(&self) -> &RotationGuard {
		&self.guard
	}

	/// Refresh-token store.
	pub fn store(&self) -> &Arc<dyn RefreshTokenStore> {
		&self.store
	}

	/// Activity counters.
	pub fn metrics(&self) -> &BrokerMetrics {
		&self.metrics
	}

	/// Drops the cached access token for `key` so the next mint refreshes upstream.
	pub fn evict(&self, key: &CacheKey) -> Option<CachedAccessToken> {
		let evicted = self.cache.evict(key);

		if evicted.is_some() {
			tracing::debug!(%key, "Evicted cached access token.");
		}

		evicted
	}

	/// Starts the periodic cache compaction task at `cache.cleanupIntervalSeconds`.
	///
	/// Must be called from within a tokio runtime; the task stops when `cancel` fires.
	pub fn spawn_cache_cleanup(&self, cancel: CancellationToken) -> JoinHandle<()> {
		self.cache.clone().spawn_cleanup(self.config.cache.cleanup_interval(), cancel)
	}

	/// Mints a token for `user` on `site`.
	pub async fn mint(&self, user: UserId, site: SiteId) -> Result<TokenResponse> {
		self.mint_token(&TokenExchangeRequest::new(user, site)).await
	}

	/// Mints a token for the subject and audience of `request`.
	pub async fn mint_token(&self, request: &TokenExchangeRequest) -> Result<TokenResponse> {
		self.mint_token_with(request, &MintContext::default()).await
	}

	/// Same as [`mint_token`](Self::mint_token) with an explicit [`MintContext`].
	pub async fn mint_token_with(
		&self,
		request: &TokenExchangeRequest,
		ctx: &MintContext,
	) -> Result<TokenResponse> {
		let key = request.key();
		let span = MintSpan::new(&key, "mint_token");

		obs::record_mint_outcome(MintOutcome::Attempt);
		self.metrics.record_attempt();

		let result = span.instrument(self.mint_inner(&key, ctx)).await;

		if let Err(e) = &result {
			self.metrics.record_failure();
			obs::record_mint_outcome(MintOutcome::Failure);

			tracing::debug!(%key, kind = %e.kind(), error = %e, "Mint failed.");
		}

		result
	}

	async fn mint_inner(&self, key: &CacheKey, ctx: &MintContext) -> Result<TokenResponse> {
		if let Some(response) = self.cached_response(key) {
			return Ok(response);
		}

		tracing::debug!(%key, "Access token cache miss.");

		if self.store.load(key).await?.is_none() {
			return Err(Error::NoRefreshToken { key: key.clone() });
		}

		let span = MintSpan::new(key, "refresh");

		self.guard
			.with_guard(key, self.config.guard.timeout(), ctx.cancellation(), || {
				span.instrument(self.refresh_locked(key, ctx))
			})
			.await
	}

	fn cached_response(&self, key: &CacheKey) -> Option<TokenResponse> {
		let token = self.cache.get(key)?;

		tracing::debug!(%key, "Access token cache hit.");
		self.metrics.record_cache_hit();
		obs::record_mint_outcome(MintOutcome::CacheHit);

		Some(TokenResponse::from_cached(key, &token))
	}
}
impl Debug for TokenBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenBroker")
			.field("config", &self.config)
			.field("cache", &self.cache)
			.field("guard", &self.guard)
			.field("retry", &self.retry)
			.field("clock", &self.clock)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}
