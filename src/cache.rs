//! In-process access-token cache keyed by user and site.
//!
//! Entries live in a sharded map so unrelated keys never contend on one lock. Reads treat a token
//! whose skew-adjusted expiry has passed as a miss and evict it on the spot; the background
//! [`AccessTokenCache::spawn_cleanup`] task compacts entries nobody reads anymore.

// crates.io
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::{CacheKey, CachedAccessToken, TokenSecret},
	clock::{Clock, SystemClock},
	config::CacheConfig,
};

/// Concurrency-safe map from [`CacheKey`] to the last minted access token.
#[derive(Debug)]
pub struct AccessTokenCache {
	entries: DashMap<CacheKey, CachedAccessToken>,
	enabled: bool,
	skew: Duration,
	clock: Arc<dyn Clock>,
}
impl AccessTokenCache {
	/// Creates a cache driven by the system clock.
	pub fn new(config: &CacheConfig) -> Self {
		Self::with_clock(config, Arc::new(SystemClock))
	}

	/// Creates a cache driven by the provided clock.
	pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
		Self { entries: DashMap::new(), enabled: config.enabled, skew: config.skew(), clock }
	}

	/// Returns `false` when caching is disabled by configuration.
	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// Safety margin subtracted from every TTL.
	pub fn skew(&self) -> Duration {
		self.skew
	}

	/// Returns the cached token for `key` unless it is missing or about to expire.
	pub fn get(&self, key: &CacheKey) -> Option<CachedAccessToken> {
		if !self.enabled {
			return None;
		}

		let now = self.clock.now();
		let entry = self.entries.get(key)?;

		if !entry.is_expired_at(now, self.skew) {
			return Some(entry.clone());
		}

		drop(entry);
		// A concurrent `put` may have replaced the stale token; only drop it if it is still stale.
		self.entries.remove_if(key, |_, token| token.is_expired_at(now, self.skew));

		tracing::debug!(%key, "Evicted stale access token on read.");

		None
	}

	/// Stores a token for `key`, replacing any previous entry.
	pub fn put(
		&self,
		key: CacheKey,
		access_token: TokenSecret,
		issued_at: OffsetDateTime,
		expires_in: i64,
	) {
		if !self.enabled {
			return;
		}

		match CachedAccessToken::new(access_token, issued_at, expires_in) {
			Ok(token) => {
				self.entries.insert(key, token);
			},
			Err(e) => tracing::debug!(%key, error = %e, "Skipped caching access token."),
		}
	}

	/// Removes and returns the entry for `key`.
	pub fn evict(&self, key: &CacheKey) -> Option<CachedAccessToken> {
		self.entries.remove(key).map(|(_, token)| token)
	}

	/// Drops every entry.
	pub fn evict_all(&self) {
		self.entries.clear();
	}

	/// Number of entries, including stale ones not yet compacted.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns `true` when no entry is held.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Removes every entry whose skew-adjusted expiry has passed and returns how many were dropped.
	pub fn cleanup_expired(&self) -> usize {
		let now = self.clock.now();
		let mut removed = 0;

		self.entries.retain(|_, token| {
			let keep = !token.is_expired_at(now, self.skew);

			if !keep {
				removed += 1;
			}

			keep
		});

		if removed > 0 {
			tracing::debug!(removed, "Compacted expired access tokens.");
		}

		removed
	}

	/// Runs [`cleanup_expired`](Self::cleanup_expired) every `period` until `cancel` fires.
	///
	/// Must be called from within a tokio runtime.
	pub fn spawn_cleanup(
		self: Arc<Self>,
		period: StdDuration,
		cancel: CancellationToken,
	) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);

			// The first tick completes immediately.
			ticker.tick().await;

			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = ticker.tick() => {
						self.cleanup_expired();
					},
				}
			}
		})
	}
}
