//! Refresh-token persistence contract and built-in store implementations.
//!
//! The broker treats stored payloads as versioned records: [`RefreshTokenStore::save`] only
//! writes when the persisted refresh token still equals the one the caller read, which is the sole
//! protection against two replicas rotating the same token.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{CacheKey, RefreshTokenPayload},
};

/// Boxed future returned by [`RefreshTokenStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for long-lived refresh-token payloads.
pub trait RefreshTokenStore
where
	Self: Send + Sync,
{
	/// Fetches the payload for `key`, if present.
	fn load<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<RefreshTokenPayload>>;

	/// Replaces the payload for `key` if its refresh token still equals `expected_refresh`.
	///
	/// On success the stored `rotation_counter` becomes the previous value plus one. A mismatch or
	/// a missing record yields [`SaveOutcome::Conflict`] and leaves the store untouched.
	fn save<'a>(
		&'a self,
		key: &'a CacheKey,
		expected_refresh: &'a str,
		replacement: RefreshTokenPayload,
	) -> StoreFuture<'a, SaveOutcome>;

	/// Unconditionally writes `payload`, e.g. after the authorization-code exchange.
	fn put<'a>(&'a self, key: &'a CacheKey, payload: RefreshTokenPayload) -> StoreFuture<'a, ()>;

	/// Deletes and returns the payload for `key`.
	fn remove<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<RefreshTokenPayload>>;
}

/// Result of an optimistic [`RefreshTokenStore::save`].
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveOutcome {
	/// The expected refresh token matched and the payload was replaced.
	Updated,
	/// The stored refresh token changed (or vanished) since it was read.
	Conflict,
}

/// Error type produced by [`RefreshTokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Applies the compare-and-swap rule shared by the built-in stores.
pub(crate) fn compare_and_swap(
	entries: &mut HashMap<CacheKey, RefreshTokenPayload>,
	key: &CacheKey,
	expected_refresh: &str,
	mut replacement: RefreshTokenPayload,
) -> SaveOutcome {
	match entries.get_mut(key) {
		Some(current) if current.refresh_token.expose() == expected_refresh => {
			replacement.rotation_counter = current.rotation_counter.saturating_add(1);
			*current = replacement;

			SaveOutcome::Updated
		},
		_ => SaveOutcome::Conflict,
	}
}
