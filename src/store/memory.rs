//! Thread-safe in-memory [`RefreshTokenStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{CacheKey, RefreshTokenPayload},
	store::{self, RefreshTokenStore, SaveOutcome, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<CacheKey, RefreshTokenPayload>>>;

/// Storage backend that keeps payloads in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored payloads.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn load_now(map: &StoreMap, key: &CacheKey) -> Option<RefreshTokenPayload> {
		map.read().get(key).cloned()
	}

	fn save_now(
		map: &StoreMap,
		key: &CacheKey,
		expected_refresh: &str,
		replacement: RefreshTokenPayload,
	) -> SaveOutcome {
		store::compare_and_swap(&mut map.write(), key, expected_refresh, replacement)
	}

	fn put_now(
		map: &StoreMap,
		key: &CacheKey,
		payload: RefreshTokenPayload,
	) -> Result<(), StoreError> {
		map.write().insert(key.clone(), payload);

		Ok(())
	}
}
impl RefreshTokenStore for MemoryStore {
	fn load<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<RefreshTokenPayload>> {
		Box::pin(async move { Ok(Self::load_now(&self.0, key)) })
	}

	fn save<'a>(
		&'a self,
		key: &'a CacheKey,
		expected_refresh: &'a str,
		replacement: RefreshTokenPayload,
	) -> StoreFuture<'a, SaveOutcome> {
		Box::pin(async move { Ok(Self::save_now(&self.0, key, expected_refresh, replacement)) })
	}

	fn put<'a>(&'a self, key: &'a CacheKey, payload: RefreshTokenPayload) -> StoreFuture<'a, ()> {
		Box::pin(async move { Self::put_now(&self.0, key, payload) })
	}

	fn remove<'a>(&'a self, key: &'a CacheKey) -> StoreFuture<'a, Option<RefreshTokenPayload>> {
		Box::pin(async move { Ok(self.0.write().remove(key)) })
	}
}
