// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for `mint_token` activity.
#[derive(Debug, Default)]
pub struct BrokerMetrics {
	attempts: AtomicU64,
	cache_hits: AtomicU64,
	refreshes: AtomicU64,
	rotations: AtomicU64,
	conflicts: AtomicU64,
	failures: AtomicU64,
}
impl BrokerMetrics {
	/// Total `mint_token` calls.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Calls answered from the cache, including waiters that found a fresh token inside the guard.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Successful upstream refresh calls.
	pub fn refreshes(&self) -> u64 {
		self.refreshes.load(Ordering::Relaxed)
	}

	/// Rotated refresh tokens written to the store.
	pub fn rotations(&self) -> u64 {
		self.rotations.load(Ordering::Relaxed)
	}

	/// Optimistic save conflicts observed.
	pub fn conflicts(&self) -> u64 {
		self.conflicts.load(Ordering::Relaxed)
	}

	/// Calls that returned an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_refresh(&self) {
		self.refreshes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_rotation(&self) {
		self.rotations.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_conflict(&self) {
		self.conflicts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failures.fetch_add(1, Ordering::Relaxed);
	}
}
