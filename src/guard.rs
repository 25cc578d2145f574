//! Per-key single-flight guard for upstream refreshes.
//!
//! Each [`CacheKey`] maps to its own async mutex, so refreshes for one user/site serialize while
//! other keys proceed untouched. Slots are created atomically on first use and removed as soon as
//! no task holds or awaits them, which keeps the registry bounded by the number of keys that are
//! actively refreshing.

// crates.io
use async_lock::MutexGuardArc;
// self
use crate::{_prelude::*, auth::CacheKey};

type Slot = Arc<AsyncMutex<()>>;

/// Registry of per-key refresh mutexes.
#[derive(Debug, Default)]
pub struct RotationGuard {
	slots: DashMap<CacheKey, Slot>,
}
impl RotationGuard {
	/// Default bound on how long a caller waits for another refresh of the same key.
	pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `f` while holding the guard for `key`.
	///
	/// Waits at most `timeout` for the guard; on expiry returns [`Error::RotationTimeout`] without
	/// running `f`. If `cancel` fires first, returns [`Error::RotationInterrupted`]. The guard is
	/// released on every exit path, including panics inside `f` and drops of the returned future.
	pub async fn with_guard<F, Fut, T>(
		&self,
		key: &CacheKey,
		timeout: StdDuration,
		cancel: Option<&CancellationToken>,
		f: F,
	) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let held = Registration::new(&self.slots, key);
		let _permit = held.acquire(timeout, cancel).await?;

		f().await
	}

	/// Number of keys with a live slot.
	pub fn len(&self) -> usize {
		self.slots.len()
	}

	/// Returns `true` when no key has a live slot.
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	/// Drops every slot that no task holds or awaits; returns how many were removed.
	pub fn prune_idle(&self) -> usize {
		let before = self.slots.len();

		self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);

		before.saturating_sub(self.slots.len())
	}
}

/// A task's claim on a key's slot; removes the slot on drop once nobody else references it.
struct Registration<'a> {
	slots: &'a DashMap<CacheKey, Slot>,
	key: &'a CacheKey,
	slot: Slot,
}
impl<'a> Registration<'a> {
	fn new(slots: &'a DashMap<CacheKey, Slot>, key: &'a CacheKey) -> Self {
		let slot = slots.entry(key.clone()).or_insert_with(new_slot).clone();

		Self { slots, key, slot }
	}

	async fn acquire(
		&self,
		timeout: StdDuration,
		cancel: Option<&CancellationToken>,
	) -> Result<MutexGuardArc<()>> {
		let wait = tokio::time::timeout(timeout, self.slot.lock_arc());
		let outcome = match cancel {
			Some(token) => tokio::select! {
				biased;
				_ = token.cancelled() => {
					tracing::debug!(key = %self.key, "Rotation guard wait cancelled.");

					return Err(Error::RotationInterrupted { key: self.key.clone() });
				},
				outcome = wait => outcome,
			},
			None => wait.await,
		};

		outcome.map_err(|_| {
			tracing::warn!(key = %self.key, ?timeout, "Timed out waiting for rotation guard.");

			Error::RotationTimeout { key: self.key.clone(), waited: timeout }
		})
	}
}
impl Drop for Registration<'_> {
	fn drop(&mut self) {
		// Clones are only handed out under the shard lock, so a count of two (registry plus this
		// registration) means nobody else holds or awaits the slot.
		self.slots.remove_if(self.key, |_, current| {
			Arc::ptr_eq(current, &self.slot) && Arc::strong_count(current) == 2
		});
	}
}

fn new_slot() -> Slot {
	Arc::new(AsyncMutex::new(()))
}
