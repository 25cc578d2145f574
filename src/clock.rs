//! Time source abstraction and skew-aware expiry math.

// self
use crate::_prelude::*;

/// Source of the current UTC instant.
pub trait Clock
where
	Self: Debug + Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;
}

/// Wall clock backed by [`OffsetDateTime::now_utc`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Manually driven clock for deterministic expiry tests.
#[cfg(any(test, feature = "test"))]
#[derive(Debug)]
pub struct ManualClock(Mutex<OffsetDateTime>);
#[cfg(any(test, feature = "test"))]
impl ManualClock {
	/// Creates a clock frozen at `instant`.
	pub fn new(instant: OffsetDateTime) -> Self {
		Self(Mutex::new(instant))
	}

	/// Moves the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		let mut now = self.0.lock();

		*now += delta;
	}
}
#[cfg(any(test, feature = "test"))]
impl Clock for ManualClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}

/// Instant after which a token issued at `issued_at` with a `expires_in`-second TTL must no longer
/// be served, once `skew` is subtracted.
///
/// Returns `None` when the arithmetic leaves the representable range; such tokens never expire
/// from the cache's point of view.
pub fn expiry_instant(
	issued_at: OffsetDateTime,
	expires_in: i64,
	skew: Duration,
) -> Option<OffsetDateTime> {
	issued_at.checked_add(Duration::seconds(expires_in))?.checked_sub(skew)
}

/// Returns `true` when the skew-adjusted expiry instant is not in the future relative to `now`.
pub fn is_expired(
	issued_at: OffsetDateTime,
	expires_in: i64,
	skew: Duration,
	now: OffsetDateTime,
) -> bool {
	match expiry_instant(issued_at, expires_in, skew) {
		Some(instant) => instant <= now,
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn skew_moves_expiry_earlier() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);
		let skew = Duration::seconds(45);

		assert_eq!(
			expiry_instant(issued, 3600, skew),
			Some(macros::datetime!(2025-01-01 00:59:15 UTC))
		);
		assert!(!is_expired(issued, 3600, skew, issued + Duration::seconds(3550)));
		assert!(is_expired(issued, 3600, skew, issued + Duration::seconds(3560)));
	}

	#[test]
	fn boundary_instant_counts_as_expired() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		assert!(is_expired(issued, 60, Duration::seconds(10), issued + Duration::seconds(50)));
		assert!(!is_expired(issued, 60, Duration::seconds(10), issued + Duration::seconds(49)));
	}

	#[test]
	fn skew_larger_than_ttl_expires_immediately() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		assert!(is_expired(issued, 30, Duration::seconds(45), issued));
	}

	#[test]
	fn overflow_never_expires() {
		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(expiry_instant(issued, i64::MAX / 2, Duration::ZERO), None);
		assert!(!is_expired(issued, i64::MAX / 2, Duration::ZERO, issued));
	}

	#[test]
	fn manual_clock_advances() {
		let clock = ManualClock::new(macros::datetime!(2025-01-01 00:00 UTC));

		clock.advance(Duration::minutes(5));

		assert_eq!(clock.now(), macros::datetime!(2025-01-01 00:05 UTC));

		clock.set(macros::datetime!(2024-12-31 00:00 UTC));

		assert_eq!(clock.now(), macros::datetime!(2024-12-31 00:00 UTC));
	}
}
