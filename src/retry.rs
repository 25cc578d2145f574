//! Exponential backoff for retriable upstream failures.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, auth::CacheKey, config::RetryConfig};

/// Backoff settings applied to upstream refresh calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	max_attempts: u32,
	base_delay: StdDuration,
	max_delay: StdDuration,
	jitter: bool,
}
impl RetryPolicy {
	/// Longest single backoff sleep unless changed with [`with_max_delay`](Self::with_max_delay).
	pub const DEFAULT_MAX_DELAY: StdDuration = StdDuration::from_secs(30);

	/// Builds a policy from configuration; `max_attempts` is clamped to at least one call.
	pub fn new(config: &RetryConfig) -> Self {
		Self {
			max_attempts: config.max_attempts.max(1),
			base_delay: StdDuration::from_millis(config.base_delay_ms),
			max_delay: Self::DEFAULT_MAX_DELAY,
			jitter: config.jitter,
		}
	}

	/// Caps every backoff sleep at `max_delay`.
	///
	/// Retries run while the key's guard is held, so the broker passes its guard timeout here.
	pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
		self.max_delay = max_delay;

		self
	}

	/// Total number of calls, including the first.
	pub fn max_attempts(&self) -> u32 {
		self.max_attempts
	}

	/// Returns `true` when `err` may be retried by this policy.
	///
	/// Only upstream failures qualify; guard and storage errors surface immediately.
	pub fn should_retry(&self, err: &Error) -> bool {
		matches!(err, Error::UpstreamRateLimited { .. } | Error::UpstreamUnknown { .. })
			&& err.is_retriable()
	}

	/// Delay before retry number `retry` (1-based).
	///
	/// The base doubles per retry and is scaled into `[delay / 2, delay]` when jitter is on, then
	/// capped at the maximum delay. A Retry-After hint carried by `err` acts as a floor; `None`
	/// means the hint exceeds the cap and the error should surface instead of sleeping.
	pub fn delay_for(&self, retry: u32, err: &Error) -> Option<StdDuration> {
		let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
		let mut delay = self.base_delay.saturating_mul(factor);

		if self.jitter {
			delay = delay.mul_f64(rand::rng().random_range(0.5..=1.0));
		}

		let delay = delay.min(self.max_delay);

		match err.retry_after().and_then(|hint| StdDuration::try_from(hint).ok()) {
			Some(hint) if hint > self.max_delay => None,
			Some(hint) => Some(delay.max(hint)),
			None => Some(delay),
		}
	}

	/// Runs `op` until it succeeds, fails with a non-retriable error, or attempts run out.
	///
	/// A fired `cancel` token during a backoff sleep ends the loop with
	/// [`Error::RotationInterrupted`].
	pub async fn run<F, Fut, T>(
		&self,
		key: &CacheKey,
		cancel: Option<&CancellationToken>,
		mut op: F,
	) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 1;

		loop {
			let err = match op().await {
				Ok(value) => return Ok(value),
				Err(e) => e,
			};

			if attempt >= self.max_attempts || !self.should_retry(&err) {
				return Err(err);
			}

			let Some(delay) = self.delay_for(attempt, &err) else {
				tracing::warn!(%key, attempt, error = %err, "Retry-After exceeds the backoff cap.");

				return Err(err);
			};

			tracing::warn!(%key, attempt, ?delay, error = %err, "Retrying upstream refresh.");

			match cancel {
				Some(token) => tokio::select! {
					biased;
					_ = token.cancelled() =>
						return Err(Error::RotationInterrupted { key: key.clone() }),
					_ = tokio::time::sleep(delay) => {},
				},
				None => tokio::time::sleep(delay).await,
			}

			attempt += 1;
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(&RetryConfig::default())
	}
}
