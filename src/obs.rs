//! Observability helpers for the mint path.
//!
//! Spans are always emitted through `tracing` under the name `atlassian_token_broker.mint` with
//! `stage` and `key` fields; the embedding service decides whether a subscriber records them.
//! Enabling the `metrics` feature additionally increments the
//! `atlassian_token_broker_mint_total` counter labeled by `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outcome labels recorded for each `mint_token` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MintOutcome {
	/// Entry to `mint_token`.
	Attempt,
	/// Served from the access-token cache.
	CacheHit,
	/// Served after an upstream refresh.
	Refreshed,
	/// Failure propagated back to the caller.
	Failure,
}
impl MintOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			MintOutcome::Attempt => "attempt",
			MintOutcome::CacheHit => "cache_hit",
			MintOutcome::Refreshed => "refreshed",
			MintOutcome::Failure => "failure",
		}
	}
}
impl Display for MintOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
