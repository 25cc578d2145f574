// crates.io
use tracing::{Instrument, Span, instrument::Instrumented};
// self
use crate::{_prelude::*, auth::CacheKey};

/// Span wrapper used by the broker's mint path.
#[derive(Clone, Debug)]
pub struct MintSpan(Span);
impl MintSpan {
	/// Creates a span tagged with the key being minted and the current stage.
	pub fn new(key: &CacheKey, stage: &'static str) -> Self {
		Self(tracing::info_span!("atlassian_token_broker.mint", stage, key = %key))
	}

	/// Underlying span, for callers that want to attach children.
	pub fn span(&self) -> &Span {
		&self.0
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		fut.instrument(self.0.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_wraps_future() {
		let key = CacheKey::parse("user", "site").expect("Key fixture should be valid.");
		let span = MintSpan::new(&key, "instrument_wraps_future");
		let value = MintSpan::instrument(&span, async { 42 }).await;

		assert_eq!(value, 42);
	}
}
