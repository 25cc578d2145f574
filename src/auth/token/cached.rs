//! Access tokens held by the in-process cache.

// self
use crate::{_prelude::*, auth::TokenSecret, clock};

/// Errors produced while building a [`CachedAccessToken`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CachedTokenError {
	/// The TTL was zero or negative.
	#[error("Cached token lifetime must be positive, got {expires_in} seconds.")]
	NonPositiveTtl {
		/// Rejected TTL in seconds.
		expires_in: i64,
	},
}

/// Immutable access token snapshot, replaced wholesale on refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct CachedAccessToken {
	access_token: TokenSecret,
	issued_at: OffsetDateTime,
	expires_in: i64,
}
impl CachedAccessToken {
	/// Builds a snapshot, rejecting non-positive lifetimes.
	pub fn new(
		access_token: TokenSecret,
		issued_at: OffsetDateTime,
		expires_in: i64,
	) -> Result<Self, CachedTokenError> {
		if expires_in <= 0 {
			return Err(CachedTokenError::NonPositiveTtl { expires_in });
		}

		Ok(Self { access_token, issued_at, expires_in })
	}

	/// Bearer token value.
	pub fn access_token(&self) -> &TokenSecret {
		&self.access_token
	}

	/// Instant the authorization server issued the token.
	pub fn issued_at(&self) -> OffsetDateTime {
		self.issued_at
	}

	/// Lifetime in seconds, as reported upstream.
	pub fn expires_in(&self) -> i64 {
		self.expires_in
	}

	/// Returns `true` once the skew-adjusted expiry is no longer in the future.
	pub fn is_expired_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
		clock::is_expired(self.issued_at, self.expires_in, skew, now)
	}
}
impl Debug for CachedAccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedAccessToken")
			.field("access_token", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_in", &self.expires_in)
			.finish()
	}
}
