//! Wire types of the broker's token-exchange front door.
//!
//! Requests arrive as `{"subject_token": "<user>", "audience": "<site>"}` and are answered with
//! `{"accessToken", "expiresIn", "issuedAt", "userId", "siteId"}`. The refresh token never leaves
//! the broker.

// self
use crate::{
	_prelude::*,
	auth::{CacheKey, CachedAccessToken, SiteId, TokenSecret, UserId},
};

/// Inbound exchange request; identifiers are validated during deserialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenExchangeRequest {
	/// User whose delegated refresh token backs the exchange.
	pub subject_token: UserId,
	/// Atlassian site the token is for; empty when not site-scoped.
	#[serde(default)]
	pub audience: SiteId,
}
impl TokenExchangeRequest {
	/// Creates a request for `user` on `site`.
	pub fn new(user: UserId, site: SiteId) -> Self {
		Self { subject_token: user, audience: site }
	}

	/// Cache, guard, and store key addressed by this request.
	pub fn key(&self) -> CacheKey {
		CacheKey::new(self.subject_token.clone(), self.audience.clone())
	}
}
impl From<CacheKey> for TokenExchangeRequest {
	fn from(key: CacheKey) -> Self {
		Self::new(key.user, key.site)
	}
}

/// Access token handed back to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
	/// Bearer token for Atlassian APIs.
	pub access_token: TokenSecret,
	/// Lifetime in seconds counted from `issued_at`.
	pub expires_in: i64,
	/// Instant the token was obtained from the authorization server.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// User the token acts for.
	pub user_id: UserId,
	/// Site the token is scoped to.
	pub site_id: SiteId,
}
impl TokenResponse {
	/// Builds a response for `key` out of a cached token.
	pub fn from_cached(key: &CacheKey, token: &CachedAccessToken) -> Self {
		Self {
			access_token: token.access_token().clone(),
			expires_in: token.expires_in(),
			issued_at: token.issued_at(),
			user_id: key.user.clone(),
			site_id: key.site.clone(),
		}
	}

	/// Nominal expiry instant, without any skew applied.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.issued_at.saturating_add(Duration::seconds(self.expires_in))
	}
}
