//! Versioned refresh-token payload owned by the external store.

// self
use crate::{_prelude::*, auth::TokenSecret, oauth::RefreshGrant};

/// Long-lived credential record persisted per user and site.
///
/// `rotation_counter` acts as the record version: stores bump it on every successful save.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenPayload {
	/// Access token issued alongside the last refresh.
	pub access_token: TokenSecret,
	/// Refresh token presented on the next refresh.
	pub refresh_token: TokenSecret,
	/// Lifetime in seconds of `access_token`.
	pub expires_in: i64,
	/// Space-delimited scopes granted upstream.
	pub scope: Option<String>,
	/// Instant the payload was first persisted.
	#[serde(with = "time::serde::rfc3339")]
	pub created: OffsetDateTime,
	/// Instant of the last successful save.
	#[serde(with = "time::serde::rfc3339")]
	pub updated: OffsetDateTime,
	/// Number of successful saves since creation.
	pub rotation_counter: u64,
}
impl RefreshTokenPayload {
	/// Creates a fresh payload, as produced by the authorization-code exchange.
	pub fn new(
		access_token: impl Into<String>,
		refresh_token: impl Into<String>,
		expires_in: i64,
		scope: Option<String>,
		now: OffsetDateTime,
	) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: TokenSecret::new(refresh_token),
			expires_in,
			scope,
			created: now,
			updated: now,
			rotation_counter: 0,
		}
	}

	/// Builds the successor payload after the authorization server answered with `grant`.
	///
	/// The refresh token falls back to the current one when the grant did not rotate it.
	pub fn rotated(&self, grant: &RefreshGrant, now: OffsetDateTime) -> Self {
		Self {
			access_token: grant.access_token.clone(),
			refresh_token: grant
				.refresh_token
				.clone()
				.unwrap_or_else(|| self.refresh_token.clone()),
			expires_in: grant.expires_in,
			scope: grant.scope.clone().or_else(|| self.scope.clone()),
			created: self.created,
			updated: now,
			rotation_counter: self.rotation_counter.saturating_add(1),
		}
	}
}
impl Debug for RefreshTokenPayload {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshTokenPayload")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.fingerprint())
			.field("expires_in", &self.expires_in)
			.field("scope", &self.scope)
			.field("created", &self.created)
			.field("updated", &self.updated)
			.field("rotation_counter", &self.rotation_counter)
			.finish()
	}
}
