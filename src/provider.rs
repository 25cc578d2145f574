//! Upstream error classification for refresh-token exchanges.
//!
//! [`ProviderStrategy`] turns the raw facts of a failed refresh (HTTP status, OAuth `error` field,
//! body preview, transport failure) into a [`ProviderErrorKind`]. The refresh client owns the
//! mapping from kinds onto broker [`Error`] values, so strategies stay free of any HTTP client
//! types.

// self
use crate::_prelude::*;

/// Strategy hook that classifies failed token requests.
pub trait ProviderStrategy
where
	Self: Send + Sync,
{
	/// Maps a failed refresh into the broker taxonomy.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// Canonical upstream failure categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// The refresh token is expired, revoked, or otherwise rejected; the user must reconnect.
	InvalidRefreshToken,
	/// The authorization server throttled the request.
	RateLimited,
	/// Failure is temporary and the call may be retried.
	Transient,
	/// Anything else; not retried.
	Unknown,
}

/// Context passed to provider strategies when classifying token errors.
///
/// Only primitive data is kept so strategies stay decoupled from the transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
	/// Preview of the response body for non-JSON payloads.
	pub body_preview: Option<String>,
	/// Indicates whether the failure originated from the network/transport layer.
	pub network_error: bool,
}
impl ProviderErrorContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Convenience constructor for transport-level failures, including timeouts.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Default::default() }
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: Option<u16>) -> Self {
		self.http_status = status;

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Adds a truncated body preview for responses that are not OAuth error documents.
	pub fn with_body_preview(mut self, body: &[u8]) -> Self {
		self.body_preview = Some(truncate_preview(&String::from_utf8_lossy(body)));

		self
	}
}

/// Classification rules for the Atlassian identity platform.
///
/// Throttling wins over everything else, then the OAuth `error` field, then the HTTP status.
/// Network failures are always transient.
#[derive(Clone, Copy, Debug, Default)]
pub struct AtlassianStrategy;
impl Display for AtlassianStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("atlassian-strategy")
	}
}
impl ProviderStrategy for AtlassianStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		if ctx.network_error {
			return ProviderErrorKind::Transient;
		}
		if ctx.http_status == Some(429) {
			return ProviderErrorKind::RateLimited;
		}
		if let Some(kind) = ctx.oauth_error.as_deref().and_then(classify_oauth_error) {
			return kind;
		}

		classify_status(ctx.http_status)
	}
}

fn truncate_preview(body: &str) -> String {
	let mut chars = body.chars();
	let mut preview: String =
		chars.by_ref().take(ProviderErrorContext::BODY_PREVIEW_LIMIT).collect();

	if chars.next().is_some() {
		preview.push('…');
	}

	preview
}

fn classify_oauth_error(value: &str) -> Option<ProviderErrorKind> {
	const REJECTED: [&str; 3] = ["invalid_grant", "access_denied", "unauthorized_client"];

	if REJECTED.iter().any(|code| value.eq_ignore_ascii_case(code)) {
		Some(ProviderErrorKind::InvalidRefreshToken)
	} else if value.eq_ignore_ascii_case("temporarily_unavailable") {
		Some(ProviderErrorKind::Transient)
	} else {
		None
	}
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(429) => ProviderErrorKind::RateLimited,
		Some(502..=504) => ProviderErrorKind::Transient,
		Some(400..=499) => ProviderErrorKind::InvalidRefreshToken,
		_ => ProviderErrorKind::Unknown,
	}
}
