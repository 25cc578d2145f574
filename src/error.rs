//! Broker-level error types shared by the cache, guard, store, and refresh client.

// self
use crate::{_prelude::*, auth::CacheKey};

/// Broker-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical broker error exposed by public APIs.
///
/// Every variant maps onto one [`ErrorKind`]; callers branch on the kind (or on
/// [`Error::requires_reconsent`] / [`Error::is_retriable`]) to decide between asking the user to
/// reconnect and retrying later.
#[derive(Debug, ThisError)]
pub enum Error {
	/// No refresh token is stored for the key; the user must re-run the consent flow.
	#[error("No refresh token is stored for {key}; the user must reconnect.")]
	NoRefreshToken {
		/// Key that has no stored payload.
		key: CacheKey,
	},
	/// The rotation guard could not be acquired before the timeout elapsed.
	#[error("Timed out after {waited:?} waiting for the rotation guard of {key}.")]
	RotationTimeout {
		/// Key whose guard was contended.
		key: CacheKey,
		/// Time spent waiting.
		waited: StdDuration,
	},
	/// The wait for the rotation guard was cancelled by the caller.
	#[error("Wait for the rotation guard of {key} was interrupted.")]
	RotationInterrupted {
		/// Key whose guard was being awaited.
		key: CacheKey,
	},
	/// Refresh-token rotation conflicted with a concurrent writer on both attempts.
	///
	/// The broker logs this and proceeds with the token it obtained; it is not returned from
	/// `mint_token`.
	#[error("Refresh token rotation for {key} conflicted with a concurrent writer twice.")]
	RotationConflict {
		/// Key whose stored payload kept changing.
		key: CacheKey,
	},
	/// The authorization server rejected the refresh token.
	#[error("Authorization server rejected the refresh token: {reason}.")]
	UpstreamInvalidRefreshToken {
		/// Upstream- or broker-supplied reason string.
		reason: String,
	},
	/// The authorization server throttled the refresh call.
	#[error("Authorization server rate limited the refresh call: {reason}.")]
	UpstreamRateLimited {
		/// Upstream- or broker-supplied reason string.
		reason: String,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Any other upstream or transport failure.
	#[error("Refresh call to the authorization server failed: {reason}.")]
	UpstreamUnknown {
		/// Upstream- or broker-supplied reason string.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Whether the failure was classified as transient.
		retriable: bool,
	},
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
impl Error {
	/// Returns the discriminant used for exhaustive dispatch.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::NoRefreshToken { .. } => ErrorKind::NoRefreshToken,
			Self::RotationTimeout { .. } => ErrorKind::RotationTimeout,
			Self::RotationInterrupted { .. } => ErrorKind::RotationInterrupted,
			Self::RotationConflict { .. } => ErrorKind::RotationConflict,
			Self::UpstreamInvalidRefreshToken { .. } => ErrorKind::UpstreamInvalidRefreshToken,
			Self::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
			Self::UpstreamUnknown { .. } => ErrorKind::UpstreamUnknown,
			Self::Storage(_) => ErrorKind::Storage,
			Self::Config(_) => ErrorKind::Config,
		}
	}

	/// Returns `true` when retrying the same call later may succeed.
	pub fn is_retriable(&self) -> bool {
		match self {
			Self::RotationTimeout { .. }
			| Self::RotationInterrupted { .. }
			| Self::UpstreamRateLimited { .. }
			| Self::Storage(_) => true,
			Self::UpstreamUnknown { retriable, .. } => *retriable,
			Self::NoRefreshToken { .. }
			| Self::RotationConflict { .. }
			| Self::UpstreamInvalidRefreshToken { .. }
			| Self::Config(_) => false,
		}
	}

	/// Returns `true` when the user must re-run the OAuth consent flow.
	pub fn requires_reconsent(&self) -> bool {
		matches!(self.kind(), ErrorKind::NoRefreshToken | ErrorKind::UpstreamInvalidRefreshToken)
	}

	/// Retry-After hint attached to rate-limited failures.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::UpstreamRateLimited { retry_after, .. } => *retry_after,
			_ => None,
		}
	}
}

/// Fieldless mirror of [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// See [`Error::NoRefreshToken`].
	NoRefreshToken,
	/// See [`Error::RotationTimeout`].
	RotationTimeout,
	/// See [`Error::RotationInterrupted`].
	RotationInterrupted,
	/// See [`Error::RotationConflict`].
	RotationConflict,
	/// See [`Error::UpstreamInvalidRefreshToken`].
	UpstreamInvalidRefreshToken,
	/// See [`Error::UpstreamRateLimited`].
	UpstreamRateLimited,
	/// See [`Error::UpstreamUnknown`].
	UpstreamUnknown,
	/// See [`Error::Storage`].
	Storage,
	/// See [`Error::Config`].
	Config,
}
impl ErrorKind {
	/// Returns a stable label suitable for log or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::NoRefreshToken => "no_refresh_token",
			Self::RotationTimeout => "rotation_timeout",
			Self::RotationInterrupted => "rotation_interrupted",
			Self::RotationConflict => "rotation_conflict",
			Self::UpstreamInvalidRefreshToken => "upstream_invalid_refresh_token",
			Self::UpstreamRateLimited => "upstream_rate_limited",
			Self::UpstreamUnknown => "upstream_unknown",
			Self::Storage => "storage",
			Self::Config => "config",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures raised by the broker.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Configuration document could not be parsed.
	#[error("Broker configuration is invalid at `{}`.", source.path())]
	Parse {
		/// Structured parsing failure, including the offending path.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// A configuration value is out of range.
	#[error("Configuration value `{field}` is invalid: {reason}.")]
	InvalidSetting {
		/// Dotted path of the offending field.
		field: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
	/// The token endpoint URI cannot be parsed.
	#[error("Token endpoint URI is invalid.")]
	InvalidTokenUri {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The token endpoint URI does not use HTTPS.
	#[error("Token endpoint must use HTTPS: {url}.")]
	InsecureTokenUri {
		/// Rejected endpoint.
		url: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
