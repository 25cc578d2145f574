//! Broker configuration surface.
//!
//! Every field carries a default so an empty JSON object (`{}`) yields a working Atlassian
//! configuration. Documents use camelCase keys, e.g.
//! `{"cache":{"enabled":true,"expirySkewSeconds":45},"guard":{"timeoutMs":30000}}`.

// std
use std::net::IpAddr;
// self
use crate::{_prelude::*, error::ConfigError};

/// Atlassian's OAuth 2.0 token endpoint.
pub const ATLASSIAN_TOKEN_URI: &str = "https://auth.atlassian.com/oauth/token";

/// Root configuration consumed by [`TokenBroker`](crate::broker::TokenBroker).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
	/// Access-token cache settings.
	pub cache: CacheConfig,
	/// Upstream retry policy.
	pub retry: RetryConfig,
	/// Rotation guard settings.
	pub guard: GuardConfig,
	/// Authorization server settings.
	pub upstream: UpstreamConfig,
}
impl BrokerConfig {
	/// Parses a JSON document, reporting the path of the first offending field.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::Parse { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Rejects values the broker cannot operate with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.cache.expiry_skew_seconds < 0 {
			return Err(ConfigError::InvalidSetting {
				field: "cache.expirySkewSeconds",
				reason: "must not be negative",
			});
		}
		if self.cache.cleanup_interval_seconds == 0 {
			return Err(ConfigError::InvalidSetting {
				field: "cache.cleanupIntervalSeconds",
				reason: "must be positive",
			});
		}
		if self.retry.max_attempts == 0 {
			return Err(ConfigError::InvalidSetting {
				field: "retry.maxAttempts",
				reason: "must be at least 1",
			});
		}
		if self.guard.timeout_ms == 0 {
			return Err(ConfigError::InvalidSetting {
				field: "guard.timeoutMs",
				reason: "must be positive",
			});
		}
		if self.upstream.request_timeout_ms == 0 {
			return Err(ConfigError::InvalidSetting {
				field: "upstream.requestTimeoutMs",
				reason: "must be positive",
			});
		}

		self.upstream.token_url().map(|_| ())
	}
}

/// Access-token cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
	/// Disables caching entirely when `false`.
	pub enabled: bool,
	/// Safety margin subtracted from a token's TTL before it is considered stale.
	pub expiry_skew_seconds: i64,
	/// Period of the background cleanup task.
	pub cleanup_interval_seconds: u64,
}
impl CacheConfig {
	/// Skew as a signed duration.
	pub fn skew(&self) -> Duration {
		Duration::seconds(self.expiry_skew_seconds)
	}

	/// Cleanup period.
	pub fn cleanup_interval(&self) -> StdDuration {
		StdDuration::from_secs(self.cleanup_interval_seconds)
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		Self { enabled: true, expiry_skew_seconds: 45, cleanup_interval_seconds: 300 }
	}
}

/// Retry policy for upstream refresh calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
	/// Total upstream attempts per refresh, including the first.
	pub max_attempts: u32,
	/// Delay before the first retry; doubles afterwards.
	pub base_delay_ms: u64,
	/// Randomizes each delay within `[delay / 2, delay]`.
	pub jitter: bool,
}
impl Default for RetryConfig {
	fn default() -> Self {
		Self { max_attempts: 1, base_delay_ms: 200, jitter: true }
	}
}

/// Rotation guard settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GuardConfig {
	/// Maximum time to wait for another caller's refresh of the same key.
	pub timeout_ms: u64,
}
impl GuardConfig {
	/// Wait bound as a duration.
	pub fn timeout(&self) -> StdDuration {
		StdDuration::from_millis(self.timeout_ms)
	}
}
impl Default for GuardConfig {
	fn default() -> Self {
		Self { timeout_ms: 30_000 }
	}
}

/// Authorization server settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpstreamConfig {
	/// Token endpoint receiving `grant_type=refresh_token` requests.
	pub token_uri: String,
	/// Per-request timeout applied by the default HTTP client.
	pub request_timeout_ms: u64,
}
impl UpstreamConfig {
	/// Per-request timeout as a duration.
	pub fn request_timeout(&self) -> StdDuration {
		StdDuration::from_millis(self.request_timeout_ms)
	}

	/// Parses the token endpoint, requiring HTTPS except for loopback hosts.
	pub fn token_url(&self) -> Result<Url, ConfigError> {
		let url = Url::parse(&self.token_uri)
			.map_err(|source| ConfigError::InvalidTokenUri { source })?;

		if url.scheme() == "https" || is_loopback(&url) {
			Ok(url)
		} else {
			Err(ConfigError::InsecureTokenUri { url: url.to_string() })
		}
	}
}
impl Default for UpstreamConfig {
	fn default() -> Self {
		Self { token_uri: ATLASSIAN_TOKEN_URI.into(), request_timeout_ms: 10_000 }
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host_str() {
		Some("localhost") => true,
		Some(host) => host
			.trim_start_matches('[')
			.trim_end_matches(']')
			.parse::<IpAddr>()
			.map(|ip| ip.is_loopback())
			.unwrap_or(false),
		None => false,
	}
}
