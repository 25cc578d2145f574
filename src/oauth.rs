//! Refresh-token exchange against the upstream authorization server.
//!
//! [`RefreshClient`] is the seam the broker calls; [`OAuth2RefreshClient`] implements it with the
//! `oauth2` crate over any [`TokenHttpClient`], sending `grant_type=refresh_token` together with
//! the client credentials in the form body.

pub use oauth2;

// crates.io
use oauth2::{
	AccessToken, AuthType, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, RefreshToken, RequestTokenError, Scope, StandardRevocableToken,
	TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRequestTokenError, BasicRevocationErrorResponse,
		BasicTokenIntrospectionResponse, BasicTokenType,
	},
	helpers,
};
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::UpstreamConfig,
	error::ConfigError,
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{AtlassianStrategy, ProviderErrorContext, ProviderErrorKind, ProviderStrategy},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

type ConfiguredClient = Client<
	BasicErrorResponse,
	RefreshTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Boxed future returned by [`RefreshClient::refresh`].
pub type RefreshFuture<'a> = Pin<Box<dyn Future<Output = Result<RefreshGrant>> + 'a + Send>>;

/// Successful answer to a `grant_type=refresh_token` request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshGrant {
	/// Newly issued access token.
	pub access_token: TokenSecret,
	/// Replacement refresh token; `None` when the server kept the old one.
	pub refresh_token: Option<TokenSecret>,
	/// Access-token lifetime in seconds; always positive.
	pub expires_in: i64,
	/// Granted scopes, space separated.
	pub scope: Option<String>,
}
impl RefreshGrant {
	/// Returns `true` when the server issued a refresh token different from `previous`.
	pub fn rotates(&self, previous: &str) -> bool {
		self.refresh_token.as_ref().is_some_and(|token| token.expose() != previous)
	}
}

/// Body of a successful token-endpoint answer.
///
/// Atlassian may leave out `token_type`; it then defaults to `Bearer`.
#[derive(Clone, Debug, Deserialize, Serialize)]
struct RefreshTokenResponse {
	access_token: AccessToken,
	#[serde(
		default = "bearer_token_type",
		deserialize_with = "helpers::deserialize_untagged_enum_case_insensitive"
	)]
	token_type: BasicTokenType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	expires_in: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<RefreshToken>,
	#[serde(
		rename = "scope",
		default,
		deserialize_with = "helpers::deserialize_space_delimited_vec",
		serialize_with = "helpers::serialize_space_delimited_vec",
		skip_serializing_if = "Option::is_none"
	)]
	scopes: Option<Vec<Scope>>,
}
impl TokenResponse for RefreshTokenResponse {
	type TokenType = BasicTokenType;

	fn access_token(&self) -> &AccessToken {
		&self.access_token
	}

	fn token_type(&self) -> &BasicTokenType {
		&self.token_type
	}

	fn expires_in(&self) -> Option<StdDuration> {
		self.expires_in.map(StdDuration::from_secs)
	}

	fn refresh_token(&self) -> Option<&RefreshToken> {
		self.refresh_token.as_ref()
	}

	fn scopes(&self) -> Option<&Vec<Scope>> {
		self.scopes.as_ref()
	}
}

fn bearer_token_type() -> BasicTokenType {
	BasicTokenType::Bearer
}

/// Exchanges a refresh token for a new access token.
pub trait RefreshClient
where
	Self: Send + Sync,
{
	/// Performs one upstream refresh call.
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a>;
}

/// Maps HTTP transport failures into broker [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a broker error.
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		strategy: &dyn ProviderStrategy,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(strategy, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => network_error(
				strategy,
				meta,
				format!("I/O error while calling the token endpoint: {inner}"),
			),
			HttpClientError::Other(message) => network_error(
				strategy,
				meta,
				format!("HTTP client error while calling the token endpoint: {message}"),
			),
			_ => network_error(
				strategy,
				meta,
				"HTTP client error while calling the token endpoint".into(),
			),
		}
	}
}

/// [`RefreshClient`] backed by the `oauth2` crate.
pub struct OAuth2RefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	strategy: Arc<dyn ProviderStrategy>,
}
impl<C, M> OAuth2RefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds a client for `upstream.token_uri` that authenticates with `client_secret_post`.
	pub fn new(
		upstream: &UpstreamConfig,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let token_url = TokenUrl::from_url(upstream.token_url()?);
		let mut oauth_client: ConfiguredClient = Client::new(ClientId::new(client_id.to_owned()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));
		}

		Ok(Self {
			oauth_client,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			strategy: Arc::new(AtlassianStrategy),
		})
	}

	/// Replaces the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}
}
#[cfg(feature = "reqwest")]
impl OAuth2RefreshClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Builds a reqwest-backed client honoring `upstream.request_timeout_ms`.
	pub fn from_config(
		upstream: &UpstreamConfig,
		client_id: &str,
		client_secret: Option<&str>,
	) -> Result<Self> {
		let http_client = ReqwestHttpClient::new(upstream.request_timeout())?;

		Self::new(upstream, client_id, client_secret, http_client, ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for OAuth2RefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuth2RefreshClient")
			.field("client_id", self.oauth_client.client_id())
			.field("token_uri", &self.oauth_client.token_uri().url().as_str())
			.finish_non_exhaustive()
	}
}
impl<C, M> RefreshClient for OAuth2RefreshClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn refresh<'a>(&'a self, refresh_token: &'a str) -> RefreshFuture<'a> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let handle = self.http_client.handle(meta.clone());
			let refresh_secret = RefreshToken::new(refresh_token.to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&handle)
				.await
				.map_err(|err| {
					map_request_error(
						self.strategy.as_ref(),
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;

			map_refresh_response(response)
		})
	}
}

/// Converts a classified upstream failure into the matching broker [`Error`].
pub fn upstream_error(
	kind: ProviderErrorKind,
	reason: String,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let status = meta.and_then(|value| value.status);

	match kind {
		ProviderErrorKind::InvalidRefreshToken => Error::UpstreamInvalidRefreshToken { reason },
		ProviderErrorKind::RateLimited => Error::UpstreamRateLimited {
			reason,
			retry_after: meta.and_then(|value| value.retry_after),
		},
		ProviderErrorKind::Transient => Error::UpstreamUnknown { reason, status, retriable: true },
		ProviderErrorKind::Unknown => Error::UpstreamUnknown { reason, status, retriable: false },
	}
}

fn map_refresh_response(response: RefreshTokenResponse) -> Result<RefreshGrant> {
	let malformed = |reason: &str| Error::UpstreamUnknown {
		reason: reason.into(),
		status: Some(200),
		retriable: false,
	};
	let expires_in = response
		.expires_in()
		.ok_or_else(|| malformed("token response omitted expires_in"))?
		.as_secs();
	let expires_in =
		i64::try_from(expires_in).map_err(|_| malformed("token response expires_in is too large"))?;

	if expires_in <= 0 {
		return Err(malformed("token response expires_in is not positive"));
	}

	let scope = response.scopes().map(|scopes| {
		scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" ")
	});

	Ok(RefreshGrant {
		access_token: TokenSecret::new(response.access_token().secret().as_str()),
		refresh_token: response
			.refresh_token()
			.map(|token| TokenSecret::new(token.secret().as_str())),
		expires_in,
		scope,
	})
}

fn map_request_error<E, M>(
	strategy: &dyn ProviderStrategy,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();
	let status = meta_ref.and_then(|value| value.status);

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, response, meta_ref),
		RequestTokenError::Request(error) => mapper.map_transport_error(strategy, meta_ref, error),
		RequestTokenError::Parse(error, body) => {
			let mut ctx = ProviderErrorContext::default().with_http_status(status);

			// A 2xx body carries live tokens.
			if !status.is_some_and(|code| (200..300).contains(&code)) {
				ctx = ctx.with_body_preview(&body);
			}

			let reason = match ctx.body_preview.as_deref() {
				Some(preview) if !preview.is_empty() =>
					format!("token endpoint returned an unreadable response ({error}): {preview}"),
				_ => format!("token endpoint returned an unreadable response: {error}"),
			};

			upstream_error(strategy.classify_token_error(&ctx), reason, meta_ref)
		},
		RequestTokenError::Other(message) => {
			let ctx = ProviderErrorContext::default().with_http_status(status);

			upstream_error(
				strategy.classify_token_error(&ctx),
				format!("token endpoint returned an unexpected response: {message}"),
				meta_ref,
			)
		},
	}
}

fn map_server_response_error(
	strategy: &dyn ProviderStrategy,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let code = response.error().as_ref().to_owned();
	let mut ctx = ProviderErrorContext::default()
		.with_http_status(meta.and_then(|value| value.status))
		.with_oauth_error(code.clone());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}

	let reason = match response.error_description() {
		Some(description) => format!("{code} ({description})"),
		None => code,
	};

	upstream_error(strategy.classify_token_error(&ctx), reason, meta)
}

fn network_error(
	strategy: &dyn ProviderStrategy,
	meta: Option<&ResponseMetadata>,
	reason: String,
) -> Error {
	upstream_error(
		strategy.classify_token_error(&ProviderErrorContext::network_failure()),
		reason,
		meta,
	)
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	strategy: &dyn ProviderStrategy,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}

	let reason = if err.is_timeout() {
		"request to the token endpoint timed out".to_owned()
	} else {
		format!("network error while calling the token endpoint: {err}")
	};

	network_error(strategy, meta, reason)
}
