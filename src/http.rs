//! HTTP transport behind the refresh client.
//!
//! The broker talks to the token endpoint only through [`TokenHttpClient`]. Each refresh asks the
//! transport for a fresh [`AsyncHttpClient`] handle bound to a [`ResponseMetadataSlot`]; the
//! handle writes the response status and `Retry-After` hint there so failures can be classified
//! after `oauth2` has consumed the body.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::error::ConfigError;

/// HTTP stack used for refresh calls.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Error produced by the underlying client.
	type TransportError: 'static + Send + Sync + StdError;

	/// Per-refresh handle; its request futures must be `Send`.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Returns a handle that clears `slot` before each request and records every response in it.
	fn handle(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Status and throttling hint of the last token-endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code; `None` when no response arrived.
	pub status: Option<u16>,
	/// `Retry-After` as a duration from now.
	pub retry_after: Option<Duration>,
}

/// Shared cell the transport writes [`ResponseMetadata`] into.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Overwrites the recorded metadata.
	pub fn record(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Removes and returns the recorded metadata.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Default transport built on reqwest.
///
/// Redirects are never followed. A request that exceeds the configured timeout surfaces as a
/// retriable upstream failure.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient {
	client: ReqwestClient,
}
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Builds a client with the given per-request timeout and redirects disabled.
	pub fn new(request_timeout: StdDuration) -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.timeout(request_timeout)
			.redirect(reqwest::redirect::Policy::none())
			.build()?;

		Ok(Self { client })
	}

	/// Uses a preconfigured client as is; it should not follow redirects.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client }
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = RecordingHandle;
	type TransportError = ReqwestError;

	fn handle(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		RecordingHandle { client: self.client.clone(), slot }
	}
}

/// [`AsyncHttpClient`] handed out by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct RecordingHandle {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}
#[cfg(feature = "reqwest")]
impl RecordingHandle {
	async fn send(
		&self,
		request: HttpRequest,
	) -> Result<HttpResponse, HttpClientError<ReqwestError>> {
		self.slot.take();

		let response = self.client.execute(request.try_into().map_err(Box::new)?).await;
		let response = response.map_err(Box::new)?;
		let status = response.status();
		let headers = response.headers().clone();

		self.slot.record(ResponseMetadata {
			status: Some(status.as_u16()),
			retry_after: parse_retry_after(&headers),
		});

		let body = response.bytes().await.map_err(Box::new)?;
		let mut converted = HttpResponse::new(body.to_vec());

		*converted.status_mut() = status;
		*converted.headers_mut() = headers;

		Ok(converted)
	}
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for RecordingHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(self.send(request))
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<i64>() {
		return (secs >= 0).then(|| Duration::seconds(secs));
	}

	let delta = OffsetDateTime::parse(raw, &Rfc2822).ok()? - OffsetDateTime::now_utc();

	delta.is_positive().then_some(delta)
}
