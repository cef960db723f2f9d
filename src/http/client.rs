//! HTTP transport integration for key-set retrieval.

// crates.io
use async_trait::async_trait;
use http::{
	HeaderMap, StatusCode,
	header::{ACCEPT, CACHE_CONTROL},
};
use jsonwebtoken::jwk::JwkSet;
use reqwest::{Client, redirect::Policy};
use url::Url;
// self
use crate::{_prelude::*, codec::KeySetCodec};

/// Raw response returned by a [`Transport`].
#[derive(Clone, Debug)]
pub struct HttpResponse {
	/// Response status code.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Fully read response body.
	pub body: Vec<u8>,
}

/// Issues the HTTP request for the key-set document.
///
/// Timeout policy belongs to the implementation; the cache never imposes one of its own.
/// When the body cannot be read, implementations return [`Error::BodyRead`] carrying the
/// response headers so they stay available for diagnostics.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
	/// Perform a GET request against `url` and read the whole body.
	async fn fetch(&self, url: &Url) -> Result<HttpResponse>;
}

/// Default transport built on `reqwest`.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: Client,
}
impl ReqwestTransport {
	/// Build a transport with the crate's default client settings.
	pub fn new(request_timeout: Duration) -> Result<Self> {
		let client = Client::builder()
			.redirect(Policy::limited(10))
			.user_agent(format!("jwks-refresh/{}", env!("CARGO_PKG_VERSION")))
			.connect_timeout(Duration::from_secs(5))
			.timeout(request_timeout)
			.build()?;

		Ok(Self { client })
	}

	/// Wrap a caller-configured client.
	pub fn with_client(client: Client) -> Self {
		Self { client }
	}
}
#[async_trait]
impl Transport for ReqwestTransport {
	async fn fetch(&self, url: &Url) -> Result<HttpResponse> {
		let response = self
			.client
			.get(url.clone())
			.header(ACCEPT, "application/json")
			.send()
			.await
			.map_err(|err| Error::Transport { url: url.clone(), source: Box::new(err) })?;
		let status = response.status();
		let headers = response.headers().clone();
		let body = match response.bytes().await {
			Ok(body) => body,
			Err(err) =>
				return Err(Error::BodyRead { url: url.clone(), headers, source: Box::new(err) }),
		};

		Ok(HttpResponse { status, headers, body: body.to_vec() })
	}
}

/// Outcome of one fetch cycle, captured whether or not it succeeded.
#[derive(Debug)]
pub struct HttpFetch {
	/// Headers of the response, empty when no response headers arrived.
	pub headers: HeaderMap,
	/// Raw body of the response, empty when no response arrived.
	pub body: Vec<u8>,
	/// Round-trip duration of the exchange.
	pub elapsed: Duration,
	/// Parsed key set, or why the cycle failed.
	pub jwks: Result<Arc<JwkSet>>,
}

/// Fetch and decode the key-set document.
///
/// Only `200 OK` is a success. Other statuses fail with the status and the body text.
pub async fn fetch_jwks(
	transport: &dyn Transport,
	codec: &dyn KeySetCodec,
	url: &Url,
) -> HttpFetch {
	let start = Instant::now();
	let response = match transport.fetch(url).await {
		Ok(response) => response,
		Err(err) => {
			let headers = match &err {
				Error::BodyRead { headers, .. } => headers.clone(),
				_ => HeaderMap::new(),
			};

			return HttpFetch { headers, body: Vec::new(), elapsed: start.elapsed(), jwks: Err(err) };
		},
	};
	let elapsed = start.elapsed();
	let HttpResponse { status, headers, body } = response;

	if status != StatusCode::OK {
		let text = (!body.is_empty()).then(|| String::from_utf8_lossy(&body).into_owned());

		return HttpFetch {
			headers,
			body,
			elapsed,
			jwks: Err(Error::HttpStatus { status, url: url.clone(), body: text }),
		};
	}

	let jwks = codec.parse(&body).map(Arc::new);

	tracing::debug!(
		url = %url,
		status = %status,
		elapsed = ?elapsed,
		bytes = body.len(),
		parsed = jwks.is_ok(),
		"jwks fetch complete"
	);

	HttpFetch { headers, body, elapsed, jwks }
}

/// Extract cache-control header as string for diagnostics.
pub fn cache_control_header(headers: &HeaderMap) -> Option<String> {
	headers.get(CACHE_CONTROL).and_then(|value| value.to_str().ok()).map(|s| s.to_string())
}
