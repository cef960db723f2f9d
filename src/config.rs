//! Client configuration and validation.

// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::_prelude::*;

/// Default minimum trust window for a successful fetch.
pub const DEFAULT_CACHE_MIN: Duration = Duration::from_secs(60);
/// Default maximum trust window for a successful fetch.
pub const DEFAULT_CACHE_MAX: Duration = Duration::from_secs(60 * 60);
/// Default duration a failed fetch is cached before retrying.
pub const DEFAULT_CACHE_ERRORS: Duration = Duration::from_secs(30);
/// Default grace window for serving the last good key set after a failure.
pub const DEFAULT_KEEP_STALE_KEYS: Duration = Duration::from_secs(5 * 60);
/// Default tick of the foreground refresh loop.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
/// Default per-request timeout applied by the bundled reqwest transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration describing where to fetch the key set and how long to trust it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
	/// URL of the JWKS endpoint.
	pub url: String,
	/// Cache successful fetches at least this long, regardless of cache headers.
	#[serde(default = "default_cache_min")]
	pub cache_min: Duration,
	/// Cache successful fetches at most this long, regardless of cache headers.
	///
	/// Zero means no ceiling is configured; caching still happens.
	#[serde(default = "default_cache_max")]
	pub cache_max: Duration,
	/// Cache failed fetches for this long; zero retries on the very next check.
	#[serde(default = "default_cache_errors")]
	pub cache_errors: Duration,
	/// Keep serving the last good key set this long after the first consecutive failure.
	#[serde(default = "default_keep_stale_keys")]
	pub keep_stale_keys: Duration,
	/// Stop the refresh drivers on the first failed refresh.
	#[serde(default)]
	pub exit_on_error: bool,
	/// Tick of the foreground refresh loop.
	#[serde(default = "default_tick_interval")]
	pub tick_interval: Duration,
	/// Per-request timeout used by [`ReqwestTransport`](crate::http::client::ReqwestTransport).
	#[serde(default = "default_request_timeout")]
	pub request_timeout: Duration,
}
impl ClientConfig {
	/// Construct a configuration with default cache settings.
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			cache_min: DEFAULT_CACHE_MIN,
			cache_max: DEFAULT_CACHE_MAX,
			cache_errors: DEFAULT_CACHE_ERRORS,
			keep_stale_keys: DEFAULT_KEEP_STALE_KEYS,
			exit_on_error: false,
			tick_interval: DEFAULT_TICK_INTERVAL,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	/// Set the exit-on-error policy.
	pub fn with_exit_on_error(mut self, exit_on_error: bool) -> Self {
		self.exit_on_error = exit_on_error;

		self
	}

	/// Validate the configuration and return the parsed endpoint.
	pub fn validate(&self) -> Result<Url> {
		if self.url.trim().is_empty() {
			return Err(Error::Validation { field: "url", reason: "URL is required.".into() });
		}

		let url = Url::parse(self.url.trim())?;

		if url.cannot_be_a_base() {
			return Err(Error::Validation {
				field: "url",
				reason: "Must be an absolute hierarchical URL.".into(),
			});
		}
		if self.tick_interval.is_zero() {
			return Err(Error::Validation {
				field: "tick_interval",
				reason: "Must be greater than zero.".into(),
			});
		}

		Ok(url)
	}
}

fn default_cache_min() -> Duration {
	DEFAULT_CACHE_MIN
}

fn default_cache_max() -> Duration {
	DEFAULT_CACHE_MAX
}

fn default_cache_errors() -> Duration {
	DEFAULT_CACHE_ERRORS
}

fn default_keep_stale_keys() -> Duration {
	DEFAULT_KEEP_STALE_KEYS
}

fn default_tick_interval() -> Duration {
	DEFAULT_TICK_INTERVAL
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}
