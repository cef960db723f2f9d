//! Cache manager handling key-set retrieval and lifecycle.

// crates.io
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use url::Url;
// self
use crate::{
	_prelude::*,
	cache::state::{CacheState, KeySetStatus},
	codec::{JwkSetCodec, KeySetCodec},
	config::ClientConfig,
	http::{
		client::{HttpFetch, ReqwestTransport, Transport, cache_control_header, fetch_jwks},
		semantics::{error_expiry, evaluate_expiry},
	},
	metrics::{self, RefreshMetrics},
};

/// Coordinates fetching, caching, and stale serving for one key-set endpoint.
///
/// Cloning is cheap and every clone shares the same cache. Refresh attempts are serialised by
/// a single-flight guard; the state lock is only taken to read or swap the snapshot, so a slow
/// fetch never blocks readers of the previous key set.
#[derive(Clone, Debug)]
pub struct CacheManager {
	config: Arc<ClientConfig>,
	url: Arc<Url>,
	endpoint: Arc<str>,
	transport: Arc<dyn Transport>,
	codec: Arc<dyn KeySetCodec>,
	state: Arc<RwLock<Arc<CacheState>>>,
	single_flight: Arc<Mutex<()>>,
	metrics: Arc<RefreshMetrics>,
	shutdown: CancellationToken,
}
impl CacheManager {
	/// Build a new cache manager with the default reqwest transport and JWKS codec.
	pub fn new(config: ClientConfig) -> Result<Self> {
		config.validate()?;

		let transport = ReqwestTransport::new(config.request_timeout)?;

		Self::with_parts(config, Arc::new(transport), Arc::new(JwkSetCodec))
	}

	/// Build a cache manager using the supplied transport.
	pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
		Self::with_parts(config, transport, Arc::new(JwkSetCodec))
	}

	/// Build a cache manager from explicit collaborators.
	pub fn with_parts(
		config: ClientConfig,
		transport: Arc<dyn Transport>,
		codec: Arc<dyn KeySetCodec>,
	) -> Result<Self> {
		let url = config.validate()?;
		let endpoint = Arc::from(url.origin().ascii_serialization());

		Ok(Self {
			config: Arc::new(config),
			url: Arc::new(url),
			endpoint,
			transport,
			codec,
			state: Arc::new(RwLock::new(Arc::new(CacheState::empty()))),
			single_flight: Arc::new(Mutex::new(())),
			metrics: RefreshMetrics::new(),
			shutdown: CancellationToken::new(),
		})
	}

	/// Build a cache manager and wait for the first fetch to complete.
	///
	/// A failed first fetch is returned only under `exit_on_error`; otherwise it is logged and
	/// the manager is returned with the failure cached.
	pub async fn connect(config: ClientConfig) -> Result<Self> {
		let manager = Self::new(config)?;
		let token = manager.shutdown.clone();

		manager.refresh_logged(&token).await?;

		Ok(manager)
	}

	/// Configuration the manager was built with.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Parsed key-set endpoint.
	pub fn url(&self) -> &Url {
		&self.url
	}

	/// Access the per-manager metrics accumulator.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.metrics.clone()
	}

	/// Cancel in-flight fetches and stop every refresh driver of this manager.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// Whether [`shutdown`](Self::shutdown) has been requested.
	pub fn is_shutdown(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	pub(crate) fn shutdown_token(&self) -> &CancellationToken {
		&self.shutdown
	}

	/// Capture the complete current cache state, without applying the stale policy.
	pub async fn snapshot(&self) -> Arc<CacheState> {
		self.state.read().await.clone()
	}

	/// Return the key set callers should validate tokens against.
	///
	/// After a failed refresh the last good key set keeps being served until `keep_stale_keys`
	/// has passed since the first consecutive failure; only then is the failure returned.
	/// Before any fetch has completed this fails with [`Error::KeysNotFetched`].
	pub async fn key_set(&self) -> Result<Arc<JwkSet>> {
		let state = self.snapshot().await;
		let now = Utc::now();
		let status = state.status(now, self.config.keep_stale_keys);

		self.observe_key_set(status);

		state.key_set(now, self.config.keep_stale_keys)
	}

	/// Fetch the key set when the cache is due, or unconditionally when `force` is set.
	///
	/// Returns `Ok(false)` when the cache was still fresh and nothing was fetched, and
	/// `Ok(true)` after a successful refresh. An `Err` means a refresh was attempted and
	/// failed; the failure has already been installed into the cache state.
	#[tracing::instrument(skip(self), fields(endpoint = %self.endpoint))]
	pub async fn refresh(&self, force: bool) -> Result<bool> {
		self.refresh_with(force, &self.shutdown).await
	}

	pub(crate) async fn refresh_with(&self, force: bool, cancel: &CancellationToken) -> Result<bool> {
		let _guard = self.single_flight.lock().await;
		// Only refresh writes the state and refresh is serialised, so `current` stays current
		// until the swap below.
		let current = self.snapshot().await;

		if !force && !current.is_due(Utc::now()) {
			return Ok(false);
		}

		let fetch = tokio::select! {
			biased;

			_ = cancel.cancelled() => return Err(Error::Cancelled),
			_ = self.shutdown.cancelled() => return Err(Error::Cancelled),
			fetch = fetch_jwks(self.transport.as_ref(), self.codec.as_ref(), &self.url) => fetch,
		};
		let now = Utc::now();
		let HttpFetch { headers, body, elapsed, jwks } = fetch;
		let (next, outcome) = match jwks {
			Ok(jwks) => {
				let expiry = evaluate_expiry(now, &headers, &self.config);

				tracing::debug!(
					keys = jwks.keys.len(),
					cache_control = cache_control_header(&headers).as_deref(),
					expires_after = %expiry.expires_after,
					"key set fetched"
				);

				self.observe_refresh_success(elapsed);

				(current.succeeded(now, jwks, headers, body, expiry.expires_after), Ok(true))
			},
			Err(err) => {
				let err = Arc::new(err);
				let expires_after = error_expiry(now, current.expires_after, &self.config);

				self.observe_refresh_error();

				(
					current.failed(now, err.clone(), headers, body, expires_after),
					Err(Error::Refresh(err)),
				)
			},
		};

		*self.state.write().await = Arc::new(next);

		outcome
	}

	/// Run one non-forced refresh, applying the `exit_on_error` policy.
	///
	/// Failures are logged and swallowed unless `exit_on_error` is set. Cancellation is always
	/// returned so drivers can stop.
	pub(crate) async fn refresh_logged(&self, cancel: &CancellationToken) -> Result<RefreshTick> {
		match self.refresh_with(false, cancel).await {
			Ok(false) => Ok(RefreshTick::Fresh),
			Ok(true) => {
				tracing::info!(endpoint = %self.endpoint, "key set refreshed");

				Ok(RefreshTick::Refreshed)
			},
			Err(Error::Cancelled) => Err(Error::Cancelled),
			Err(err) if self.config.exit_on_error => Err(err),
			Err(err) => {
				tracing::error!(endpoint = %self.endpoint, error = %err, "failed to refresh key set");

				Ok(RefreshTick::Failed)
			},
		}
	}

	fn observe_key_set(&self, status: KeySetStatus) {
		metrics::record_key_set(&self.endpoint, status);

		self.metrics.record_key_set(status);

		if status == KeySetStatus::Stale {
			tracing::debug!(endpoint = %self.endpoint, "serving stale key set");
		}
	}

	fn observe_refresh_success(&self, duration: Duration) {
		metrics::record_refresh_success(&self.endpoint, duration);

		self.metrics.record_refresh_success(duration);
	}

	fn observe_refresh_error(&self) {
		metrics::record_refresh_error(&self.endpoint);

		self.metrics.record_refresh_error();
	}
}

/// Result of one driver tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RefreshTick {
	/// Cache still fresh; nothing fetched.
	Fresh,
	/// A fetch succeeded and was installed.
	Refreshed,
	/// A fetch failed and the failure was installed.
	Failed,
}
impl RefreshTick {
	/// Whether the tick installed a new cache state.
	pub(crate) fn changed_state(self) -> bool {
		!matches!(self, RefreshTick::Fresh)
	}
}
