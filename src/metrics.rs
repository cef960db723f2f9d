//! Metrics helpers and per-client telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
use smallvec::SmallVec;
// self
use crate::{_prelude::*, cache::state::KeySetStatus};

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_REFRESH_TOTAL: &str = "jwks_refresh_total";
const METRIC_REFRESH_DURATION: &str = "jwks_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "jwks_refresh_errors_total";
const METRIC_REQUESTS_TOTAL: &str = "jwks_key_set_requests_total";
const METRIC_STALE_TOTAL: &str = "jwks_key_set_stale_total";
const METRIC_ERRORS_TOTAL: &str = "jwks_key_set_errors_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
	std::sync::OnceLock::new();

/// Thread-safe metrics accumulator for a single cache manager.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	key_set_requests: AtomicU64,
	stale_serves: AtomicU64,
	key_set_errors: AtomicU64,
	refresh_successes: AtomicU64,
	refresh_errors: AtomicU64,
	last_refresh_micros: AtomicU64,
}
impl RefreshMetrics {
	/// Create a new metrics accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a key-set read and how it was answered.
	pub fn record_key_set(&self, status: KeySetStatus) {
		self.key_set_requests.fetch_add(1, Ordering::Relaxed);

		match status {
			KeySetStatus::Fresh => {},
			KeySetStatus::Stale => {
				self.stale_serves.fetch_add(1, Ordering::Relaxed);
			},
			KeySetStatus::Empty | KeySetStatus::Errored => {
				self.key_set_errors.fetch_add(1, Ordering::Relaxed);
			},
		}
	}

	/// Record a successful refresh and latency.
	pub fn record_refresh_success(&self, duration: Duration) {
		self.refresh_successes.fetch_add(1, Ordering::Relaxed);
		let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

		self.last_refresh_micros.store(micros, Ordering::Relaxed);
	}

	/// Record refresh failure.
	pub fn record_refresh_error(&self) {
		self.refresh_errors.fetch_add(1, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> RefreshMetricsSnapshot {
		RefreshMetricsSnapshot {
			key_set_requests: self.key_set_requests.load(Ordering::Relaxed),
			stale_serves: self.stale_serves.load(Ordering::Relaxed),
			key_set_errors: self.key_set_errors.load(Ordering::Relaxed),
			refresh_successes: self.refresh_successes.load(Ordering::Relaxed),
			refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
			last_refresh_micros: match self.last_refresh_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-client telemetry counters.
#[derive(Clone, Debug)]
pub struct RefreshMetricsSnapshot {
	/// Total number of key-set reads observed.
	pub key_set_requests: u64,
	/// Reads answered with a stale key set inside the grace window.
	pub stale_serves: u64,
	/// Reads answered with an error.
	pub key_set_errors: u64,
	/// Count of successful refresh operations.
	pub refresh_successes: u64,
	/// Count of refresh attempts that resulted in errors.
	pub refresh_errors: u64,
	/// Microsecond latency of the most recent successful refresh.
	pub last_refresh_micros: Option<u64>,
}
impl RefreshMetricsSnapshot {
	/// Ratio of stale serves over total reads.
	pub fn stale_ratio(&self) -> f64 {
		if self.key_set_requests == 0 {
			0.0
		} else {
			self.stale_serves as f64 / self.key_set_requests as f64
		}
	}

	/// Ratio of failed reads over total reads.
	pub fn error_ratio(&self) -> f64 {
		if self.key_set_requests == 0 {
			0.0
		} else {
			self.key_set_errors as f64 / self.key_set_requests as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static metrics_exporter_prometheus::PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a key-set read, tagging stale serves and surfaced errors.
pub fn record_key_set(endpoint: &str, status: KeySetStatus) {
	let labels = base_labels(endpoint);

	metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);

	match status {
		KeySetStatus::Fresh => {},
		KeySetStatus::Stale => metrics::counter!(METRIC_STALE_TOTAL, labels.iter()).increment(1),
		KeySetStatus::Empty | KeySetStatus::Errored =>
			metrics::counter!(METRIC_ERRORS_TOTAL, labels.iter()).increment(1),
	}
}

/// Record a successful refresh attempt along with its latency.
pub fn record_refresh_success(endpoint: &str, duration: Duration) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(endpoint, "success").iter()).increment(1);
	metrics::histogram!(METRIC_REFRESH_DURATION, base_labels(endpoint).iter())
		.record(duration.as_secs_f64());
}

/// Record a failed refresh attempt.
pub fn record_refresh_error(endpoint: &str) {
	metrics::counter!(METRIC_REFRESH_TOTAL, status_labels(endpoint, "error").iter()).increment(1);
	metrics::counter!(METRIC_REFRESH_ERRORS, base_labels(endpoint).iter()).increment(1);
}

fn base_labels(endpoint: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(2);

	labels.push(Label::new("endpoint", endpoint.to_owned()));

	labels
}

fn status_labels(endpoint: &str, status: &'static str) -> LabelSet {
	let mut labels = base_labels(endpoint);

	labels.push(Label::new("status", status));

	labels
}
