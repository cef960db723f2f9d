//! Locally cached JWKS with scheduled refresh, HTTP freshness bounds, and a stale-key grace
//! window, plus a watched directory loader for signing keys.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod codec;
pub mod config;
pub mod http;
pub mod keyfiles;
pub mod keyloader;
pub mod metrics;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")]
pub use crate::metrics::{install_default_exporter, prometheus_handle};
pub use crate::{
	cache::{
		manager::CacheManager,
		scheduler::{BackgroundRefresh, RefreshCallback},
		state::{CacheState, KeySetStatus},
	},
	codec::{JwkSetCodec, KeySetCodec},
	config::ClientConfig,
	error::{BoxError, Error, Result},
	http::client::{HttpResponse, ReqwestTransport, Transport},
	keyfiles::{FileMetadata, Fingerprint, KeyFileListing, WatchEvent, Watcher, list_key_files},
	keyloader::{KeyLoader, KeyLoaderConfig, KeysCallback, SigningKey, SigningKeys},
	metrics::{RefreshMetrics, RefreshMetricsSnapshot},
};
