//! Crate-wide error types and `Result` alias.

// std
use std::{path::PathBuf, sync::Arc};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by pluggable collaborators (transports and codecs).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the JWKS refresh crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Transport failure fetching {url}: {source}")]
	Transport {
		url: url::Url,
		#[source]
		source: BoxError,
	},
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("Failed to read response body from {url}: {source}")]
	BodyRead {
		url: url::Url,
		headers: http::HeaderMap,
		#[source]
		source: BoxError,
	},
	#[error("Key set document is invalid: {source}")]
	Parse {
		#[source]
		source: BoxError,
	},

	#[error("Malformed {header} header: {reason}")]
	HeaderMalformed { header: &'static str, reason: String },
	#[error("Negative age: max-age {max_age}s minus age {age}s.")]
	NegativeAge { max_age: u64, age: u64 },
	#[error("Cache headers not present.")]
	NoCacheHeaders,

	#[error("Keys not fetched.")]
	KeysNotFetched,
	#[error("Key set refresh failed: {0}")]
	Refresh(Arc<Error>),
	#[error("Refresh cancelled.")]
	Cancelled,

	#[error("Failed to load key file {}: {source}", path.display())]
	KeyFile {
		path: PathBuf,
		#[source]
		source: jsonwebtoken::errors::Error,
	},
	#[error("Unsupported private key in {}: {reason}.", path.display())]
	KeyFormat { path: PathBuf, reason: String },
	#[error("Keys not loaded.")]
	KeysNotLoaded,

	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
