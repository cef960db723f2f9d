//! HTTP freshness headers and expiry calculation.
//!
//! A successful fetch is trusted until `Cache-Control: max-age` (or `s-maxage`) minus `Age`
//! elapses, falling back to `Expires`. The result is clamped into `[cache_min, cache_max]`
//! with the floor winning when the bounds conflict. Missing or malformed headers degrade to
//! the floor instead of disabling caching.

// crates.io
use http::{
	HeaderMap, HeaderValue,
	header::{AGE, CACHE_CONTROL, EXPIRES},
};
// self
use crate::{_prelude::*, config::ClientConfig};

const DIRECTIVE_MAX_AGE: &str = "max-age";
const DIRECTIVE_S_MAXAGE: &str = "s-maxage";

/// Expiry derived for a successful fetch.
#[derive(Debug)]
pub struct Expiry {
	/// Instant after which the cached key set is due for refresh.
	pub expires_after: DateTime<Utc>,
	/// Candidate taken from the response headers before clamping.
	pub header_expires_after: Option<DateTime<Utc>>,
	/// Whether the `cache_min` floor was applied.
	pub cache_min_hit: bool,
	/// Whether the `cache_max` ceiling was applied.
	pub cache_max_hit: bool,
	/// Why the headers could not be used, when they were absent or malformed.
	pub header_error: Option<Error>,
}
impl Expiry {
	/// Whether usable cache headers were present.
	pub fn cache_headers_present(&self) -> bool {
		self.header_expires_after.is_some()
	}
}

/// Compute the header-derived expiry of a response, without applying configured bounds.
pub fn expires_after(now: DateTime<Utc>, headers: &HeaderMap) -> Result<DateTime<Utc>> {
	if let Some(max_age) = parse_max_age(headers)? {
		let remaining = match parse_age(headers)? {
			Some(age) => max_age.checked_sub(age).ok_or(Error::NegativeAge { max_age, age })?,
			None => max_age,
		};

		return Ok(add_duration(now, Duration::from_secs(remaining)));
	}

	parse_expires(headers)?.ok_or(Error::NoCacheHeaders)
}

/// Compute the next refresh time for a successful fetch.
pub fn evaluate_expiry(now: DateTime<Utc>, headers: &HeaderMap, config: &ClientConfig) -> Expiry {
	let floor = add_duration(now, config.cache_min);
	let expiry = match expires_after(now, headers) {
		Ok(candidate) => {
			let mut expires_after = candidate;
			let mut cache_max_hit = false;
			let mut cache_min_hit = false;

			if !config.cache_max.is_zero() {
				let ceiling = add_duration(now, config.cache_max);

				if expires_after > ceiling {
					cache_max_hit = true;
					expires_after = ceiling;
				}
			}
			if expires_after < floor {
				cache_min_hit = true;
				expires_after = floor;
			}

			Expiry {
				expires_after,
				header_expires_after: Some(candidate),
				cache_min_hit,
				cache_max_hit,
				header_error: None,
			}
		},
		Err(err) => Expiry {
			expires_after: floor,
			header_expires_after: None,
			cache_min_hit: false,
			cache_max_hit: false,
			header_error: Some(err),
		},
	};

	tracing::debug!(
		error = expiry.header_error.as_ref().map(tracing::field::display),
		expires_after = %expiry.expires_after,
		refresh_after = ?(expiry.expires_after - now).to_std().unwrap_or_default(),
		refresh_after_headers = ?expiry
			.header_expires_after
			.map(|at| (at - now).to_std().unwrap_or_default()),
		cache_min_hit = expiry.cache_min_hit,
		cache_max_hit = expiry.cache_max_hit,
		cache_headers_present = expiry.cache_headers_present(),
		"cache headers parsed"
	);

	expiry
}

/// Compute the next refresh time after a failed fetch.
///
/// With `cache_errors` unset the previous deadline is kept, so the next check is due at once.
pub fn error_expiry(
	now: DateTime<Utc>,
	previous: DateTime<Utc>,
	config: &ClientConfig,
) -> DateTime<Utc> {
	if config.cache_errors.is_zero() { previous } else { add_duration(now, config.cache_errors) }
}

/// Add a std duration to a UTC timestamp, saturating at the representable maximum.
pub fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
	TimeDelta::from_std(duration)
		.ok()
		.and_then(|delta| at.checked_add_signed(delta))
		.unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn parse_max_age(headers: &HeaderMap) -> Result<Option<u64>> {
	let mut selected = None;

	'values: for value in headers.get_all(CACHE_CONTROL) {
		for directive in header_str("Cache-Control", value)?.split(',') {
			let Some((name, raw)) = directive.trim().split_once('=') else {
				continue;
			};
			let name = name.trim();

			if name.eq_ignore_ascii_case(DIRECTIVE_MAX_AGE) {
				selected = Some(raw);

				break 'values;
			}
			if name.eq_ignore_ascii_case(DIRECTIVE_S_MAXAGE) {
				selected = Some(raw);
			}
		}
	}

	selected.map(|raw| parse_seconds("Cache-Control", raw.trim().trim_matches('"'))).transpose()
}

fn parse_age(headers: &HeaderMap) -> Result<Option<u64>> {
	match headers.get(AGE) {
		Some(value) => {
			let raw = header_str("Age", value)?.trim();

			if raw.is_empty() { Ok(None) } else { parse_seconds("Age", raw).map(Some) }
		},
		None => Ok(None),
	}
}

fn parse_expires(headers: &HeaderMap) -> Result<Option<DateTime<Utc>>> {
	let Some(value) = headers.get(EXPIRES) else {
		return Ok(None);
	};
	let raw = header_str("Expires", value)?.trim();

	if raw.is_empty() {
		return Ok(None);
	}
	if let Ok(at) = httpdate::parse_http_date(raw) {
		return Ok(Some(DateTime::<Utc>::from(at)));
	}

	DateTime::parse_from_rfc2822(raw).map(|at| Some(at.with_timezone(&Utc))).map_err(|err| {
		Error::HeaderMalformed { header: "Expires", reason: format!("{raw:?} is not a date: {err}.") }
	})
}

fn header_str<'a>(header: &'static str, value: &'a HeaderValue) -> Result<&'a str> {
	value.to_str().map_err(|err| Error::HeaderMalformed { header, reason: err.to_string() })
}

fn parse_seconds(header: &'static str, raw: &str) -> Result<u64> {
	raw.parse::<u64>().map_err(|err| Error::HeaderMalformed {
		header,
		reason: format!("{raw:?} is not a number of seconds: {err}."),
	})
}
