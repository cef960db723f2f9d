//! Cache state snapshot modelling key-set lifecycle transitions.
//!
//! A [`CacheState`] is never mutated in place. Every refresh attempt derives a new snapshot
//! from the current one and installs it wholesale, so readers only ever observe a complete
//! state.

// crates.io
use http::HeaderMap;
use jsonwebtoken::jwk::JwkSet;
// self
use crate::{_prelude::*, http::semantics::add_duration};

/// Lifecycle of the cached key set as seen by readers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySetStatus {
	/// Nothing has been fetched yet and no failure is recorded.
	Empty,
	/// The last refresh succeeded.
	Fresh,
	/// The last refresh failed but the previous key set is served inside the grace window.
	Stale,
	/// The last refresh failed and the failure is surfaced to readers.
	Errored,
}

/// Immutable snapshot of the cache.
#[derive(Clone, Debug)]
pub struct CacheState {
	/// Last successfully fetched key set; kept across failures.
	pub jwks: Option<Arc<JwkSet>>,
	/// Raw body of the most recent attempt.
	pub body: Vec<u8>,
	/// Response headers of the most recent attempt.
	pub headers: HeaderMap,
	/// Failure of the most recent attempt.
	pub error: Option<Arc<Error>>,
	/// The next refresh is due once this instant has passed.
	pub expires_after: DateTime<Utc>,
	/// When the current run of consecutive failures began.
	pub stale_since: Option<DateTime<Utc>>,
	/// When the key set was last fetched successfully.
	pub last_refresh_at: Option<DateTime<Utc>>,
	/// When the last refresh attempt finished.
	pub last_attempt_at: Option<DateTime<Utc>>,
}
impl CacheState {
	/// State installed at construction: nothing fetched and immediately due.
	pub fn empty() -> Self {
		Self {
			jwks: None,
			body: Vec::new(),
			headers: HeaderMap::new(),
			error: None,
			expires_after: DateTime::<Utc>::MIN_UTC,
			stale_since: None,
			last_refresh_at: None,
			last_attempt_at: None,
		}
	}

	/// Whether a non-forced refresh should fetch at `now`.
	pub fn is_due(&self, now: DateTime<Utc>) -> bool {
		now > self.expires_after
	}

	/// Derive the state following a successful fetch.
	pub fn succeeded(
		&self,
		now: DateTime<Utc>,
		jwks: Arc<JwkSet>,
		headers: HeaderMap,
		body: Vec<u8>,
		expires_after: DateTime<Utc>,
	) -> Self {
		Self {
			jwks: Some(jwks),
			body,
			headers,
			error: None,
			expires_after,
			stale_since: None,
			last_refresh_at: Some(now),
			last_attempt_at: Some(now),
		}
	}

	/// Derive the state following a failed fetch.
	///
	/// The previous key set survives and `stale_since` keeps the first failure of the run.
	pub fn failed(
		&self,
		now: DateTime<Utc>,
		error: Arc<Error>,
		headers: HeaderMap,
		body: Vec<u8>,
		expires_after: DateTime<Utc>,
	) -> Self {
		Self {
			jwks: self.jwks.clone(),
			body,
			headers,
			error: Some(error),
			expires_after,
			stale_since: self.stale_since.or(Some(now)),
			last_refresh_at: self.last_refresh_at,
			last_attempt_at: Some(now),
		}
	}

	/// Classify the snapshot at `now` under the given grace window.
	pub fn status(&self, now: DateTime<Utc>, keep_stale_keys: Duration) -> KeySetStatus {
		match (&self.error, &self.jwks) {
			(None, None) => KeySetStatus::Empty,
			(None, Some(_)) => KeySetStatus::Fresh,
			(Some(_), None) => KeySetStatus::Errored,
			(Some(_), Some(_)) => {
				let grace_elapsed = self
					.stale_since
					.map(|since| add_duration(since, keep_stale_keys) < now)
					.unwrap_or(true);

				if grace_elapsed { KeySetStatus::Errored } else { KeySetStatus::Stale }
			},
		}
	}

	/// Resolve the key set readers should use at `now`.
	///
	/// A failure is hidden behind the last good key set until the grace window elapses.
	pub fn key_set(&self, now: DateTime<Utc>, keep_stale_keys: Duration) -> Result<Arc<JwkSet>> {
		match (self.status(now, keep_stale_keys), &self.error, &self.jwks) {
			(KeySetStatus::Errored, Some(error), _) => Err(Error::Refresh(error.clone())),
			(_, _, Some(jwks)) => Ok(jwks.clone()),
			_ => Err(Error::KeysNotFetched),
		}
	}
}
impl Default for CacheState {
	fn default() -> Self {
		Self::empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn t0() -> DateTime<Utc> {
		DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").expect("timestamp").with_timezone(&Utc)
	}

	fn at(secs: i64) -> DateTime<Utc> {
		t0() + TimeDelta::seconds(secs)
	}

	fn jwks(kid: &str) -> Arc<JwkSet> {
		let body = format!(
			r#"{{"keys":[{{"kty":"RSA","kid":"{kid}","use":"sig","n":"AQAB","e":"AQAB"}}]}}"#
		);

		Arc::new(serde_json::from_str(&body).expect("jwks"))
	}

	fn failure() -> Arc<Error> {
		Arc::new(Error::Validation { field: "test", reason: "upstream down".into() })
	}

	const KEEP: Duration = Duration::from_secs(60);

	#[test]
	fn empty_state_is_due_and_reports_not_fetched() {
		let state = CacheState::empty();

		assert!(state.is_due(t0()));
		assert_eq!(state.status(t0(), KEEP), KeySetStatus::Empty);
		assert!(matches!(state.key_set(t0(), KEEP), Err(Error::KeysNotFetched)));
	}

	#[test]
	fn failure_without_prior_success_is_surfaced() {
		let state = CacheState::empty().failed(t0(), failure(), HeaderMap::new(), Vec::new(), t0());

		assert_eq!(state.status(t0(), KEEP), KeySetStatus::Errored);
		assert!(matches!(state.key_set(t0(), KEEP), Err(Error::Refresh(_))));
	}

	#[test]
	fn stale_keys_are_served_inside_grace_window() {
		let good = jwks("primary");
		let state = CacheState::empty()
			.succeeded(at(0), good.clone(), HeaderMap::new(), b"{}".to_vec(), at(60))
			.failed(at(10), failure(), HeaderMap::new(), Vec::new(), at(40));

		assert_eq!(state.stale_since, Some(at(10)));
		assert_eq!(state.status(at(11), KEEP), KeySetStatus::Stale);
		assert!(Arc::ptr_eq(&state.key_set(at(11), KEEP).expect("stale keys"), &good));
		assert!(Arc::ptr_eq(&state.key_set(at(70), KEEP).expect("stale keys"), &good));
		assert_eq!(state.status(at(71), KEEP), KeySetStatus::Errored);
		assert!(matches!(state.key_set(at(71), KEEP), Err(Error::Refresh(_))));
	}

	#[test]
	fn consecutive_failures_keep_first_stale_timestamp() {
		let state = CacheState::empty()
			.succeeded(at(0), jwks("primary"), HeaderMap::new(), Vec::new(), at(60))
			.failed(at(10), failure(), HeaderMap::new(), Vec::new(), at(40))
			.failed(at(50), failure(), HeaderMap::new(), Vec::new(), at(80));

		assert_eq!(state.stale_since, Some(at(10)));
		assert_eq!(state.last_refresh_at, Some(at(0)));
		assert_eq!(state.last_attempt_at, Some(at(50)));
		assert!(matches!(state.key_set(at(75), KEEP), Err(Error::Refresh(_))));
	}

	#[test]
	fn success_clears_failure_and_stale_timestamp() {
		let fresh = jwks("rotated");
		let state = CacheState::empty()
			.succeeded(at(0), jwks("primary"), HeaderMap::new(), Vec::new(), at(60))
			.failed(at(10), failure(), HeaderMap::new(), Vec::new(), at(40))
			.succeeded(at(20), fresh.clone(), HeaderMap::new(), Vec::new(), at(80));

		assert!(state.error.is_none());
		assert!(state.stale_since.is_none());
		assert_eq!(state.status(at(500), KEEP), KeySetStatus::Fresh);
		assert!(Arc::ptr_eq(&state.key_set(at(500), KEEP).expect("keys"), &fresh));
	}

	#[test]
	fn zero_grace_window_surfaces_failures_immediately() {
		let state = CacheState::empty()
			.succeeded(at(0), jwks("primary"), HeaderMap::new(), Vec::new(), at(60))
			.failed(at(10), failure(), HeaderMap::new(), Vec::new(), at(10));

		assert!(matches!(state.key_set(at(11), Duration::ZERO), Err(Error::Refresh(_))));
	}

	#[test]
	fn due_only_after_expiry_passes() {
		let state =
			CacheState::empty().succeeded(at(0), jwks("primary"), HeaderMap::new(), Vec::new(), at(60));

		assert!(!state.is_due(at(59)));
		assert!(!state.is_due(at(60)));
		assert!(state.is_due(at(61)));
	}
}
