//! Integration tests for JWKS refresh and caching behaviour.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use chrono::TimeDelta;
use jwks_refresh::{CacheManager, ClientConfig, Error, KeySetStatus, Result};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{JWKS_PATH, eager_config, jwks_response};

/// Respond with `responses` in order, repeating the last one.
fn sequence(
	responses: Vec<ResponseTemplate>,
) -> impl Fn(&wiremock::Request) -> ResponseTemplate + Send + Sync + 'static {
	let counter = Arc::new(AtomicUsize::new(0));

	move |_: &wiremock::Request| {
		let idx = counter.fetch_add(1, Ordering::SeqCst);

		responses[idx.min(responses.len() - 1)].clone()
	}
}

#[tokio::test]
async fn caches_jwks_after_initial_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(jwks_response("primary", Some("public, max-age=600")))
		.expect(1)
		.mount(&server)
		.await;

	let manager = CacheManager::new(ClientConfig::new(format!("{}{}", server.uri(), JWKS_PATH)))?;

	assert!(manager.refresh(false).await?);
	assert!(!manager.refresh(false).await?);

	let first = manager.key_set().await?;
	let second = manager.key_set().await?;

	assert_eq!(first.keys.len(), 1);
	assert!(Arc::ptr_eq(&first, &second));

	let state = manager.snapshot().await;
	let fetched_at = state.last_refresh_at.expect("refreshed");

	assert_eq!(state.expires_after - fetched_at, TimeDelta::seconds(600));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn missing_cache_headers_fall_back_to_floor() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(jwks_response("primary", None))
		.mount(&server)
		.await;

	let manager = CacheManager::new(ClientConfig::new(format!("{}{}", server.uri(), JWKS_PATH)))?;

	manager.refresh(false).await?;

	let state = manager.snapshot().await;

	assert_eq!(
		state.expires_after - state.last_refresh_at.expect("refreshed"),
		TimeDelta::seconds(60)
	);

	Ok(())
}

#[tokio::test]
async fn serves_stale_keys_until_grace_window_elapses() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(sequence(vec![
			jwks_response("primary", Some("max-age=0")),
			ResponseTemplate::new(500).set_body_string("upstream unavailable"),
		]))
		.mount(&server)
		.await;

	let mut config = eager_config(&server);

	config.keep_stale_keys = Duration::from_millis(200);

	let manager = CacheManager::new(config)?;

	manager.refresh(false).await?;

	let good = manager.key_set().await?;

	match manager.refresh(true).await {
		Err(Error::Refresh(err)) => assert!(
			matches!(&*err, Error::HttpStatus { status, body: Some(body), .. }
				if status.as_u16() == 500 && body == "upstream unavailable"),
			"unexpected failure: {err}"
		),
		other => panic!("expected refresh failure, got {other:?}"),
	}

	assert!(Arc::ptr_eq(&good, &manager.key_set().await?));

	tokio::time::sleep(Duration::from_millis(300)).await;

	assert!(matches!(manager.key_set().await, Err(Error::Refresh(_))));
	assert_eq!(
		manager.snapshot().await.status(chrono::Utc::now(), Duration::from_millis(200)),
		KeySetStatus::Errored
	);

	let snapshot = manager.metrics().snapshot();

	assert_eq!(snapshot.refresh_successes, 1);
	assert_eq!(snapshot.refresh_errors, 1);
	assert_eq!(snapshot.stale_serves, 1);

	Ok(())
}

#[tokio::test]
async fn recovers_after_failed_refresh() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(sequence(vec![
			ResponseTemplate::new(503),
			jwks_response("primary", Some("max-age=120")),
		]))
		.expect(2)
		.mount(&server)
		.await;

	let manager = CacheManager::new(eager_config(&server))?;

	assert!(matches!(manager.refresh(false).await, Err(Error::Refresh(_))));
	assert!(matches!(manager.key_set().await, Err(Error::Refresh(_))));
	assert!(manager.refresh(false).await?);

	let state = manager.snapshot().await;

	assert!(state.error.is_none());
	assert!(state.stale_since.is_none());
	assert_eq!(manager.key_set().await?.keys.len(), 1);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn connect_primes_the_cache() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(jwks_response("primary", Some("max-age=300")))
		.expect(1)
		.mount(&server)
		.await;

	let manager =
		CacheManager::connect(ClientConfig::new(format!("{}{}", server.uri(), JWKS_PATH))).await?;

	assert_eq!(manager.key_set().await?.keys[0].common.key_id.as_deref(), Some("primary"));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn connect_fails_on_first_error_only_with_exit_on_error() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let lenient = CacheManager::connect(eager_config(&server)).await?;

	assert!(matches!(lenient.key_set().await, Err(Error::Refresh(_))));

	let strict = CacheManager::connect(eager_config(&server).with_exit_on_error(true)).await;

	assert!(matches!(strict, Err(Error::Refresh(_))));

	Ok(())
}
