//! Integration tests for the refresh drivers.

// std
use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use jwks_refresh::{BackgroundRefresh, CacheManager, Error, Result};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support::{JWKS_PATH, eager_config, jwks_response};

#[tokio::test]
async fn background_refresh_picks_up_rotated_keys() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let counter = Arc::new(AtomicUsize::new(0));
	let counter_handle = counter.clone();

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(move |_: &wiremock::Request| {
			match counter_handle.fetch_add(1, Ordering::SeqCst) {
				0 => jwks_response("primary", Some("max-age=0")),
				_ => jwks_response("rotated", Some("max-age=0")),
			}
		})
		.mount(&server)
		.await;

	let manager = CacheManager::new(eager_config(&server))?;
	let kids = Arc::new(Mutex::new(Vec::<String>::new()));
	let tracker = TaskTracker::new();
	let cancel = CancellationToken::new();
	let options = {
		let kids = kids.clone();

		BackgroundRefresh::new(Duration::from_millis(20))
			.with_cancel(cancel.clone())
			.with_tracker(tracker.clone())
			.with_on_change(move |keys| {
				if let Ok(keys) = keys
					&& let Some(kid) = keys.keys.first().and_then(|key| key.common.key_id.clone())
				{
					kids.lock().expect("kids lock").push(kid);
				}
			})
	};
	let handle = manager.spawn_background(options)?;

	tokio::time::timeout(Duration::from_secs(2), async {
		while !kids.lock().expect("kids lock").iter().any(|kid| kid == "rotated") {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.expect("rotation observed");

	cancel.cancel();
	tracker.close();
	tokio::time::timeout(Duration::from_secs(1), tracker.wait()).await.expect("task exit");

	handle.await.expect("join")?;

	assert_eq!(kids.lock().expect("kids lock").first().map(String::as_str), Some("primary"));
	assert!(counter.load(Ordering::SeqCst) >= 2);

	Ok(())
}

#[tokio::test]
async fn foreground_exits_on_error_when_configured() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(ResponseTemplate::new(503))
		.expect(1)
		.mount(&server)
		.await;

	let manager = CacheManager::new(eager_config(&server).with_exit_on_error(true))?;
	let outcome = tokio::time::timeout(
		Duration::from_secs(2),
		manager.run_foreground(CancellationToken::new()),
	)
	.await
	.expect("foreground loop should stop");

	assert!(matches!(outcome, Err(Error::Refresh(_))));

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn shutdown_stops_foreground_loop() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(JWKS_PATH))
		.respond_with(jwks_response("primary", Some("max-age=600")))
		.mount(&server)
		.await;

	let manager = CacheManager::new(eager_config(&server))?;
	let handle = {
		let manager = manager.clone();

		tokio::spawn(async move { manager.run_foreground(CancellationToken::new()).await })
	};

	tokio::time::sleep(Duration::from_millis(100)).await;
	manager.shutdown();

	tokio::time::timeout(Duration::from_secs(1), handle)
		.await
		.expect("loop should stop")
		.expect("join")?;

	assert!(manager.is_shutdown());
	assert_eq!(manager.key_set().await?.keys.len(), 1);

	Ok(())
}
