//! Refresh drivers: a blocking foreground loop and a detached background task.
//!
//! Both drivers tick the same non-forced refresh; they differ only in how failures propagate
//! and in their lifecycle hooks. Pick one per manager.

// crates.io
use jsonwebtoken::jwk::JwkSet;
use tokio::{
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
// self
use crate::{_prelude::*, cache::manager::CacheManager};

/// Callback invoked with the reader-visible key set after every refresh attempt.
pub type RefreshCallback = Arc<dyn Fn(Result<Arc<JwkSet>>) + Send + Sync>;

/// Settings for [`CacheManager::spawn_background`].
#[derive(Clone)]
pub struct BackgroundRefresh {
	/// Tick interval of the background task.
	pub interval: Duration,
	/// Stops the task and aborts its in-flight fetch when cancelled.
	pub cancel: CancellationToken,
	/// Invoked after each tick that installed a new cache state.
	pub on_change: Option<RefreshCallback>,
	/// Completion group the task is spawned on, so a supervisor can wait for it to exit.
	pub tracker: Option<TaskTracker>,
}
impl BackgroundRefresh {
	/// Refresh every `interval` with a fresh cancellation token and no hooks.
	pub fn new(interval: Duration) -> Self {
		Self { interval, cancel: CancellationToken::new(), on_change: None, tracker: None }
	}

	/// Stop the task when `cancel` fires.
	pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;

		self
	}

	/// Invoke `callback` after each refresh attempt.
	pub fn with_on_change<F>(mut self, callback: F) -> Self
	where
		F: Fn(Result<Arc<JwkSet>>) + Send + Sync + 'static,
	{
		self.on_change = Some(Arc::new(callback));

		self
	}

	/// Spawn the task on `tracker`.
	pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
		self.tracker = Some(tracker);

		self
	}
}
impl std::fmt::Debug for BackgroundRefresh {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("BackgroundRefresh")
			.field("interval", &self.interval)
			.field("cancel", &self.cancel)
			.field("on_change", &self.on_change.is_some())
			.field("tracker", &self.tracker)
			.finish()
	}
}

impl CacheManager {
	/// Drive refreshes on the configured tick until `cancel` fires.
	///
	/// The first refresh runs immediately. With `exit_on_error` the loop stops and returns the
	/// first failure; otherwise failures are logged and retried on later ticks. Cancellation
	/// (including [`shutdown`](Self::shutdown)) ends the loop cleanly.
	pub async fn run_foreground(&self, cancel: CancellationToken) -> Result<()> {
		let interval = self.config().tick_interval;
		let mut ticker = time::interval(interval);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		tracing::info!(url = %self.url(), ?interval, "starting foreground refresh");

		let outcome = loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => break Ok(()),
				_ = self.shutdown_token().cancelled() => break Ok(()),
				_ = ticker.tick() => match self.refresh_logged(&cancel).await {
					Ok(_) => {},
					Err(Error::Cancelled) => break Ok(()),
					Err(err) => break Err(err),
				},
			}
		};

		tracing::info!(url = %self.url(), "foreground refresh stopped");

		outcome
	}

	/// Spawn a detached task refreshing every `options.interval`.
	///
	/// Failures are logged and retried unless `exit_on_error` is set, in which case the task
	/// ends with the failure. After each tick that installed a new state the `on_change`
	/// callback receives what [`key_set`](Self::key_set) returns at that moment.
	pub fn spawn_background(&self, options: BackgroundRefresh) -> Result<JoinHandle<Result<()>>> {
		if options.interval.is_zero() {
			return Err(Error::Validation {
				field: "interval",
				reason: "Background refresh interval must be greater than zero.".into(),
			});
		}

		let manager = self.clone();
		let BackgroundRefresh { interval, cancel, on_change, tracker } = options;
		let task = async move { manager.run_background(interval, cancel, on_change).await };

		Ok(match tracker {
			Some(tracker) => tracker.spawn(task),
			None => tokio::spawn(task),
		})
	}

	async fn run_background(
		&self,
		interval: Duration,
		cancel: CancellationToken,
		on_change: Option<RefreshCallback>,
	) -> Result<()> {
		let mut ticker = time::interval(interval);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		tracing::info!(url = %self.url(), ?interval, "starting auto refresh");

		let outcome = loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => break Ok(()),
				_ = self.shutdown_token().cancelled() => break Ok(()),
				_ = ticker.tick() => match self.refresh_logged(&cancel).await {
					Ok(tick) if tick.changed_state() => {
						if let Some(callback) = &on_change {
							callback(self.key_set().await);
						}
					},
					Ok(_) => {},
					Err(Error::Cancelled) => break Ok(()),
					Err(err) => {
						tracing::error!(url = %self.url(), error = %err, "error refreshing key set");

						break Err(err);
					},
				},
			}
		};

		tracing::info!(url = %self.url(), "auto refresh stopped");

		outcome
	}
}
