//! Signing keys loaded from a watched directory of PEM files.
//!
//! Every regular file in the directory is an EC private key in PEM form, either PKCS#8
//! (`PRIVATE KEY`) or SEC1 (`EC PRIVATE KEY`). The key id is the file name, minus a `.priv`
//! suffix in any case. Files can be excluded with an `.ignore` suffix or a leading dot.

mod sec1;

// std
use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};
// crates.io
use jsonwebtoken::EncodingKey;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	keyfiles::{self, WatchEvent, Watcher},
};

const KEY_SUFFIX: &str = ".priv";

/// Callback invoked with the new key set after every successful load.
pub type KeysCallback = Arc<dyn Fn(Arc<SigningKeys>) + Send + Sync>;

/// Where to load signing keys from and how to react to failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyLoaderConfig {
	/// Directory holding the key files.
	#[serde(default = "default_dir")]
	pub dir: PathBuf,
	/// Poll interval for directory changes; zero disables watching.
	#[serde(default = "default_watch_interval")]
	pub watch_interval: Duration,
	/// Return load and watch failures instead of logging them and keeping the previous keys.
	#[serde(default)]
	pub fail_on_error: bool,
}
impl KeyLoaderConfig {
	/// Load from `dir` with default settings.
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into(), ..Default::default() }
	}

	/// Whether directory watching is enabled.
	pub fn watch_enabled(&self) -> bool {
		!self.watch_interval.is_zero()
	}

	/// Reject configurations without a directory.
	pub fn validate(&self) -> Result<()> {
		if self.dir.as_os_str().is_empty() {
			return Err(Error::Validation {
				field: "dir",
				reason: "Key directory is required.".into(),
			});
		}

		Ok(())
	}
}
impl Default for KeyLoaderConfig {
	fn default() -> Self {
		Self { dir: default_dir(), watch_interval: default_watch_interval(), fail_on_error: false }
	}
}

fn default_dir() -> PathBuf {
	PathBuf::from("./keys")
}

fn default_watch_interval() -> Duration {
	Duration::from_secs(1)
}

/// One private key and the id it is published under.
#[derive(Clone)]
pub struct SigningKey {
	/// Key id derived from the file name.
	pub kid: String,
	/// File the key was read from.
	pub file_name: String,
	/// Key material ready for token signing.
	pub key: EncodingKey,
}
impl std::fmt::Debug for SigningKey {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SigningKey")
			.field("kid", &self.kid)
			.field("file_name", &self.file_name)
			.finish_non_exhaustive()
	}
}

/// Immutable set of signing keys from one directory load.
#[derive(Clone, Debug)]
pub struct SigningKeys {
	keys: Vec<SigningKey>,
	loaded_at: DateTime<Utc>,
}
impl SigningKeys {
	/// Look up a key by id.
	pub fn get(&self, kid: &str) -> Option<&SigningKey> {
		self.keys.iter().find(|key| key.kid == kid)
	}

	/// Keys in file-name order.
	pub fn iter(&self) -> impl Iterator<Item = &SigningKey> {
		self.keys.iter()
	}

	/// Key ids in file-name order.
	pub fn kids(&self) -> impl Iterator<Item = &str> {
		self.keys.iter().map(|key| key.kid.as_str())
	}

	/// Number of loaded keys.
	pub fn len(&self) -> usize {
		self.keys.len()
	}

	/// Whether the directory held no keys.
	pub fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}

	/// When the set was loaded.
	pub fn loaded_at(&self) -> DateTime<Utc> {
		self.loaded_at
	}
}

/// Loads signing keys from a directory and reloads them when it changes.
#[derive(Clone)]
pub struct KeyLoader {
	config: Arc<KeyLoaderConfig>,
	keys: Arc<RwLock<Option<Arc<SigningKeys>>>>,
	on_change: Option<KeysCallback>,
}
impl KeyLoader {
	/// Build a loader; nothing is read until [`load_keys`](Self::load_keys) or
	/// [`watch`](Self::watch) runs.
	pub fn new(config: KeyLoaderConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self { config: Arc::new(config), keys: Arc::new(RwLock::new(None)), on_change: None })
	}

	/// Invoke `callback` after every successful load.
	pub fn with_on_change<F>(mut self, callback: F) -> Self
	where
		F: Fn(Arc<SigningKeys>) + Send + Sync + 'static,
	{
		self.on_change = Some(Arc::new(callback));

		self
	}

	/// Configuration the loader was built with.
	pub fn config(&self) -> &KeyLoaderConfig {
		&self.config
	}

	/// Currently loaded keys.
	pub async fn keys(&self) -> Result<Arc<SigningKeys>> {
		self.keys.read().await.clone().ok_or(Error::KeysNotLoaded)
	}

	/// When the current keys were loaded, if ever.
	pub async fn loaded_at(&self) -> Option<DateTime<Utc>> {
		self.keys.read().await.as_ref().map(|keys| keys.loaded_at)
	}

	/// Read the directory and replace the key set.
	///
	/// On failure the previous keys stay installed. The failure is returned with
	/// `fail_on_error`, and logged otherwise.
	pub async fn load_keys(&self) -> Result<()> {
		let dir = self.config.dir.clone();
		let loaded = tokio::task::spawn_blocking(move || read_key_dir(&dir))
			.await
			.unwrap_or_else(|err| Err(Error::Io(std::io::Error::other(err))));
		let keys = match loaded {
			Ok(keys) => Arc::new(keys),
			Err(err) if self.config.fail_on_error => return Err(err),
			Err(err) => {
				tracing::error!(dir = %self.config.dir.display(), error = %err, "failed to load keys");

				return Ok(());
			},
		};

		*self.keys.write().await = Some(keys.clone());

		if let Some(callback) = &self.on_change {
			callback(keys);
		}

		Ok(())
	}

	/// Reload keys whenever the directory changes, until `cancel` fires.
	///
	/// Returns immediately when watching is disabled. Directory errors end the watch with
	/// `fail_on_error` and are logged otherwise.
	pub async fn watch(&self, cancel: CancellationToken) -> Result<()> {
		if !self.config.watch_enabled() {
			tracing::debug!(dir = %self.config.dir.display(), "key directory watching disabled");

			return Ok(());
		}

		let watcher_cancel = cancel.child_token();
		let (mut events, watcher) = Watcher::new(self.config.dir.clone(), self.config.watch_interval)?
			.spawn(watcher_cancel.clone());

		tracing::info!(
			dir = %self.config.dir.display(),
			interval = ?self.config.watch_interval,
			"started watching key directory"
		);

		let outcome = loop {
			let Some(event) = events.recv().await else { break Ok(()) };

			match event {
				WatchEvent::Changed(_) =>
					if let Err(err) = self.load_keys().await {
						break Err(err);
					},
				WatchEvent::Failed(err) if self.config.fail_on_error => break Err(err),
				WatchEvent::Failed(err) => {
					tracing::error!(
						dir = %self.config.dir.display(),
						error = %err,
						"key directory watch error"
					);
				},
			}
		};

		watcher_cancel.cancel();

		if let Err(err) = watcher.await {
			tracing::warn!(error = %err, "key directory watcher task failed");
		}

		tracing::info!(dir = %self.config.dir.display(), "stopped watching key directory");

		outcome
	}
}
impl std::fmt::Debug for KeyLoader {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyLoader")
			.field("config", &self.config)
			.field("on_change", &self.on_change.is_some())
			.finish_non_exhaustive()
	}
}

fn read_key_dir(dir: &Path) -> Result<SigningKeys> {
	let listing = keyfiles::list_key_files(dir)?;
	let mut keys = Vec::<SigningKey>::with_capacity(listing.files.len());
	let mut loaded = BTreeMap::new();

	for file in listing.files {
		let path = dir.join(&file.name);
		let pem = fs::read(&path)?;

		tracing::debug!(file = %file.name, bytes = pem.len(), "loading private key");

		let key = parse_private_key(&path, &pem)?;
		let kid = key_id(&file.name).to_owned();

		if keys.iter().any(|existing| existing.kid == kid) {
			tracing::warn!(file = %file.name, kid = %kid, "key already loaded");

			continue;
		}

		loaded.insert(file.name.clone(), kid.clone());
		keys.push(SigningKey { kid, file_name: file.name, key });
	}

	if !listing.skipped.is_empty() {
		tracing::info!(skipped = ?listing.skipped, loaded = ?loaded, "loaded private keys");
	}

	Ok(SigningKeys { keys, loaded_at: Utc::now() })
}

fn parse_private_key(path: &Path, pem: &[u8]) -> Result<EncodingKey> {
	if sec1::is_sec1_pem(pem) {
		let der = sec1::sec1_pem_to_pkcs8_der(pem).map_err(|reason| Error::KeyFormat {
			path: path.to_path_buf(),
			reason: reason.into(),
		})?;

		return Ok(EncodingKey::from_ec_der(&der));
	}

	EncodingKey::from_ec_pem(pem).map_err(|source| Error::KeyFile { path: path.to_path_buf(), source })
}

fn key_id(file_name: &str) -> &str {
	let split = file_name.len().saturating_sub(KEY_SUFFIX.len());

	match (file_name.get(..split), file_name.get(split..)) {
		(Some(kid), Some(suffix)) if suffix.eq_ignore_ascii_case(KEY_SUFFIX) => kid,
		_ => file_name,
	}
}
