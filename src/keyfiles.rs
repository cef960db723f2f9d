//! Key-file directory listing, fingerprinting, and change polling.

// std
use std::{
	collections::BTreeMap,
	fs,
	path::{Path, PathBuf},
};
// crates.io
use sha2::{Digest, Sha256};
use tokio::{
	sync::mpsc,
	task::JoinHandle,
	time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

const FINGERPRINT_MARKER: u64 = 0xdead_beef;
const IGNORED_SUFFIX: &str = ".ignore";

/// Size and modification time of one key file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
	/// File name relative to the listed directory.
	pub name: String,
	/// Size in bytes.
	pub size: u64,
	/// Last modification time.
	pub modified: DateTime<Utc>,
}

/// Regular files of a key directory plus everything that was left out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyFileListing {
	/// Candidate key files, sorted by name.
	pub files: Vec<FileMetadata>,
	/// Entries left out, keyed by name, with the reason.
	pub skipped: BTreeMap<String, &'static str>,
}
impl KeyFileListing {
	/// Fingerprint of the listed files.
	pub fn fingerprint(&self) -> Fingerprint {
		Fingerprint::of(&self.files)
	}
}

/// Digest identifying a directory listing; equal listings yield equal fingerprints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);
impl Fingerprint {
	/// Hash name, size, and modification time of every file, in order.
	pub fn of(files: &[FileMetadata]) -> Self {
		let mut hasher = Sha256::new();

		for (index, file) in files.iter().enumerate() {
			hasher.update(FINGERPRINT_MARKER.to_le_bytes());
			hasher.update((index as u64).to_le_bytes());
			hasher.update(file.size.to_le_bytes());
			hasher.update(file.modified.timestamp_millis().to_le_bytes());
			hasher.update(file.name.as_bytes());
		}

		Self(hasher.finalize().into())
	}

	/// Raw digest bytes.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

/// List the key files of `dir`.
///
/// Symlinks are followed. Directories, dot-files, and `*.ignore` files are reported in
/// [`KeyFileListing::skipped`] instead.
pub fn list_key_files(dir: impl AsRef<Path>) -> Result<KeyFileListing> {
	let dir = dir.as_ref();
	let mut listing = KeyFileListing::default();

	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name().to_string_lossy().into_owned();
		let metadata = fs::metadata(entry.path())?;

		if let Some(reason) = skip_reason(&name, metadata.is_dir()) {
			listing.skipped.insert(name, reason);

			continue;
		}

		listing.files.push(FileMetadata {
			name,
			size: metadata.len(),
			modified: DateTime::<Utc>::from(metadata.modified()?),
		});
	}

	listing.files.sort_by(|a, b| a.name.cmp(&b.name));

	Ok(listing)
}

fn skip_reason(name: &str, is_dir: bool) -> Option<&'static str> {
	if is_dir {
		Some("directory")
	} else if name.starts_with('.') {
		Some("hidden file")
	} else if name.ends_with(IGNORED_SUFFIX) {
		Some("ignored file")
	} else {
		None
	}
}

/// Change notification emitted by [`Watcher`].
#[derive(Debug)]
pub enum WatchEvent {
	/// The directory content changed, or became readable again.
	Changed(KeyFileListing),
	/// Listing failed with an error different from the previous one.
	Failed(Error),
}

/// Polls a key directory and reports listing changes.
#[derive(Clone, Debug)]
pub struct Watcher {
	dir: PathBuf,
	interval: Duration,
}
impl Watcher {
	/// Poll `dir` every `interval`.
	pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Result<Self> {
		if interval.is_zero() {
			return Err(Error::Validation {
				field: "watch_interval",
				reason: "Watch interval must be greater than zero.".into(),
			});
		}

		Ok(Self { dir: dir.into(), interval })
	}

	/// Start polling on a new task; the channel closes once `cancel` fires.
	pub fn spawn(self, cancel: CancellationToken) -> (mpsc::Receiver<WatchEvent>, JoinHandle<()>) {
		let (tx, rx) = mpsc::channel(1);
		let handle = tokio::spawn(async move { self.run(cancel, tx).await });

		(rx, handle)
	}

	/// Poll until `cancel` fires or the receiver goes away.
	///
	/// The directory is checked immediately and then on every tick.
	pub async fn run(self, cancel: CancellationToken, tx: mpsc::Sender<WatchEvent>) {
		let mut ticker = time::interval(self.interval);
		let mut last = PollState::default();

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		tracing::debug!(dir = %self.dir.display(), interval = ?self.interval, "watching key directory");

		loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => break,
				_ = ticker.tick() => {
					let dir = self.dir.clone();
					let listing = tokio::task::spawn_blocking(move || list_key_files(dir))
						.await
						.unwrap_or_else(|err| Err(Error::Io(std::io::Error::other(err))));
					let Some(event) = last.observe(listing) else { continue };

					tokio::select! {
						biased;

						_ = cancel.cancelled() => break,
						sent = tx.send(event) => if sent.is_err() {
							break;
						},
					}
				},
			}
		}

		tracing::debug!(dir = %self.dir.display(), "stopped watching key directory");
	}
}

#[derive(Debug, Default)]
struct PollState {
	fingerprint: Option<Fingerprint>,
	error: Option<String>,
}
impl PollState {
	fn observe(&mut self, listing: Result<KeyFileListing>) -> Option<WatchEvent> {
		match listing {
			Ok(listing) => {
				let fingerprint = listing.fingerprint();

				self.error = None;

				if self.fingerprint == Some(fingerprint) {
					return None;
				}

				self.fingerprint = Some(fingerprint);

				Some(WatchEvent::Changed(listing))
			},
			Err(err) => {
				let message = err.to_string();

				if self.error.as_deref() == Some(message.as_str()) {
					return None;
				}

				self.fingerprint = None;
				self.error = Some(message);

				Some(WatchEvent::Failed(err))
			},
		}
	}
}
