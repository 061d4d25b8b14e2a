//! Key/value backing stores for persisted sessions.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Result;

/// String key/value store.
///
/// Values are opaque strings; [`SessionStore`](crate::SessionStore) writes JSON.
pub trait KeyValueStorage: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>>;
	fn set(&self, key: &str, value: &str) -> Result<()>;
	fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local storage; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.lock().is_empty()
	}
}

impl KeyValueStorage for MemoryStorage {
	fn get(&self, key: &str) -> Result<Option<String>> {
		Ok(self.entries.lock().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		self.entries.lock().insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<()> {
		self.entries.lock().remove(key);
		Ok(())
	}
}

/// One JSON file per key under a directory.
///
/// The directory is created on first write. Keys are mapped to file names by
/// replacing path separators and `:` with `_`.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
}

impl FileStorage {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	/// `$XDG_STATE_HOME/agent-relay/sessions`, falling back to `~/.local/state`.
	pub fn default_dir() -> PathBuf {
		std::env::var_os("XDG_STATE_HOME")
			.map(PathBuf::from)
			.or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/state")))
			.unwrap_or_else(|| PathBuf::from("."))
			.join("agent-relay/sessions")
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let name: String = key.chars().map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c }).collect();
		self.dir.join(format!("{name}.json"))
	}
}

impl KeyValueStorage for FileStorage {
	fn get(&self, key: &str) -> Result<Option<String>> {
		match fs::read_to_string(self.path_for(key)) {
			Ok(content) => Ok(Some(content)),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		fs::create_dir_all(&self.dir)?;
		fs::write(self.path_for(key), value)?;
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<()> {
		match fs::remove_file(self.path_for(key)) {
			Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
			_ => Ok(()),
		}
	}
}
