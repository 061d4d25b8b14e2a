//! Ordered session map with optional persistence.
//!
//! Persisted layout: the id index lives under [`SESSION_INDEX_KEY`] as a JSON array,
//! and each session blob under `agent-session:<id>`.

use std::sync::Arc;

use agent_relay_protocol::Session;
use indexmap::IndexMap;
use tracing::warn;

use crate::error::Result;
use crate::storage::KeyValueStorage;

pub const SESSION_INDEX_KEY: &str = "agent-sessions";
pub const SESSION_KEY_PREFIX: &str = "agent-session:";

pub fn session_key(id: &str) -> String {
	format!("{SESSION_KEY_PREFIX}{id}")
}

/// Sessions in creation order.
#[derive(Default)]
pub struct SessionStore {
	sessions: IndexMap<String, Session>,
	storage: Option<Arc<dyn KeyValueStorage>>,
}

impl std::fmt::Debug for SessionStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionStore")
			.field("sessions", &self.sessions.len())
			.field("persistent", &self.storage.is_some())
			.finish()
	}
}

impl SessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_storage(storage: Arc<dyn KeyValueStorage>) -> Self {
		Self {
			sessions: IndexMap::new(),
			storage: Some(storage),
		}
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.sessions.contains_key(id)
	}

	pub fn get(&self, id: &str) -> Option<&Session> {
		self.sessions.get(id)
	}

	pub fn get_mut(&mut self, id: &str) -> Option<&mut Session> {
		self.sessions.get_mut(id)
	}

	/// Inserts or replaces a session. A replaced session keeps its position in the order.
	pub fn insert(&mut self, session: Session) {
		self.sessions.insert(session.id.clone(), session);
	}

	pub fn remove(&mut self, id: &str) -> Option<Session> {
		self.sessions.shift_remove(id)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Session> {
		self.sessions.values()
	}

	pub fn snapshot(&self) -> Vec<Session> {
		self.sessions.values().cloned().collect()
	}

	pub fn clear(&mut self) {
		self.sessions.clear();
	}

	/// Writes one session blob and the id index.
	pub fn persist(&self, id: &str) -> Result<()> {
		let Some(storage) = &self.storage else {
			return Ok(());
		};
		let Some(session) = self.sessions.get(id) else {
			return Ok(());
		};
		storage.set(&session_key(id), &serde_json::to_string(session)?)?;
		self.write_index(storage.as_ref())
	}

	/// Drops one session from persisted state.
	pub fn forget(&self, id: &str) -> Result<()> {
		let Some(storage) = &self.storage else {
			return Ok(());
		};
		storage.remove(&session_key(id))?;
		self.write_index(storage.as_ref())
	}

	/// Removes every persisted session, including ids no longer held in memory.
	pub fn clear_persisted(&self) -> Result<()> {
		let Some(storage) = &self.storage else {
			return Ok(());
		};
		for id in read_index(storage.as_ref())? {
			storage.remove(&session_key(&id))?;
		}
		for id in self.sessions.keys() {
			storage.remove(&session_key(id))?;
		}
		storage.remove(SESSION_INDEX_KEY)
	}

	/// Reads persisted sessions in index order.
	///
	/// Missing or undecodable blobs are skipped.
	pub fn load_persisted(&self) -> Result<Vec<Session>> {
		let Some(storage) = &self.storage else {
			return Ok(Vec::new());
		};
		let mut sessions = Vec::new();
		for id in read_index(storage.as_ref())? {
			let Some(raw) = storage.get(&session_key(&id))? else {
				continue;
			};
			match serde_json::from_str::<Session>(&raw) {
				Ok(session) => sessions.push(session),
				Err(err) => warn!(target = "agent_relay.manager", session = %id, error = %err, "discarding unreadable persisted session"),
			}
		}
		Ok(sessions)
	}

	fn write_index(&self, storage: &dyn KeyValueStorage) -> Result<()> {
		if self.sessions.is_empty() {
			return storage.remove(SESSION_INDEX_KEY);
		}
		let ids: Vec<&String> = self.sessions.keys().collect();
		storage.set(SESSION_INDEX_KEY, &serde_json::to_string(&ids)?)
	}
}

fn read_index(storage: &dyn KeyValueStorage) -> Result<Vec<String>> {
	match storage.get(SESSION_INDEX_KEY)? {
		Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
		None => Ok(Vec::new()),
	}
}

#[cfg(test)]
mod tests {
	use agent_relay_protocol::{AgentContext, Position};
	use tempfile::TempDir;

	use super::*;
	use crate::storage::{FileStorage, MemoryStorage};

	fn session(id: &str) -> Session {
		Session::new(id, AgentContext::new("rename button", vec!["<button/>".into()]), Position { x: 1.0, y: 2.0 }, 1_000)
	}

	#[test]
	fn test_insertion_order_is_kept() {
		let mut store = SessionStore::new();
		store.insert(session("b"));
		store.insert(session("a"));
		store.insert(session("c"));
		store.remove("a");
		store.insert(session("b"));

		let ids: Vec<_> = store.iter().map(|s| s.id.as_str()).collect();
		assert_eq!(ids, ["b", "c"]);
	}

	#[test]
	fn test_persist_forget_and_load() {
		let storage = Arc::new(MemoryStorage::new());
		let mut store = SessionStore::with_storage(storage.clone());

		store.insert(session("s1"));
		store.insert(session("s2"));
		store.persist("s1").unwrap();
		store.persist("s2").unwrap();
		assert_eq!(storage.get(SESSION_INDEX_KEY).unwrap().as_deref(), Some("[\"s1\",\"s2\"]"));

		store.remove("s1");
		store.forget("s1").unwrap();

		let loaded = SessionStore::with_storage(storage.clone()).load_persisted().unwrap();
		assert_eq!(loaded, vec![session("s2")]);
		assert_eq!(storage.get("agent-session:s1").unwrap(), None);
	}

	#[test]
	fn test_clear_persisted_removes_stale_ids() {
		let storage = Arc::new(MemoryStorage::new());
		let mut previous = SessionStore::with_storage(storage.clone());
		previous.insert(session("old"));
		previous.persist("old").unwrap();

		let store = SessionStore::with_storage(storage.clone());
		store.clear_persisted().unwrap();
		assert!(storage.is_empty());
	}

	#[test]
	fn test_load_skips_corrupt_blobs() {
		let storage = Arc::new(MemoryStorage::new());
		storage.set(SESSION_INDEX_KEY, "[\"bad\",\"missing\"]").unwrap();
		storage.set("agent-session:bad", "{not json").unwrap();

		let loaded = SessionStore::with_storage(storage).load_persisted().unwrap();
		assert!(loaded.is_empty());
	}

	#[test]
	fn test_file_backed_roundtrip() {
		let tmp = TempDir::new().unwrap();
		let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::new(tmp.path()));
		let mut store = SessionStore::with_storage(Arc::clone(&storage));
		let mut s = session("s1");
		s.last_status = "Editing Button.tsx".into();
		store.insert(s.clone());
		store.persist("s1").unwrap();

		let loaded = SessionStore::with_storage(storage).load_persisted().unwrap();
		assert_eq!(loaded, vec![s]);
	}

	#[test]
	fn test_memory_only_store_persists_nothing() {
		let mut store = SessionStore::new();
		store.insert(session("s1"));
		store.persist("s1").unwrap();
		assert!(store.load_persisted().unwrap().is_empty());
	}
}
