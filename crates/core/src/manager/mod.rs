//! Session state machine.
//!
//! [`AgentManager`] owns every session's lifecycle:
//!
//! ```text
//! start ──► streaming ──► completed ──► fading ──► removed
//!               │    └──► errored ───┘   (dismiss)
//!               └──► aborted (removed immediately)
//! ```
//!
//! Each run is tagged with an attempt id. Only the attempt currently registered for a
//! session may mutate it, so messages from a superseded stream are inert. State sits
//! behind one [`parking_lot::Mutex`] that is never held across an `.await`; callbacks
//! fire after the lock is released.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use agent_relay_protocol::{AgentContext, INITIAL_STATUS, Position, Rect, Session, SessionState};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::callbacks::{ManagerCallbacks, fire};
use crate::locator::{ElementLocator, ReacquireStrategy, reachable};
use crate::provider::{AgentProvider, StatusStream, StreamError};
use crate::storage::KeyValueStorage;
use crate::store::SessionStore;

/// Fade duration between `dismiss` and removal.
pub const DEFAULT_DISMISS_DELAY: Duration = Duration::from_millis(150);

/// How long an errored session stays eligible for resume.
pub const DEFAULT_RESUME_ERROR_WINDOW: Duration = Duration::from_secs(30);

/// Rewrites captured content before it is sent. An `Err` is recorded on the session
/// and the provider is never invoked.
pub type ContentTransform = Arc<dyn Fn(Vec<String>) -> Result<Vec<String>, String> + Send + Sync>;

#[derive(Clone)]
pub struct AgentManagerOptions {
	pub dismiss_delay: Duration,
	pub resume_error_window: Duration,
	pub transform_content: Option<ContentTransform>,
	pub reacquire: ReacquireStrategy,
	/// Copied into `context.options` of every new session.
	pub agent_options: Option<Value>,
}

impl Default for AgentManagerOptions {
	fn default() -> Self {
		Self {
			dismiss_delay: DEFAULT_DISMISS_DELAY,
			resume_error_window: DEFAULT_RESUME_ERROR_WINDOW,
			transform_content: None,
			reacquire: ReacquireStrategy::default(),
			agent_options: None,
		}
	}
}

impl std::fmt::Debug for AgentManagerOptions {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AgentManagerOptions")
			.field("dismiss_delay", &self.dismiss_delay)
			.field("resume_error_window", &self.resume_error_window)
			.field("transform_content", &self.transform_content.is_some())
			.field("reacquire", &self.reacquire)
			.field("agent_options", &self.agent_options)
			.finish()
	}
}

/// Arguments to [`AgentManager::start`].
pub struct StartRequest<E> {
	pub prompt: String,
	/// Snippets extracted from the selected elements, in selection order.
	pub content: Vec<String>,
	pub elements: Vec<E>,
	pub position: Position,
	pub bounds: Vec<Rect>,
	/// An existing session id makes this a follow-up.
	pub session_id: Option<String>,
	/// Overrides the manager's default provider for this session.
	pub agent: Option<Arc<dyn AgentProvider>>,
}

impl<E> StartRequest<E> {
	pub fn new(prompt: impl Into<String>) -> Self {
		Self {
			prompt: prompt.into(),
			content: Vec::new(),
			elements: Vec::new(),
			position: Position::default(),
			bounds: Vec::new(),
			session_id: None,
			agent: None,
		}
	}

	pub fn follow_up(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
		Self {
			session_id: Some(session_id.into()),
			..Self::new(prompt)
		}
	}
}

struct Attempt {
	id: u64,
	cancel: CancellationToken,
}

#[derive(Clone)]
struct HistoryEntry<E> {
	session: Session,
	elements: Vec<E>,
	agent: Arc<dyn AgentProvider>,
}

struct State<E> {
	store: SessionStore,
	elements: HashMap<String, Vec<E>>,
	agents: HashMap<String, Arc<dyn AgentProvider>>,
	attempts: HashMap<String, Attempt>,
	dismiss_timers: HashMap<String, JoinHandle<()>>,
	undo_stack: Vec<HistoryEntry<E>>,
	redo_stack: Vec<HistoryEntry<E>>,
	next_attempt: u64,
}

impl<E> State<E> {
	fn is_current(&self, session_id: &str, attempt: u64) -> bool {
		self.attempts.get(session_id).is_some_and(|a| a.id == attempt)
	}

	fn cancel_timer(&mut self, session_id: &str) {
		if let Some(timer) = self.dismiss_timers.remove(session_id) {
			timer.abort();
		}
	}

	fn persist(&self, session_id: &str) {
		if let Err(err) = self.store.persist(session_id) {
			warn!(target = "agent_relay.manager", session = %session_id, error = %err, "failed to persist session");
		}
	}

	fn remove_session(&mut self, session_id: &str) -> Option<Session> {
		self.cancel_timer(session_id);
		if let Some(attempt) = self.attempts.remove(session_id) {
			attempt.cancel.cancel();
		}
		self.elements.remove(session_id);
		self.agents.remove(session_id);
		let removed = self.store.remove(session_id)?;
		if let Err(err) = self.store.forget(session_id) {
			warn!(target = "agent_relay.manager", session = %session_id, error = %err, "failed to clear persisted session");
		}
		Some(removed)
	}
}

struct Inner<L: ElementLocator> {
	provider: Arc<dyn AgentProvider>,
	locator: Arc<L>,
	options: AgentManagerOptions,
	callbacks: ManagerCallbacks,
	state: Mutex<State<L::Element>>,
}

/// Builder for [`AgentManager`].
pub struct AgentManagerBuilder<L: ElementLocator> {
	provider: Arc<dyn AgentProvider>,
	locator: Arc<L>,
	options: AgentManagerOptions,
	callbacks: ManagerCallbacks,
	storage: Option<Arc<dyn KeyValueStorage>>,
}

impl<L: ElementLocator> AgentManagerBuilder<L> {
	pub fn options(mut self, options: AgentManagerOptions) -> Self {
		self.options = options;
		self
	}

	pub fn callbacks(mut self, callbacks: ManagerCallbacks) -> Self {
		self.callbacks = callbacks;
		self
	}

	/// Persists sessions so [`AgentManager::try_resume`] can pick them up later.
	pub fn storage(mut self, storage: Arc<dyn KeyValueStorage>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn build(self) -> AgentManager<L> {
		let store = match self.storage {
			Some(storage) => SessionStore::with_storage(storage),
			None => SessionStore::new(),
		};
		AgentManager {
			inner: Arc::new(Inner {
				provider: self.provider,
				locator: self.locator,
				options: self.options,
				callbacks: self.callbacks,
				state: Mutex::new(State {
					store,
					elements: HashMap::new(),
					agents: HashMap::new(),
					attempts: HashMap::new(),
					dismiss_timers: HashMap::new(),
					undo_stack: Vec::new(),
					redo_stack: Vec::new(),
					next_attempt: 0,
				}),
			}),
		}
	}
}

/// Browser-side session manager. Cheap to clone.
///
/// Methods spawn tokio tasks and must be called from within a runtime.
pub struct AgentManager<L: ElementLocator> {
	inner: Arc<Inner<L>>,
}

impl<L: ElementLocator> Clone for AgentManager<L> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<L: ElementLocator> AgentManager<L> {
	pub fn builder(provider: Arc<dyn AgentProvider>, locator: Arc<L>) -> AgentManagerBuilder<L> {
		AgentManagerBuilder {
			provider,
			locator,
			options: AgentManagerOptions::default(),
			callbacks: ManagerCallbacks::default(),
			storage: None,
		}
	}

	pub fn options(&self) -> &AgentManagerOptions {
		&self.inner.options
	}

	/// Starts a new session, or follows up on an existing one when
	/// `request.session_id` names it. Returns the session id.
	pub fn start(&self, request: StartRequest<L::Element>) -> String {
		let StartRequest {
			prompt,
			content,
			elements,
			position,
			bounds,
			session_id,
			agent,
		} = request;
		let now = now_ms();
		let locator = &self.inner.locator;

		let (session, agent) = {
			let mut st = self.inner.state.lock();
			st.redo_stack.clear();

			let existing = session_id.filter(|id| st.store.contains(id));
			let (id, agent) = match existing {
				Some(id) => {
					st.cancel_timer(&id);
					if let Some(previous) = st.attempts.remove(&id) {
						previous.cancel.cancel();
					}
					let agent = agent.or_else(|| st.agents.get(&id).cloned()).unwrap_or_else(|| Arc::clone(&self.inner.provider));
					if let Some(session) = st.store.get_mut(&id) {
						session.context.prompt = prompt;
						session.last_status = INITIAL_STATUS.to_string();
						session.is_streaming = true;
						session.is_fading = false;
						session.error = None;
						session.last_updated_at = now;
					}
					debug!(target = "agent_relay.manager", session = %id, "follow-up");
					(id, agent)
				}
				None => {
					let id = Uuid::new_v4().to_string();
					let mut context = AgentContext::new(prompt, content);
					context.options = self.inner.options.agent_options.clone();

					let mut session = Session::new(id.clone(), context, position, now);
					session.selection_bounds = bounds;
					if let Some(first) = elements.first() {
						session.tag_name = locator.tag_name(first);
						session.component_name = locator.component_name(first);
					}
					st.store.insert(session);
					st.elements.insert(id.clone(), elements);
					(id, agent.unwrap_or_else(|| Arc::clone(&self.inner.provider)))
				}
			};
			st.agents.insert(id.clone(), Arc::clone(&agent));
			st.persist(&id);

			match st.store.get(&id) {
				Some(session) => (session.clone(), agent),
				None => return id,
			}
		};

		info!(target = "agent_relay.manager", session = %session.id, agent = %agent.agent_id(), "session started");
		fire(&self.inner.callbacks.on_start, &session);
		self.launch(session.id.clone(), agent, session.context);
		session.id
	}

	/// Cancels one session's run and removes the session.
	pub fn abort(&self, session_id: &str) {
		let (removed, agent) = {
			let mut st = self.inner.state.lock();
			let streaming = st.attempts.contains_key(session_id);
			let agent = st.agents.get(session_id).cloned().filter(|_| streaming);
			(st.remove_session(session_id), agent)
		};

		if let Some(agent) = agent {
			agent.abort(session_id);
		}
		if let Some(session) = removed {
			info!(target = "agent_relay.manager", session = %session_id, "session aborted");
			fire(&self.inner.callbacks.on_abort, &session);
		}
	}

	/// Full reset: cancels every run, drops every session, timer, and history entry,
	/// and clears persisted state.
	pub fn abort_all(&self) {
		let (removed, running) = {
			let mut guard = self.inner.state.lock();
			let st = &mut *guard;
			let agents = &st.agents;
			let running: Vec<(String, Arc<dyn AgentProvider>)> = st
				.attempts
				.drain()
				.filter_map(|(id, attempt)| {
					attempt.cancel.cancel();
					agents.get(&id).cloned().map(|agent| (id, agent))
				})
				.collect();
			for (_, timer) in st.dismiss_timers.drain() {
				timer.abort();
			}
			st.undo_stack.clear();
			st.redo_stack.clear();
			if let Err(err) = st.store.clear_persisted() {
				warn!(target = "agent_relay.manager", error = %err, "failed to clear persisted sessions");
			}
			let removed = st.store.snapshot();
			st.store.clear();
			st.elements.clear();
			st.agents.clear();
			(removed, running)
		};

		for (id, agent) in &running {
			agent.abort(id);
		}
		info!(target = "agent_relay.manager", sessions = removed.len(), "all sessions aborted");
		for session in &removed {
			fire(&self.inner.callbacks.on_abort, session);
		}
	}

	/// Starts fading a session out and schedules its removal.
	///
	/// Calling this again while the session is fading does nothing.
	pub fn dismiss(&self, session_id: &str) {
		let (session, agent) = {
			let mut st = self.inner.state.lock();
			let Some(session) = st.store.get_mut(session_id) else {
				return;
			};
			if session.is_fading {
				return;
			}
			session.is_fading = true;
			let session = session.clone();

			let agent = match st.attempts.remove(session_id) {
				Some(attempt) => {
					attempt.cancel.cancel();
					st.agents.get(session_id).cloned()
				}
				None => None,
			};

			let weak = Arc::downgrade(&self.inner);
			let id = session_id.to_string();
			let delay = self.inner.options.dismiss_delay;
			let timer = tokio::spawn(async move {
				tokio::time::sleep(delay).await;
				finish_dismiss(weak, &id);
			});
			st.cancel_timer(session_id);
			st.dismiss_timers.insert(session_id.to_string(), timer);
			(session, agent)
		};

		if let Some(agent) = agent {
			agent.abort(session_id);
		}
		fire(&self.inner.callbacks.on_dismiss, &session);
	}

	/// Re-runs an errored session with its original context.
	///
	/// Returns `false` for sessions that are missing, not errored, or already fading out.
	pub fn retry(&self, session_id: &str) -> bool {
		let (session, agent) = {
			let mut st = self.inner.state.lock();
			let retryable = st.store.get(session_id).is_some_and(|s| s.state() == SessionState::Errored);
			if !retryable {
				return false;
			}
			st.cancel_timer(session_id);
			let Some(session) = st.store.get_mut(session_id) else {
				return false;
			};
			session.error = None;
			session.is_streaming = true;
			session.is_fading = false;
			session.last_status = INITIAL_STATUS.to_string();
			session.last_updated_at = now_ms();
			let session = session.clone();
			st.persist(session_id);
			let agent = st.agents.get(session_id).cloned().unwrap_or_else(|| Arc::clone(&self.inner.provider));
			(session, agent)
		};

		info!(target = "agent_relay.manager", session = %session_id, "retrying session");
		fire(&self.inner.callbacks.on_start, &session);
		self.launch(session.id, agent, session.context);
		true
	}

	/// Reverts the most recently completed session. Returns `false` if there is nothing to undo.
	pub fn undo(&self) -> bool {
		let entry = {
			let mut st = self.inner.state.lock();
			let Some(entry) = st.undo_stack.pop() else {
				return false;
			};
			st.redo_stack.push(entry.clone());
			entry
		};

		entry.agent.undo(&entry.session.id);
		fire(&self.inner.callbacks.on_undo, &entry.session);
		self.dismiss(&entry.session.id);
		true
	}

	/// Re-applies the most recently undone session. Returns `false` if there is nothing to redo.
	///
	/// The handler is always asked to redo. The session comes back into view only if
	/// its elements are still attached or can be reacquired.
	pub fn redo(&self) -> bool {
		let Some(entry) = self.inner.state.lock().redo_stack.pop() else {
			return false;
		};
		let session_id = entry.session.id.clone();
		entry.agent.redo(&session_id);

		let locator = self.inner.locator.as_ref();
		let elements = if reachable(locator, &entry.elements) {
			Some(entry.elements)
		} else {
			self.inner.options.reacquire.reacquire(locator, &entry.session).map(|el| vec![el])
		};
		let Some(elements) = elements else {
			debug!(target = "agent_relay.manager", session = %session_id, "redo target not reachable; session not restored");
			return true;
		};

		let mut session = entry.session;
		session.selection_bounds = elements.iter().map(|el| locator.bounds(el)).collect();
		session.is_streaming = false;
		session.is_fading = false;
		session.error = None;
		session.last_updated_at = now_ms();

		{
			let mut st = self.inner.state.lock();
			st.cancel_timer(&session_id);
			st.store.insert(session.clone());
			st.elements.insert(session_id.clone(), elements.clone());
			st.agents.insert(session_id.clone(), Arc::clone(&entry.agent));
			st.persist(&session_id);
			st.undo_stack.retain(|e| e.session.id != session_id);
			st.undo_stack.push(HistoryEntry {
				session: session.clone(),
				elements,
				agent: entry.agent,
			});
		}

		fire(&self.inner.callbacks.on_complete, &session);
		true
	}

	/// Restores sessions persisted by a previous incarnation. Call once on load.
	///
	/// Keeps sessions that were still streaming, or errored within
	/// [`resume_error_window`](AgentManagerOptions::resume_error_window), and
	/// re-attaches their streams. Everything else is discarded. Returns the number of
	/// sessions resumed.
	pub fn try_resume(&self) -> usize {
		let persisted = {
			let st = self.inner.state.lock();
			let persisted = st.store.load_persisted().unwrap_or_else(|err| {
				warn!(target = "agent_relay.manager", error = %err, "failed to read persisted sessions");
				Vec::new()
			});
			if let Err(err) = st.store.clear_persisted() {
				warn!(target = "agent_relay.manager", error = %err, "failed to clear persisted sessions");
			}
			persisted
		};

		let now = now_ms();
		let window = u64::try_from(self.inner.options.resume_error_window.as_millis()).unwrap_or(u64::MAX);
		let keep: Vec<Session> = persisted
			.into_iter()
			.filter(|s| s.is_streaming || (s.error.is_some() && now.saturating_sub(s.last_updated_at) <= window))
			.collect();

		let provider = Arc::clone(&self.inner.provider);
		if keep.is_empty() || !provider.supports_resume() {
			return 0;
		}

		let locator = self.inner.locator.as_ref();
		let mut resumed = 0;
		for mut session in keep {
			let elements: Vec<L::Element> = self.inner.options.reacquire.reacquire(locator, &session).into_iter().collect();
			if !elements.is_empty() {
				session.selection_bounds = elements.iter().map(|el| locator.bounds(el)).collect();
			}
			session.is_streaming = true;
			session.is_fading = false;
			session.error = None;
			session.last_updated_at = now;

			let cancel = CancellationToken::new();
			let Some(stream) = provider.resume(&session.id, cancel.clone()) else {
				debug!(target = "agent_relay.manager", session = %session.id, "provider declined resume");
				continue;
			};

			let id = session.id.clone();
			{
				let mut st = self.inner.state.lock();
				st.store.insert(session.clone());
				st.elements.insert(id.clone(), elements);
				st.agents.insert(id.clone(), Arc::clone(&provider));
				st.persist(&id);
			}
			self.spawn_stream(id, Arc::clone(&provider), cancel, stream);
			info!(target = "agent_relay.manager", session = %session.id, "session resumed");
			fire(&self.inner.callbacks.on_resume, &session);
			resumed += 1;
		}
		resumed
	}

	/// Returns the session's prompt and dismisses it.
	pub fn acknowledge_error(&self, session_id: &str) -> Option<String> {
		let prompt = self.inner.state.lock().store.get(session_id)?.context.prompt.clone();
		self.dismiss(session_id);
		Some(prompt)
	}

	pub fn sessions(&self) -> Vec<Session> {
		self.inner.state.lock().store.snapshot()
	}

	pub fn session(&self, session_id: &str) -> Option<Session> {
		self.inner.state.lock().store.get(session_id).cloned()
	}

	/// Whether any session has a run in flight.
	pub fn is_processing(&self) -> bool {
		!self.inner.state.lock().attempts.is_empty()
	}

	pub fn can_undo(&self) -> bool {
		!self.inner.state.lock().undo_stack.is_empty()
	}

	pub fn can_redo(&self) -> bool {
		!self.inner.state.lock().redo_stack.is_empty()
	}

	pub fn elements(&self, session_id: &str) -> Vec<L::Element> {
		self.inner.state.lock().elements.get(session_id).cloned().unwrap_or_default()
	}

	/// Applies the content transform, then hands the context to the provider.
	fn launch(&self, session_id: String, agent: Arc<dyn AgentProvider>, mut context: AgentContext) {
		if let Some(transform) = &self.inner.options.transform_content {
			match transform(std::mem::take(&mut context.content)) {
				Ok(content) => context.content = content,
				Err(message) => {
					warn!(target = "agent_relay.manager", session = %session_id, error = %message, "content transform failed");
					let session = {
						let mut st = self.inner.state.lock();
						let Some(session) = st.store.get_mut(&session_id) else {
							return;
						};
						session.is_streaming = false;
						session.error = Some(message);
						session.last_updated_at = now_ms();
						let session = session.clone();
						st.persist(&session_id);
						session
					};
					fire(&self.inner.callbacks.on_error, &session);
					return;
				}
			}
		}

		context.session_id = Some(session_id.clone());
		let cancel = CancellationToken::new();
		let stream = agent.run(context, &session_id, cancel.clone());
		self.spawn_stream(session_id, agent, cancel, stream);
	}

	fn spawn_stream(&self, session_id: String, agent: Arc<dyn AgentProvider>, cancel: CancellationToken, stream: StatusStream) {
		let attempt = {
			let mut st = self.inner.state.lock();
			st.next_attempt += 1;
			let attempt = st.next_attempt;
			let current = Attempt {
				id: attempt,
				cancel: cancel.clone(),
			};
			if let Some(previous) = st.attempts.insert(session_id.clone(), current) {
				previous.cancel.cancel();
			}
			attempt
		};

		let manager = self.clone();
		tokio::spawn(async move {
			manager.execute_session_stream(session_id, attempt, cancel, stream, agent).await;
		});
	}

	async fn execute_session_stream(self, session_id: String, attempt: u64, cancel: CancellationToken, mut stream: StatusStream, agent: Arc<dyn AgentProvider>) {
		let outcome = loop {
			let next = tokio::select! {
				biased;
				_ = cancel.cancelled() => Some(Err(StreamError::Aborted)),
				item = stream.next() => item,
			};
			match next {
				Some(Ok(status)) => self.apply_status(&session_id, attempt, status),
				Some(Err(err)) => break Err(err),
				None => break Ok(()),
			}
		};

		match outcome {
			Ok(()) => self.complete(&session_id, attempt, agent.as_ref()),
			Err(StreamError::Aborted) => self.remove_aborted(&session_id, attempt),
			Err(err) => self.fail(&session_id, attempt, err.to_string()),
		}
	}

	fn apply_status(&self, session_id: &str, attempt: u64, status: String) {
		let session = {
			let mut st = self.inner.state.lock();
			if !st.is_current(session_id, attempt) {
				return;
			}
			let Some(session) = st.store.get_mut(session_id) else {
				return;
			};
			session.last_status = status;
			session.last_updated_at = now_ms();
			let session = session.clone();
			st.persist(session_id);
			session
		};
		fire(&self.inner.callbacks.on_status, &session);
	}

	fn complete(&self, session_id: &str, attempt: u64, agent: &dyn AgentProvider) {
		let completion = agent.completion_message();
		let session = {
			let mut st = self.inner.state.lock();
			if !st.is_current(session_id, attempt) {
				return;
			}
			st.attempts.remove(session_id);
			let Some(session) = st.store.get_mut(session_id) else {
				return;
			};
			session.is_streaming = false;
			if let Some(message) = completion {
				session.last_status = message;
			}
			session.last_updated_at = now_ms();
			let session = session.clone();
			st.persist(session_id);

			let elements = st.elements.get(session_id).cloned().unwrap_or_default();
			let agent = st.agents.get(session_id).cloned().unwrap_or_else(|| Arc::clone(&self.inner.provider));
			st.undo_stack.retain(|e| e.session.id != session_id);
			st.undo_stack.push(HistoryEntry {
				session: session.clone(),
				elements,
				agent,
			});
			st.redo_stack.clear();
			session
		};

		info!(target = "agent_relay.manager", session = %session_id, "session completed");
		fire(&self.inner.callbacks.on_complete, &session);
	}

	fn remove_aborted(&self, session_id: &str, attempt: u64) {
		let removed = {
			let mut st = self.inner.state.lock();
			if !st.is_current(session_id, attempt) {
				return;
			}
			st.remove_session(session_id)
		};
		if let Some(session) = removed {
			info!(target = "agent_relay.manager", session = %session_id, "session aborted by handler");
			fire(&self.inner.callbacks.on_abort, &session);
		}
	}

	fn fail(&self, session_id: &str, attempt: u64, message: String) {
		let session = {
			let mut st = self.inner.state.lock();
			if !st.is_current(session_id, attempt) {
				return;
			}
			st.attempts.remove(session_id);
			let Some(session) = st.store.get_mut(session_id) else {
				return;
			};
			session.is_streaming = false;
			session.error = Some(message);
			session.last_updated_at = now_ms();
			let session = session.clone();
			st.persist(session_id);
			session
		};

		warn!(target = "agent_relay.manager", session = %session_id, error = ?session.error, "session failed");
		fire(&self.inner.callbacks.on_error, &session);
	}
}

fn finish_dismiss<L: ElementLocator>(inner: Weak<Inner<L>>, session_id: &str) {
	let Some(inner) = inner.upgrade() else {
		return;
	};
	let mut st = inner.state.lock();
	st.dismiss_timers.remove(session_id);
	if st.store.get(session_id).is_some_and(|s| s.is_fading) {
		st.remove_session(session_id);
		debug!(target = "agent_relay.manager", session = %session_id, "session removed");
	}
}

fn now_ms() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}
