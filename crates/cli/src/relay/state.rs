//! Handler registry and in-flight routing table.
//!
//! Every socket gets a [`ConnId`]. A connection becomes a handler by sending
//! `register-handler`; everything else it sends is treated as browser traffic.
//! All mutation happens through `&mut RelayState`, so callers serialize on one lock.

use std::collections::{BTreeMap, HashMap};

use agent_relay_protocol::{HANDLER_DISCONNECTED, HANDLER_NOT_AVAILABLE, InvokeMethod, RelayMessage};
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub(crate) type ConnId = u64;

#[derive(Debug, Clone)]
struct InFlight {
	agent_id: String,
	browser: ConnId,
	handler: ConnId,
}

#[derive(Default)]
pub(crate) struct RelayState {
	connections: HashMap<ConnId, mpsc::UnboundedSender<Message>>,
	/// Sorted so `handlers` broadcasts are stable.
	handlers: BTreeMap<String, ConnId>,
	in_flight: HashMap<String, InFlight>,
	next_conn: ConnId,
}

impl RelayState {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	/// Adds a connection and sends it the current handler list.
	pub(crate) fn connect(&mut self, tx: mpsc::UnboundedSender<Message>) -> ConnId {
		self.next_conn += 1;
		let conn = self.next_conn;
		self.connections.insert(conn, tx);
		self.send(conn, &self.handlers_message());
		conn
	}

	pub(crate) fn handler_ids(&self) -> Vec<String> {
		self.handlers.keys().cloned().collect()
	}

	pub(crate) fn handle(&mut self, from: ConnId, message: RelayMessage) {
		match message {
			RelayMessage::RegisterHandler { agent_id } => self.register(from, agent_id),
			RelayMessage::UnregisterHandler { agent_id } => self.unregister(from, &agent_id),
			RelayMessage::AgentRequest { agent_id, session_id, context } => {
				self.begin(from, agent_id, session_id, InvokeMethod::Run, Some(context));
			}
			RelayMessage::AgentResume { agent_id, session_id } => {
				self.begin(from, agent_id, session_id, InvokeMethod::Resume, None);
			}
			RelayMessage::AgentAbort { agent_id, session_id } => self.forward(&agent_id, session_id, InvokeMethod::Abort),
			RelayMessage::AgentUndo { agent_id, session_id } => self.forward(&agent_id, session_id, InvokeMethod::Undo),
			RelayMessage::AgentRedo { agent_id, session_id } => self.forward(&agent_id, session_id, InvokeMethod::Redo),
			msg @ (RelayMessage::AgentStatus { .. } | RelayMessage::AgentDone { .. } | RelayMessage::AgentError { .. }) => self.route_reply(from, msg),
			RelayMessage::InvokeHandler { .. } | RelayMessage::Handlers { .. } => {
				warn!(target = "agent_relay", conn = from, "ignoring server-bound message from client");
			}
		}
	}

	/// Drops a connection: its registrations go away, requests it was serving get a
	/// synthesized `agent-error`, and requests it originated are forgotten.
	pub(crate) fn disconnect(&mut self, conn: ConnId) {
		self.connections.remove(&conn);

		let owned: Vec<String> = self.handlers.iter().filter(|(_, c)| **c == conn).map(|(id, _)| id.clone()).collect();
		for agent_id in &owned {
			self.handlers.remove(agent_id);
			info!(target = "agent_relay", agent = %agent_id, "handler disconnected");
		}

		self.fail_in_flight(|entry| entry.handler == conn);
		self.in_flight.retain(|_, entry| entry.browser != conn);

		if !owned.is_empty() {
			self.broadcast_handlers();
		}
	}

	fn register(&mut self, from: ConnId, agent_id: String) {
		match self.handlers.insert(agent_id.clone(), from) {
			Some(previous) if previous != from => {
				warn!(target = "agent_relay", agent = %agent_id, previous, conn = from, "replacing handler registration");
			}
			_ => info!(target = "agent_relay", agent = %agent_id, conn = from, "handler registered"),
		}
		self.broadcast_handlers();
	}

	fn unregister(&mut self, from: ConnId, agent_id: &str) {
		if self.handlers.get(agent_id) != Some(&from) {
			debug!(target = "agent_relay", agent = %agent_id, conn = from, "unregister for a registration this connection does not own");
			return;
		}
		self.handlers.remove(agent_id);
		info!(target = "agent_relay", agent = %agent_id, "handler unregistered");
		self.fail_in_flight(|entry| entry.handler == from && entry.agent_id == agent_id);
		self.broadcast_handlers();
	}

	fn begin(&mut self, from: ConnId, agent_id: String, session_id: String, method: InvokeMethod, payload: Option<agent_relay_protocol::AgentContext>) {
		let Some(&handler) = self.handlers.get(&agent_id) else {
			warn!(target = "agent_relay", agent = %agent_id, session = %session_id, "no handler registered");
			self.send(from, &RelayMessage::agent_error(&session_id, &agent_id, HANDLER_NOT_AVAILABLE));
			return;
		};

		debug!(target = "agent_relay", agent = %agent_id, session = %session_id, ?method, "routing request");
		self.in_flight.insert(session_id.clone(), InFlight { agent_id, browser: from, handler });
		self.send(handler, &RelayMessage::InvokeHandler { method, session_id, payload });
	}

	fn forward(&mut self, agent_id: &str, session_id: String, method: InvokeMethod) {
		let Some(&handler) = self.handlers.get(agent_id) else {
			warn!(target = "agent_relay", agent = %agent_id, session = %session_id, ?method, "no handler registered; dropping");
			return;
		};
		self.send(
			handler,
			&RelayMessage::InvokeHandler {
				method,
				session_id,
				payload: None,
			},
		);
	}

	fn route_reply(&mut self, from: ConnId, message: RelayMessage) {
		let Some(session_id) = message.session_id() else {
			return;
		};
		let Some(entry) = self.in_flight.get(session_id) else {
			debug!(target = "agent_relay", session = %session_id, "reply for unknown session; dropping");
			return;
		};
		if entry.handler != from {
			debug!(target = "agent_relay", session = %session_id, conn = from, "reply from a connection not serving this session; dropping");
			return;
		}

		let browser = entry.browser;
		if message.is_terminal() {
			let session_id = session_id.to_string();
			self.in_flight.remove(&session_id);
		}
		self.send(browser, &message);
	}

	fn fail_in_flight(&mut self, matches: impl Fn(&InFlight) -> bool) {
		let failed: Vec<(String, InFlight)> = self.in_flight.iter().filter(|(_, entry)| matches(entry)).map(|(id, entry)| (id.clone(), entry.clone())).collect();
		for (session_id, entry) in failed {
			self.in_flight.remove(&session_id);
			warn!(target = "agent_relay", agent = %entry.agent_id, session = %session_id, "failing in-flight request");
			self.send(entry.browser, &RelayMessage::agent_error(&session_id, &entry.agent_id, HANDLER_DISCONNECTED));
		}
	}

	fn handlers_message(&self) -> RelayMessage {
		RelayMessage::Handlers { handlers: self.handler_ids() }
	}

	fn broadcast_handlers(&self) {
		let payload = encode(&self.handlers_message());
		for tx in self.connections.values() {
			let _ = tx.send(payload.clone());
		}
	}

	fn send(&self, conn: ConnId, message: &RelayMessage) {
		if let Some(tx) = self.connections.get(&conn) {
			let _ = tx.send(encode(message));
		}
	}
}

fn encode(message: &RelayMessage) -> Message {
	Message::Text(message.to_text().into())
}

#[cfg(test)]
mod tests {
	use agent_relay_protocol::AgentContext;

	use super::*;

	struct Peer {
		id: ConnId,
		rx: mpsc::UnboundedReceiver<Message>,
	}

	impl Peer {
		fn next(&mut self) -> Option<RelayMessage> {
			match self.rx.try_recv().ok()? {
				Message::Text(text) => RelayMessage::parse(text.as_str()).ok(),
				_ => None,
			}
		}

		fn drain(&mut self) -> Vec<RelayMessage> {
			std::iter::from_fn(|| self.next()).collect()
		}
	}

	fn peer(state: &mut RelayState) -> Peer {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = state.connect(tx);
		Peer { id, rx }
	}

	fn register(state: &mut RelayState, agent: &str) -> Peer {
		let mut p = peer(state);
		state.handle(p.id, RelayMessage::RegisterHandler { agent_id: agent.into() });
		p.drain();
		p
	}

	fn request(agent: &str, session: &str) -> RelayMessage {
		RelayMessage::AgentRequest {
			agent_id: agent.into(),
			session_id: session.into(),
			context: AgentContext::new("rename button", vec![]),
		}
	}

	fn status(session: &str, content: &str) -> RelayMessage {
		RelayMessage::AgentStatus {
			session_id: session.into(),
			agent_id: "x".into(),
			content: content.into(),
		}
	}

	#[test]
	fn new_connection_receives_handler_list() {
		let mut state = RelayState::new();
		register(&mut state, "x");
		let mut browser = peer(&mut state);
		assert_eq!(browser.drain(), vec![RelayMessage::Handlers { handlers: vec!["x".into()] }]);
	}

	#[test]
	fn request_without_handler_errors_immediately() {
		let mut state = RelayState::new();
		let mut browser = peer(&mut state);
		browser.drain();

		state.handle(browser.id, request("x", "s1"));
		assert_eq!(browser.drain(), vec![RelayMessage::agent_error("s1", "x", HANDLER_NOT_AVAILABLE)]);
	}

	#[test]
	fn routing_is_exact_and_replies_reach_origin() {
		let mut state = RelayState::new();
		let mut x = register(&mut state, "x");
		let mut y = register(&mut state, "y");
		let mut browser = peer(&mut state);
		let mut other = peer(&mut state);
		x.drain();
		browser.drain();
		other.drain();

		state.handle(browser.id, request("x", "s1"));
		assert!(matches!(&x.drain()[..], [RelayMessage::InvokeHandler { method: InvokeMethod::Run, session_id, payload: Some(_) }] if session_id == "s1"));
		assert!(y.drain().is_empty());

		state.handle(x.id, status("s1", "working"));
		state.handle(x.id, RelayMessage::AgentDone {
			session_id: "s1".into(),
			agent_id: "x".into(),
			content: None,
		});
		assert_eq!(browser.drain().len(), 2);
		assert!(other.drain().is_empty());

		// Terminal message removed the entry.
		state.handle(x.id, status("s1", "late"));
		assert!(browser.drain().is_empty());
	}

	#[test]
	fn replies_from_wrong_connection_are_dropped() {
		let mut state = RelayState::new();
		let x = register(&mut state, "x");
		let y = register(&mut state, "y");
		let mut browser = peer(&mut state);
		browser.drain();

		state.handle(browser.id, request("x", "s1"));
		state.handle(y.id, status("s1", "spoofed"));
		assert!(browser.drain().is_empty());
		state.handle(x.id, status("s1", "real"));
		assert_eq!(browser.drain(), vec![status("s1", "real")]);
	}

	#[test]
	fn handler_disconnect_synthesizes_errors() {
		let mut state = RelayState::new();
		let x = register(&mut state, "x");
		let mut browser = peer(&mut state);
		browser.drain();

		state.handle(browser.id, request("x", "s1"));
		state.disconnect(x.id);

		assert_eq!(
			browser.drain(),
			vec![RelayMessage::agent_error("s1", "x", HANDLER_DISCONNECTED), RelayMessage::Handlers { handlers: vec![] }]
		);
		assert!(state.in_flight.is_empty());
	}

	#[test]
	fn later_registration_wins() {
		let mut state = RelayState::new();
		let mut first = register(&mut state, "x");
		let mut second = register(&mut state, "x");
		let browser = peer(&mut state);
		first.drain();

		state.handle(browser.id, request("x", "s1"));
		assert!(first.drain().is_empty());
		assert_eq!(second.drain().len(), 1);

		// The replaced connection going away does not touch the new registration.
		state.disconnect(first.id);
		assert_eq!(state.handler_ids(), vec!["x".to_string()]);
	}

	#[test]
	fn unregister_only_applies_to_owner() {
		let mut state = RelayState::new();
		let x = register(&mut state, "x");
		let stranger = peer(&mut state);

		state.handle(stranger.id, RelayMessage::UnregisterHandler { agent_id: "x".into() });
		assert_eq!(state.handler_ids(), vec!["x".to_string()]);

		state.handle(x.id, RelayMessage::UnregisterHandler { agent_id: "x".into() });
		assert!(state.handler_ids().is_empty());
	}

	#[test]
	fn browser_disconnect_forgets_its_requests() {
		let mut state = RelayState::new();
		let mut x = register(&mut state, "x");
		let browser = peer(&mut state);
		state.handle(browser.id, request("x", "s1"));
		x.drain();

		state.disconnect(browser.id);
		assert!(state.in_flight.is_empty());
		assert!(x.drain().is_empty());
	}

	#[test]
	fn resume_reattaches_to_new_browser() {
		let mut state = RelayState::new();
		let mut x = register(&mut state, "x");
		let old = peer(&mut state);
		state.handle(old.id, request("x", "s1"));
		state.disconnect(old.id);
		x.drain();

		let mut reloaded = peer(&mut state);
		reloaded.drain();
		state.handle(reloaded.id, RelayMessage::AgentResume {
			agent_id: "x".into(),
			session_id: "s1".into(),
		});
		assert_eq!(
			x.drain(),
			vec![RelayMessage::InvokeHandler {
				method: InvokeMethod::Resume,
				session_id: "s1".into(),
				payload: None,
			}]
		);

		state.handle(x.id, status("s1", "still going"));
		assert_eq!(reloaded.drain(), vec![status("s1", "still going")]);
	}

	#[test]
	fn abort_without_handler_is_dropped() {
		let mut state = RelayState::new();
		let mut browser = peer(&mut state);
		browser.drain();
		state.handle(browser.id, RelayMessage::AgentAbort {
			agent_id: "x".into(),
			session_id: "s1".into(),
		});
		assert!(browser.drain().is_empty());
	}
}
