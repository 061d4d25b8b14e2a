//! Browser-side relay connection with automatic reconstruction.
//!
//! [`RelayClient`] owns at most one socket to the relay at a time:
//!
//! - [`connect`](RelayClient::connect) is idempotent; concurrent callers serialize on
//!   one connect lock, so only the first opens a socket and the rest observe it.
//! - After an unexpected close, a single reconnect is scheduled after
//!   [`RelayClientOptions::reconnect_interval`]. A failed attempt schedules the next one.
//! - [`disconnect`](RelayClient::disconnect) cancels any pending reconnect timer.
//!
//! Incoming messages are fanned out to `on_*` subscribers. Sends are best-effort and
//! report whether the socket was open.

mod listeners;

use std::sync::Arc;
use std::time::Duration;

use agent_relay_protocol::{AgentContext, RelayMessage};
use futures_util::{SinkExt, StreamExt};
pub use listeners::Subscription;
use listeners::Listeners;
use parking_lot::Mutex;
use tokio::sync::{Mutex as TokioMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{self, DEFAULT_RELAY_URL, Frame, RelaySocket};

/// Interval between a close and the next reconnect attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Connection settings for [`RelayClient`].
#[derive(Debug, Clone)]
pub struct RelayClientOptions {
	pub url: String,
	pub token: Option<String>,
	pub auto_reconnect: bool,
	pub reconnect_interval: Duration,
}

impl Default for RelayClientOptions {
	fn default() -> Self {
		Self {
			url: DEFAULT_RELAY_URL.to_string(),
			token: None,
			auto_reconnect: true,
			reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
		}
	}
}

#[derive(Default)]
struct ConnState {
	outbound: Option<mpsc::UnboundedSender<Message>>,
	/// Bumped on every open and explicit disconnect; close notifications from an
	/// older socket carry a stale value and are ignored.
	generation: u64,
	explicit_disconnect: bool,
	reconnect_task: Option<JoinHandle<()>>,
	reader_task: Option<JoinHandle<()>>,
	available_handlers: Vec<String>,
}

struct Inner {
	options: RelayClientOptions,
	state: Mutex<ConnState>,
	connect_lock: TokioMutex<()>,
	messages: Listeners<RelayMessage>,
	handlers: Listeners<Vec<String>>,
	connection: Listeners<bool>,
}

/// Cloneable handle to one logical relay connection.
#[derive(Clone)]
pub struct RelayClient {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for RelayClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RelayClient")
			.field("url", &self.inner.options.url)
			.field("connected", &self.is_connected())
			.finish()
	}
}

impl RelayClient {
	pub fn new(options: RelayClientOptions) -> Self {
		Self {
			inner: Arc::new(Inner {
				options,
				state: Mutex::new(ConnState::default()),
				connect_lock: TokioMutex::new(()),
				messages: Listeners::new(),
				handlers: Listeners::new(),
				connection: Listeners::new(),
			}),
		}
	}

	pub fn options(&self) -> &RelayClientOptions {
		&self.inner.options
	}

	pub fn is_connected(&self) -> bool {
		self.inner.state.lock().outbound.is_some()
	}

	/// Opens the socket if it is not already open.
	pub async fn connect(&self) -> Result<()> {
		self.inner.state.lock().explicit_disconnect = false;
		self.open().await
	}

	/// Shared by [`connect`](Self::connect) and scheduled reconnects. Leaves
	/// `explicit_disconnect` alone, and gives up on the fresh socket if
	/// [`disconnect`](Self::disconnect) ran while the handshake was in flight.
	async fn open(&self) -> Result<()> {
		let _guard = self.inner.connect_lock.lock().await;
		let epoch = {
			let st = self.inner.state.lock();
			if st.outbound.is_some() {
				return Ok(());
			}
			if st.explicit_disconnect {
				return Err(Error::ConnectionClosed);
			}
			st.generation
		};

		let socket = transport::connect(&self.inner.options.url, self.inner.options.token.as_deref()).await?;
		if let Err(mut stale) = self.install(socket, epoch) {
			debug!(target = "agent_relay.client", "disconnect requested during handshake, dropping socket");
			let _ = stale.close(None).await;
			return Err(Error::ConnectionClosed);
		}

		info!(target = "agent_relay.client", url = %self.inner.options.url, "connected to relay");
		self.inner.connection.emit(&true);
		Ok(())
	}

	/// Makes `socket` the live connection unless the state moved past `epoch`, in
	/// which case the socket is handed back untouched.
	fn install(&self, socket: RelaySocket, epoch: u64) -> std::result::Result<(), RelaySocket> {
		let mut st = self.inner.state.lock();
		if st.generation != epoch || st.explicit_disconnect {
			return Err(socket);
		}

		let (mut sink, mut stream) = socket.split();
		let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
		tokio::spawn(async move {
			while let Some(msg) = rx.recv().await {
				let closing = matches!(msg, Message::Close(_));
				if sink.send(msg).await.is_err() || closing {
					break;
				}
			}
			let _ = sink.close().await;
		});

		st.generation += 1;
		let generation = st.generation;
		st.outbound = Some(tx);
		if let Some(pending) = st.reconnect_task.take() {
			pending.abort();
		}

		let client = self.clone();
		st.reader_task = Some(tokio::spawn(async move {
			while let Some(frame) = stream.next().await {
				match frame.map(transport::decode) {
					Ok(Frame::Message(msg)) => client.dispatch(msg),
					Ok(Frame::Invalid(err)) => {
						warn!(target = "agent_relay.client", error = %err, "ignoring malformed relay message");
					}
					Ok(Frame::Close) => break,
					Ok(Frame::Ignored) => {}
					Err(err) => {
						debug!(target = "agent_relay.client", error = %err, "relay socket error");
						break;
					}
				}
			}
			client.handle_close(generation);
		}));
		Ok(())
	}

	/// Closes the socket and cancels any pending reconnect.
	pub fn disconnect(&self) {
		let was_connected = {
			let mut st = self.inner.state.lock();
			st.explicit_disconnect = true;
			st.generation += 1;
			if let Some(pending) = st.reconnect_task.take() {
				pending.abort();
			}
			if let Some(reader) = st.reader_task.take() {
				reader.abort();
			}
			st.available_handlers.clear();
			match st.outbound.take() {
				Some(tx) => {
					let _ = tx.send(Message::Close(None));
					true
				}
				None => false,
			}
		};

		if was_connected {
			info!(target = "agent_relay.client", "disconnected from relay");
			self.inner.connection.emit(&false);
			self.inner.handlers.emit(&Vec::new());
		}
	}

	/// Sends `message` if the socket is open. Returns whether it was queued.
	pub fn send(&self, message: &RelayMessage) -> bool {
		let st = self.inner.state.lock();
		match &st.outbound {
			Some(tx) => tx.send(transport::encode(message)).is_ok(),
			None => false,
		}
	}

	pub fn send_agent_request(&self, agent_id: &str, session_id: &str, context: AgentContext) -> bool {
		self.send(&RelayMessage::AgentRequest {
			agent_id: agent_id.to_string(),
			session_id: session_id.to_string(),
			context,
		})
	}

	pub fn abort_agent(&self, agent_id: &str, session_id: &str) -> bool {
		self.send(&RelayMessage::AgentAbort {
			agent_id: agent_id.to_string(),
			session_id: session_id.to_string(),
		})
	}

	pub fn undo_agent(&self, agent_id: &str, session_id: &str) -> bool {
		self.send(&RelayMessage::AgentUndo {
			agent_id: agent_id.to_string(),
			session_id: session_id.to_string(),
		})
	}

	pub fn redo_agent(&self, agent_id: &str, session_id: &str) -> bool {
		self.send(&RelayMessage::AgentRedo {
			agent_id: agent_id.to_string(),
			session_id: session_id.to_string(),
		})
	}

	pub fn resume_agent(&self, agent_id: &str, session_id: &str) -> bool {
		self.send(&RelayMessage::AgentResume {
			agent_id: agent_id.to_string(),
			session_id: session_id.to_string(),
		})
	}

	/// Agent ids from the last `handlers` broadcast.
	pub fn available_handlers(&self) -> Vec<String> {
		self.inner.state.lock().available_handlers.clone()
	}

	pub fn is_handler_available(&self, agent_id: &str) -> bool {
		self.inner.state.lock().available_handlers.iter().any(|id| id == agent_id)
	}

	/// Registers a callback for every inbound relay message.
	pub fn on_message(&self, callback: impl Fn(&RelayMessage) + Send + Sync + 'static) -> Subscription {
		self.inner.messages.add(callback)
	}

	/// Registers a callback for changes to the available-handler list.
	pub fn on_handlers_change(&self, callback: impl Fn(&Vec<String>) + Send + Sync + 'static) -> Subscription {
		self.inner.handlers.add(callback)
	}

	/// Registers a callback for connection state changes.
	///
	/// The callback is invoked immediately with the current state.
	pub fn on_connection_change(&self, callback: impl Fn(&bool) + Send + Sync + 'static) -> Subscription {
		let callback = Arc::new(callback);
		let registered = Arc::clone(&callback);
		let subscription = self.inner.connection.add(move |connected| registered(connected));
		callback(&self.is_connected());
		subscription
	}

	fn dispatch(&self, message: RelayMessage) {
		if let RelayMessage::Handlers { handlers } = &message {
			self.inner.state.lock().available_handlers = handlers.clone();
			self.inner.handlers.emit(handlers);
		}
		self.inner.messages.emit(&message);
	}

	fn handle_close(&self, generation: u64) {
		let reconnect = {
			let mut st = self.inner.state.lock();
			if st.generation != generation {
				return;
			}
			st.outbound = None;
			st.reader_task = None;
			st.available_handlers.clear();
			!st.explicit_disconnect && self.inner.options.auto_reconnect
		};

		warn!(target = "agent_relay.client", reconnect, "relay connection closed");
		self.inner.connection.emit(&false);
		self.inner.handlers.emit(&Vec::new());

		if reconnect {
			self.schedule_reconnect();
		}
	}

	fn schedule_reconnect(&self) {
		let client = self.clone();
		let interval = self.inner.options.reconnect_interval;
		let task = tokio::spawn(async move {
			tokio::time::sleep(interval).await;
			{
				let mut st = client.inner.state.lock();
				st.reconnect_task = None;
				if st.explicit_disconnect {
					return;
				}
			}
			if let Err(err) = client.open().await {
				debug!(target = "agent_relay.client", error = %err, "reconnect attempt failed");
				if !client.inner.state.lock().explicit_disconnect {
					client.schedule_reconnect();
				}
			}
		});

		let mut st = self.inner.state.lock();
		if let Some(previous) = st.reconnect_task.replace(task) {
			previous.abort();
		}
	}
}
