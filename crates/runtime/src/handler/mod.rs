//! Handler side of the relay.
//!
//! An [`AgentHandler`] wraps one local coding agent. [`HandlerClient`] connects each
//! handler to the relay on its own socket, registers it under its agent id, and
//! serves `invoke-handler` requests by turning handler streams into
//! `agent-status`/`agent-done`/`agent-error` messages.


use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use agent_relay_protocol::{ABORTED_MARKER, AgentContext, HandlerEvent, HandlerEventKind, InvokeMethod, RelayMessage};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::transport::{self, DEFAULT_RELAY_URL, Frame};

/// Stream of events produced by one handler run.
pub type HandlerStream = BoxStream<'static, HandlerEvent>;

/// Per-run parameters passed to [`AgentHandler::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
	pub session_id: String,
	pub cwd: Option<String>,
	/// Opaque options from the request context.
	pub options: Option<Value>,
}

impl RunOptions {
	pub fn from_context(session_id: &str, context: &AgentContext) -> Self {
		Self {
			session_id: session_id.to_string(),
			cwd: context.cwd().map(str::to_string),
			options: context.options.clone(),
		}
	}
}

/// A local agent that can be driven through the relay.
///
/// Only [`agent_id`](Self::agent_id) and [`run`](Self::run) are required.
#[async_trait]
pub trait AgentHandler: Send + Sync + 'static {
	fn agent_id(&self) -> &str;

	/// Starts a run for `prompt`.
	///
	/// The stream should end with one `done` or `error` event; ending without one
	/// is reported as `done`.
	fn run(&self, prompt: String, options: RunOptions) -> HandlerStream;

	async fn abort(&self, _session_id: &str) {}

	async fn undo(&self, _session_id: &str) -> Result<()> {
		Ok(())
	}

	async fn redo(&self, _session_id: &str) -> Result<()> {
		Ok(())
	}

	/// Re-attaches to a run still in progress. `None` means the session is unknown.
	async fn resume(&self, _session_id: &str) -> Option<HandlerStream> {
		None
	}
}

/// Connection settings for [`HandlerClient`].
#[derive(Debug, Clone)]
pub struct HandlerClientOptions {
	pub url: String,
	pub token: Option<String>,
}

impl Default for HandlerClientOptions {
	fn default() -> Self {
		Self {
			url: DEFAULT_RELAY_URL.to_string(),
			token: None,
		}
	}
}

/// Serves one or more [`AgentHandler`]s to a relay.
pub struct HandlerClient {
	options: HandlerClientOptions,
	handlers: Vec<Arc<dyn AgentHandler>>,
}

impl HandlerClient {
	pub fn new(options: HandlerClientOptions) -> Self {
		Self {
			options,
			handlers: Vec::new(),
		}
	}

	pub fn with_handler(mut self, handler: impl AgentHandler) -> Self {
		self.handlers.push(Arc::new(handler));
		self
	}

	pub fn handler_ids(&self) -> Vec<String> {
		self.handlers.iter().map(|h| h.agent_id().to_string()).collect()
	}

	/// Serves every handler until its relay socket closes.
	///
	/// Fails if any handler cannot connect.
	pub async fn run(self) -> Result<()> {
		let sessions = self.handlers.into_iter().map(|handler| serve(&self.options, handler));
		futures_util::future::try_join_all(sessions).await?;
		Ok(())
	}
}

/// Serves a single handler on its own relay socket until the socket closes.
pub async fn serve(options: &HandlerClientOptions, handler: Arc<dyn AgentHandler>) -> Result<()> {
	let socket = transport::connect(&options.url, options.token.as_deref()).await?;
	let (mut sink, mut stream) = socket.split();
	let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

	let writer = tokio::spawn(async move {
		while let Some(msg) = rx.recv().await {
			if sink.send(msg).await.is_err() {
				break;
			}
		}
		let _ = sink.close().await;
	});

	let agent_id = handler.agent_id().to_string();
	let _ = tx.send(transport::encode(&RelayMessage::RegisterHandler { agent_id: agent_id.clone() }));
	info!(target = "agent_relay.handler", agent = %agent_id, url = %options.url, "registered with relay");

	let server = SessionServer {
		handler,
		agent_id: agent_id.clone(),
		outbound: tx,
		running: Arc::new(Mutex::new(HashMap::new())),
		next_attempt: Arc::new(AtomicU64::new(0)),
	};

	while let Some(frame) = stream.next().await {
		match frame.map(transport::decode) {
			Ok(Frame::Message(RelayMessage::InvokeHandler { method, session_id, payload })) => {
				server.invoke(method, session_id, payload).await;
			}
			Ok(Frame::Message(_)) | Ok(Frame::Ignored) => {}
			Ok(Frame::Invalid(err)) => {
				warn!(target = "agent_relay.handler", error = %err, "ignoring malformed relay message");
			}
			Ok(Frame::Close) => break,
			Err(err) => {
				debug!(target = "agent_relay.handler", error = %err, "relay socket error");
				break;
			}
		}
	}

	server.cancel_all();
	drop(server);
	writer.abort();
	info!(target = "agent_relay.handler", agent = %agent_id, "relay connection closed");
	Ok(())
}

type Running = Arc<Mutex<HashMap<String, (u64, CancellationToken)>>>;

struct SessionServer {
	handler: Arc<dyn AgentHandler>,
	agent_id: String,
	outbound: mpsc::UnboundedSender<Message>,
	running: Running,
	next_attempt: Arc<AtomicU64>,
}

impl SessionServer {
	async fn invoke(&self, method: InvokeMethod, session_id: String, payload: Option<AgentContext>) {
		debug!(target = "agent_relay.handler", agent = %self.agent_id, session = %session_id, ?method, "invoke");
		match method {
			InvokeMethod::Run => {
				let Some(context) = payload else {
					self.send(RelayMessage::agent_error(&session_id, &self.agent_id, "missing request context"));
					return;
				};
				// Claim the session before `run` so output the handler pushes into a
				// superseded stream is already stale.
				let (attempt, token) = self.claim(&session_id);
				let options = RunOptions::from_context(&session_id, &context);
				let stream = self.handler.run(context.full_prompt(), options);
				self.spawn_pump(session_id, attempt, token, stream);
			}
			InvokeMethod::Resume => match self.handler.resume(&session_id).await {
				Some(stream) => {
					let (attempt, token) = self.claim(&session_id);
					self.spawn_pump(session_id, attempt, token, stream);
				}
				None => self.send(RelayMessage::agent_error(&session_id, &self.agent_id, "session not found")),
			},
			InvokeMethod::Abort => {
				if let Some((_, token)) = self.running.lock().remove(&session_id) {
					token.cancel();
				}
				self.handler.abort(&session_id).await;
			}
			InvokeMethod::Undo => {
				if let Err(err) = self.handler.undo(&session_id).await {
					warn!(target = "agent_relay.handler", session = %session_id, error = %err, "undo failed");
				}
			}
			InvokeMethod::Redo => {
				if let Err(err) = self.handler.redo(&session_id).await {
					warn!(target = "agent_relay.handler", session = %session_id, error = %err, "redo failed");
				}
			}
		}
	}

	/// Makes a fresh attempt current for `session_id`, cancelling the one it replaces.
	fn claim(&self, session_id: &str) -> (u64, CancellationToken) {
		let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
		let token = CancellationToken::new();
		if let Some((_, previous)) = self.running.lock().insert(session_id.to_string(), (attempt, token.clone())) {
			previous.cancel();
		}
		(attempt, token)
	}

	fn spawn_pump(&self, session_id: String, attempt: u64, token: CancellationToken, mut stream: HandlerStream) {
		let agent_id = self.agent_id.clone();
		let outbound = self.outbound.clone();
		let running = Arc::clone(&self.running);
		tokio::spawn(async move {
			loop {
				let (message, terminal) = tokio::select! {
					biased;
					_ = token.cancelled() => (RelayMessage::agent_error(&session_id, &agent_id, ABORTED_MARKER), true),
					event = stream.next() => match event {
						Some(HandlerEvent { kind: HandlerEventKind::Status, content }) => (
							RelayMessage::AgentStatus {
								session_id: session_id.clone(),
								agent_id: agent_id.clone(),
								content,
							},
							false,
						),
						Some(HandlerEvent { kind: HandlerEventKind::Error, content }) => (RelayMessage::agent_error(&session_id, &agent_id, content), true),
						Some(HandlerEvent { kind: HandlerEventKind::Done, content }) => (
							RelayMessage::AgentDone {
								session_id: session_id.clone(),
								agent_id: agent_id.clone(),
								content: (!content.is_empty()).then_some(content),
							},
							true,
						),
						None => (
							RelayMessage::AgentDone {
								session_id: session_id.clone(),
								agent_id: agent_id.clone(),
								content: None,
							},
							true,
						),
					},
				};

				// Ownership is checked and the frame queued under one lock so a concurrent
				// claim cannot slip between them.
				let mut sessions = running.lock();
				let owned = match sessions.get(&session_id) {
					Some((id, _)) => *id == attempt,
					// Removed by an explicit abort: this attempt still owes the marker.
					None => token.is_cancelled(),
				};
				if !owned {
					debug!(target = "agent_relay.handler", session = %session_id, attempt, "dropping output from superseded run");
					return;
				}
				let _ = outbound.send(transport::encode(&message));
				if terminal {
					if sessions.get(&session_id).is_some_and(|(id, _)| *id == attempt) {
						sessions.remove(&session_id);
					}
					return;
				}
			}
		});
	}

	fn send(&self, message: RelayMessage) {
		let _ = self.outbound.send(transport::encode(&message));
	}

	fn cancel_all(&self) {
		for (_, (_, token)) in self.running.lock().drain() {
			token.cancel();
		}
	}
}
