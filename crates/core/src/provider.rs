//! Agent providers: where session streams come from.
//!
//! [`AgentProvider`] is the manager's only view of an agent. [`RelayAgentProvider`]
//! implements it over a [`RelayClient`]; tests substitute scripted providers.

use agent_relay_protocol::{AgentContext, RelayMessage, is_abort_content};
use agent_relay_runtime::RelayClient;
use futures_util::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Why a session stream ended without completing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
	/// User-initiated cancellation. Never surfaced as a session error.
	#[error("aborted")]
	Aborted,

	/// The agent reported a failure.
	#[error("{0}")]
	Agent(String),

	/// The relay connection went away mid-stream.
	#[error("relay connection lost: {0}")]
	Connection(String),
}

/// Status lines for one run. The stream ending without an error means done.
pub type StatusStream = BoxStream<'static, Result<String, StreamError>>;

pub trait AgentProvider: Send + Sync {
	fn agent_id(&self) -> &str;

	/// Starts a run. The stream must observe `cancel` and end with
	/// [`StreamError::Aborted`] once it fires.
	fn run(&self, context: AgentContext, session_id: &str, cancel: CancellationToken) -> StatusStream;

	/// Re-attaches to a run that outlived this process's previous incarnation.
	fn resume(&self, _session_id: &str, _cancel: CancellationToken) -> Option<StatusStream> {
		None
	}

	fn supports_resume(&self) -> bool {
		false
	}

	fn abort(&self, _session_id: &str) {}

	fn undo(&self, _session_id: &str) {}

	fn redo(&self, _session_id: &str) {}

	/// Status text applied when a run completes, replacing the last streamed line.
	fn completion_message(&self) -> Option<String> {
		None
	}
}

/// [`AgentProvider`] backed by a relay handler.
#[derive(Debug, Clone)]
pub struct RelayAgentProvider {
	client: RelayClient,
	agent_id: String,
	completion_message: Option<String>,
}

enum Start {
	Request(AgentContext),
	Resume,
}

enum Event {
	Message(RelayMessage),
	Lost,
	Cancelled,
}

impl RelayAgentProvider {
	pub fn new(client: RelayClient, agent_id: impl Into<String>) -> Self {
		Self {
			client,
			agent_id: agent_id.into(),
			completion_message: None,
		}
	}

	pub fn with_completion_message(mut self, message: impl Into<String>) -> Self {
		self.completion_message = Some(message.into());
		self
	}

	pub fn client(&self) -> &RelayClient {
		&self.client
	}

	fn stream(&self, session_id: &str, cancel: CancellationToken, start: Start) -> StatusStream {
		let client = self.client.clone();
		let agent_id = self.agent_id.clone();
		let session_id = session_id.to_string();

		Box::pin(async_stream::stream! {
			let (tx, mut messages) = mpsc::unbounded_channel();
			let wanted = session_id.clone();
			let _messages = client.on_message(move |msg| {
				let relevant = matches!(msg, RelayMessage::AgentStatus { .. } | RelayMessage::AgentDone { .. } | RelayMessage::AgentError { .. });
				if relevant && msg.session_id() == Some(wanted.as_str()) {
					let _ = tx.send(msg.clone());
				}
			});

			if let Err(err) = client.connect().await {
				yield Err(StreamError::Connection(err.to_string()));
				return;
			}

			let (lost_tx, mut lost) = mpsc::unbounded_channel();
			let _connection = client.on_connection_change(move |connected| {
				if !*connected {
					let _ = lost_tx.send(());
				}
			});

			let sent = match start {
				Start::Request(context) => client.send_agent_request(&agent_id, &session_id, context),
				Start::Resume => client.resume_agent(&agent_id, &session_id),
			};
			if !sent {
				yield Err(StreamError::Connection("not connected".to_string()));
				return;
			}

			loop {
				let event = tokio::select! {
					biased;
					_ = cancel.cancelled() => Event::Cancelled,
					msg = messages.recv() => msg.map_or(Event::Lost, Event::Message),
					_ = lost.recv() => Event::Lost,
				};

				match event {
					Event::Cancelled => {
						yield Err(StreamError::Aborted);
						break;
					}
					Event::Lost => {
						yield Err(StreamError::Connection("socket closed".to_string()));
						break;
					}
					Event::Message(RelayMessage::AgentStatus { content, .. }) => yield Ok(content),
					Event::Message(RelayMessage::AgentDone { content, .. }) => {
						if let Some(content) = content.filter(|c| !c.is_empty()) {
							yield Ok(content);
						}
						break;
					}
					Event::Message(RelayMessage::AgentError { content, .. }) => {
						if is_abort_content(&content) {
							yield Err(StreamError::Aborted);
						} else {
							yield Err(StreamError::Agent(content));
						}
						break;
					}
					Event::Message(_) => {}
				}
			}
			debug!(target = "agent_relay.manager", session = %session_id, "relay stream finished");
		})
	}
}

impl AgentProvider for RelayAgentProvider {
	fn agent_id(&self) -> &str {
		&self.agent_id
	}

	fn run(&self, context: AgentContext, session_id: &str, cancel: CancellationToken) -> StatusStream {
		self.stream(session_id, cancel, Start::Request(context))
	}

	fn resume(&self, session_id: &str, cancel: CancellationToken) -> Option<StatusStream> {
		Some(self.stream(session_id, cancel, Start::Resume))
	}

	fn supports_resume(&self) -> bool {
		true
	}

	fn abort(&self, session_id: &str) {
		self.client.abort_agent(&self.agent_id, session_id);
	}

	fn undo(&self, session_id: &str) {
		self.client.undo_agent(&self.agent_id, session_id);
	}

	fn redo(&self, session_id: &str) {
		self.client.redo_agent(&self.agent_id, session_id);
	}

	fn completion_message(&self) -> Option<String> {
		self.completion_message.clone()
	}
}
