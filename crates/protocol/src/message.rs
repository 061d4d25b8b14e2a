//! Relay socket envelopes.
//!
//! Every frame on the relay socket is one JSON object tagged by `type`. The same
//! enum is used by all three parties:
//!
//! 1. Browser → relay: [`AgentRequest`](RelayMessage::AgentRequest),
//!    [`AgentAbort`](RelayMessage::AgentAbort), [`AgentUndo`](RelayMessage::AgentUndo),
//!    [`AgentRedo`](RelayMessage::AgentRedo), [`AgentResume`](RelayMessage::AgentResume)
//! 2. Handler ↔ relay: [`RegisterHandler`](RelayMessage::RegisterHandler),
//!    [`UnregisterHandler`](RelayMessage::UnregisterHandler),
//!    [`InvokeHandler`](RelayMessage::InvokeHandler)
//! 3. Handler → relay → browser: [`AgentStatus`](RelayMessage::AgentStatus),
//!    [`AgentDone`](RelayMessage::AgentDone), [`AgentError`](RelayMessage::AgentError),
//!    plus the relay's [`Handlers`](RelayMessage::Handlers) broadcast
//!
//! Every session id that was sent in an `agent-request` receives exactly one terminal
//! message (`agent-done` or `agent-error`).

use serde::{Deserialize, Serialize};

use crate::context::AgentContext;

/// Substring carried by the error content of a user-initiated cancellation.
pub const ABORTED_MARKER: &str = "aborted";

/// Error content sent when a request names an agent id with no registered handler.
pub const HANDLER_NOT_AVAILABLE: &str = "handler not available";

/// Error content synthesized when a handler connection drops mid-stream.
pub const HANDLER_DISCONNECTED: &str = "handler disconnected";

/// Returns true when an error content string denotes a user abort rather than a failure.
///
/// Only the bare marker counts; handler failures that merely mention an abort
/// ("git: rebase aborted") stay errors.
pub fn is_abort_content(content: &str) -> bool {
	content.trim().eq_ignore_ascii_case(ABORTED_MARKER)
}

/// Handler method requested through [`RelayMessage::InvokeHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeMethod {
	Run,
	Abort,
	Undo,
	Redo,
	Resume,
}

/// Relay socket message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RelayMessage {
	/// Start (or follow up on) a session with the handler registered as `agent_id`.
	AgentRequest {
		agent_id: String,
		session_id: String,
		context: AgentContext,
	},
	/// Cancel a running session.
	AgentAbort { agent_id: String, session_id: String },
	/// Ask the handler to revert its last effect.
	AgentUndo { agent_id: String, session_id: String },
	/// Ask the handler to re-apply its last reverted effect.
	AgentRedo { agent_id: String, session_id: String },
	/// Re-attach this connection to a session still running on the handler.
	AgentResume { agent_id: String, session_id: String },
	/// Claim `agent_id` for the sending connection (last writer wins).
	RegisterHandler { agent_id: String },
	/// Release `agent_id` if the sending connection owns it.
	UnregisterHandler { agent_id: String },
	/// Relay → handler call.
	InvokeHandler {
		method: InvokeMethod,
		session_id: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		payload: Option<AgentContext>,
	},
	/// Intermediate progress text.
	AgentStatus {
		session_id: String,
		agent_id: String,
		content: String,
	},
	/// Terminal success, optionally with a completion message.
	AgentDone {
		session_id: String,
		agent_id: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		content: Option<String>,
	},
	/// Terminal failure with a human-readable cause.
	AgentError {
		session_id: String,
		agent_id: String,
		content: String,
	},
	/// Currently registered agent ids, broadcast whenever the registry changes.
	Handlers { handlers: Vec<String> },
}

impl RelayMessage {
	/// Parses one text frame.
	pub fn parse(raw: &str) -> serde_json::Result<Self> {
		serde_json::from_str(raw)
	}

	/// Serializes this message into a text frame.
	pub fn to_text(&self) -> String {
		// All map keys are strings, so serialization cannot fail.
		serde_json::to_string(self).unwrap_or_default()
	}

	pub fn agent_error(session_id: impl Into<String>, agent_id: impl Into<String>, content: impl Into<String>) -> Self {
		RelayMessage::AgentError {
			session_id: session_id.into(),
			agent_id: agent_id.into(),
			content: content.into(),
		}
	}

	/// Session id this message is correlated with, if any.
	pub fn session_id(&self) -> Option<&str> {
		match self {
			RelayMessage::AgentRequest { session_id, .. }
			| RelayMessage::AgentAbort { session_id, .. }
			| RelayMessage::AgentUndo { session_id, .. }
			| RelayMessage::AgentRedo { session_id, .. }
			| RelayMessage::AgentResume { session_id, .. }
			| RelayMessage::InvokeHandler { session_id, .. }
			| RelayMessage::AgentStatus { session_id, .. }
			| RelayMessage::AgentDone { session_id, .. }
			| RelayMessage::AgentError { session_id, .. } => Some(session_id),
			RelayMessage::RegisterHandler { .. } | RelayMessage::UnregisterHandler { .. } | RelayMessage::Handlers { .. } => None,
		}
	}

	/// True for `agent-done` and `agent-error`.
	pub fn is_terminal(&self) -> bool {
		matches!(self, RelayMessage::AgentDone { .. } | RelayMessage::AgentError { .. })
	}
}
