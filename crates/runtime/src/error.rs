//! Error types for the relay runtime.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to the relay.
#[derive(Debug, Error)]
pub enum Error {
	/// Relay endpoint URL could not be parsed.
	#[error("Invalid relay URL '{url}': {reason}")]
	InvalidUrl { url: String, reason: String },

	/// Failed to establish the WebSocket connection.
	#[error("Failed to connect to relay at {url}: {reason}")]
	ConnectionFailed { url: String, reason: String },

	/// Connection closed while an operation was pending.
	#[error("Relay connection closed")]
	ConnectionClosed,

	/// WebSocket-level error.
	#[error("Transport error: {0}")]
	Transport(String),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		use tokio_tungstenite::tungstenite::Error as WsError;
		match err {
			WsError::ConnectionClosed | WsError::AlreadyClosed => Error::ConnectionClosed,
			WsError::Io(io) => Error::Io(io),
			other => Error::Transport(other.to_string()),
		}
	}
}

impl Error {
	/// Returns true if this error means the relay is unreachable or went away.
	pub fn is_connection_error(&self) -> bool {
		matches!(self, Error::ConnectionFailed { .. } | Error::ConnectionClosed | Error::Io(_))
	}
}
