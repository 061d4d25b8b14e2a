//! Error types for the session manager.

use thiserror::Error;

/// Result type alias for manager and storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// Backing store read/write failed.
	#[error("Storage error: {0}")]
	Io(#[from] std::io::Error),

	/// Persisted session blob could not be encoded or decoded.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}
