use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
	/// Another process already owns the relay port.
	#[error("address already in use: {0}")]
	AddrInUse(SocketAddr),

	#[error("failed to bind relay server to {addr}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config file {path}: {reason}")]
	Config { path: PathBuf, reason: String },

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Runtime(#[from] agent_relay_runtime::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

impl RelayError {
	pub fn is_addr_in_use(&self) -> bool {
		matches!(self, RelayError::AddrInUse(_))
	}
}
