//! Relay configuration.
//!
//! Values come from command-line flags (which clap already merges with the
//! `AGENT_RELAY_*` environment variables), then the JSON config file, then defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4722;

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileConfig {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub token: Option<String>,
	/// Command handlers `start` registers when no command is given on the command line.
	pub handlers: Vec<HandlerSpec>,
}

/// A local command exposed as an agent handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerSpec {
	pub agent_id: String,
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cwd: Option<PathBuf>,
}

/// Fully resolved relay settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
	pub host: String,
	pub port: u16,
	pub token: Option<String>,
	pub handlers: Vec<HandlerSpec>,
}

/// Settings given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub token: Option<String>,
}

impl RelayConfig {
	/// Resolves settings from `overrides` and the config file at `path`, or the
	/// default location when `path` is `None`. A missing file is not an error.
	pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
		let file = match path {
			Some(path) => load_file(path)?,
			None => match default_path() {
				Some(path) => load_file(&path)?,
				None => FileConfig::default(),
			},
		};
		Ok(Self::resolve(file, overrides))
	}

	pub fn resolve(file: FileConfig, overrides: Overrides) -> Self {
		Self {
			host: overrides.host.or(file.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
			port: overrides.port.or(file.port).unwrap_or(DEFAULT_PORT),
			token: overrides.token.or(file.token).filter(|t| !t.is_empty()),
			handlers: file.handlers,
		}
	}

	pub fn health_url(&self) -> String {
		format!("http://{}:{}/health", self.host, self.port)
	}

	pub fn ws_url(&self) -> String {
		format!("ws://{}:{}/ws", self.host, self.port)
	}
}

/// `$XDG_CONFIG_HOME/agent-relay/config.json`, falling back to the platform config dir.
pub fn default_path() -> Option<PathBuf> {
	std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from).or_else(dirs::config_dir).map(|dir| dir.join("agent-relay").join("config.json"))
}

fn load_file(path: &Path) -> Result<FileConfig> {
	let content = match fs::read_to_string(path) {
		Ok(content) => content,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(FileConfig::default()),
		Err(err) => return Err(err.into()),
	};
	serde_json::from_str(&content).map_err(|e| RelayError::Config {
		path: path.to_path_buf(),
		reason: e.to_string(),
	})
}
