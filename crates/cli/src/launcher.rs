//! Startup: host the relay or join the one already running.
//!
//! Several launchers may start at once. Each probes `/health`; if nothing answers it
//! tries to bind the port and host the relay. Losing the bind race means another
//! launcher just became host, so the loser waits briefly and joins as a handler.

use std::future::Future;
use std::time::Duration;

use agent_relay_runtime::HandlerClient;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::relay;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before joining after losing the bind race.
pub const BIND_RETRY_DELAY: Duration = Duration::from_millis(500);

/// How this process ended up participating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Host,
	Handler,
}

/// True if a relay answers `/health` at the configured address. Any error or
/// timeout counts as not running.
pub async fn is_relay_running(config: &RelayConfig) -> bool {
	let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
		Ok(client) => client,
		Err(err) => {
			debug!(target = "agent_relay", error = %err, "failed to build probe client");
			return false;
		}
	};

	match client.get(config.health_url()).send().await {
		Ok(response) => response.status().is_success(),
		Err(err) => {
			debug!(target = "agent_relay", error = %err, "relay probe failed");
			false
		}
	}
}

/// Hosts or joins the relay, serving `handlers` until `shutdown` resolves or the
/// relay connection ends.
pub async fn launch(config: &RelayConfig, handlers: HandlerClient, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<Role> {
	if is_relay_running(config).await {
		info!(target = "agent_relay", port = config.port, "relay already running; joining as handler");
		join(handlers, shutdown).await?;
		return Ok(Role::Handler);
	}

	let listener = match relay::bind(&config.host, config.port).await {
		Ok(listener) => listener,
		Err(err) if err.is_addr_in_use() => {
			info!(target = "agent_relay", port = config.port, "port taken by a concurrent launcher; joining as handler");
			tokio::time::sleep(BIND_RETRY_DELAY).await;
			join(handlers, shutdown).await?;
			return Ok(Role::Handler);
		}
		Err(err) => return Err(err),
	};

	let ids = handlers.handler_ids();
	if !ids.is_empty() {
		tokio::spawn(async move {
			if let Err(err) = handlers.run().await {
				warn!(target = "agent_relay", error = %err, "local handlers stopped");
			}
		});
	}

	info!(target = "agent_relay", port = config.port, handlers = ?ids, "hosting relay");
	relay::serve(listener, config.token.clone(), shutdown).await?;
	Ok(Role::Host)
}

async fn join(handlers: HandlerClient, shutdown: impl Future<Output = ()>) -> Result<()> {
	tokio::select! {
		result = handlers.run() => {
			result?;
			info!(target = "agent_relay", "relay connection closed");
		}
		_ = shutdown => {}
	}
	Ok(())
}
