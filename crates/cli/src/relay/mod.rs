//! Relay server.
//!
//! Serves `GET /health` for launcher probes and `GET /ws` for browser and handler
//! sockets. Classification and routing live in [`state::RelayState`].

mod state;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use agent_relay_protocol::RelayMessage;
use anyhow::Context;
use axum::Router;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use self::state::{ConnId, RelayState};
use crate::error::{RelayError, Result};

type SharedState = Arc<Mutex<RelayState>>;

#[derive(Clone)]
struct AppState {
	relay: SharedState,
	token: Option<Arc<str>>,
}

/// Binds the relay port, reporting an occupied port as [`RelayError::AddrInUse`].
pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
	let addr: SocketAddr = format!("{host}:{port}").parse().with_context(|| format!("Invalid host/port combination: {host}:{port}"))?;

	TcpListener::bind(addr).await.map_err(|source| {
		if source.kind() == std::io::ErrorKind::AddrInUse {
			RelayError::AddrInUse(addr)
		} else {
			RelayError::Bind { addr, source }
		}
	})
}

pub fn router(token: Option<String>) -> Router {
	let state = AppState {
		relay: Arc::new(Mutex::new(RelayState::new())),
		token: token.map(Arc::from),
	};

	Router::new()
		.route("/", get(|| async { "OK" }))
		.route("/health", get(|| async { "OK" }))
		.route("/ws", get(ws_upgrade))
		.with_state(state)
}

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn serve(listener: TcpListener, token: Option<String>, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
	let addr = listener.local_addr()?;
	info!(target = "agent_relay", %addr, auth = token.is_some(), "starting relay server");

	axum::serve(listener, router(token).into_make_service())
		.with_graceful_shutdown(shutdown)
		.await
		.context("Relay server error")?;

	info!(target = "agent_relay", "relay server stopped");
	Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{SignalKind, signal};

		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => info!(target = "agent_relay", "received Ctrl+C, shutting down"),
					_ = sigterm.recv() => info!(target = "agent_relay", "received SIGTERM, shutting down"),
				}
				return;
			}
			Err(err) => warn!(target = "agent_relay", error = %err, "failed to install SIGTERM handler"),
		}
	}

	if tokio::signal::ctrl_c().await.is_ok() {
		info!(target = "agent_relay", "received Ctrl+C, shutting down");
	}
}

async fn ws_upgrade(
	State(app): State<AppState>,
	Query(params): Query<HashMap<String, String>>,
	headers: HeaderMap,
	ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
	if !authorized(app.token.as_deref(), &params, &headers) {
		warn!(target = "agent_relay", "rejecting connection with missing or invalid token");
		return StatusCode::UNAUTHORIZED.into_response();
	}

	match ws {
		Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, app.relay)),
		Err(rejection) => rejection.into_response(),
	}
}

fn authorized(expected: Option<&str>, params: &HashMap<String, String>, headers: &HeaderMap) -> bool {
	let Some(expected) = expected else {
		return true;
	};

	let bearer = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer "));

	params.get("token").map(String::as_str) == Some(expected) || bearer == Some(expected)
}

async fn handle_socket(socket: WebSocket, relay: SharedState) {
	let (tx, rx) = mpsc::unbounded_channel();
	let conn = relay.lock().await.connect(tx);
	info!(target = "agent_relay", conn, "connection opened");

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = rx_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(text)) => handle_text(&relay, conn, text.as_str()).await,
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "agent_relay", conn, error = %err, "websocket error");
				break;
			}
		}
	}

	relay.lock().await.disconnect(conn);
	send_task.abort();
	info!(target = "agent_relay", conn, "connection closed");
}

async fn handle_text(relay: &SharedState, conn: ConnId, raw: &str) {
	match RelayMessage::parse(raw) {
		Ok(message) => {
			debug!(target = "agent_relay", conn, ?message, "inbound");
			relay.lock().await.handle(conn, message);
		}
		Err(err) => warn!(target = "agent_relay", conn, error = %err, "ignoring unparseable message"),
	}
}
