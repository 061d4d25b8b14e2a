//! WebSocket transport to the relay.
//!
//! Builds the relay endpoint URL (appending the shared token as a query parameter)
//! and opens the socket. Frames are JSON [`RelayMessage`] text messages; binary and
//! ping/pong frames carry no protocol meaning.


use agent_relay_protocol::RelayMessage;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

/// Default relay WebSocket endpoint.
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:4722/ws";

/// Query parameter carrying the shared token.
pub const TOKEN_PARAM: &str = "token";

/// Client side of a relay socket.
pub type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Returns the endpoint URL with `token` attached, replacing any token already present.
pub fn endpoint_url(base: &str, token: Option<&str>) -> Result<Url> {
	let mut url = Url::parse(base).map_err(|e| Error::InvalidUrl {
		url: base.to_string(),
		reason: e.to_string(),
	})?;

	if !matches!(url.scheme(), "ws" | "wss") {
		return Err(Error::InvalidUrl {
			url: base.to_string(),
			reason: format!("unsupported scheme '{}'", url.scheme()),
		});
	}

	if let Some(token) = token {
		let retained: Vec<(String, String)> = url.query_pairs().filter(|(k, _)| k != TOKEN_PARAM).map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
		let mut pairs = url.query_pairs_mut();
		pairs.clear();
		for (k, v) in &retained {
			pairs.append_pair(k, v);
		}
		pairs.append_pair(TOKEN_PARAM, token);
	}

	Ok(url)
}

/// Opens a WebSocket connection to the relay.
pub async fn connect(base: &str, token: Option<&str>) -> Result<RelaySocket> {
	let url = endpoint_url(base, token)?;
	debug!(target = "agent_relay.client", url = %base, "connecting to relay");
	let (socket, _response) = tokio_tungstenite::connect_async(url.as_str()).await.map_err(|e| Error::ConnectionFailed {
		url: base.to_string(),
		reason: e.to_string(),
	})?;
	Ok(socket)
}

/// Encodes a relay message as a text frame.
pub fn encode(message: &RelayMessage) -> Message {
	Message::Text(message.to_text())
}

/// Decoded meaning of an inbound frame.
#[derive(Debug)]
pub enum Frame {
	Message(RelayMessage),
	/// Text frame that is not a known relay message.
	Invalid(String),
	Close,
	/// Ping/pong/binary frames.
	Ignored,
}

pub fn decode(message: Message) -> Frame {
	match message {
		Message::Text(text) => match RelayMessage::parse(&text) {
			Ok(msg) => Frame::Message(msg),
			Err(err) => Frame::Invalid(err.to_string()),
		},
		Message::Close(_) => Frame::Close,
		_ => Frame::Ignored,
	}
}
