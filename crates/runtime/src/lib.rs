//! Async runtime for talking to an agent relay.
//!
//! Two sides share one transport:
//!
//! - [`RelayClient`]: the browser-side connection with auto-reconnect, handler
//!   availability tracking, and subscription registries.
//! - [`HandlerClient`]: serves local [`AgentHandler`]s to the relay.

pub mod connection;
pub mod error;
pub mod handler;
pub mod transport;

pub use connection::{DEFAULT_RECONNECT_INTERVAL, RelayClient, RelayClientOptions, Subscription};
pub use error::{Error, Result};
pub use handler::{AgentHandler, HandlerClient, HandlerClientOptions, HandlerStream, RunOptions};
pub use transport::DEFAULT_RELAY_URL;
