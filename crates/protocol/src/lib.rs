//! Wire types for the agent relay.
//!
//! This crate contains the serde-serializable types shared by the relay server,
//! browser-side clients and agent handlers. The types represent the shapes of data
//! as they appear on the wire and in persisted session storage.
//!
//! # Main Types
//!
//! - [`RelayMessage`] - Every JSON envelope exchanged over the relay socket
//! - [`AgentContext`] - Prompt plus captured selection content sent with a request
//! - [`HandlerEvent`] - One item of an agent handler's output stream
//! - [`Session`] - Session record owned by the browser-side manager

pub mod context;
pub mod message;
pub mod session;

pub use context::*;
pub use message::*;
pub use session::*;
