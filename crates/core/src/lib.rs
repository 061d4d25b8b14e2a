//! Browser-side agent session management.
//!
//! [`AgentManager`] drives sessions through start, stream, abort, dismiss, retry,
//! undo/redo and resume-after-reload. Agents are reached through an
//! [`AgentProvider`], normally a [`RelayAgentProvider`] on top of a relay client.
//!
//! # Example
//!
//! ```ignore
//! let client = RelayClient::new(RelayClientOptions::default());
//! let provider = Arc::new(RelayAgentProvider::new(client, "claude"));
//! let manager = AgentManager::builder(provider, Arc::new(page))
//!     .storage(Arc::new(FileStorage::new(FileStorage::default_dir())))
//!     .build();
//!
//! manager.try_resume();
//! let id = manager.start(StartRequest::new("make the button blue"));
//! ```

pub mod callbacks;
pub mod error;
pub mod locator;
pub mod manager;
pub mod provider;
pub mod storage;
pub mod store;

pub use agent_relay_protocol::{AgentContext, Position, Rect, Session, SessionState};
pub use agent_relay_runtime::{RelayClient, RelayClientOptions};
pub use callbacks::{ManagerCallbacks, SessionCallback};
pub use error::{Error, Result};
pub use locator::{ElementLocator, ReacquireStrategy};
pub use manager::{AgentManager, AgentManagerBuilder, AgentManagerOptions, ContentTransform, StartRequest};
pub use provider::{AgentProvider, RelayAgentProvider, StatusStream, StreamError};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage};
pub use store::SessionStore;
