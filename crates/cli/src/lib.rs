//! Command-line front end for the agent relay.
//!
//! `agent-relay serve` runs the relay server. `agent-relay start` exposes a local
//! command as an agent handler, hosting the relay first when none is running.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod handler;
pub mod launcher;
pub mod logging;
pub mod relay;
pub mod styles;
