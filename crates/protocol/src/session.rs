//! Session record persisted by the browser-side manager.

use serde::{Deserialize, Serialize};

use crate::context::AgentContext;

/// Point in page coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
	pub x: f64,
	pub y: f64,
}

impl Position {
	pub fn new(x: f64, y: f64) -> Self {
		Self { x, y }
	}
}

/// Axis-aligned rectangle in page coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

impl Rect {
	pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
		Self { x, y, width, height }
	}

	pub fn center(&self) -> Position {
		Position {
			x: self.x + self.width / 2.0,
			y: self.y + self.height / 2.0,
		}
	}
}

/// Derived lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Streaming,
	Completed,
	Errored,
	Fading,
}

/// One selection-and-prompt interaction with an agent handler.
///
/// This is also the persisted form: element references and cancellation handles
/// live beside the record in memory and are never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
	pub id: String,
	pub context: AgentContext,
	pub last_status: String,
	pub is_streaming: bool,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub is_fading: bool,
	/// Unix epoch milliseconds.
	pub created_at: u64,
	/// Unix epoch milliseconds.
	pub last_updated_at: u64,
	pub position: Position,
	#[serde(default)]
	pub selection_bounds: Vec<Rect>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tag_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub component_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Status shown before the handler reports anything.
pub const INITIAL_STATUS: &str = "Thinking…";

impl Session {
	/// A streaming session with no bounds or element metadata yet.
	pub fn new(id: impl Into<String>, context: AgentContext, position: Position, now_ms: u64) -> Self {
		Self {
			id: id.into(),
			context,
			last_status: INITIAL_STATUS.to_string(),
			is_streaming: true,
			is_fading: false,
			created_at: now_ms,
			last_updated_at: now_ms,
			position,
			selection_bounds: Vec::new(),
			tag_name: None,
			component_name: None,
			error: None,
		}
	}

	pub fn state(&self) -> SessionState {
		if self.is_fading {
			SessionState::Fading
		} else if self.is_streaming {
			SessionState::Streaming
		} else if self.error.is_some() {
			SessionState::Errored
		} else {
			SessionState::Completed
		}
	}

	/// Center of the first recorded selection rectangle, falling back to `position`.
	pub fn anchor_point(&self) -> Position {
		self.selection_bounds.first().map(Rect::center).unwrap_or(self.position)
	}
}
