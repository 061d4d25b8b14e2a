//! Request context and handler stream items.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context captured from the page and handed to an agent handler.
///
/// `content` holds the extracted snippets for each selected element, in selection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub content: Vec<String>,
	pub prompt: String,
	/// Opaque handler options (model, cwd, ...) forwarded untouched.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub options: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl AgentContext {
	pub fn new(prompt: impl Into<String>, content: Vec<String>) -> Self {
		Self {
			content,
			prompt: prompt.into(),
			options: None,
			session_id: None,
		}
	}

	/// Prompt followed by every content block, separated by blank lines.
	pub fn full_prompt(&self) -> String {
		if self.content.is_empty() {
			return self.prompt.clone();
		}
		format!("{}\n\n{}", self.prompt, self.content.join("\n\n"))
	}

	/// Returns the `cwd` entry of [`options`](Self::options), if any.
	pub fn cwd(&self) -> Option<&str> {
		self.options.as_ref()?.get("cwd")?.as_str()
	}
}

/// Kind of a [`HandlerEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerEventKind {
	Status,
	Error,
	Done,
}

/// One item yielded by an agent handler's `run` stream.
///
/// A well-behaved stream yields any number of `status` events followed by exactly
/// one `done` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerEvent {
	#[serde(rename = "type")]
	pub kind: HandlerEventKind,
	#[serde(default)]
	pub content: String,
}

impl HandlerEvent {
	pub fn status(content: impl Into<String>) -> Self {
		Self {
			kind: HandlerEventKind::Status,
			content: content.into(),
		}
	}

	pub fn error(content: impl Into<String>) -> Self {
		Self {
			kind: HandlerEventKind::Error,
			content: content.into(),
		}
	}

	pub fn done(content: impl Into<String>) -> Self {
		Self {
			kind: HandlerEventKind::Done,
			content: content.into(),
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self.kind, HandlerEventKind::Status)
	}
}
