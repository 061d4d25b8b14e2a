//! Lifecycle hooks consumed by the presentation layer.

use std::sync::Arc;

use agent_relay_protocol::Session;

pub type SessionCallback = Arc<dyn Fn(&Session) + Send + Sync>;

/// Optional lifecycle hooks. Unset hooks are skipped.
///
/// Hooks run outside the manager's lock and receive a snapshot of the session as
/// it was right after the transition.
#[derive(Clone, Default)]
pub struct ManagerCallbacks {
	pub on_start: Option<SessionCallback>,
	pub on_status: Option<SessionCallback>,
	pub on_complete: Option<SessionCallback>,
	pub on_error: Option<SessionCallback>,
	pub on_resume: Option<SessionCallback>,
	pub on_abort: Option<SessionCallback>,
	pub on_undo: Option<SessionCallback>,
	/// Fired when a session starts fading out.
	pub on_dismiss: Option<SessionCallback>,
}

impl std::fmt::Debug for ManagerCallbacks {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ManagerCallbacks")
			.field("on_start", &self.on_start.is_some())
			.field("on_status", &self.on_status.is_some())
			.field("on_complete", &self.on_complete.is_some())
			.field("on_error", &self.on_error.is_some())
			.field("on_resume", &self.on_resume.is_some())
			.field("on_abort", &self.on_abort.is_some())
			.field("on_undo", &self.on_undo.is_some())
			.field("on_dismiss", &self.on_dismiss.is_some())
			.finish()
	}
}

pub(crate) fn fire(callback: &Option<SessionCallback>, session: &Session) {
	if let Some(callback) = callback {
		callback(session);
	}
}
