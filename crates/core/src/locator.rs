//! Element lookup and reacquisition.
//!
//! The manager never touches page elements directly. An [`ElementLocator`] answers
//! the few questions it needs, and a [`ReacquireStrategy`] decides how to relink a
//! session whose original elements are gone (after a reload or a DOM replacement).

use agent_relay_protocol::{Position, Rect, Session};

pub trait ElementLocator: Send + Sync + 'static {
	/// Opaque element handle.
	type Element: Clone + Send + Sync + 'static;

	/// Whether the element is still attached to the page.
	fn is_connected(&self, element: &Self::Element) -> bool;

	fn bounds(&self, element: &Self::Element) -> Rect;

	fn tag_name(&self, element: &Self::Element) -> Option<String>;

	fn component_name(&self, element: &Self::Element) -> Option<String>;

	/// Topmost element at a page point.
	fn element_at(&self, point: Position) -> Option<Self::Element>;
}

/// How to find a replacement element for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReacquireStrategy {
	/// Sample the center of the last known bounds and accept the element there only
	/// if its tag name matches the recorded one.
	#[default]
	TagNameAtCenter,
	/// Never relink; sessions whose elements are gone stay detached.
	NeverReacquire,
}

impl ReacquireStrategy {
	pub fn reacquire<L: ElementLocator>(&self, locator: &L, session: &Session) -> Option<L::Element> {
		match self {
			Self::NeverReacquire => None,
			Self::TagNameAtCenter => {
				let expected = session.tag_name.as_deref()?;
				let point = session.selection_bounds.first()?.center();
				let candidate = locator.element_at(point)?;
				let found = locator.tag_name(&candidate)?;
				found.eq_ignore_ascii_case(expected).then_some(candidate)
			}
		}
	}
}

/// True when there is at least one element and all are still attached.
pub(crate) fn reachable<L: ElementLocator>(locator: &L, elements: &[L::Element]) -> bool {
	!elements.is_empty() && elements.iter().all(|el| locator.is_connected(el))
}
