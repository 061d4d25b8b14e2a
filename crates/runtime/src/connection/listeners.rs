//! Callback registries with RAII unsubscription.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Entries<T> = Mutex<Vec<(u64, Callback<T>)>>;

/// Handle returned by every `on_*` registration.
///
/// The callback stays registered while this handle is alive. Dropping it or calling
/// [`unsubscribe`](Self::unsubscribe) removes the callback; [`detach`](Self::detach)
/// keeps it registered for the lifetime of the registry.
pub struct Subscription {
	cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
	fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
		Self {
			cancel: Some(Box::new(cancel)),
		}
	}

	/// Removes the callback, equivalent to dropping the handle.
	pub fn unsubscribe(mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel();
		}
	}

	/// Keeps the callback registered without holding the handle.
	pub fn detach(mut self) {
		self.cancel = None;
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			cancel();
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
	}
}

/// Ordered set of callbacks for one event kind.
pub(crate) struct Listeners<T: 'static> {
	next_id: AtomicU64,
	entries: Arc<Entries<T>>,
}

impl<T: 'static> Listeners<T> {
	pub(crate) fn new() -> Self {
		Self {
			next_id: AtomicU64::new(0),
			entries: Arc::new(Mutex::new(Vec::new())),
		}
	}

	pub(crate) fn add(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.entries.lock().push((id, Arc::new(callback)));

		let entries: Weak<Entries<T>> = Arc::downgrade(&self.entries);
		Subscription::new(move || {
			if let Some(entries) = entries.upgrade() {
				entries.lock().retain(|(entry_id, _)| *entry_id != id);
			}
		})
	}

	/// Invokes every callback in registration order.
	///
	/// Callbacks run on a snapshot taken outside the lock, so they may register or
	/// unsubscribe without deadlocking.
	pub(crate) fn emit(&self, value: &T) {
		let snapshot: Vec<Callback<T>> = self.entries.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
		for callback in snapshot {
			callback(value);
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.entries.lock().len()
	}
}
