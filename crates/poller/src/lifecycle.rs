use std::sync::atomic::{AtomicBool, Ordering};

use crate::registry::PollerRegistry;

/// Host lifecycle transitions fed into [`VisibilityLifecycleManager`].
///
/// The host shell (web page, desktop window, mobile app) owns the actual
/// event sources; the manager only interprets their transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
	/// The page or window became hidden.
	PageHidden,
	/// The page or window became visible again.
	PageVisible,
	/// The application moved to the background.
	AppBackground,
	/// The application returned to the foreground.
	AppForeground,
	/// Network connectivity was lost.
	NetworkOffline,
	/// Network connectivity returned.
	NetworkOnline,
	/// A different view became active.
	ViewChanged(String),
}

/// Translates lifecycle signals into bulk pause/resume on the registry.
///
/// Hidden, backgrounded, and offline are independent conditions; polling
/// is suspended while any of them holds and restored only once all three
/// have cleared. The global pause gate set during suspension takes
/// precedence over individual `resume` calls on the registry.
pub struct VisibilityLifecycleManager {
	registry: PollerRegistry,
	hidden: AtomicBool,
	background: AtomicBool,
	offline: AtomicBool,
}

impl VisibilityLifecycleManager {
	/// Creates a manager driving `registry`.
	pub fn new(registry: PollerRegistry) -> Self {
		Self {
			registry,
			hidden: AtomicBool::new(false),
			background: AtomicBool::new(false),
			offline: AtomicBool::new(false),
		}
	}

	/// Applies one lifecycle transition.
	pub fn handle(&self, signal: LifecycleSignal) {
		tracing::debug!(signal = ?signal, "poller.lifecycle.signal");
		match signal {
			LifecycleSignal::PageHidden => {
				self.hidden.store(true, Ordering::Release);
				self.suspend(false);
			}
			LifecycleSignal::AppBackground => {
				self.background.store(true, Ordering::Release);
				self.suspend(false);
			}
			LifecycleSignal::NetworkOffline => {
				self.offline.store(true, Ordering::Release);
				self.suspend(true);
			}
			LifecycleSignal::PageVisible => {
				self.hidden.store(false, Ordering::Release);
				self.restore_if_clear();
			}
			LifecycleSignal::AppForeground => {
				self.background.store(false, Ordering::Release);
				self.restore_if_clear();
			}
			LifecycleSignal::NetworkOnline => {
				self.offline.store(false, Ordering::Release);
				self.restore_if_clear();
			}
			LifecycleSignal::ViewChanged(context) => {
				self.registry.activate_context(&context);
			}
		}
	}

	/// Returns whether any suspending condition currently holds.
	pub fn is_suspended(&self) -> bool {
		self.hidden.load(Ordering::Acquire) || self.background.load(Ordering::Acquire) || self.offline.load(Ordering::Acquire)
	}

	fn suspend(&self, offline: bool) {
		self.registry.suspend_all(offline);
	}

	/// Resumes polling only once hidden, background, and offline have all
	/// cleared; a page becoming visible while the network is still down
	/// must not restart fetching.
	fn restore_if_clear(&self) {
		if self.is_suspended() {
			return;
		}
		self.registry.restore_all();
	}
}
