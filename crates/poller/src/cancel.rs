use std::sync::Mutex;

use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;

/// Cancellation handle bound 1:1 to one in-flight fetch invocation.
///
/// A token starts valid and can only move to invalidated, either
/// individually or through a bulk [`RequestCancellationTracker::cancel_all`]
/// on its owning context. Cancellation is cooperative: the underlying I/O
/// may keep running, but a completion handler that finds its token
/// invalidated must discard the result without recording a failure.
#[derive(Debug, Clone)]
pub struct RequestToken {
	context: String,
	token: CancellationToken,
}

impl RequestToken {
	/// Returns the owning context id.
	pub fn context(&self) -> &str {
		&self.context
	}

	/// Returns whether results guarded by this token may still be applied.
	pub fn is_valid(&self) -> bool {
		!self.token.is_cancelled()
	}

	/// Invalidates this token only.
	pub fn invalidate(&self) {
		self.token.cancel();
	}

	/// Future resolving when the token is invalidated.
	pub async fn invalidated(&self) {
		self.token.cancelled().await;
	}
}

/// Issues and bulk-invalidates cancellation tokens per logical context.
///
/// Each context owns a parent token; issued tokens are children of it, so
/// cancelling the parent invalidates every outstanding request at once.
/// After a bulk cancel a fresh parent is installed and subsequently issued
/// tokens start valid again.
#[derive(Debug, Default)]
pub struct RequestCancellationTracker {
	contexts: Mutex<FxHashMap<String, CancellationToken>>,
}

impl RequestCancellationTracker {
	/// Creates an empty tracker.
	pub fn new() -> Self {
		Self::default()
	}

	/// Issues a fresh token under `context`.
	pub fn issue(&self, context: &str) -> RequestToken {
		let Ok(mut contexts) = self.contexts.lock() else {
			// Poisoned map: hand out a detached token so callers stay valid.
			return RequestToken {
				context: context.to_string(),
				token: CancellationToken::new(),
			};
		};
		let parent = contexts.entry(context.to_string()).or_insert_with(CancellationToken::new);
		RequestToken {
			context: context.to_string(),
			token: parent.child_token(),
		}
	}

	/// Invalidates every outstanding token under `context`.
	pub fn cancel_all(&self, context: &str) {
		let Ok(mut contexts) = self.contexts.lock() else {
			return;
		};
		if let Some(parent) = contexts.get_mut(context) {
			parent.cancel();
			*parent = CancellationToken::new();
			tracing::debug!(context, "poller.cancel.context");
		}
	}

	/// Drops a context entirely. Outstanding tokens are invalidated.
	pub fn drop_context(&self, context: &str) {
		let Ok(mut contexts) = self.contexts.lock() else {
			return;
		};
		if let Some(parent) = contexts.remove(context) {
			parent.cancel();
		}
	}
}
