use vigil_reconcile::ReconcileDelta;

use crate::fetch::FetchError;

/// Data-freshness indicator surfaced alongside reconciliation batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
	/// The last poll applied successfully.
	Connected,
	/// Polling is degraded or the data is older than one base interval.
	Stale,
	/// The backend is unreachable or the task was force-stopped.
	Offline,
}

impl Liveness {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Connected => "connected",
			Self::Stale => "stale",
			Self::Offline => "offline",
		}
	}
}

/// Categorized failure surfaced to the UI collaborator.
#[derive(Debug, Clone)]
pub struct FailureNotice {
	/// Short category label (`timeout`, `network`, `auth`, …).
	pub category: &'static str,
	/// Human-readable description of the failure.
	pub message: String,
	/// Whether a retry affordance should be offered.
	pub retryable: bool,
	/// Persistent failures require explicit user action (re-register)
	/// before polling resumes; transient ones retry on the schedule.
	pub persistent: bool,
}

impl FailureNotice {
	pub(crate) fn from_error(error: &FetchError, persistent: bool) -> Self {
		Self {
			category: error.category(),
			message: error.to_string(),
			retryable: error.is_retryable(),
			persistent,
		}
	}
}

/// UI collaborator contract.
///
/// The registry calls these from task completion paths; batches for one
/// task id never interleave because at most one fetch per task is ever
/// outstanding. Implementations should hand off to their render loop
/// rather than doing heavy work inline.
pub trait PollSink: Send + Sync {
	/// One ordered reconciliation batch for `task_id`. Never empty.
	fn on_delta(&self, task_id: &str, delta: &ReconcileDelta);

	/// Liveness changed for `task_id`. Called on transitions only.
	fn on_liveness(&self, task_id: &str, liveness: Liveness);

	/// A categorized failure for `task_id`.
	fn on_failure(&self, task_id: &str, notice: &FailureNotice);
}
