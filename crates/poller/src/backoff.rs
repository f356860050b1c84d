use std::sync::Mutex;

use rustc_hash::FxHashMap;

/// Per-task consecutive-failure accounting and interval escalation.
///
/// The multiplier moves only at failure-threshold boundaries, never per
/// failure, so the effective interval cannot oscillate. Reaching twice the
/// threshold exhausts the task: the registry stops it and surfaces a
/// persistent failure that requires an explicit re-register.
#[derive(Debug, Default)]
pub struct BackoffController {
	windows: Mutex<FxHashMap<String, FailureWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
	failures: u32,
	multiplier: u32,
}

impl Default for FailureWindow {
	fn default() -> Self {
		Self { failures: 0, multiplier: 1 }
	}
}

/// What the registry must do after recording one success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
	/// Nothing changed; the current schedule stands.
	Unchanged,
	/// A success cleared an escalated multiplier; restart at base interval.
	Restored,
	/// The multiplier doubled; restart at the new effective interval.
	Escalated(u32),
	/// Sustained failure; stop the task and surface a persistent error.
	Exhausted,
}

impl BackoffController {
	/// Creates a controller with no tracked tasks.
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one success: failures and multiplier reset atomically.
	pub fn record_success(&self, task_id: &str) -> BackoffDecision {
		let Ok(mut windows) = self.windows.lock() else {
			return BackoffDecision::Unchanged;
		};
		let window = windows.entry(task_id.to_string()).or_default();
		let was_escalated = window.multiplier > 1;
		*window = FailureWindow::default();
		if was_escalated { BackoffDecision::Restored } else { BackoffDecision::Unchanged }
	}

	/// Records one backoff-feeding failure.
	///
	/// At `failure_threshold` consecutive failures the multiplier doubles,
	/// capped at `max_multiplier`; at twice the threshold the decision is
	/// [`BackoffDecision::Exhausted`].
	pub fn record_failure(&self, task_id: &str, failure_threshold: u32, max_multiplier: u32) -> BackoffDecision {
		let Ok(mut windows) = self.windows.lock() else {
			return BackoffDecision::Unchanged;
		};
		let window = windows.entry(task_id.to_string()).or_default();
		window.failures = window.failures.saturating_add(1);

		if failure_threshold == 0 {
			return BackoffDecision::Unchanged;
		}
		if window.failures == failure_threshold.saturating_mul(2) {
			tracing::warn!(task = task_id, failures = window.failures, "poller.backoff.exhausted");
			return BackoffDecision::Exhausted;
		}
		if window.failures % failure_threshold == 0 {
			let escalated = window.multiplier.saturating_mul(2).min(max_multiplier.max(1));
			if escalated != window.multiplier {
				window.multiplier = escalated;
				tracing::warn!(task = task_id, failures = window.failures, multiplier = escalated, "poller.backoff.escalate");
				return BackoffDecision::Escalated(escalated);
			}
		}
		BackoffDecision::Unchanged
	}

	/// Current interval multiplier for one task (1 when untracked).
	pub fn multiplier(&self, task_id: &str) -> u32 {
		let Ok(windows) = self.windows.lock() else {
			return 1;
		};
		windows.get(task_id).map_or(1, |window| window.multiplier)
	}

	/// Current consecutive-failure count for one task.
	pub fn consecutive_failures(&self, task_id: &str) -> u32 {
		let Ok(windows) = self.windows.lock() else {
			return 0;
		};
		windows.get(task_id).map_or(0, |window| window.failures)
	}

	/// Discards all state for one task.
	pub fn clear(&self, task_id: &str) {
		if let Ok(mut windows) = self.windows.lock() {
			windows.remove(task_id);
		}
	}
}
