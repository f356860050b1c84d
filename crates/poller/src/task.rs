use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vigil_reconcile::{SignificancePolicy, Snapshot};

use crate::cancel::RequestToken;
use crate::events::Liveness;
use crate::fetch::Fetcher;

/// Lifecycle state of one polling task.
///
/// `Stopped` is terminal until an explicit re-register recreates the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	/// Registered but never started.
	Idle,
	/// Scheduled and fetching.
	Running,
	/// Schedule halted; failure counts, multiplier, and snapshot retained.
	Paused,
	/// Schedule halted and all task state discarded.
	Stopped,
}

impl TaskState {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Running => "running",
			Self::Paused => "paused",
			Self::Stopped => "stopped",
		}
	}
}

/// Per-task polling configuration, supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
	/// Interval between scheduled fetches before backoff escalation.
	pub base_interval: Duration,
	/// Consecutive failures at which the interval multiplier doubles.
	pub failure_threshold: u32,
	/// Ceiling for the interval multiplier.
	pub max_backoff_multiplier: u32,
	/// Time ceiling for one fetch; exceeding it counts as a failure.
	pub fetch_timeout: Duration,
	/// Whether an in-flight fetch is cancelled when the view hides or the
	/// owning context deactivates.
	pub cancellable_on_hide: bool,
}

impl Default for PollConfig {
	fn default() -> Self {
		Self {
			base_interval: Duration::from_secs(5),
			failure_threshold: 3,
			max_backoff_multiplier: 8,
			fetch_timeout: Duration::from_secs(30),
			cancellable_on_hide: false,
		}
	}
}

/// Registration spec for one polling task.
pub struct TaskSpec {
	pub(crate) id: String,
	pub(crate) entity_kind: String,
	pub(crate) context: String,
	pub(crate) config: PollConfig,
	pub(crate) policy: SignificancePolicy,
	pub(crate) fetcher: Arc<dyn Fetcher>,
}

impl TaskSpec {
	/// Creates a spec with the default config, policy, and context.
	pub fn new(id: impl Into<String>, entity_kind: impl Into<String>, fetcher: Arc<dyn Fetcher>) -> Self {
		Self {
			id: id.into(),
			entity_kind: entity_kind.into(),
			context: "main".to_string(),
			config: PollConfig::default(),
			policy: SignificancePolicy::default(),
			fetcher,
		}
	}

	/// Sets the owning refresh context (the active view's id).
	#[must_use]
	pub fn context(mut self, context: impl Into<String>) -> Self {
		self.context = context.into();
		self
	}

	/// Sets the polling configuration.
	#[must_use]
	pub fn config(mut self, config: PollConfig) -> Self {
		self.config = config;
		self
	}

	/// Sets the significance policy for this task's entity kind.
	#[must_use]
	pub fn policy(mut self, policy: SignificancePolicy) -> Self {
		self.policy = policy;
		self
	}
}

/// Status snapshot for one registered task.
#[derive(Debug, Clone)]
pub struct TaskRecord {
	pub id: String,
	pub entity_kind: String,
	pub context: String,
	pub state: TaskState,
	pub consecutive_failures: u32,
	pub backoff_multiplier: u32,
	pub liveness: Option<Liveness>,
	pub last_run_at: Option<Instant>,
	pub last_success_at: Option<Instant>,
}

/// Registry-owned state for one task.
///
/// Re-registering an id creates a fresh entry under a new generation; loops
/// and completion handlers holding the old `Arc` detect the replacement and
/// discard their results.
pub(crate) struct TaskEntry {
	pub(crate) id: String,
	pub(crate) entity_kind: String,
	pub(crate) context: String,
	pub(crate) generation: u64,
	pub(crate) config: PollConfig,
	pub(crate) policy: SignificancePolicy,
	pub(crate) fetcher: Arc<dyn Fetcher>,
	pub(crate) state: Mutex<TaskState>,
	pub(crate) in_flight: AtomicBool,
	pub(crate) lifecycle_paused: AtomicBool,
	pub(crate) snapshot: Mutex<Snapshot>,
	pub(crate) last_run_at: Mutex<Option<Instant>>,
	pub(crate) last_success_at: Mutex<Option<Instant>>,
	pub(crate) liveness: Mutex<Option<Liveness>>,
	pub(crate) schedule: Mutex<CancellationToken>,
	pub(crate) current_fetch: Mutex<Option<RequestToken>>,
}

impl TaskEntry {
	pub(crate) fn from_spec(spec: TaskSpec, generation: u64) -> Self {
		Self {
			id: spec.id,
			entity_kind: spec.entity_kind,
			context: spec.context,
			generation,
			config: spec.config,
			policy: spec.policy,
			fetcher: spec.fetcher,
			state: Mutex::new(TaskState::Idle),
			in_flight: AtomicBool::new(false),
			lifecycle_paused: AtomicBool::new(false),
			snapshot: Mutex::new(Snapshot::default()),
			last_run_at: Mutex::new(None),
			last_success_at: Mutex::new(None),
			liveness: Mutex::new(None),
			schedule: Mutex::new(CancellationToken::new()),
			current_fetch: Mutex::new(None),
		}
	}

	pub(crate) fn state(&self) -> TaskState {
		self.state.lock().map_or(TaskState::Stopped, |state| *state)
	}

	pub(crate) fn set_state(&self, next: TaskState) {
		if let Ok(mut state) = self.state.lock() {
			*state = next;
		}
	}

	/// Cancels the current schedule loop, if any.
	pub(crate) fn cancel_schedule(&self) {
		if let Ok(schedule) = self.schedule.lock() {
			schedule.cancel();
		}
	}

	/// Installs a fresh schedule token and returns a clone for the loop.
	pub(crate) fn rearm_schedule(&self) -> CancellationToken {
		let fresh = CancellationToken::new();
		if let Ok(mut schedule) = self.schedule.lock() {
			schedule.cancel();
			*schedule = fresh.clone();
		}
		fresh
	}

	/// Invalidates the in-flight fetch token, if any.
	pub(crate) fn cancel_in_flight(&self) {
		if let Ok(current) = self.current_fetch.lock()
			&& let Some(token) = current.as_ref()
		{
			token.invalidate();
		}
	}

	/// Age of the applied data, or `None` if nothing ever applied.
	pub(crate) fn data_age(&self, now: Instant) -> Option<Duration> {
		self.last_success_at.lock().ok().and_then(|at| at.map(|at| now.saturating_duration_since(at)))
	}

	/// Whether the applied data is older than one base interval.
	pub(crate) fn is_stale(&self, now: Instant) -> bool {
		self.data_age(now).is_none_or(|age| age > self.config.base_interval)
	}
}
