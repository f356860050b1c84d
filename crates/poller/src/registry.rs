use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;
use vigil_reconcile::{Snapshot, diff};

use crate::backoff::{BackoffController, BackoffDecision};
use crate::cancel::{RequestCancellationTracker, RequestToken};
use crate::events::{FailureNotice, Liveness, PollSink};
use crate::fetch::{FetchBatch, FetchError};
use crate::task::{TaskEntry, TaskRecord, TaskSpec, TaskState};

/// Owns the set of named polling tasks and drives their schedules.
///
/// One registry instance serves one user session. Cloning is cheap and
/// shares the underlying task table. All scheduling runs on the ambient
/// tokio runtime; the registry must therefore be used from within one.
#[derive(Clone)]
pub struct PollerRegistry {
	inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
	tasks: RwLock<FxHashMap<String, Arc<TaskEntry>>>,
	active_context: Mutex<Option<String>>,
	backoff: BackoffController,
	cancel: RequestCancellationTracker,
	sink: Arc<dyn PollSink>,
	paused: AtomicBool,
	generations: AtomicU64,
}

impl PollerRegistry {
	/// Creates a registry that reports to `sink`.
	pub fn new(sink: Arc<dyn PollSink>) -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				tasks: RwLock::new(FxHashMap::default()),
				active_context: Mutex::new(None),
				backoff: BackoffController::new(),
				cancel: RequestCancellationTracker::new(),
				sink,
				paused: AtomicBool::new(false),
				generations: AtomicU64::new(0),
			}),
		}
	}

	/// Registers a task under `spec.id`, replacing any existing task with
	/// that id.
	///
	/// Replacement is a full stop: the old schedule is torn down, its
	/// in-flight fetch is orphaned (results discarded on arrival), and its
	/// failure accounting is cleared. The new task starts `Idle`.
	pub fn register(&self, spec: TaskSpec) {
		let generation = self.inner.generations.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let entry = Arc::new(TaskEntry::from_spec(spec, generation));
		let previous = {
			let Ok(mut tasks) = self.inner.tasks.write() else {
				return;
			};
			tasks.insert(entry.id.clone(), Arc::clone(&entry))
		};
		if let Some(old) = previous {
			old.set_state(TaskState::Stopped);
			old.cancel_schedule();
			old.cancel_in_flight();
			tracing::debug!(task = %entry.id, generation, "poller.task.replace");
		} else {
			tracing::debug!(task = %entry.id, kind = %entry.entity_kind, context = %entry.context, generation, "poller.task.register");
		}
		self.inner.backoff.clear(&entry.id);
	}

	/// Starts a task: one immediate fetch, then the recurring schedule.
	///
	/// No-op while the global pause gate is set, if the task is already
	/// running, or if it was stopped (a stopped task needs re-registering).
	pub fn start(&self, id: &str) {
		RegistryInner::start_entry_by_id(&self.inner, id);
	}

	/// Resumes a paused task. Identical to [`Self::start`]: one immediate
	/// fetch, then the recurring schedule; failure state carries over.
	pub fn resume(&self, id: &str) {
		RegistryInner::start_entry_by_id(&self.inner, id);
	}

	/// Halts the recurring schedule, keeping failure counts, multiplier,
	/// and snapshot. An in-flight fetch is left to finish; its result is
	/// discarded by the completion handler once it sees the paused state.
	pub fn pause(&self, id: &str) {
		let Some(entry) = self.inner.task(id) else {
			return;
		};
		if entry.state() != TaskState::Running {
			return;
		}
		entry.set_state(TaskState::Paused);
		entry.cancel_schedule();
		entry.lifecycle_paused.store(false, Ordering::Release);
		tracing::debug!(task = id, "poller.task.pause");
	}

	/// Stops a task and discards all its state, including the snapshot.
	/// The entry stays registered in `Stopped` state until re-registered.
	pub fn stop(&self, id: &str) {
		let Some(entry) = self.inner.task(id) else {
			return;
		};
		self.inner.force_stop(&entry);
		if let Ok(mut liveness) = entry.liveness.lock() {
			*liveness = None;
		}
		tracing::debug!(task = id, "poller.task.stop");
	}

	/// Removes a task entirely, invalidating its in-flight fetch.
	pub fn remove(&self, id: &str) {
		let removed = {
			let Ok(mut tasks) = self.inner.tasks.write() else {
				return;
			};
			tasks.remove(id)
		};
		if let Some(entry) = removed {
			entry.set_state(TaskState::Stopped);
			entry.cancel_schedule();
			entry.cancel_in_flight();
			self.inner.backoff.clear(id);
			tracing::debug!(task = id, "poller.task.remove");
		}
	}

	/// Triggers one immediate out-of-schedule fetch.
	///
	/// Still subject to the single-outstanding guard: if a fetch is already
	/// in flight the trigger is dropped, never queued.
	pub fn refresh_now(&self, id: &str) {
		let Some(entry) = self.inner.task(id) else {
			return;
		};
		if self.globally_paused() || entry.state() != TaskState::Running {
			tracing::trace!(task = id, "poller.refresh.skip");
			return;
		}
		let inner = Arc::clone(&self.inner);
		tokio::spawn(async move {
			RegistryInner::execute_once(&inner, &entry).await;
		});
	}

	/// Makes `context` the active view.
	///
	/// Running tasks of other contexts pause; their in-flight fetches are
	/// invalidated when flagged `cancellable_on_hide`. Tasks of the newly
	/// active context that were paused by a lifecycle transition resume,
	/// with an immediate fetch when their data has gone stale.
	pub fn activate_context(&self, context: &str) {
		if let Ok(mut active) = self.inner.active_context.lock() {
			*active = Some(context.to_string());
		}
		tracing::debug!(context, "poller.context.activate");
		for entry in self.inner.entries() {
			if entry.context == context {
				if entry.lifecycle_paused.load(Ordering::Acquire) && !self.globally_paused() {
					RegistryInner::resume_entry(&self.inner, &entry);
				}
			} else if entry.state() == TaskState::Running {
				self.inner.pause_for_lifecycle(&entry);
			}
		}
	}

	/// Tears down every task owned by `context` and invalidates all of the
	/// context's outstanding requests. Called when a view is destroyed.
	pub fn teardown_context(&self, context: &str) {
		self.inner.cancel.cancel_all(context);
		let ids: Vec<String> = self
			.inner
			.entries()
			.into_iter()
			.filter(|entry| entry.context == context)
			.map(|entry| entry.id.clone())
			.collect();
		for id in &ids {
			self.remove(id);
		}
		self.inner.cancel.drop_context(context);
		tracing::debug!(context, tasks = ids.len(), "poller.context.teardown");
	}

	/// Status snapshots for every registered task, sorted by id.
	pub fn snapshots(&self) -> Vec<TaskRecord> {
		let mut records: Vec<TaskRecord> = self
			.inner
			.entries()
			.into_iter()
			.map(|entry| TaskRecord {
				id: entry.id.clone(),
				entity_kind: entry.entity_kind.clone(),
				context: entry.context.clone(),
				state: entry.state(),
				consecutive_failures: self.inner.backoff.consecutive_failures(&entry.id),
				backoff_multiplier: self.inner.backoff.multiplier(&entry.id),
				liveness: entry.liveness.lock().ok().and_then(|liveness| *liveness),
				last_run_at: entry.last_run_at.lock().ok().and_then(|at| *at),
				last_success_at: entry.last_success_at.lock().ok().and_then(|at| *at),
			})
			.collect();
		records.sort_by(|a, b| a.id.cmp(&b.id));
		records
	}

	/// Returns whether the global pause gate is set.
	pub fn globally_paused(&self) -> bool {
		self.inner.paused.load(Ordering::Acquire)
	}

	/// The shared failure-accounting component.
	pub fn backoff(&self) -> &BackoffController {
		&self.inner.backoff
	}

	/// The shared cancellation tracker.
	pub fn cancellations(&self) -> &RequestCancellationTracker {
		&self.inner.cancel
	}

	/// Pauses every running task and sets the global gate. Flagged
	/// in-flight fetches are invalidated; `offline` additionally marks
	/// every live task's data offline.
	pub(crate) fn suspend_all(&self, offline: bool) {
		self.inner.paused.store(true, Ordering::Release);
		let entries = self.inner.entries();
		tracing::debug!(offline, tasks = entries.len(), "poller.lifecycle.suspend");
		for entry in entries {
			if entry.state() == TaskState::Running {
				entry.set_state(TaskState::Paused);
				entry.cancel_schedule();
				entry.lifecycle_paused.store(true, Ordering::Release);
				if entry.config.cancellable_on_hide {
					entry.cancel_in_flight();
				}
			}
			if offline && entry.state() != TaskState::Stopped {
				self.inner.set_liveness(&entry, Liveness::Offline);
			}
		}
	}

	/// Clears the global gate and resumes every lifecycle-paused task whose
	/// context is still active. Tasks with stale data fetch immediately.
	pub(crate) fn restore_all(&self) {
		self.inner.paused.store(false, Ordering::Release);
		let active = self.inner.active_context.lock().map_or(None, |active| active.clone());
		let entries = self.inner.entries();
		tracing::debug!(tasks = entries.len(), "poller.lifecycle.restore");
		for entry in entries {
			if !entry.lifecycle_paused.load(Ordering::Acquire) {
				continue;
			}
			if let Some(active) = &active
				&& entry.context != *active
			{
				continue;
			}
			RegistryInner::resume_entry(&self.inner, &entry);
		}
	}
}

impl RegistryInner {
	fn task(&self, id: &str) -> Option<Arc<TaskEntry>> {
		self.tasks.read().ok().and_then(|tasks| tasks.get(id).cloned())
	}

	fn entries(&self) -> Vec<Arc<TaskEntry>> {
		self.tasks.read().map_or_else(|_| Vec::new(), |tasks| tasks.values().cloned().collect())
	}

	fn effective_interval(&self, entry: &TaskEntry) -> Duration {
		entry.config.base_interval * self.backoff.multiplier(&entry.id)
	}

	fn start_entry_by_id(inner: &Arc<Self>, id: &str) {
		let Some(entry) = inner.task(id) else {
			return;
		};
		if inner.paused.load(Ordering::Acquire) {
			tracing::debug!(task = id, "poller.task.start_gated");
			return;
		}
		match entry.state() {
			TaskState::Running => {}
			TaskState::Stopped => {
				tracing::warn!(task = id, "poller.task.start_stopped");
			}
			TaskState::Idle | TaskState::Paused => {
				entry.set_state(TaskState::Running);
				entry.lifecycle_paused.store(false, Ordering::Release);
				tracing::debug!(task = id, "poller.task.start");
				Self::spawn_schedule(inner, &entry, true);
			}
		}
	}

	/// Resumes one lifecycle-paused task, fetching immediately when its
	/// data is older than one base interval.
	fn resume_entry(inner: &Arc<Self>, entry: &Arc<TaskEntry>) {
		if entry.state() != TaskState::Paused {
			return;
		}
		entry.set_state(TaskState::Running);
		entry.lifecycle_paused.store(false, Ordering::Release);
		let stale = entry.is_stale(Instant::now());
		if stale {
			inner.set_liveness(entry, Liveness::Stale);
		}
		tracing::debug!(task = %entry.id, stale, "poller.task.resume");
		Self::spawn_schedule(inner, entry, stale);
	}

	fn pause_for_lifecycle(&self, entry: &Arc<TaskEntry>) {
		entry.set_state(TaskState::Paused);
		entry.cancel_schedule();
		entry.lifecycle_paused.store(true, Ordering::Release);
		if entry.config.cancellable_on_hide {
			entry.cancel_in_flight();
		}
		tracing::debug!(task = %entry.id, "poller.task.lifecycle_pause");
	}

	/// Stops a task and discards its accumulated state.
	fn force_stop(&self, entry: &Arc<TaskEntry>) {
		entry.set_state(TaskState::Stopped);
		entry.cancel_schedule();
		if let Ok(mut snapshot) = entry.snapshot.lock() {
			*snapshot = Snapshot::default();
		}
		if let Ok(mut at) = entry.last_run_at.lock() {
			*at = None;
		}
		if let Ok(mut at) = entry.last_success_at.lock() {
			*at = None;
		}
		self.backoff.clear(&entry.id);
	}

	/// Spawns a fresh schedule loop, atomically cancelling the previous
	/// one. With `immediate` the first fetch happens before the first
	/// sleep.
	fn spawn_schedule(inner: &Arc<Self>, entry: &Arc<TaskEntry>, immediate: bool) {
		let schedule = entry.rearm_schedule();
		let inner = Arc::clone(inner);
		let entry = Arc::clone(entry);
		tokio::spawn(async move {
			if immediate {
				Self::execute_once(&inner, &entry).await;
			}
			loop {
				if schedule.is_cancelled() {
					break;
				}
				let interval = inner.effective_interval(&entry);
				tokio::select! {
					biased;
					_ = schedule.cancelled() => break,
					_ = tokio::time::sleep(interval) => {}
				}
				Self::execute_once(&inner, &entry).await;
			}
			tracing::trace!(task = %entry.id, generation = entry.generation, "poller.schedule.exit");
		});
	}

	/// Runs one fetch for `entry`, bounded by the single-outstanding guard
	/// and the task's time ceiling.
	async fn execute_once(inner: &Arc<Self>, entry: &Arc<TaskEntry>) {
		if entry.state() != TaskState::Running {
			return;
		}
		if entry.in_flight.swap(true, Ordering::AcqRel) {
			tracing::trace!(task = %entry.id, "poller.fetch.drop_overlap");
			return;
		}
		let token = inner.cancel.issue(&entry.context);
		if let Ok(mut current) = entry.current_fetch.lock() {
			*current = Some(token.clone());
		}
		if let Ok(mut at) = entry.last_run_at.lock() {
			*at = Some(Instant::now());
		}
		tracing::trace!(task = %entry.id, kind = %entry.entity_kind, "poller.fetch.start");

		// Three-way race: explicit cancellation, the time ceiling, and the
		// fetch itself. A timer win invalidates the token so a settlement
		// that straggles in later cannot be applied.
		let outcome = tokio::select! {
			biased;
			_ = token.invalidated() => Err(FetchError::Cancelled),
			_ = tokio::time::sleep(entry.config.fetch_timeout) => {
				token.invalidate();
				Err(FetchError::Timeout)
			}
			result = entry.fetcher.fetch(&entry.entity_kind, &entry.id) => result,
		};

		if let Ok(mut current) = entry.current_fetch.lock() {
			*current = None;
		}
		Self::apply_completion(inner, entry, &token, outcome);
		entry.in_flight.store(false, Ordering::Release);
	}

	/// Applies one settled fetch, re-validating that the world has not
	/// moved on while the fetch was outstanding.
	fn apply_completion(inner: &Arc<Self>, entry: &Arc<TaskEntry>, token: &RequestToken, outcome: Result<FetchBatch, FetchError>) {
		let still_current = inner.task(&entry.id).is_some_and(|current| Arc::ptr_eq(&current, entry));
		if !still_current {
			tracing::debug!(task = %entry.id, generation = entry.generation, reason = "replaced", "poller.fetch.discard");
			return;
		}
		if matches!(outcome, Err(FetchError::Cancelled)) {
			// Cancellation is not an error: no reconciliation, no failure.
			tracing::debug!(task = %entry.id, reason = "cancelled", "poller.fetch.discard");
			return;
		}
		// A timeout carries its own invalidation and must be accounted;
		// any other outcome under a dead token was cancelled mid-flight.
		if !token.is_valid() && !matches!(outcome, Err(FetchError::Timeout)) {
			tracing::debug!(task = %entry.id, reason = "token_invalidated", "poller.fetch.discard");
			return;
		}
		if entry.state() != TaskState::Running {
			tracing::debug!(task = %entry.id, state = entry.state().as_str(), reason = "not_running", "poller.fetch.discard");
			return;
		}
		match outcome {
			Ok(batch) => Self::apply_success(inner, entry, batch),
			Err(error) if error.is_fatal() => {
				tracing::warn!(task = %entry.id, category = error.category(), "poller.task.fatal");
				inner.force_stop(entry);
				inner.sink.on_failure(&entry.id, &FailureNotice::from_error(&error, true));
				inner.set_liveness(entry, Liveness::Offline);
			}
			Err(error) => Self::apply_retryable_failure(inner, entry, error),
		}
	}

	fn apply_success(inner: &Arc<Self>, entry: &Arc<TaskEntry>, batch: FetchBatch) {
		let fresh: Snapshot = batch.into_iter().collect();
		let delta = {
			let Ok(mut snapshot) = entry.snapshot.lock() else {
				return;
			};
			let delta = diff(&snapshot, &fresh, &entry.policy);
			*snapshot = fresh;
			delta
		};
		if let Ok(mut at) = entry.last_success_at.lock() {
			*at = Some(Instant::now());
		}
		if inner.backoff.record_success(&entry.id) == BackoffDecision::Restored {
			tracing::debug!(task = %entry.id, "poller.backoff.restore");
			Self::spawn_schedule(inner, entry, false);
		}
		tracing::debug!(
			task = %entry.id,
			added = delta.added.len(),
			removed = delta.removed.len(),
			updated = delta.updated.len(),
			"poller.fetch.apply"
		);
		if !delta.is_empty() {
			inner.sink.on_delta(&entry.id, &delta);
		}
		inner.set_liveness(entry, Liveness::Connected);
	}

	fn apply_retryable_failure(inner: &Arc<Self>, entry: &Arc<TaskEntry>, error: FetchError) {
		let config = &entry.config;
		let decision = inner.backoff.record_failure(&entry.id, config.failure_threshold, config.max_backoff_multiplier);
		tracing::debug!(
			task = %entry.id,
			category = error.category(),
			failures = inner.backoff.consecutive_failures(&entry.id),
			"poller.fetch.fail"
		);
		if decision == BackoffDecision::Exhausted {
			inner.force_stop(entry);
			inner.sink.on_failure(&entry.id, &FailureNotice::from_error(&error, true));
			inner.set_liveness(entry, Liveness::Offline);
			return;
		}
		if let BackoffDecision::Escalated(_) = decision {
			Self::spawn_schedule(inner, entry, false);
		}
		inner.sink.on_failure(&entry.id, &FailureNotice::from_error(&error, false));
		let liveness = if matches!(error, FetchError::Network(_)) { Liveness::Offline } else { Liveness::Stale };
		inner.set_liveness(entry, liveness);
	}

	/// Records a liveness transition and notifies the sink on change.
	fn set_liveness(&self, entry: &Arc<TaskEntry>, next: Liveness) {
		{
			let Ok(mut liveness) = entry.liveness.lock() else {
				return;
			};
			if *liveness == Some(next) {
				return;
			}
			*liveness = Some(next);
		}
		// Guard dropped first: the sink may call back into the registry.
		tracing::trace!(task = %entry.id, liveness = next.as_str(), "poller.liveness");
		self.sink.on_liveness(&entry.id, next);
	}
}
