use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use vigil_reconcile::{EntityRecord, ReconcileDelta};

use crate::events::{FailureNotice, Liveness, PollSink};
use crate::fetch::{FetchBatch, FetchError, Fetcher};
use crate::registry::PollerRegistry;

/// One scripted reply from [`ScriptedFetcher`].
#[derive(Debug, Clone)]
pub enum Script {
	Succeed(FetchBatch),
	Fail(FetchError),
	/// Never settles; exercises the timeout and cancellation paths.
	Hang,
	/// Settles successfully after the given delay.
	Slow(Duration, FetchBatch),
}

/// Fetch collaborator that replays a script, then a fallback reply.
///
/// Tracks call and concurrency counts so tests can assert the
/// single-outstanding invariant directly.
pub struct ScriptedFetcher {
	script: Mutex<VecDeque<Script>>,
	fallback: Script,
	calls: AtomicUsize,
	in_flight: AtomicUsize,
	peak_in_flight: AtomicUsize,
}

impl ScriptedFetcher {
	pub fn new(fallback: Script) -> Arc<Self> {
		Arc::new(Self {
			script: Mutex::new(VecDeque::new()),
			fallback,
			calls: AtomicUsize::new(0),
			in_flight: AtomicUsize::new(0),
			peak_in_flight: AtomicUsize::new(0),
		})
	}

	pub fn push(&self, script: Script) {
		self.script.lock().expect("script lock").push_back(script);
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn peak_in_flight(&self) -> usize {
		self.peak_in_flight.load(Ordering::SeqCst)
	}

	pub fn in_flight_now(&self) -> usize {
		self.in_flight.load(Ordering::SeqCst)
	}
}

/// Decrements the in-flight count even when the fetch future is dropped
/// mid-await by a timeout or cancellation arm.
struct FlightGuard<'a> {
	fetcher: &'a ScriptedFetcher,
}

impl Drop for FlightGuard<'_> {
	fn drop(&mut self) {
		self.fetcher.in_flight.fetch_sub(1, Ordering::SeqCst);
	}
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
	async fn fetch(&self, _entity_kind: &str, _task_id: &str) -> Result<FetchBatch, FetchError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
		let _guard = FlightGuard { fetcher: self };

		let reply = self.script.lock().expect("script lock").pop_front().unwrap_or_else(|| self.fallback.clone());
		match reply {
			Script::Succeed(batch) => Ok(batch),
			Script::Fail(error) => Err(error),
			Script::Hang => {
				std::future::pending::<()>().await;
				unreachable!("pending future settled")
			}
			Script::Slow(delay, batch) => {
				tokio::time::sleep(delay).await;
				Ok(batch)
			}
		}
	}
}

/// One call observed by [`RecordingSink`].
#[derive(Debug, Clone)]
pub enum SinkEvent {
	Delta { task: String, delta: ReconcileDelta },
	Liveness { task: String, liveness: Liveness },
	Failure { task: String, notice: FailureNotice },
}

/// UI collaborator that records every call for later assertions.
#[derive(Default)]
pub struct RecordingSink {
	events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn deltas(&self, task: &str) -> Vec<ReconcileDelta> {
		self.events
			.lock()
			.expect("events lock")
			.iter()
			.filter_map(|event| match event {
				SinkEvent::Delta { task: t, delta } if t == task => Some(delta.clone()),
				_ => None,
			})
			.collect()
	}

	pub fn liveness_trail(&self, task: &str) -> Vec<Liveness> {
		self.events
			.lock()
			.expect("events lock")
			.iter()
			.filter_map(|event| match event {
				SinkEvent::Liveness { task: t, liveness } if t == task => Some(*liveness),
				_ => None,
			})
			.collect()
	}

	pub fn failures(&self, task: &str) -> Vec<FailureNotice> {
		self.events
			.lock()
			.expect("events lock")
			.iter()
			.filter_map(|event| match event {
				SinkEvent::Failure { task: t, notice } if t == task => Some(notice.clone()),
				_ => None,
			})
			.collect()
	}
}

impl PollSink for RecordingSink {
	fn on_delta(&self, task_id: &str, delta: &ReconcileDelta) {
		self.events.lock().expect("events lock").push(SinkEvent::Delta {
			task: task_id.to_string(),
			delta: delta.clone(),
		});
	}

	fn on_liveness(&self, task_id: &str, liveness: Liveness) {
		self.events.lock().expect("events lock").push(SinkEvent::Liveness {
			task: task_id.to_string(),
			liveness,
		});
	}

	fn on_failure(&self, task_id: &str, notice: &FailureNotice) {
		self.events.lock().expect("events lock").push(SinkEvent::Failure {
			task: task_id.to_string(),
			notice: notice.clone(),
		});
	}
}

/// Registry plus recording sink, ready for a scenario.
pub struct Rig {
	pub registry: PollerRegistry,
	pub sink: Arc<RecordingSink>,
}

pub fn rig() -> Rig {
	let sink = RecordingSink::new();
	Rig {
		registry: PollerRegistry::new(Arc::clone(&sink) as Arc<dyn PollSink>),
		sink,
	}
}

/// Builds a keyed batch of single-field records.
pub fn batch(entries: &[(&str, f64)]) -> FetchBatch {
	entries
		.iter()
		.map(|(key, cpu)| (key.to_string(), EntityRecord::new().with_field("cpu", *cpu)))
		.collect()
}

/// Lets spawned schedule loops and completion handlers run to quiescence
/// without advancing the clock.
pub async fn settle() {
	for _ in 0..8 {
		tokio::task::yield_now().await;
	}
}
