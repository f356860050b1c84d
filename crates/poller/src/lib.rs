//! Adaptive polling engine for live infrastructure dashboards.
//!
//! One [`PollerRegistry`] owns a set of named polling tasks, each bound to
//! one entity kind and one fetch collaborator. Tasks fetch whole keyed
//! collections on independent cadences; results are diffed against the
//! previous snapshot (see `vigil-reconcile`) and emitted to the UI
//! collaborator as minimal ordered deltas. Sustained failures escalate the
//! polling interval through [`BackoffController`] instead of hammering the
//! backend; [`VisibilityLifecycleManager`] suspends all work in bulk while
//! the view is hidden or the network is down; and
//! [`RequestCancellationTracker`] guarantees that results of abandoned
//! fetches are never applied.
//!
//! Scheduling runs on the ambient tokio runtime and is correct on a
//! single-threaded one: per-task state is only ever mutated by that task's
//! own completion path, re-validated after every await.

mod backoff;
mod cancel;
mod events;
mod fetch;
mod lifecycle;
mod registry;
mod task;


pub use backoff::{BackoffController, BackoffDecision};
pub use cancel::{RequestCancellationTracker, RequestToken};
pub use events::{FailureNotice, Liveness, PollSink};
pub use fetch::{FetchBatch, FetchError, Fetcher};
pub use lifecycle::{LifecycleSignal, VisibilityLifecycleManager};
pub use registry::PollerRegistry;
pub use task::{PollConfig, TaskRecord, TaskSpec, TaskState};
