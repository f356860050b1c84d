use std::time::Duration;

use tokio::time::sleep;

use super::helpers::{Rig, Script, ScriptedFetcher, batch, rig, settle};
use crate::events::Liveness;
use crate::fetch::FetchError;
use crate::task::{PollConfig, TaskSpec, TaskState};

fn scenario_config() -> PollConfig {
	PollConfig {
		base_interval: Duration::from_secs(5),
		failure_threshold: 3,
		max_backoff_multiplier: 8,
		fetch_timeout: Duration::from_secs(30),
		cancellable_on_hide: false,
	}
}

/// Three consecutive timeouts double the interval; three more stop the
/// task with a persistent, user-actionable failure.
#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn timeouts_escalate_then_stop() {
	let fetcher = ScriptedFetcher::new(Script::Hang);
	let Rig { registry, sink } = rig();
	registry.register(TaskSpec::new("nodes", "node", fetcher.clone()).config(scenario_config()));
	registry.start("nodes");

	// Fetches time out at t=30, 65, 100; the third failure doubles the
	// multiplier, so the fourth fetch starts at t=110, not t=105.
	sleep(Duration::from_secs(107)).await;
	settle().await;
	let records = registry.snapshots();
	let record = &records[0];
	assert_eq!(record.state, TaskState::Running);
	assert_eq!(record.consecutive_failures, 3);
	assert_eq!(record.backoff_multiplier, 2);
	assert_eq!(fetcher.calls(), 3);

	// Failures 4..6 land at t=140, 180, 220; the sixth exhausts the task.
	sleep(Duration::from_secs(118)).await;
	settle().await;
	let records = registry.snapshots();
	let record = &records[0];
	assert_eq!(record.state, TaskState::Stopped);
	assert_eq!(fetcher.calls(), 6);

	let failures = sink.failures("nodes");
	assert_eq!(failures.len(), 6);
	let last = failures.last().expect("exhaustion notice");
	assert!(last.persistent);
	assert!(last.retryable);
	assert_eq!(last.category, "timeout");
	assert_eq!(sink.liveness_trail("nodes").last(), Some(&Liveness::Offline));

	// Stopped is terminal: no further fetches without a re-register.
	sleep(Duration::from_secs(120)).await;
	settle().await;
	assert_eq!(fetcher.calls(), 6);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn success_resets_backoff_and_restores_base_interval() {
	let fetcher = ScriptedFetcher::new(Script::Succeed(batch(&[("node-1", 10.0)])));
	for _ in 0..3 {
		fetcher.push(Script::Fail(FetchError::Server("502".to_string())));
	}
	let Rig { registry, sink } = rig();
	registry.register(TaskSpec::new("nodes", "node", fetcher.clone()).config(scenario_config()));
	registry.start("nodes");

	// Failures at t=0, 5, 10; the third escalates to a 10s cadence.
	sleep(Duration::from_secs(11)).await;
	settle().await;
	let records = registry.snapshots();
	let record = &records[0];
	assert_eq!(record.consecutive_failures, 3);
	assert_eq!(record.backoff_multiplier, 2);
	assert_eq!(fetcher.calls(), 3);
	assert_eq!(sink.liveness_trail("nodes"), vec![Liveness::Stale]);

	// No fetch at t=15: the escalated schedule fires at t=20.
	sleep(Duration::from_secs(5)).await;
	settle().await;
	assert_eq!(fetcher.calls(), 3);

	sleep(Duration::from_secs(5)).await;
	settle().await;
	let records = registry.snapshots();
	let record = &records[0];
	assert_eq!(fetcher.calls(), 4);
	assert_eq!(record.consecutive_failures, 0);
	assert_eq!(record.backoff_multiplier, 1);
	assert_eq!(sink.liveness_trail("nodes"), vec![Liveness::Stale, Liveness::Connected]);

	// The schedule is back at the 5s base: next fetch at t=25.
	sleep(Duration::from_secs(5)).await;
	settle().await;
	assert_eq!(fetcher.calls(), 5);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn auth_failure_stops_immediately_without_retry_affordance() {
	let fetcher = ScriptedFetcher::new(Script::Succeed(batch(&[])));
	fetcher.push(Script::Fail(FetchError::Auth("401 unauthorized".to_string())));
	let Rig { registry, sink } = rig();
	registry.register(TaskSpec::new("nodes", "node", fetcher.clone()).config(scenario_config()));
	registry.start("nodes");
	settle().await;

	assert_eq!(registry.snapshots()[0].state, TaskState::Stopped);
	let failures = sink.failures("nodes");
	assert_eq!(failures.len(), 1);
	assert!(failures[0].persistent);
	assert!(!failures[0].retryable);
	assert_eq!(failures[0].category, "auth");

	// No silent timer retry.
	sleep(Duration::from_secs(60)).await;
	settle().await;
	assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn client_error_stops_but_still_offers_retry() {
	let fetcher = ScriptedFetcher::new(Script::Succeed(batch(&[])));
	fetcher.push(Script::Fail(FetchError::Client("400 bad request".to_string())));
	let Rig { registry, sink } = rig();
	registry.register(TaskSpec::new("nodes", "node", fetcher.clone()).config(scenario_config()));
	registry.start("nodes");
	settle().await;

	assert_eq!(registry.snapshots()[0].state, TaskState::Stopped);
	let failures = sink.failures("nodes");
	assert_eq!(failures.len(), 1);
	assert!(failures[0].persistent);
	assert!(failures[0].retryable);
	assert_eq!(fetcher.calls(), 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn single_server_error_degrades_then_recovers() {
	let fetcher = ScriptedFetcher::new(Script::Succeed(batch(&[("node-1", 10.0)])));
	fetcher.push(Script::Fail(FetchError::Server("503".to_string())));
	let Rig { registry, sink } = rig();
	registry.register(TaskSpec::new("nodes", "node", fetcher.clone()).config(scenario_config()));
	registry.start("nodes");
	settle().await;

	assert_eq!(registry.snapshots()[0].state, TaskState::Running);
	let failures = sink.failures("nodes");
	assert_eq!(failures.len(), 1);
	assert!(!failures[0].persistent);

	sleep(Duration::from_secs(5)).await;
	settle().await;
	assert_eq!(sink.liveness_trail("nodes"), vec![Liveness::Stale, Liveness::Connected]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn network_failure_marks_data_offline_until_recovery() {
	let fetcher = ScriptedFetcher::new(Script::Succeed(batch(&[("node-1", 10.0)])));
	fetcher.push(Script::Fail(FetchError::Network("no route to host".to_string())));
	let Rig { registry, sink } = rig();
	registry.register(TaskSpec::new("nodes", "node", fetcher.clone()).config(scenario_config()));
	registry.start("nodes");
	settle().await;
	assert_eq!(sink.liveness_trail("nodes"), vec![Liveness::Offline]);

	sleep(Duration::from_secs(5)).await;
	settle().await;
	assert_eq!(sink.liveness_trail("nodes"), vec![Liveness::Offline, Liveness::Connected]);
}
