use crate::policy::SignificancePolicy;
use crate::record::{EntityRecord, Snapshot};

/// Partition of `keys(old) ∪ keys(new)` produced by [`diff`].
///
/// Keys in both snapshots that are not listed under `updated` are
/// implicitly unchanged. Each partition is sorted by key so consumers see
/// deterministic batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileDelta {
	pub removed: Vec<String>,
	pub added: Vec<(String, EntityRecord)>,
	pub updated: Vec<(String, EntityRecord)>,
}

impl ReconcileDelta {
	/// Returns whether the delta carries no events.
	pub fn is_empty(&self) -> bool {
		self.removed.is_empty() && self.added.is_empty() && self.updated.is_empty()
	}

	/// Total number of events across all partitions.
	pub fn len(&self) -> usize {
		self.removed.len() + self.added.len() + self.updated.len()
	}

	/// Iterates events in the fixed emission order: removals first, then
	/// additions, then updates.
	///
	/// Removals lead so an entity that changed key never coexists with its
	/// stale predecessor in the consumer's view.
	pub fn events(&self) -> impl Iterator<Item = ReconcileEvent<'_>> {
		self.removed
			.iter()
			.map(|key| ReconcileEvent::Removed { key })
			.chain(self.added.iter().map(|(key, record)| ReconcileEvent::Added { key, record }))
			.chain(self.updated.iter().map(|(key, record)| ReconcileEvent::Updated { key, record }))
	}
}

/// One ordered reconciliation event borrowed from a [`ReconcileDelta`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReconcileEvent<'a> {
	Removed { key: &'a str },
	Added { key: &'a str, record: &'a EntityRecord },
	Updated { key: &'a str, record: &'a EntityRecord },
}

/// Diffs two keyed collections into removed/added/updated partitions.
///
/// Visits the union of old and new keys exactly once each via hashed
/// lookup. Keys present in both are evaluated by `policy` and included in
/// `updated` only when the change is significant.
pub fn diff(old: &Snapshot, new: &Snapshot, policy: &SignificancePolicy) -> ReconcileDelta {
	let mut delta = ReconcileDelta::default();

	for key in old.keys() {
		if !new.contains_key(key) {
			delta.removed.push(key.clone());
		}
	}

	for (key, record) in new {
		match old.get(key) {
			None => delta.added.push((key.clone(), record.clone())),
			Some(previous) => {
				if policy.is_significant(previous, record) {
					delta.updated.push((key.clone(), record.clone()));
				}
			}
		}
	}

	delta.removed.sort_unstable();
	delta.added.sort_unstable_by(|a, b| a.0.cmp(&b.0));
	delta.updated.sort_unstable_by(|a, b| a.0.cmp(&b.0));
	delta
}
