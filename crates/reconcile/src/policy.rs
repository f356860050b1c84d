use rustc_hash::{FxHashMap, FxHashSet};

use crate::record::{EntityRecord, FieldValue};

/// Default relative change below which numeric fields are noise.
const DEFAULT_NUMERIC_TOLERANCE: f64 = 0.01;

/// Decides whether a changed record warrants an update event.
///
/// One policy instance is bound per entity kind at task registration. The
/// default rule: numeric fields differing by more than 1% relative change
/// are significant, non-numeric fields differing at all are significant,
/// and a field present on one side only counts as a change. Kinds that need
/// different sensitivity configure it here instead of forking the diff.
#[derive(Debug, Clone)]
pub struct SignificancePolicy {
	numeric_tolerance: f64,
	field_tolerance: FxHashMap<String, f64>,
	ignored: FxHashSet<String>,
}

impl Default for SignificancePolicy {
	fn default() -> Self {
		Self {
			numeric_tolerance: DEFAULT_NUMERIC_TOLERANCE,
			field_tolerance: FxHashMap::default(),
			ignored: FxHashSet::default(),
		}
	}
}

impl SignificancePolicy {
	/// Creates the canonical 1%-relative-change policy.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the relative tolerance applied to numeric fields.
	///
	/// # Panics
	///
	/// Panics if `tolerance` is negative or not finite.
	#[must_use]
	pub fn numeric_tolerance(mut self, tolerance: f64) -> Self {
		assert!(tolerance.is_finite() && tolerance >= 0.0, "tolerance must be finite and >= 0");
		self.numeric_tolerance = tolerance;
		self
	}

	/// Overrides the relative tolerance for one named field.
	#[must_use]
	pub fn field_tolerance(mut self, field: impl Into<String>, tolerance: f64) -> Self {
		assert!(tolerance.is_finite() && tolerance >= 0.0, "tolerance must be finite and >= 0");
		self.field_tolerance.insert(field.into(), tolerance);
		self
	}

	/// Excludes one field from comparison entirely.
	///
	/// Ever-ticking counters (uptime, total bytes transferred) change on
	/// every poll and would otherwise mark every record updated.
	#[must_use]
	pub fn ignore_field(mut self, field: impl Into<String>) -> Self {
		self.ignored.insert(field.into());
		self
	}

	/// Returns whether the change from `old` to `new` is worth emitting.
	pub fn is_significant(&self, old: &EntityRecord, new: &EntityRecord) -> bool {
		for (name, old_value) in old.fields() {
			if self.ignored.contains(name) {
				continue;
			}
			match new.get(name) {
				None => return true,
				Some(new_value) => {
					if self.field_changed(name, old_value, new_value) {
						return true;
					}
				}
			}
		}
		// Fields introduced by the new record.
		new.field_names().any(|name| !self.ignored.contains(name) && old.get(name).is_none())
	}

	fn field_changed(&self, name: &str, old: &FieldValue, new: &FieldValue) -> bool {
		match (old, new) {
			(FieldValue::Number(a), FieldValue::Number(b)) => {
				let tolerance = self.field_tolerance.get(name).copied().unwrap_or(self.numeric_tolerance);
				numeric_changed(*a, *b, tolerance)
			}
			(a, b) => a != b,
		}
	}
}

/// Relative-change test for numeric fields.
///
/// A zero baseline has no meaningful relative scale, so any move off zero
/// is significant. Non-finite values compare by bit pattern.
fn numeric_changed(old: f64, new: f64, tolerance: f64) -> bool {
	if old.to_bits() == new.to_bits() {
		return false;
	}
	if !old.is_finite() || !new.is_finite() {
		return true;
	}
	if old == 0.0 {
		return new != 0.0;
	}
	((new - old) / old).abs() > tolerance
}
