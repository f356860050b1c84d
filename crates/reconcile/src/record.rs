use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One scalar field of an entity record.
///
/// Decoded backend payloads map onto these three shapes; anything richer
/// (nested objects, arrays) is flattened by the fetch collaborator before
/// it reaches a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
	Bool(bool),
	Number(f64),
	Text(String),
}

impl From<bool> for FieldValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<f64> for FieldValue {
	fn from(value: f64) -> Self {
		Self::Number(value)
	}
}

impl From<i64> for FieldValue {
	fn from(value: i64) -> Self {
		Self::Number(value as f64)
	}
}

impl From<&str> for FieldValue {
	fn from(value: &str) -> Self {
		Self::Text(value.to_string())
	}
}

impl From<String> for FieldValue {
	fn from(value: String) -> Self {
		Self::Text(value)
	}
}

/// Field map for one entity, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRecord {
	fields: FxHashMap<String, FieldValue>,
}

impl EntityRecord {
	/// Creates an empty record.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds one field, replacing any existing value under the same name.
	#[must_use]
	pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
		self.fields.insert(name.into(), value.into());
		self
	}

	/// Inserts one field.
	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
		self.fields.insert(name.into(), value.into());
	}

	/// Returns the value of one field, if present.
	pub fn get(&self, name: &str) -> Option<&FieldValue> {
		self.fields.get(name)
	}

	/// Returns whether the record has no fields.
	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	/// Iterates field names in unspecified order.
	pub fn field_names(&self) -> impl Iterator<Item = &str> {
		self.fields.keys().map(String::as_str)
	}

	/// Iterates fields as `(name, value)` pairs in unspecified order.
	pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
		self.fields.iter().map(|(name, value)| (name.as_str(), value))
	}
}

impl FromIterator<(String, FieldValue)> for EntityRecord {
	fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
		Self {
			fields: iter.into_iter().collect(),
		}
	}
}

/// The last successfully applied keyed collection for one polling task.
///
/// Replaced whole on each successful fetch after diffing; never mutated in
/// place.
pub type Snapshot = FxHashMap<String, EntityRecord>;
