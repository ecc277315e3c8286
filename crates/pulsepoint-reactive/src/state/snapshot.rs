//! Serialized state handed from the server renderer to the client.
//!
//! The server embeds a snapshot in the page; the client restores it before
//! scripts run so `create_state` picks up server values instead of the
//! declared initial ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::StateManager;
use crate::value::Value;

/// Id of the `<script>` element carrying the snapshot.
pub const SNAPSHOT_SCRIPT_ID: &str = "pp-state";

/// Serialized state values keyed by full key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
	/// State values.
	values: BTreeMap<String, serde_json::Value>,
	/// Free-form metadata.
	#[serde(default)]
	metadata: BTreeMap<String, serde_json::Value>,
}

impl StateSnapshot {
	/// Creates an empty snapshot.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds one value.
	pub fn add_value(&mut self, key: impl Into<String>, value: impl Serialize) {
		if let Ok(json) = serde_json::to_value(value) {
			self.values.insert(key.into(), json);
		}
	}

	/// Adds metadata.
	pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Serialize) {
		if let Ok(json) = serde_json::to_value(value) {
			self.metadata.insert(key.into(), json);
		}
	}

	/// Gets a value by full key.
	pub fn get_value(&self, key: &str) -> Option<&serde_json::Value> {
		self.values.get(key)
	}

	/// Gets metadata by key.
	pub fn get_metadata(&self, key: &str) -> Option<&serde_json::Value> {
		self.metadata.get(key)
	}

	/// Number of values.
	pub fn len(&self) -> usize {
		self.values.len()
	}

	/// Whether there are neither values nor metadata.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty() && self.metadata.is_empty()
	}

	/// Serializes to JSON.
	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	/// Deserializes from JSON.
	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	/// `<script>` tag embedding the snapshot.
	pub fn to_script_tag(&self) -> String {
		let json = self
			.to_json()
			.unwrap_or_else(|_| "{}".to_string())
			.replace("</", "<\\/");
		format!(
			r#"<script id="{}" type="application/json">{}</script>"#,
			SNAPSHOT_SCRIPT_ID, json
		)
	}

	/// Merges `other` into this snapshot; `other` wins on conflicts.
	pub fn merge(&mut self, other: StateSnapshot) {
		self.values.extend(other.values);
		self.metadata.extend(other.metadata);
	}
}

impl StateManager {
	/// Captures every serializable value.
	///
	/// Functions are skipped; getters are captured by their current value.
	pub fn snapshot(&self) -> StateSnapshot {
		let mut snapshot = StateSnapshot::new();
		for (key, value) in self.get_state() {
			if !matches!(value, Value::Function(_)) {
				snapshot.values.insert(key, value.to_json());
			}
		}
		snapshot
	}

	/// Seeds the store from `snapshot` without notifying subscribers.
	///
	/// Returns the number of keys restored.
	pub fn restore(&self, snapshot: &StateSnapshot) -> usize {
		for (key, value) in &snapshot.values {
			self.set_initial_state(key, Value::from(value.clone()));
		}
		snapshot.values.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serde_json::json;

	#[rstest]
	fn test_snapshot_restores_into_fresh_store() {
		let server = StateManager::new();
		server.set_initial_state("Counter.count", 3);
		server.set_initial_state("theme", "dark");

		let json = server.snapshot().to_json().unwrap();
		let client = StateManager::new();
		let restored = client.restore(&StateSnapshot::from_json(&json).unwrap());

		assert_eq!(restored, 2);
		assert_eq!(client.get("Counter.count"), Some(Value::from(3)));
		let (theme, _) = client.create_state(None, "theme", Value::from("light"));
		assert_eq!(theme.get(), Value::from("dark"));
	}

	#[rstest]
	fn test_script_tag_escapes_closing_tags() {
		let mut snapshot = StateSnapshot::new();
		snapshot.add_value("html", "</script>");
		let tag = snapshot.to_script_tag();
		assert!(tag.starts_with(r#"<script id="pp-state""#));
		assert_eq!(tag.matches("</script>").count(), 1);
	}

	#[rstest]
	fn test_merge_and_metadata() {
		let mut a = StateSnapshot::new();
		a.add_value("x", 1);
		let mut b = StateSnapshot::new();
		b.add_value("x", 2);
		b.add_metadata("version", "1");
		a.merge(b);
		assert_eq!(a.get_value("x"), Some(&json!(2)));
		assert_eq!(a.get_metadata("version"), Some(&json!("1")));
		assert_eq!(a.len(), 1);
	}

	#[rstest]
	fn test_from_json_without_metadata() {
		let snapshot = StateSnapshot::from_json(r#"{"values":{"a":true}}"#).unwrap();
		assert_eq!(snapshot.get_value("a"), Some(&json!(true)));
	}
}
