//! Runtime configuration and reserved markup constants.
//!
//! Every tunable the runtime reads lives in [`RuntimeConfig`]; the markup
//! vocabulary shared with the server-side renderer lives in the constants
//! below.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved attribute names recognised by the runtime.
pub mod attrs {
	/// Marks an element as the root of a component instance.
	pub const COMPONENT: &str = "pp-component";
	/// Loop directive expanded during `LOOPS_PROCESSING`.
	pub const LOOP: &str = "pp-for";
	/// Object/array spread binding.
	pub const SPREAD: &str = "pp-spread";
	/// Binds the element to a `Ref`.
	pub const REF: &str = "pp-ref";
	/// Excludes a subtree from binding.
	pub const IGNORE: &str = "pp-ignore";
}

/// `type` attribute of executable reactive script blocks.
pub const SCRIPT_TYPE: &str = "text/pp";

/// Opening template-expression delimiter.
pub const MUSTACHE_OPEN: &str = "{{";
/// Closing template-expression delimiter.
pub const MUSTACHE_CLOSE: &str = "}}";

/// Prefix of the comment opening a component scope (`pp-scope:Name`).
pub const SCOPE_START_PREFIX: &str = "pp-scope:";
/// Prefix of the comment closing a component scope (`/pp-scope:Name`).
pub const SCOPE_END_PREFIX: &str = "/pp-scope:";

/// Default capacity shared by every cache.
pub const MAX_CACHE_SIZE: usize = 2000;
/// Default flush debounce interval.
pub const DEBOUNCE_MS: u64 = 16;
/// Minimum interval between two scope-cache sweeps.
pub const CLEANUP_INTERVAL_MS: u64 = 5000;
/// Tracked-element count above which a scope sweep is forced.
pub const MAX_TRACKED_ELEMENTS: usize = 10_000;
/// Upper bound on consecutive flushes triggered from within a flush.
pub const MAX_FLUSH_ROUNDS: usize = 64;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The configuration document could not be parsed.
	#[error("failed to parse runtime config: {0}")]
	Parse(#[from] serde_json::Error),
	/// A field holds a value the runtime cannot work with.
	#[error("invalid value for `{field}`: {reason}")]
	InvalidValue {
		/// Offending field.
		field: &'static str,
		/// Why the value was rejected.
		reason: String,
	},
}

/// Tunables for a runtime instance.
///
/// # Example
///
/// ```ignore
/// let config = RuntimeConfig::from_json(r#"{"debounce_ms": 0}"#)?;
/// assert_eq!(config.max_cache_size, 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
	/// Capacity of each LRU cache.
	pub max_cache_size: usize,
	/// Flush debounce window in milliseconds. Zero flushes on the next tick.
	pub debounce_ms: u64,
	/// Minimum milliseconds between scope-cache sweeps.
	pub scope_cleanup_interval_ms: u64,
	/// Tracked-element count that forces a scope sweep.
	pub max_tracked_elements: usize,
	/// Bound on re-entrant flushes run back to back by `flush_all`.
	pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
	fn default() -> Self {
		Self {
			max_cache_size: MAX_CACHE_SIZE,
			debounce_ms: DEBOUNCE_MS,
			scope_cleanup_interval_ms: CLEANUP_INTERVAL_MS,
			max_tracked_elements: MAX_TRACKED_ELEMENTS,
			max_flush_rounds: MAX_FLUSH_ROUNDS,
		}
	}
}

impl RuntimeConfig {
	/// Parses a JSON document; missing fields take their defaults.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let config: Self = serde_json::from_str(json)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks that every bound is usable.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_cache_size == 0 {
			return Err(ConfigError::InvalidValue {
				field: "max_cache_size",
				reason: "caches need room for at least one entry".to_string(),
			});
		}
		if self.max_tracked_elements == 0 {
			return Err(ConfigError::InvalidValue {
				field: "max_tracked_elements",
				reason: "must be greater than zero".to_string(),
			});
		}
		if self.max_flush_rounds == 0 {
			return Err(ConfigError::InvalidValue {
				field: "max_flush_rounds",
				reason: "must be greater than zero".to_string(),
			});
		}
		Ok(())
	}

	/// Debounce window as a `Duration`.
	pub fn debounce(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.debounce_ms)
	}

	/// Scope sweep interval as a `Duration`.
	pub fn scope_cleanup_interval(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.scope_cleanup_interval_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_defaults_match_constants() {
		let config = RuntimeConfig::default();
		assert_eq!(config.max_cache_size, 2000);
		assert_eq!(config.debounce_ms, 16);
		assert_eq!(config.scope_cleanup_interval_ms, 5000);
		assert_eq!(config.max_tracked_elements, 10_000);
		assert!(config.validate().is_ok());
	}

	#[rstest]
	fn test_from_json_partial() {
		let config = RuntimeConfig::from_json(r#"{"debounce_ms": 0}"#).unwrap();
		assert_eq!(config.debounce_ms, 0);
		assert_eq!(config.max_cache_size, MAX_CACHE_SIZE);
	}

	#[rstest]
	#[case(r#"{"max_cache_size": 0}"#, "max_cache_size")]
	#[case(r#"{"max_tracked_elements": 0}"#, "max_tracked_elements")]
	#[case(r#"{"max_flush_rounds": 0}"#, "max_flush_rounds")]
	fn test_from_json_rejects_zero_bounds(#[case] json: &str, #[case] expected: &str) {
		match RuntimeConfig::from_json(json) {
			Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, expected),
			other => panic!("expected InvalidValue, got {:?}", other),
		}
	}

	#[rstest]
	fn test_from_json_parse_error() {
		assert!(matches!(
			RuntimeConfig::from_json("{not json"),
			Err(ConfigError::Parse(_))
		));
	}

	#[rstest]
	fn test_reserved_attributes() {
		assert_eq!(attrs::COMPONENT, "pp-component");
		assert_eq!(attrs::LOOP, "pp-for");
		assert_eq!(attrs::SPREAD, "pp-spread");
		assert_eq!(attrs::REF, "pp-ref");
		assert_eq!(attrs::IGNORE, "pp-ignore");
		assert_eq!(SCRIPT_TYPE, "text/pp");
	}
}
