//! Scope sentinel comments.

use super::is_valid_scope_name;
use crate::config::{SCOPE_END_PREFIX, SCOPE_START_PREFIX};

/// A parsed scope sentinel comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeMarker {
	/// `pp-scope:Name` opens a scope.
	Start(String),
	/// `/pp-scope:Name` closes it.
	End(String),
}

impl ScopeMarker {
	/// Parses comment text; anything that is not a well-formed sentinel
	/// yields `None`.
	///
	/// ```
	/// use pulsepoint_reactive::scope::ScopeMarker;
	///
	/// assert_eq!(
	///     ScopeMarker::parse(" pp-scope:Counter "),
	///     Some(ScopeMarker::Start("Counter".to_string()))
	/// );
	/// assert_eq!(ScopeMarker::parse("pp-scope:"), None);
	/// assert_eq!(ScopeMarker::parse("just a comment"), None);
	/// ```
	pub fn parse(text: &str) -> Option<Self> {
		let text = text.trim();
		let (name, start) = if let Some(name) = text.strip_prefix(SCOPE_END_PREFIX) {
			(name, false)
		} else if let Some(name) = text.strip_prefix(SCOPE_START_PREFIX) {
			(name, true)
		} else {
			return None;
		};
		let name = name.trim();
		if !is_valid_scope_name(name) {
			return None;
		}
		Some(if start {
			ScopeMarker::Start(name.to_string())
		} else {
			ScopeMarker::End(name.to_string())
		})
	}

	/// Scope name carried by the marker.
	pub fn name(&self) -> &str {
		match self {
			ScopeMarker::Start(name) | ScopeMarker::End(name) => name,
		}
	}

	/// Comment text that renders this marker.
	pub fn to_comment(&self) -> String {
		match self {
			ScopeMarker::Start(name) => format!("{}{}", SCOPE_START_PREFIX, name),
			ScopeMarker::End(name) => format!("{}{}", SCOPE_END_PREFIX, name),
		}
	}
}
