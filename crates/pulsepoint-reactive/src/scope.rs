//! Component-scope resolution.
//!
//! A node belongs to the nearest enclosing component boundary. Boundaries are
//! either an element carrying `pp-component="Name"` or a pair of sentinel
//! comments `<!-- pp-scope:Name -->` … `<!-- /pp-scope:Name -->` placed among
//! siblings. A node with no boundary above it is unscoped (global).

mod markers;
mod resolver;

use once_cell::sync::Lazy;
use regex::Regex;

pub use markers::ScopeMarker;
pub use resolver::{ScopeCacheStats, ScopeResolver};

static SCOPE_NAME: Lazy<Regex> =
	Lazy::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$.\-]*$").expect("valid scope name pattern"));

/// Whether `name` can be used as a component scope name.
///
/// Names may be hierarchical (`app.header`).
pub fn is_valid_scope_name(name: &str) -> bool {
	SCOPE_NAME.is_match(name)
}
