//! Logging layer for pulsepoint-reactive
//!
//! All runtime diagnostics go through four macros that forward to `tracing`
//! under the `pulsepoint` target. They compile to no-ops in release builds so
//! the flush loop carries no formatting cost in production.
//!
//! ## Macro Overview
//!
//! | Macro | Debug Assertions | Feature Required | Backend |
//! |-------|------------------|------------------|---------|
//! | `debug_log!` | Required | `debug-hooks` | `tracing::debug!` |
//! | `info_log!` | Required | None | `tracing::info!` |
//! | `warn_log!` | Required | None | `tracing::warn!` |
//! | `error_log!` | Required | None | `tracing::error!` |
//!
//! Hosts decide where events end up by installing a subscriber. With the
//! `tracing-json` feature, [`init_json_logging`] installs a JSON subscriber
//! filtered by `RUST_LOG`.
//!
//! ## Example
//!
//! ```ignore
//! use pulsepoint_reactive::{debug_log, error_log, info_log, warn_log};
//!
//! debug_log!("effect {} re-run", id);
//! info_log!("hydration complete");
//! warn_log!("mismatched quotes in {:?}", content);
//! error_log!("binding {} in {} failed: {}", expr, component, err);
//! ```

/// Logs a debug message (requires `debug-hooks` feature + `debug_assertions`)
///
/// Reserved for per-effect and per-subscription tracing that would be too
/// noisy for regular development logs.
#[macro_export]
#[cfg(all(debug_assertions, feature = "debug-hooks"))]
macro_rules! debug_log {
	($($arg:tt)*) => {{
		$crate::__tracing::debug!(target: "pulsepoint", "{}", format!($($arg)*));
	}};
}

/// No-op debug_log when conditions are not met
#[macro_export]
#[cfg(not(all(debug_assertions, feature = "debug-hooks")))]
macro_rules! debug_log {
	($($arg:tt)*) => {{
		if false {
			let _ = format_args!($($arg)*);
		}
	}};
}

/// Logs an info message (requires `debug_assertions`)
///
/// # Example
///
/// ```ignore
/// info_log!("entering phase {}", phase);
/// ```
#[macro_export]
#[cfg(debug_assertions)]
macro_rules! info_log {
	($($arg:tt)*) => {{
		$crate::__tracing::info!(target: "pulsepoint", "{}", format!($($arg)*));
	}};
}

/// No-op info_log in release builds
#[macro_export]
#[cfg(not(debug_assertions))]
macro_rules! info_log {
	($($arg:tt)*) => {{
		if false {
			let _ = format_args!($($arg)*);
		}
	}};
}

/// Logs a warning message (requires `debug_assertions`)
#[macro_export]
#[cfg(debug_assertions)]
macro_rules! warn_log {
	($($arg:tt)*) => {{
		$crate::__tracing::warn!(target: "pulsepoint", "{}", format!($($arg)*));
	}};
}

/// No-op warn_log in release builds
#[macro_export]
#[cfg(not(debug_assertions))]
macro_rules! warn_log {
	($($arg:tt)*) => {{
		if false {
			let _ = format_args!($($arg)*);
		}
	}};
}

/// Logs an error message (requires `debug_assertions`)
///
/// Used for contained failures: a binding whose expression throws, a
/// subscription callback that panics during a flush.
#[macro_export]
#[cfg(debug_assertions)]
macro_rules! error_log {
	($($arg:tt)*) => {{
		$crate::__tracing::error!(target: "pulsepoint", "{}", format!($($arg)*));
	}};
}

/// No-op error_log in release builds
#[macro_export]
#[cfg(not(debug_assertions))]
macro_rules! error_log {
	($($arg:tt)*) => {{
		if false {
			let _ = format_args!($($arg)*);
		}
	}};
}

/// Installs a global JSON `tracing` subscriber filtered by `RUST_LOG`.
///
/// Returns `false` when a global subscriber was already installed.
#[cfg(feature = "tracing-json")]
pub fn init_json_logging() -> bool {
	use tracing_subscriber::EnvFilter;

	tracing_subscriber::fmt()
		.json()
		.with_env_filter(EnvFilter::from_default_env())
		.try_init()
		.is_ok()
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	#[rstest]
	fn test_logging_macros_compile() {
		debug_log!("Debug message: {}", 42);
		info_log!("Info message: {}", "test");
		warn_log!("Warning message: {:?}", vec![1, 2, 3]);
		error_log!("Error message: {}", "error");
	}

	#[rstest]
	fn test_logging_macros_no_args() {
		debug_log!("Simple debug");
		info_log!("Simple info");
		warn_log!("Simple warning");
		error_log!("Simple error");
	}
}
