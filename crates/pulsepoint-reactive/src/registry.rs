//! Per-thread runtime slot.
//!
//! Component code that cannot be handed a [`Runtime`] looks the current one
//! up here. A thread holds at most one runtime at a time; it must be
//! destroyed before another is created.

use std::cell::RefCell;

use crate::config::RuntimeConfig;
use crate::dom::Document;
use crate::hydration::{Runtime, RuntimeError};
use crate::info_log;

thread_local! {
	static CURRENT: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Creates the thread's runtime.
///
/// Fails with [`RuntimeError::AlreadyExists`] while another one is
/// registered.
pub fn create(document: Document, config: RuntimeConfig) -> Result<Runtime, RuntimeError> {
	if CURRENT.with(|slot| slot.borrow().is_some()) {
		return Err(RuntimeError::AlreadyExists);
	}
	let runtime = Runtime::with_config(document, config)?;
	CURRENT.with(|slot| *slot.borrow_mut() = Some(runtime.clone()));
	info_log!("runtime registered");
	Ok(runtime)
}

/// The thread's runtime.
pub fn current() -> Result<Runtime, RuntimeError> {
	CURRENT
		.with(|slot| slot.borrow().clone())
		.ok_or(RuntimeError::NotInitialized)
}

/// Whether a runtime is registered.
pub fn is_registered() -> bool {
	CURRENT.with(|slot| slot.borrow().is_some())
}

/// Runs `f` with the thread's runtime.
pub fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> Result<R, RuntimeError> {
	let runtime = current()?;
	Ok(f(&runtime))
}

/// Destroys and unregisters the thread's runtime. Returns whether one was
/// registered.
pub fn destroy() -> bool {
	let Some(runtime) = CURRENT.with(|slot| slot.borrow_mut().take()) else {
		return false;
	};
	runtime.destroy();
	true
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use serial_test::serial;

	#[rstest]
	#[serial]
	fn test_create_then_current() {
		destroy();
		let runtime = create(Document::new(), RuntimeConfig::default()).unwrap();
		assert!(is_registered());
		assert!(current().unwrap().ptr_eq(&runtime));
		assert!(matches!(
			create(Document::new(), RuntimeConfig::default()),
			Err(RuntimeError::AlreadyExists)
		));
		assert!(destroy());
		assert!(runtime.is_destroyed());
	}

	#[rstest]
	#[serial]
	fn test_missing_runtime() {
		destroy();
		assert!(matches!(current(), Err(RuntimeError::NotInitialized)));
		assert!(matches!(
			with_runtime(|rt| rt.phase()),
			Err(RuntimeError::NotInitialized)
		));
		assert!(!destroy());
	}

	#[rstest]
	#[serial]
	fn test_invalid_config_registers_nothing() {
		destroy();
		let config = RuntimeConfig {
			max_cache_size: 0,
			..RuntimeConfig::default()
		};
		assert!(matches!(
			create(Document::new(), config),
			Err(RuntimeError::Config(_))
		));
		assert!(!is_registered());
	}
}
