//! Hydration: attaching reactive behavior to server-rendered markup.
//!
//! Hydration runs through a fixed sequence of [`HydrationPhase`]s, each
//! entered exactly once:
//!
//! 1. `scripts_executing`: component scripts declare state and effects while
//!    subscriber notification is suspended.
//! 2. `loops_processing`: loop directives are expanded by the
//!    [`HydrationDelegate`] and `{{ }}` text is bound.
//! 3. `effects_running`: effects registered so far run once and subscribe.
//! 4. `portals_rendering`: every portal is hydrated and awaited.
//! 5. `complete`: pending state is flushed and [`Runtime::hydrated`]
//!    resolves.
//!
//! [`Runtime`] is the facade component code talks to; [`ComponentScope`]
//! binds its operations to one component namespace.

mod completion;
mod component_scope;
mod effects;
mod lifecycle;
mod phase;
mod runtime;

use thiserror::Error;

use crate::portal::Portal;

pub use completion::{Completion, Signal, SignalCallback};
pub use component_scope::ComponentScope;
pub use effects::{EffectCleanup, EffectDep, EffectHandle, EffectOptions, IntoEffectCleanup};
pub use lifecycle::{Hook, LifecycleHooks, LifecycleManager};
pub use phase::HydrationPhase;
pub use runtime::{Binding, BindingError, Runtime, RuntimeError, TickReport};

/// Errors raised while hydrating.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
	/// A phase was entered out of order.
	#[error("invalid hydration transition from {from} to {to}")]
	InvalidTransition {
		/// Current phase.
		from: HydrationPhase,
		/// Requested phase.
		to: HydrationPhase,
	},
	/// A phase name did not parse.
	#[error("unknown hydration phase: {0}")]
	UnknownPhase(String),
	/// The embedded state snapshot could not be parsed.
	#[error("failed to parse server state: {0}")]
	StateParseError(String),
	/// Rendered markup does not match what the client expected.
	#[error("DOM structure mismatch at {id}: expected {expected}, found {actual}")]
	StructureMismatch {
		/// Location of the mismatch.
		id: String,
		/// Expected markup.
		expected: String,
		/// Markup found.
		actual: String,
	},
	/// No portal with this id exists.
	#[error("portal not found: {0}")]
	PortalNotFound(String),
	/// The portal was removed before it was hydrated.
	#[error("portal removed before hydration: {0}")]
	PortalRemoved(String),
	/// A hydration step reported a failure.
	#[error("hydration step failed: {0}")]
	Failed(String),
	/// The signal was dropped without completing.
	#[error("hydration was cancelled")]
	Cancelled,
	/// The runtime was destroyed.
	#[error("runtime has been destroyed")]
	Destroyed,
}

/// Work the runtime hands to the DOM-binding layer.
///
/// Both methods default to no-ops, so a runtime without a binding layer
/// still walks every phase.
pub trait HydrationDelegate {
	/// Expands loop directives (`pp-for`) during `loops_processing`.
	fn process_loops(&self, runtime: &Runtime) -> Result<(), HydrationError> {
		let _ = runtime;
		Ok(())
	}

	/// Attaches bindings inside a portal. The portal is marked hydrated
	/// when this returns `Ok`.
	fn hydrate_portal(&self, runtime: &Runtime, portal: &Portal) -> Result<(), HydrationError> {
		let _ = (runtime, portal);
		Ok(())
	}
}

/// Delegate used when none is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl HydrationDelegate for NoopDelegate {}
