//! Phase bookkeeping and lifecycle hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::HydrationError;
use super::completion::{Completion, Signal, SignalCallback};
use super::phase::HydrationPhase;
use crate::debug_log;

/// Hook run around a phase.
pub type Hook = Rc<dyn Fn()>;

/// Hooks run before and after the working phases.
///
/// # Example
///
/// ```
/// use pulsepoint_reactive::hydration::{HydrationPhase, LifecycleHooks};
///
/// let hooks = LifecycleHooks::new()
///     .before_scripts(|| println!("scripts starting"))
///     .after_portals(|| println!("portals done"));
/// assert_eq!(hooks.before(HydrationPhase::ScriptsExecuting).len(), 1);
/// assert!(hooks.after(HydrationPhase::ScriptsExecuting).is_empty());
/// ```
#[derive(Clone, Default)]
pub struct LifecycleHooks {
	before: BTreeMap<HydrationPhase, Hook>,
	after: BTreeMap<HydrationPhase, Hook>,
}

impl LifecycleHooks {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	fn with_before(mut self, phase: HydrationPhase, hook: impl Fn() + 'static) -> Self {
		self.before.insert(phase, Rc::new(hook));
		self
	}

	fn with_after(mut self, phase: HydrationPhase, hook: impl Fn() + 'static) -> Self {
		self.after.insert(phase, Rc::new(hook));
		self
	}

	/// Runs before component scripts.
	pub fn before_scripts(self, hook: impl Fn() + 'static) -> Self {
		self.with_before(HydrationPhase::ScriptsExecuting, hook)
	}

	/// Runs after component scripts.
	pub fn after_scripts(self, hook: impl Fn() + 'static) -> Self {
		self.with_after(HydrationPhase::ScriptsExecuting, hook)
	}

	/// Runs before loops are processed.
	pub fn before_loops(self, hook: impl Fn() + 'static) -> Self {
		self.with_before(HydrationPhase::LoopsProcessing, hook)
	}

	/// Runs after loops are processed.
	pub fn after_loops(self, hook: impl Fn() + 'static) -> Self {
		self.with_after(HydrationPhase::LoopsProcessing, hook)
	}

	/// Runs before pending effects.
	pub fn before_effects(self, hook: impl Fn() + 'static) -> Self {
		self.with_before(HydrationPhase::EffectsRunning, hook)
	}

	/// Runs after pending effects.
	pub fn after_effects(self, hook: impl Fn() + 'static) -> Self {
		self.with_after(HydrationPhase::EffectsRunning, hook)
	}

	/// Runs before portals are hydrated.
	pub fn before_portals(self, hook: impl Fn() + 'static) -> Self {
		self.with_before(HydrationPhase::PortalsRendering, hook)
	}

	/// Runs after portals are hydrated.
	pub fn after_portals(self, hook: impl Fn() + 'static) -> Self {
		self.with_after(HydrationPhase::PortalsRendering, hook)
	}

	/// Before-hooks registered for `phase`.
	pub fn before(&self, phase: HydrationPhase) -> Vec<Hook> {
		self.before.get(&phase).cloned().into_iter().collect()
	}

	/// After-hooks registered for `phase`.
	pub fn after(&self, phase: HydrationPhase) -> Vec<Hook> {
		self.after.get(&phase).cloned().into_iter().collect()
	}
}

impl fmt::Debug for LifecycleHooks {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LifecycleHooks")
			.field("before", &self.before.keys().collect::<Vec<_>>())
			.field("after", &self.after.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Tracks the current phase and everything waiting on phases.
///
/// Phases only move forward one step at a time; each phase's signal
/// completes when it is entered.
#[derive(Debug, Default)]
pub struct LifecycleManager {
	phase: HydrationPhase,
	hooks: Vec<LifecycleHooks>,
	signals: BTreeMap<HydrationPhase, Signal>,
}

impl LifecycleManager {
	/// Creates a manager in [`HydrationPhase::NotStarted`].
	pub fn new() -> Self {
		Self::default()
	}

	/// Current phase.
	pub fn current(&self) -> HydrationPhase {
		self.phase
	}

	/// Whether [`HydrationPhase::Complete`] was reached.
	pub fn is_hydrated(&self) -> bool {
		self.phase == HydrationPhase::Complete
	}

	/// Whether hydration is under way.
	pub fn is_hydrating(&self) -> bool {
		self.phase.is_hydrating()
	}

	/// Adds a hook set. Sets run in registration order.
	pub fn register_hooks(&mut self, hooks: LifecycleHooks) {
		self.hooks.push(hooks);
	}

	/// Before-hooks of every registered set for `phase`.
	pub fn before_hooks(&self, phase: HydrationPhase) -> Vec<Hook> {
		self.hooks.iter().flat_map(|h| h.before(phase)).collect()
	}

	/// After-hooks of every registered set for `phase`.
	pub fn after_hooks(&self, phase: HydrationPhase) -> Vec<Hook> {
		self.hooks.iter().flat_map(|h| h.after(phase)).collect()
	}

	/// Records entry into `phase`.
	///
	/// Fails unless `phase` directly follows the current one. Returns the
	/// `on_phase` callbacks for the caller to run.
	pub fn enter(&mut self, phase: HydrationPhase) -> Result<Vec<SignalCallback>, HydrationError> {
		if self.phase.next() != Some(phase) {
			return Err(HydrationError::InvalidTransition {
				from: self.phase,
				to: phase,
			});
		}
		debug_log!("hydration phase {} -> {}", self.phase, phase);
		self.phase = phase;
		Ok(self.signal(phase).complete(Ok(())))
	}

	fn signal(&mut self, phase: HydrationPhase) -> &mut Signal {
		self.signals.entry(phase).or_default()
	}

	/// Queues `callback` for when `phase` is entered.
	///
	/// Returns it back when `phase` was already reached.
	pub fn on_phase(&mut self, phase: HydrationPhase, callback: SignalCallback) -> Option<SignalCallback> {
		if self.phase >= phase {
			return Some(callback);
		}
		self.signal(phase).on_complete(callback)
	}

	/// Future resolving once `phase` is entered.
	pub fn wait_for_phase(&mut self, phase: HydrationPhase) -> Completion {
		if self.phase >= phase {
			return Completion::ready(Ok(()));
		}
		self.signal(phase).wait()
	}

	/// Fails every phase not reached yet with `error`.
	pub fn abort(&mut self, error: HydrationError) {
		let current = self.phase;
		for (phase, signal) in self.signals.iter_mut() {
			if *phase > current {
				signal.complete(Err(error.clone()));
			}
		}
		self.hooks.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::executor::block_on;
	use rstest::rstest;
	use std::cell::RefCell;

	#[rstest]
	fn test_enter_requires_next_phase() {
		let mut lifecycle = LifecycleManager::new();
		let Err(err) = lifecycle.enter(HydrationPhase::EffectsRunning) else {
			panic!("skipping a phase must fail");
		};
		assert_eq!(
			err,
			HydrationError::InvalidTransition {
				from: HydrationPhase::NotStarted,
				to: HydrationPhase::EffectsRunning,
			}
		);
		lifecycle.enter(HydrationPhase::ScriptsExecuting).unwrap();
		assert!(lifecycle.is_hydrating());
		assert!(lifecycle.enter(HydrationPhase::ScriptsExecuting).is_err());
	}

	#[rstest]
	fn test_phase_callbacks_fire_on_entry() {
		let mut lifecycle = LifecycleManager::new();
		let log = Rc::new(RefCell::new(Vec::new()));
		let seen = Rc::clone(&log);
		assert!(
			lifecycle
				.on_phase(
					HydrationPhase::LoopsProcessing,
					Box::new(move || seen.borrow_mut().push("loops"))
				)
				.is_none()
		);

		assert!(lifecycle.enter(HydrationPhase::ScriptsExecuting).unwrap().is_empty());
		for callback in lifecycle.enter(HydrationPhase::LoopsProcessing).unwrap() {
			callback();
		}
		assert_eq!(*log.borrow(), vec!["loops"]);
	}

	#[rstest]
	fn test_reached_phase_resolves_immediately() {
		let mut lifecycle = LifecycleManager::new();
		lifecycle.enter(HydrationPhase::ScriptsExecuting).unwrap();
		assert!(
			lifecycle
				.wait_for_phase(HydrationPhase::NotStarted)
				.is_ready()
		);
		assert!(
			lifecycle
				.on_phase(HydrationPhase::ScriptsExecuting, Box::new(|| {}))
				.is_some()
		);
	}

	#[rstest]
	fn test_abort_fails_pending_waiters() {
		let mut lifecycle = LifecycleManager::new();
		let waiter = lifecycle.wait_for_phase(HydrationPhase::Complete);
		lifecycle.abort(HydrationError::Destroyed);
		assert_eq!(block_on(waiter), Err(HydrationError::Destroyed));
	}

	#[rstest]
	fn test_hooks_collected_in_registration_order() {
		let mut lifecycle = LifecycleManager::new();
		let log = Rc::new(RefCell::new(Vec::new()));
		for label in ["first", "second"] {
			let log = Rc::clone(&log);
			lifecycle.register_hooks(
				LifecycleHooks::new().before_effects(move || log.borrow_mut().push(label)),
			);
		}
		for hook in lifecycle.before_hooks(HydrationPhase::EffectsRunning) {
			hook();
		}
		assert_eq!(*log.borrow(), vec!["first", "second"]);
		assert!(lifecycle.after_hooks(HydrationPhase::EffectsRunning).is_empty());
	}
}
