//! Side effects re-run when the state they depend on changes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::state::{StateGetter, StateManager, Subscription, SubscriptionId};
use crate::{debug_log, error_log};

/// Cleanup returned by an effect run; called before the next run and on
/// disposal.
pub type EffectCleanup = Box<dyn FnOnce()>;

/// Values an effect callback may return.
pub trait IntoEffectCleanup {
	/// Converts into an optional cleanup.
	fn into_cleanup(self) -> Option<EffectCleanup>;
}

impl IntoEffectCleanup for () {
	fn into_cleanup(self) -> Option<EffectCleanup> {
		None
	}
}

impl IntoEffectCleanup for EffectCleanup {
	fn into_cleanup(self) -> Option<EffectCleanup> {
		Some(self)
	}
}

impl IntoEffectCleanup for Option<EffectCleanup> {
	fn into_cleanup(self) -> Option<EffectCleanup> {
		self
	}
}

/// One dependency of an effect.
#[derive(Debug, Clone)]
pub enum EffectDep {
	/// A key, bare or fully qualified; bare keys resolve through the
	/// declaring component's namespaces.
	Key(String),
	/// The key behind a getter.
	Getter(StateGetter),
}

impl From<&str> for EffectDep {
	fn from(key: &str) -> Self {
		EffectDep::Key(key.to_string())
	}
}

impl From<String> for EffectDep {
	fn from(key: String) -> Self {
		EffectDep::Key(key)
	}
}

impl From<StateGetter> for EffectDep {
	fn from(getter: StateGetter) -> Self {
		EffectDep::Getter(getter)
	}
}

impl From<&StateGetter> for EffectDep {
	fn from(getter: &StateGetter) -> Self {
		EffectDep::Getter(getter.clone())
	}
}

/// How an effect is registered.
#[derive(Debug, Clone)]
pub struct EffectOptions {
	/// State the effect re-runs on. Empty means run once.
	pub deps: Vec<EffectDep>,
	/// Run right away when effects already started. Defaults to `true`.
	pub immediate: bool,
}

impl Default for EffectOptions {
	fn default() -> Self {
		Self {
			deps: Vec::new(),
			immediate: true,
		}
	}
}

impl EffectOptions {
	/// Options with the given dependencies.
	pub fn deps<I, D>(deps: I) -> Self
	where
		I: IntoIterator<Item = D>,
		D: Into<EffectDep>,
	{
		Self {
			deps: deps.into_iter().map(Into::into).collect(),
			..Self::default()
		}
	}

	/// Sets [`immediate`](Self::immediate).
	pub fn immediate(mut self, immediate: bool) -> Self {
		self.immediate = immediate;
		self
	}
}

impl<D: Into<EffectDep>> From<Vec<D>> for EffectOptions {
	fn from(deps: Vec<D>) -> Self {
		EffectOptions::deps(deps)
	}
}

pub(crate) struct Effect {
	component: Option<String>,
	deps: Vec<EffectDep>,
	callback: Box<dyn Fn() -> Option<EffectCleanup>>,
	cleanup: RefCell<Option<EffectCleanup>>,
	subscription: Cell<Option<SubscriptionId>>,
	activated: Cell<bool>,
	disposed: Cell<bool>,
}

impl Effect {
	pub(crate) fn new<F, R>(component: Option<&str>, deps: Vec<EffectDep>, callback: F) -> Rc<Self>
	where
		F: Fn() -> R + 'static,
		R: IntoEffectCleanup,
	{
		Rc::new(Self {
			component: component.map(str::to_string),
			deps,
			callback: Box::new(move || callback().into_cleanup()),
			cleanup: RefCell::new(None),
			subscription: Cell::new(None),
			activated: Cell::new(false),
			disposed: Cell::new(false),
		})
	}

	pub(crate) fn component(&self) -> Option<&str> {
		self.component.as_deref()
	}

	pub(crate) fn is_disposed(&self) -> bool {
		self.disposed.get()
	}

	fn resolve_deps(&self, state: &StateManager) -> Vec<String> {
		let mut keys: Vec<String> = Vec::with_capacity(self.deps.len());
		for dep in &self.deps {
			let key = match dep {
				EffectDep::Getter(getter) => getter.full_key().to_string(),
				EffectDep::Key(key) => self
					.component
					.as_deref()
					.and_then(|component| state.find_existing_state_key(key, component))
					.unwrap_or_else(|| key.clone()),
			};
			if !keys.contains(&key) {
				keys.push(key);
			}
		}
		keys
	}

	/// Subscribes the effect to its dependencies, running it first when
	/// `run_now` is set.
	pub(crate) fn activate(self: &Rc<Self>, state: &StateManager, run_now: bool) {
		if self.is_disposed() || self.activated.replace(true) {
			return;
		}
		if run_now {
			self.run();
		}
		let keys = self.resolve_deps(state);
		if keys.is_empty() || self.is_disposed() {
			return;
		}
		debug_log!("effect subscribed to {:?}", keys);
		let effect = Rc::clone(self);
		let mut subscription = Subscription::new(keys, move |_, _| effect.run())
			.with_selector("effect");
		if let Some(component) = &self.component {
			subscription = subscription.with_component(component.clone());
		}
		self.subscription.set(Some(state.add_subscription(subscription)));
	}

	/// Runs the previous cleanup, then the callback.
	pub(crate) fn run(&self) {
		if self.is_disposed() {
			return;
		}
		self.run_cleanup();
		match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)())) {
			Ok(cleanup) => *self.cleanup.borrow_mut() = cleanup,
			Err(_) => error_log!(
				"effect in {} panicked",
				self.component.as_deref().unwrap_or("<global>")
			),
		}
	}

	fn run_cleanup(&self) {
		let cleanup = self.cleanup.borrow_mut().take();
		if let Some(cleanup) = cleanup {
			if panic::catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
				error_log!("effect cleanup panicked");
			}
		}
	}

	/// Unsubscribes and runs the pending cleanup. Idempotent.
	pub(crate) fn dispose(&self, state: &StateManager) {
		if self.disposed.replace(true) {
			return;
		}
		if let Some(id) = self.subscription.take() {
			state.remove_subscription(id);
		}
		self.run_cleanup();
	}
}

impl fmt::Debug for Effect {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Effect")
			.field("component", &self.component)
			.field("deps", &self.deps)
			.field("subscription", &self.subscription.get())
			.field("disposed", &self.disposed.get())
			.finish_non_exhaustive()
	}
}

/// Handle returned when registering an effect.
#[must_use = "dropping the handle keeps the effect alive"]
pub struct EffectHandle {
	effect: Rc<Effect>,
	state: StateManager,
}

impl EffectHandle {
	pub(crate) fn new(effect: Rc<Effect>, state: StateManager) -> Self {
		Self { effect, state }
	}

	/// Stops the effect and runs its cleanup.
	pub fn dispose(self) {
		self.effect.dispose(&self.state);
	}

	/// Whether the effect was disposed, by this handle or by teardown.
	pub fn is_disposed(&self) -> bool {
		self.effect.is_disposed()
	}
}

impl fmt::Debug for EffectHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EffectHandle")
			.field("effect", &self.effect)
			.finish()
	}
}

/// Effects waiting for the effects phase and effects already running.
#[derive(Debug, Default)]
pub(crate) struct EffectRegistry {
	pending: Vec<Rc<Effect>>,
	active: Vec<Rc<Effect>>,
}

impl EffectRegistry {
	pub(crate) fn defer(&mut self, effect: Rc<Effect>) {
		self.pending.push(effect);
	}

	pub(crate) fn track(&mut self, effect: Rc<Effect>) {
		self.active.retain(|e| !e.is_disposed());
		self.active.push(effect);
	}

	/// Moves every pending effect to the active list and returns them.
	pub(crate) fn take_pending(&mut self) -> Vec<Rc<Effect>> {
		let pending = std::mem::take(&mut self.pending);
		self.active.extend(pending.iter().cloned());
		pending
	}

	#[cfg(test)]
	fn pending_len(&self) -> usize {
		self.pending.len()
	}

	/// Removes the effects of `component` and its nested components so the
	/// caller can dispose them.
	pub(crate) fn take_component(&mut self, component: &str) -> Vec<Rc<Effect>> {
		let nested = format!("{}.", component);
		let owned = |effect: &Rc<Effect>| {
			effect
				.component()
				.is_some_and(|c| c == component || c.starts_with(&nested))
		};
		let mut taken = Vec::new();
		for list in [&mut self.pending, &mut self.active] {
			let (mine, rest): (Vec<_>, Vec<_>) = list.drain(..).partition(|e| owned(e));
			*list = rest;
			taken.extend(mine);
		}
		taken
	}

	pub(crate) fn take_all(&mut self) -> Vec<Rc<Effect>> {
		let mut all = std::mem::take(&mut self.pending);
		all.append(&mut self.active);
		all
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::value::Value;
	use rstest::{fixture, rstest};

	#[fixture]
	fn state() -> StateManager {
		StateManager::new()
	}

	fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
		let runs = Rc::new(Cell::new(0));
		let seen = Rc::clone(&runs);
		(runs, move || seen.set(seen.get() + 1))
	}

	#[rstest]
	fn test_effect_reruns_on_dependency_change(state: StateManager) {
		let (count, set_count) = state.create_state(Some("App"), "count", Value::from(0));
		let (runs, bump) = counter();
		let effect = Effect::new(Some("App"), vec![EffectDep::from(&count)], bump);
		effect.activate(&state, true);
		assert_eq!(runs.get(), 1);

		set_count.set(1);
		state.flush_updates();
		assert_eq!(runs.get(), 2);

		set_count.set(1);
		state.flush_updates();
		assert_eq!(runs.get(), 2);
	}

	#[rstest]
	fn test_bare_key_resolves_through_ancestors(state: StateManager) {
		state.set_initial_state("App.theme", "dark");
		let (runs, bump) = counter();
		let effect = Effect::new(Some("App.Header"), vec!["theme".into()], bump);
		effect.activate(&state, true);

		state.set_state("App.theme", "light");
		state.flush_updates();
		assert_eq!(runs.get(), 2);
	}

	#[rstest]
	fn test_no_deps_runs_once_without_subscribing(state: StateManager) {
		let (runs, bump) = counter();
		let effect = Effect::new(None, Vec::new(), bump);
		effect.activate(&state, true);
		effect.activate(&state, true);
		assert_eq!(runs.get(), 1);
		assert_eq!(state.subscriptions().get_stats().total_subscriptions, 0);
	}

	#[rstest]
	fn test_cleanup_runs_before_rerun_and_on_dispose(state: StateManager) {
		state.set_initial_state("n", 0);
		let cleanups = Rc::new(Cell::new(0));
		let seen = Rc::clone(&cleanups);
		let effect = Effect::new(None, vec!["n".into()], move || -> EffectCleanup {
			let seen = Rc::clone(&seen);
			Box::new(move || seen.set(seen.get() + 1))
		});
		effect.activate(&state, true);
		assert_eq!(cleanups.get(), 0);

		state.set_state("n", 1);
		state.flush_updates();
		assert_eq!(cleanups.get(), 1);

		effect.dispose(&state);
		effect.dispose(&state);
		assert_eq!(cleanups.get(), 2);
		assert_eq!(state.subscriptions().get_stats().total_subscriptions, 0);
	}

	#[rstest]
	fn test_deferred_effect_waits_for_change(state: StateManager) {
		state.set_initial_state("n", 0);
		let (runs, bump) = counter();
		let effect = Effect::new(None, vec!["n".into()], bump);
		effect.activate(&state, false);
		assert_eq!(runs.get(), 0);

		state.set_state("n", 1);
		state.flush_updates();
		assert_eq!(runs.get(), 1);
	}

	#[rstest]
	fn test_panicking_effect_is_contained(state: StateManager) {
		let effect = Effect::new(None, Vec::new(), || -> () { panic!("boom") });
		effect.activate(&state, true);
		assert!(!effect.is_disposed());
	}

	#[rstest]
	fn test_registry_hands_out_nested_components(state: StateManager) {
		let mut registry = EffectRegistry::default();
		for component in ["App", "App.Header", "Sidebar"] {
			registry.defer(Effect::new(Some(component), Vec::new(), || {}));
		}
		let owned = registry.take_component("App");
		assert_eq!(owned.len(), 2);
		for effect in &owned {
			effect.dispose(&state);
			assert!(effect.is_disposed());
		}
		assert_eq!(registry.pending_len(), 1);
		assert_eq!(registry.take_all().len(), 1);
		assert_eq!(registry.pending_len(), 0);
	}

	#[rstest]
	fn test_options_from_dependency_list() {
		let options = EffectOptions::from(vec!["a", "b"]).immediate(false);
		assert_eq!(options.deps.len(), 2);
		assert!(!options.immediate);
		assert!(EffectOptions::default().immediate);
	}
}
