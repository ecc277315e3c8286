//! The state store.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use web_time::Instant;

use super::handle::{StateGetter, StateSetter};
use super::scheduler::FlushScheduler;
use super::subscription::{
	PathRelation, StateChange, Subscription, SubscriptionId, SubscriptionManager,
};
use crate::config::RuntimeConfig;
use crate::expression::KeyResolver;
use crate::value::{Value, deep_equal};
use crate::{debug_log, error_log, warn_log};

type StateListener = Rc<dyn Fn(&str)>;

#[derive(Debug, Default)]
struct PendingUpdates {
	// Write order, each key once.
	keys: Vec<String>,
	// Value before the first write of the window.
	previous: HashMap<String, Value>,
}

pub(crate) struct StateInner {
	pub(super) store: RefCell<BTreeMap<String, Value>>,
	subscriptions: RefCell<SubscriptionManager>,
	pending: RefCell<PendingUpdates>,
	listeners: RefCell<Vec<(u64, StateListener)>>,
	next_listener: Cell<u64>,
	dom_update_callbacks: RefCell<Vec<Box<dyn FnOnce()>>>,
	context_cache: RefCell<HashMap<String, Rc<BTreeMap<String, Value>>>>,
	scheduler: RefCell<FlushScheduler>,
	suspended: Cell<bool>,
	batch_depth: Cell<usize>,
	flushing: Cell<bool>,
	key_generation: Cell<u64>,
	destroyed: Cell<bool>,
	max_flush_rounds: usize,
}

/// Handle returned by [`StateManager::on_state_change`].
#[must_use = "dropping the handle keeps the listener registered"]
pub struct Unsubscribe {
	store: Weak<StateInner>,
	id: u64,
}

impl Unsubscribe {
	/// Removes the listener. Returns whether it was still registered.
	pub fn unsubscribe(self) -> bool {
		let Some(inner) = self.store.upgrade() else {
			return false;
		};
		let mut listeners = inner.listeners.borrow_mut();
		let before = listeners.len();
		listeners.retain(|(id, _)| *id != self.id);
		listeners.len() != before
	}
}

impl fmt::Debug for Unsubscribe {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Unsubscribe").field("id", &self.id).finish()
	}
}

struct BatchGuard<'a>(&'a Cell<usize>);

impl Drop for BatchGuard<'_> {
	fn drop(&mut self) {
		self.0.set(self.0.get().saturating_sub(1));
	}
}

/// Namespaced key/value store with selective change notification.
///
/// Full keys are `"{component}.{name}"`; component names may themselves be
/// hierarchical (`app.header`). Writes are recorded as pending and applied to
/// subscribers in one flush: either after the debounce window
/// ([`run_scheduled`](Self::run_scheduled)), at the end of the outermost
/// [`batch`](Self::batch), or on an explicit
/// [`flush_updates`](Self::flush_updates). Each subscription runs at most
/// once per flush.
///
/// The handle is cheap to clone; clones share one store.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use pulsepoint_reactive::state::{StateManager, Subscription};
/// use pulsepoint_reactive::value::Value;
///
/// let state = StateManager::new();
/// let (count, set_count) = state.create_state(Some("Counter"), "count", Value::from(0));
///
/// let runs = Rc::new(Cell::new(0));
/// let seen = Rc::clone(&runs);
/// state.add_subscription(Subscription::new(["Counter.count"], move |_, _| {
///     seen.set(seen.get() + 1);
/// }));
///
/// state.batch(|| {
///     set_count.set(1);
///     set_count.set(2);
/// });
/// assert_eq!(count.get(), Value::from(2));
/// assert_eq!(runs.get(), 1);
/// ```
#[derive(Clone)]
pub struct StateManager {
	inner: Rc<StateInner>,
}

impl Default for StateManager {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Debug for StateManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StateManager")
			.field("keys", &self.inner.store.borrow().len())
			.field("subscriptions", &self.inner.subscriptions.borrow().get_stats())
			.field("suspended", &self.inner.suspended.get())
			.field("destroyed", &self.inner.destroyed.get())
			.finish_non_exhaustive()
	}
}

impl StateManager {
	/// Creates a store with default configuration.
	pub fn new() -> Self {
		Self::with_config(&RuntimeConfig::default())
	}

	/// Creates a store using the debounce and flush bounds of `config`.
	pub fn with_config(config: &RuntimeConfig) -> Self {
		Self {
			inner: Rc::new(StateInner {
				store: RefCell::new(BTreeMap::new()),
				subscriptions: RefCell::new(SubscriptionManager::new()),
				pending: RefCell::new(PendingUpdates::default()),
				listeners: RefCell::new(Vec::new()),
				next_listener: Cell::new(0),
				dom_update_callbacks: RefCell::new(Vec::new()),
				context_cache: RefCell::new(HashMap::new()),
				scheduler: RefCell::new(FlushScheduler::new(config.debounce())),
				suspended: Cell::new(false),
				batch_depth: Cell::new(0),
				flushing: Cell::new(false),
				key_generation: Cell::new(0),
				destroyed: Cell::new(false),
				max_flush_rounds: config.max_flush_rounds,
			}),
		}
	}

	pub(crate) fn from_inner(inner: Rc<StateInner>) -> Self {
		Self { inner }
	}

	fn downgrade(&self) -> Weak<StateInner> {
		Rc::downgrade(&self.inner)
	}

	/// Whether both handles share one store.
	pub fn ptr_eq(&self, other: &StateManager) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	/// Value stored under `key`.
	pub fn get(&self, key: &str) -> Option<Value> {
		self.inner.store.borrow().get(key).cloned()
	}

	/// Whether `key` exists.
	pub fn has_state(&self, key: &str) -> bool {
		self.inner.store.borrow().contains_key(key)
	}

	/// Snapshot of every key.
	pub fn get_state(&self) -> BTreeMap<String, Value> {
		self.inner.store.borrow().clone()
	}

	/// Counter bumped whenever a key is created or removed.
	pub fn key_generation(&self) -> u64 {
		self.inner.key_generation.get()
	}

	fn bump_generation(&self) {
		self.inner
			.key_generation
			.set(self.inner.key_generation.get() + 1);
		self.invalidate_context_cache();
	}

	/// Resolves a bare `name` read from `component`.
	///
	/// Tries `component.name`, then each enclosing namespace obtained by
	/// stripping trailing segments of `component`, then the global `name`.
	pub fn find_existing_state_key(&self, name: &str, component: &str) -> Option<String> {
		let store = self.inner.store.borrow();
		let mut namespace = (!component.is_empty()).then_some(component);
		while let Some(ns) = namespace {
			let key = format!("{}.{}", ns, name);
			if store.contains_key(&key) {
				return Some(key);
			}
			namespace = ns.rfind('.').map(|dot| &ns[..dot]);
		}
		store.contains_key(name).then(|| name.to_string())
	}

	/// Flattened bare-name → value view for `component`.
	///
	/// Global keys come first and each nested namespace overrides its
	/// parent, so the nearest declaration wins. Memoized until the next
	/// write.
	pub fn component_context(&self, component: &str) -> Rc<BTreeMap<String, Value>> {
		if let Some(cached) = self.inner.context_cache.borrow().get(component) {
			return Rc::clone(cached);
		}

		let store = self.inner.store.borrow();
		let mut context: BTreeMap<String, Value> = store
			.iter()
			.filter(|(key, _)| !key.contains('.'))
			.map(|(key, value)| (key.clone(), value.clone()))
			.collect();

		let mut namespaces = Vec::new();
		if !component.is_empty() {
			let mut end = 0;
			for (i, c) in component.char_indices() {
				if c == '.' {
					namespaces.push(&component[..i]);
				}
				end = i + c.len_utf8();
			}
			namespaces.push(&component[..end]);
		}
		for ns in namespaces {
			let prefix = format!("{}.", ns);
			for (key, value) in store
				.range(prefix.clone()..)
				.take_while(|(key, _)| key.starts_with(&prefix))
			{
				let name = &key[prefix.len()..];
				if !name.contains('.') {
					context.insert(name.to_string(), value.clone());
				}
			}
		}
		drop(store);

		let context = Rc::new(context);
		self.inner
			.context_cache
			.borrow_mut()
			.insert(component.to_string(), Rc::clone(&context));
		context
	}

	/// Drops every memoized component context.
	pub fn invalidate_context_cache(&self) {
		self.inner.context_cache.borrow_mut().clear();
	}

	/// Seeds `key` without notifying anyone.
	pub fn set_initial_state(&self, key: &str, value: impl Into<Value>) {
		let created = self
			.inner
			.store
			.borrow_mut()
			.insert(key.to_string(), value.into())
			.is_none();
		if created {
			self.bump_generation();
		} else {
			self.invalidate_context_cache();
		}
	}

	/// Writes `key` and records the change for the next flush.
	///
	/// A value deeply equal to the current one is ignored.
	pub fn set_state(&self, key: &str, value: impl Into<Value>) {
		if self.inner.destroyed.get() {
			warn_log!("set_state({}) on a destroyed store", key);
			return;
		}
		let value = value.into();
		let previous = {
			let mut store = self.inner.store.borrow_mut();
			let previous = store.get(key).cloned();
			if previous.as_ref().is_some_and(|prev| deep_equal(prev, &value)) {
				return;
			}
			store.insert(key.to_string(), value);
			previous
		};

		if previous.is_none() {
			self.bump_generation();
		} else {
			self.invalidate_context_cache();
		}

		{
			let mut pending = self.inner.pending.borrow_mut();
			if !pending.keys.iter().any(|k| k == key) {
				pending.keys.push(key.to_string());
			}
			pending
				.previous
				.entry(key.to_string())
				.or_insert_with(|| previous.unwrap_or_default());
		}

		if self.inner.batch_depth.get() == 0 {
			self.inner.scheduler.borrow_mut().schedule(Instant::now());
		}
	}

	/// Writes `key` with a value computed from the current one.
	pub fn update_state(&self, key: &str, f: impl FnOnce(&Value) -> Value) {
		let current = self.get(key).unwrap_or_default();
		self.set_state(key, f(&current));
	}

	/// Runs `f` with notifications deferred; the outermost batch flushes
	/// synchronously when it ends.
	pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
		self.inner
			.batch_depth
			.set(self.inner.batch_depth.get() + 1);
		let result = {
			let _guard = BatchGuard(&self.inner.batch_depth);
			f()
		};
		if self.inner.batch_depth.get() == 0 && self.has_pending() {
			if self.inner.flushing.get() {
				self.inner.scheduler.borrow_mut().schedule(Instant::now());
			} else {
				self.flush_updates();
			}
		}
		result
	}

	/// Alias of [`batch`](Self::batch).
	pub fn batch_state_updates<T>(&self, f: impl FnOnce() -> T) -> T {
		self.batch(f)
	}

	fn has_pending(&self) -> bool {
		!self.inner.pending.borrow().keys.is_empty()
	}

	/// Whether a debounced flush is waiting.
	pub fn has_scheduled_flush(&self) -> bool {
		self.inner.scheduler.borrow().is_scheduled()
	}

	/// Runs the debounced flush if it is due at `now`.
	pub fn run_scheduled(&self, now: Instant) -> bool {
		if self.inner.suspended.get() || !self.inner.scheduler.borrow().is_due(now) {
			return false;
		}
		self.flush_updates();
		true
	}

	/// Notifies every subscription affected by the pending writes.
	///
	/// Writes made by callbacks while the flush runs stay pending for the
	/// next flush. A panicking callback is logged and does not stop the
	/// others.
	pub fn flush_updates(&self) {
		if self.inner.flushing.get() || self.inner.suspended.get() {
			return;
		}
		let pending = std::mem::take(&mut *self.inner.pending.borrow_mut());
		self.inner.scheduler.borrow_mut().cancel();

		if !pending.keys.is_empty() {
			self.inner.flushing.set(true);
			let targets = self.collect_notifications(&pending);
			debug_log!(
				"flushing {} keys to {} subscriptions",
				pending.keys.len(),
				targets.len()
			);

			for (subscription, change) in targets {
				let live = self
					.inner
					.subscriptions
					.borrow()
					.get_subscription(subscription.id)
					.is_some();
				if !live {
					continue;
				}
				let callback = Rc::clone(&subscription.callback);
				let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
					callback(subscription.element, &change)
				}));
				if outcome.is_err() {
					error_log!(
						"subscription {} ({}) panicked while handling {}",
						subscription.id,
						subscription.selector,
						change.key
					);
				}
			}

			let listeners: Vec<StateListener> = self
				.inner
				.listeners
				.borrow()
				.iter()
				.map(|(_, listener)| Rc::clone(listener))
				.collect();
			for key in &pending.keys {
				for listener in &listeners {
					if panic::catch_unwind(AssertUnwindSafe(|| listener(key))).is_err() {
						error_log!("state listener panicked while handling {}", key);
					}
				}
			}
			self.inner.flushing.set(false);
		}

		let callbacks = std::mem::take(&mut *self.inner.dom_update_callbacks.borrow_mut());
		for callback in callbacks {
			callback();
		}
	}

	/// Flushes repeatedly until nothing is pending, bounded by the
	/// configured number of rounds. Returns the rounds run.
	pub fn flush_all(&self) -> usize {
		if self.inner.suspended.get() {
			return 0;
		}
		let mut rounds = 0;
		while self.has_pending() {
			if rounds == self.inner.max_flush_rounds {
				warn_log!(
					"state still changing after {} flush rounds; deferring the rest",
					rounds
				);
				self.inner.scheduler.borrow_mut().schedule(Instant::now());
				break;
			}
			self.flush_updates();
			rounds += 1;
		}
		rounds
	}

	fn collect_notifications(&self, pending: &PendingUpdates) -> Vec<(Subscription, StateChange)> {
		let subscriptions = self.inner.subscriptions.borrow();
		let store = self.inner.store.borrow();
		let mut seen: HashSet<SubscriptionId> = HashSet::new();
		let mut out = Vec::new();

		for key in &pending.keys {
			for found in subscriptions.matching(key) {
				if seen.contains(&found.id) {
					continue;
				}
				let changed = found.paths.iter().any(|matched| {
					if matched.relation != PathRelation::Descendant {
						return true;
					}
					let path = &matched.dependency[key.len() + 1..];
					let before = pending
						.previous
						.get(key)
						.map(|v| v.get_path(path))
						.unwrap_or_default();
					let after = store
						.get(key)
						.map(|v| v.get_path(path))
						.unwrap_or_default();
					!deep_equal(&before, &after)
				});
				if !changed {
					continue;
				}
				if let Some(subscription) = subscriptions.get_subscription(found.id) {
					seen.insert(found.id);
					out.push((
						subscription.clone(),
						StateChange { key: key.clone() },
					));
				}
			}
		}
		out
	}

	/// Stops notifying subscribers; writes keep accumulating.
	pub fn suspend_subscriptions(&self) {
		self.inner.suspended.set(true);
	}

	/// Resumes notification and schedules a flush for anything written while
	/// suspended.
	pub fn resume_subscriptions(&self) {
		self.inner.suspended.set(false);
		if self.has_pending() {
			self.inner.scheduler.borrow_mut().schedule(Instant::now());
		}
	}

	/// Whether notifications are suspended.
	pub fn is_suspended(&self) -> bool {
		self.inner.suspended.get()
	}

	/// Calls `callback` with every key applied by a flush.
	pub fn on_state_change(&self, callback: impl Fn(&str) + 'static) -> Unsubscribe {
		let id = self.inner.next_listener.get();
		self.inner.next_listener.set(id + 1);
		self.inner
			.listeners
			.borrow_mut()
			.push((id, Rc::new(callback)));
		Unsubscribe {
			store: self.downgrade(),
			id,
		}
	}

	/// Runs `callback` once after the next flush has applied its updates.
	pub fn on_dom_update_complete(&self, callback: impl FnOnce() + 'static) {
		self.inner
			.dom_update_callbacks
			.borrow_mut()
			.push(Box::new(callback));
		if !self.has_scheduled_flush() {
			self.inner.scheduler.borrow_mut().schedule(Instant::now());
		}
	}

	/// Registers a subscription.
	pub fn add_subscription(&self, subscription: Subscription) -> SubscriptionId {
		self.inner
			.subscriptions
			.borrow_mut()
			.add_subscription(subscription)
	}

	/// Unregisters a subscription.
	pub fn remove_subscription(&self, id: SubscriptionId) -> bool {
		self.inner.subscriptions.borrow_mut().remove_subscription(id)
	}

	/// Read access to the subscription registry.
	pub fn subscriptions(&self) -> Ref<'_, SubscriptionManager> {
		self.inner.subscriptions.borrow()
	}

	pub(crate) fn with_subscriptions<R>(&self, f: impl FnOnce(&mut SubscriptionManager) -> R) -> R {
		f(&mut self.inner.subscriptions.borrow_mut())
	}

	/// Copy of the dependency index.
	pub fn key_index(&self) -> BTreeMap<String, BTreeSet<SubscriptionId>> {
		self.inner.subscriptions.borrow().key_index().clone()
	}

	/// Removes every subscription.
	pub fn clear_subscriptions(&self) {
		self.inner.subscriptions.borrow_mut().clear();
	}

	/// Removes the subscriptions of `component` and its nested components.
	pub fn clear_component_subscriptions(&self, component: &str) -> usize {
		self.inner
			.subscriptions
			.borrow_mut()
			.clear_component(component)
	}

	/// Removes every key and pending write.
	pub fn clear_state(&self) {
		self.inner.store.borrow_mut().clear();
		*self.inner.pending.borrow_mut() = PendingUpdates::default();
		self.inner.scheduler.borrow_mut().cancel();
		self.bump_generation();
	}

	/// Removes the keys and subscriptions of `component` and its nested
	/// components. Returns the number of keys removed.
	pub fn clear_component_state(&self, component: &str) -> usize {
		let prefix = format!("{}.", component);
		let removed = {
			let mut store = self.inner.store.borrow_mut();
			let before = store.len();
			store.retain(|key, _| !key.starts_with(&prefix));
			before - store.len()
		};
		{
			let mut pending = self.inner.pending.borrow_mut();
			pending.keys.retain(|key| !key.starts_with(&prefix));
			pending.previous.retain(|key, _| !key.starts_with(&prefix));
		}
		if removed > 0 {
			self.bump_generation();
		}
		self.clear_component_subscriptions(component);
		removed
	}

	/// Declares `key` (namespaced under `component` when given) and returns
	/// its handles. An existing value, e.g. one restored from a server
	/// snapshot, is kept.
	pub fn create_state(
		&self,
		component: Option<&str>,
		key: &str,
		initial: Value,
	) -> (StateGetter, StateSetter) {
		let full_key = match component {
			Some(component) if !component.is_empty() => format!("{}.{}", component, key),
			_ => key.to_string(),
		};
		if !self.has_state(&full_key) {
			self.set_initial_state(&full_key, initial);
		}
		(
			self.getter(&full_key),
			StateSetter::new(&full_key, self.downgrade()),
		)
	}

	/// Read handle for an existing or future `full_key`.
	pub fn getter(&self, full_key: &str) -> StateGetter {
		let (component, key) = match full_key.rfind('.') {
			Some(dot) => (Some(&full_key[..dot]), &full_key[dot + 1..]),
			None => (None, full_key),
		};
		StateGetter::new(key, full_key, component, self.downgrade())
	}

	/// Write handle for `full_key`.
	pub fn setter(&self, full_key: &str) -> StateSetter {
		StateSetter::new(full_key, self.downgrade())
	}

	/// Clears everything; later writes are ignored with a warning.
	pub fn destroy(&self) {
		self.clear_state();
		self.clear_subscriptions();
		self.inner.listeners.borrow_mut().clear();
		self.inner.dom_update_callbacks.borrow_mut().clear();
		self.inner.destroyed.set(true);
	}

	/// Whether [`destroy`](Self::destroy) was called.
	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.get()
	}
}

impl KeyResolver for StateManager {
	fn find_existing_state_key(&self, name: &str, component: &str) -> Option<String> {
		StateManager::find_existing_state_key(self, name, component)
	}

	fn key_generation(&self) -> u64 {
		StateManager::key_generation(self)
	}
}
