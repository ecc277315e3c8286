//! Handles returned to component code.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::manager::{StateInner, StateManager};
use crate::value::Value;
use crate::warn_log;

/// Read access to one state key.
pub trait StateRead {
	/// Fully-qualified key read by this handle.
	fn full_key(&self) -> &str;

	/// Current value; `Undefined` when the key or the store is gone.
	fn read(&self) -> Value;
}

/// Live read handle for one state key.
///
/// Cloning is cheap. The handle does not keep the store alive.
#[derive(Clone)]
pub struct StateGetter {
	key: Rc<str>,
	full_key: Rc<str>,
	component: Option<Rc<str>>,
	store: Weak<StateInner>,
}

impl StateGetter {
	pub(crate) fn new(key: &str, full_key: &str, component: Option<&str>, store: Weak<StateInner>) -> Self {
		Self {
			key: key.into(),
			full_key: full_key.into(),
			component: component.map(Into::into),
			store,
		}
	}

	/// Bare key as declared.
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Namespaced key.
	pub fn full_key(&self) -> &str {
		&self.full_key
	}

	/// Declaring component, `None` for global state.
	pub fn component(&self) -> Option<&str> {
		self.component.as_deref()
	}

	/// Current value.
	pub fn get(&self) -> Value {
		self.store
			.upgrade()
			.and_then(|inner| StateManager::from_inner(inner).get(&self.full_key))
			.unwrap_or_default()
	}
}

impl StateRead for StateGetter {
	fn full_key(&self) -> &str {
		&self.full_key
	}

	fn read(&self) -> Value {
		self.get()
	}
}

impl fmt::Debug for StateGetter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StateGetter")
			.field("full_key", &self.full_key)
			.finish_non_exhaustive()
	}
}

/// A write: either a replacement value or a function of the previous one.
pub enum SetStateAction {
	/// Replace the value.
	Value(Value),
	/// Compute the value from the previous one.
	Update(Box<dyn FnOnce(&Value) -> Value>),
}

impl fmt::Debug for SetStateAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SetStateAction::Value(value) => f.debug_tuple("Value").field(value).finish(),
			SetStateAction::Update(_) => f.write_str("Update(..)"),
		}
	}
}

/// Write handle for one state key.
#[derive(Clone)]
pub struct StateSetter {
	full_key: Rc<str>,
	store: Weak<StateInner>,
}

impl StateSetter {
	pub(crate) fn new(full_key: &str, store: Weak<StateInner>) -> Self {
		Self {
			full_key: full_key.into(),
			store,
		}
	}

	/// Namespaced key written by this handle.
	pub fn full_key(&self) -> &str {
		&self.full_key
	}

	/// Replaces the value.
	pub fn set(&self, value: impl Into<Value>) {
		self.apply(SetStateAction::Value(value.into()));
	}

	/// Computes the value from the previous one.
	pub fn update(&self, f: impl FnOnce(&Value) -> Value + 'static) {
		self.apply(SetStateAction::Update(Box::new(f)));
	}

	/// Applies `action` to the store.
	pub fn apply(&self, action: SetStateAction) {
		let Some(inner) = self.store.upgrade() else {
			warn_log!("write to {} after its store was dropped", self.full_key);
			return;
		};
		let manager = StateManager::from_inner(inner);
		match action {
			SetStateAction::Value(value) => manager.set_state(&self.full_key, value),
			SetStateAction::Update(f) => manager.update_state(&self.full_key, f),
		}
	}
}

impl fmt::Debug for StateSetter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StateSetter")
			.field("full_key", &self.full_key)
			.finish_non_exhaustive()
	}
}

/// Mutable cell that survives re-renders, typically holding an element.
///
/// # Example
///
/// ```
/// use pulsepoint_reactive::state::Ref;
///
/// let input: Ref<u32> = Ref::new(None);
/// assert_eq!(input.current(), None);
/// input.set(7);
/// assert_eq!(input.current(), Some(7));
/// assert_eq!(input.take(), Some(7));
/// assert!(!input.is_set());
/// ```
#[derive(Debug)]
pub struct Ref<T> {
	current: Rc<RefCell<Option<T>>>,
}

impl<T> Clone for Ref<T> {
	fn clone(&self) -> Self {
		Self {
			current: Rc::clone(&self.current),
		}
	}
}

impl<T> Default for Ref<T> {
	fn default() -> Self {
		Self::new(None)
	}
}

impl<T> Ref<T> {
	/// Creates a ref with an optional initial value.
	pub fn new(initial: Option<T>) -> Self {
		Self {
			current: Rc::new(RefCell::new(initial)),
		}
	}

	/// Stores `value`.
	pub fn set(&self, value: T) {
		*self.current.borrow_mut() = Some(value);
	}

	/// Removes and returns the value.
	pub fn take(&self) -> Option<T> {
		self.current.borrow_mut().take()
	}

	/// Whether a value is stored.
	pub fn is_set(&self) -> bool {
		self.current.borrow().is_some()
	}

	/// Runs `f` with a reference to the stored value.
	pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
		f(self.current.borrow().as_ref())
	}
}

impl<T: Clone> Ref<T> {
	/// Copy of the stored value.
	pub fn current(&self) -> Option<T> {
		self.current.borrow().clone()
	}
}
