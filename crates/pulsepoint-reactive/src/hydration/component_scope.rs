//! Runtime operations bound to one component namespace.

use std::fmt;
use std::rc::Rc;

use super::effects::{EffectHandle, EffectOptions, IntoEffectCleanup};
use super::runtime::{Binding, BindingError, Runtime};
use crate::config::attrs;
use crate::dom::NodeId;
use crate::expression::EvalError;
use crate::portal::{PortalContent, PortalError, PortalOptions, PortalTarget};
use crate::state::{Ref, StateGetter, StateSetter};
use crate::value::Value;

/// What a component script sees.
///
/// State keys are namespaced under the component, effects and portals are
/// owned by it, and [`clear`](Self::clear) tears all of them down.
#[derive(Clone)]
pub struct ComponentScope {
	runtime: Runtime,
	component: Option<Rc<str>>,
}

impl fmt::Debug for ComponentScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComponentScope")
			.field("component", &self.component)
			.finish_non_exhaustive()
	}
}

impl ComponentScope {
	pub(crate) fn new(runtime: Runtime, component: Option<&str>) -> Self {
		Self {
			runtime,
			component: component.map(Rc::from),
		}
	}

	/// Component name; `None` for the global scope.
	pub fn component(&self) -> Option<&str> {
		self.component.as_deref()
	}

	fn name(&self) -> &str {
		self.component().unwrap_or_default()
	}

	/// The owning runtime.
	pub fn runtime(&self) -> &Runtime {
		&self.runtime
	}

	/// Declares `key` under this component.
	pub fn state(&self, key: &str, initial: impl Into<Value>) -> (StateGetter, StateSetter) {
		self.runtime.state(self.component(), key, initial)
	}

	/// Declares state under a generated key.
	pub fn state_anonymous(&self, initial: impl Into<Value>) -> (StateGetter, StateSetter) {
		self.runtime.state_anonymous(self.component(), initial)
	}

	/// Registers an effect owned by this component.
	///
	/// Bare dependency names resolve against this component first, then its
	/// ancestors, then global state.
	pub fn effect<F, R>(&self, callback: F, options: impl Into<EffectOptions>) -> EffectHandle
	where
		F: Fn() -> R + 'static,
		R: IntoEffectCleanup,
	{
		self.runtime.effect(self.component(), callback, options)
	}

	/// Mutable cell that never notifies.
	pub fn ref_<T>(&self, initial: Option<T>) -> Ref<T> {
		self.runtime.ref_(initial)
	}

	/// Ref to the element marked `pp-ref="{name}"` inside this component.
	///
	/// The ref is empty when no such element is rendered.
	pub fn element_ref(&self, name: &str) -> Ref<NodeId> {
		let doc = self.runtime.document();
		let roots = match self.component() {
			Some(component) => self.runtime.component_elements(component),
			None => vec![doc.root()],
		};
		let found = roots
			.into_iter()
			.flat_map(|root| doc.descendants(root))
			.find(|node| doc.get_attribute(*node, attrs::REF).as_deref() == Some(name));
		Ref::new(found)
	}

	/// Root elements of every rendered instance of this component.
	pub fn root_elements(&self) -> Vec<NodeId> {
		match self.component() {
			Some(component) => self.runtime.component_elements(component),
			None => Vec::new(),
		}
	}

	/// Renders a portal owned by this component.
	pub fn create_portal(
		&self,
		content: impl Into<PortalContent>,
		target: impl Into<PortalTarget>,
		options: PortalOptions,
	) -> Result<String, PortalError> {
		self.runtime
			.create_portal(content, target, self.component(), options)
	}

	/// Evaluates `expression` against the state visible here.
	pub fn evaluate(&self, expression: &str) -> Result<Value, EvalError> {
		self.runtime.evaluate(expression, self.name())
	}

	/// Binds `expression` to `node` within this component.
	pub fn bind_expression(
		&self,
		node: NodeId,
		expression: &str,
		on_update: impl Fn(NodeId, &Value) + 'static,
	) -> Result<Binding, BindingError> {
		self.runtime
			.bind_expression(node, Some(self.name()), expression, on_update)
	}

	/// Removes everything this component owns. Returns the number of state
	/// keys removed.
	pub fn clear(&self) -> usize {
		match self.component() {
			Some(component) => self.runtime.clear_component_state(component),
			None => 0,
		}
	}
}
