//! The runtime facade.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use futures::channel::mpsc::UnboundedReceiver;
use futures::future::join_all;
use thiserror::Error;
use web_time::Instant;

use super::completion::{Completion, SignalCallback};
use super::component_scope::ComponentScope;
use super::effects::{Effect, EffectHandle, EffectOptions, EffectRegistry, IntoEffectCleanup};
use super::lifecycle::{Hook, LifecycleHooks, LifecycleManager};
use super::phase::HydrationPhase;
use super::{HydrationDelegate, HydrationError, NoopDelegate};
use crate::cache::{CacheStats, Cacheable};
use crate::config::{ConfigError, MUSTACHE_OPEN, RuntimeConfig, attrs};
use crate::dom::{Document, MutationEvent, NodeId};
use crate::dom_cache::DomCache;
use crate::expression::{EvalError, ExpressionEvaluator, ExpressionValidator};
use crate::portal::{Portal, PortalContent, PortalError, PortalManager, PortalOptions, PortalTarget};
use crate::scope::{ScopeMarker, ScopeResolver};
use crate::state::{
	Ref, SNAPSHOT_SCRIPT_ID, StateGetter, StateManager, StateSetter, StateSnapshot, Subscription,
	SubscriptionId,
};
use crate::template::{MustacheParser, ParsedMustache};
use crate::value::Value;
use crate::{debug_log, error_log, info_log, warn_log};

type ComponentScript = Rc<dyn Fn(&ComponentScope)>;
type UpdateCallback = Rc<dyn Fn(NodeId, &Value)>;

/// Errors raised when creating or looking up a runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
	/// The configuration failed validation.
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),
	/// No runtime is registered on this thread.
	#[error("no runtime has been created")]
	NotInitialized,
	/// A runtime is already registered on this thread.
	#[error("a runtime already exists; destroy it first")]
	AlreadyExists,
}

/// Errors raised when binding an expression to a node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
	/// The expression failed validation.
	#[error("invalid expression `{expression}` in {component}: {}", .errors.join("; "))]
	Invalid {
		/// Offending expression.
		expression: String,
		/// Component it was written in.
		component: String,
		/// Validation errors.
		errors: Vec<String>,
	},
	/// Dependencies could not be extracted.
	#[error(transparent)]
	Eval(#[from] EvalError),
	/// The node is not a text node.
	#[error("{0} is not a text node")]
	NotText(NodeId),
	/// The runtime was destroyed.
	#[error("runtime has been destroyed")]
	Destroyed,
}

/// An active binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
	/// Subscription re-evaluating the binding; `None` when the expression
	/// reads no state and was evaluated once.
	pub subscription: Option<SubscriptionId>,
	/// State keys the binding depends on.
	pub dependencies: Vec<String>,
	/// Component the expression is evaluated in; empty for global.
	pub component: String,
}

/// What one [`Runtime::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
	/// Document mutations applied to the caches.
	pub mutations: usize,
	/// Whether the debounced state flush ran.
	pub flushed: bool,
	/// Subscriptions dropped because their element left the document.
	pub removed_subscriptions: usize,
	/// Scope-cache entries swept.
	pub swept_scopes: usize,
	/// Dependency entries computed against an outdated key set.
	pub stale_expressions: usize,
}

struct RuntimeInner {
	config: RuntimeConfig,
	document: Document,
	state: StateManager,
	evaluator: RefCell<ExpressionEvaluator>,
	parser: RefCell<MustacheParser>,
	scopes: RefCell<ScopeResolver>,
	dom_cache: RefCell<DomCache>,
	portals: RefCell<PortalManager>,
	lifecycle: RefCell<LifecycleManager>,
	effects: RefCell<EffectRegistry>,
	scripts: RefCell<BTreeMap<String, Vec<ComponentScript>>>,
	delegate: RefCell<Rc<dyn HydrationDelegate>>,
	mutations: RefCell<UnboundedReceiver<MutationEvent>>,
	anonymous_states: Cell<u64>,
	started: Cell<bool>,
	destroyed: Cell<bool>,
}

/// Entry point for component code and the binding layer.
///
/// Owns the state store, the caches and the hydration lifecycle for one
/// document. The handle is cheap to clone; clones share one runtime.
///
/// # Example
///
/// ```
/// use futures::executor::block_on;
/// use pulsepoint_reactive::dom::Document;
/// use pulsepoint_reactive::hydration::{EffectOptions, Runtime};
/// use pulsepoint_reactive::value::Value;
///
/// let doc = Document::new();
/// let root = doc.create_element_with("div", &[("pp-component", "Counter")]);
/// doc.append_child(doc.root(), root).unwrap();
///
/// let runtime = Runtime::new(doc);
/// runtime.register_script("Counter", |scope| {
///     let (count, _set_count) = scope.state("count", 0);
///     let _ = scope.effect(move || println!("count = {:?}", count.get()), EffectOptions::default());
/// });
///
/// block_on(runtime.initialize()).unwrap();
/// assert!(runtime.is_hydrated());
/// assert_eq!(runtime.state_manager().get("Counter.count"), Some(Value::from(0)));
/// ```
#[derive(Clone)]
pub struct Runtime {
	inner: Rc<RuntimeInner>,
}

impl fmt::Debug for Runtime {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Runtime")
			.field("phase", &self.phase())
			.field("state", &self.inner.state)
			.field("destroyed", &self.inner.destroyed.get())
			.finish_non_exhaustive()
	}
}

fn run_contained(what: &str, f: impl FnOnce()) {
	if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
		error_log!("{} panicked", what);
	}
}

impl Runtime {
	/// Creates a runtime over `document` with the default configuration.
	pub fn new(document: Document) -> Self {
		Self::build(document, RuntimeConfig::default())
	}

	/// Creates a runtime with a validated configuration.
	pub fn with_config(document: Document, config: RuntimeConfig) -> Result<Self, RuntimeError> {
		config.validate()?;
		Ok(Self::build(document, config))
	}

	fn build(document: Document, config: RuntimeConfig) -> Self {
		let mutations = document.subscribe_mutations();
		let inner = RuntimeInner {
			state: StateManager::with_config(&config),
			evaluator: RefCell::new(ExpressionEvaluator::with_capacity(config.max_cache_size)),
			parser: RefCell::new(MustacheParser::with_capacity(config.max_cache_size)),
			scopes: RefCell::new(ScopeResolver::new(&config)),
			dom_cache: RefCell::new(DomCache::new(config.max_cache_size)),
			portals: RefCell::new(PortalManager::new(document.clone())),
			lifecycle: RefCell::new(LifecycleManager::new()),
			effects: RefCell::new(EffectRegistry::default()),
			scripts: RefCell::new(BTreeMap::new()),
			delegate: RefCell::new(Rc::new(NoopDelegate)),
			mutations: RefCell::new(mutations),
			anonymous_states: Cell::new(0),
			started: Cell::new(false),
			destroyed: Cell::new(false),
			document,
			config,
		};
		Self {
			inner: Rc::new(inner),
		}
	}

	fn upgrade(weak: &Weak<RuntimeInner>) -> Option<Self> {
		weak.upgrade().map(|inner| Self { inner })
	}

	/// Whether both handles share one runtime.
	pub fn ptr_eq(&self, other: &Runtime) -> bool {
		Rc::ptr_eq(&self.inner, &other.inner)
	}

	/// The bound document.
	pub fn document(&self) -> &Document {
		&self.inner.document
	}

	/// Active configuration.
	pub fn config(&self) -> &RuntimeConfig {
		&self.inner.config
	}

	/// The state store.
	pub fn state_manager(&self) -> &StateManager {
		&self.inner.state
	}

	/// Installs the binding layer used during hydration.
	pub fn set_delegate(&self, delegate: impl HydrationDelegate + 'static) {
		*self.inner.delegate.borrow_mut() = Rc::new(delegate);
	}

	fn delegate(&self) -> Rc<dyn HydrationDelegate> {
		Rc::clone(&self.inner.delegate.borrow())
	}

	/// Registers a script run for every hydration of `component`.
	///
	/// Scripts run during `scripts_executing` when the component is present
	/// in the document; an empty name registers a global script, which
	/// always runs first.
	pub fn register_script(&self, component: &str, script: impl Fn(&ComponentScope) + 'static) {
		self.inner
			.scripts
			.borrow_mut()
			.entry(component.to_string())
			.or_default()
			.push(Rc::new(script));
	}

	/// Scope bound to `component`; an empty name is the global scope.
	pub fn scope(&self, component: &str) -> ComponentScope {
		let component = (!component.is_empty()).then_some(component);
		ComponentScope::new(self.clone(), component)
	}

	/// Scope for unnamespaced state.
	pub fn global_scope(&self) -> ComponentScope {
		ComponentScope::new(self.clone(), None)
	}

	/// Declares state under `component` and returns its handles.
	///
	/// A value already present (e.g. restored from the server snapshot)
	/// wins over `initial`.
	pub fn state(
		&self,
		component: Option<&str>,
		key: &str,
		initial: impl Into<Value>,
	) -> (StateGetter, StateSetter) {
		self.inner.state.create_state(component, key, initial.into())
	}

	/// Declares state under a generated key.
	pub fn state_anonymous(
		&self,
		component: Option<&str>,
		initial: impl Into<Value>,
	) -> (StateGetter, StateSetter) {
		let n = self.inner.anonymous_states.get();
		self.inner.anonymous_states.set(n + 1);
		self.state(component, &format!("__state{}", n), initial)
	}

	/// Registers an effect.
	///
	/// Before `effects_running` the effect is queued and runs when that
	/// phase starts. Afterwards it runs right away unless
	/// [`EffectOptions::immediate`] is `false`, in which case it first runs
	/// on the next change of a dependency.
	pub fn effect<F, R>(
		&self,
		component: Option<&str>,
		callback: F,
		options: impl Into<EffectOptions>,
	) -> EffectHandle
	where
		F: Fn() -> R + 'static,
		R: IntoEffectCleanup,
	{
		let options = options.into();
		let effect = Effect::new(component, options.deps, callback);
		let handle = EffectHandle::new(Rc::clone(&effect), self.inner.state.clone());
		if self.is_destroyed() {
			warn_log!("effect registered on a destroyed runtime");
			effect.dispose(&self.inner.state);
		} else if self.phase() >= HydrationPhase::EffectsRunning {
			self.inner.effects.borrow_mut().track(Rc::clone(&effect));
			effect.activate(&self.inner.state, options.immediate);
		} else {
			self.inner.effects.borrow_mut().defer(effect);
		}
		handle
	}

	/// Mutable cell that survives re-renders and never notifies.
	pub fn ref_<T>(&self, initial: Option<T>) -> Ref<T> {
		Ref::new(initial)
	}

	/// Current hydration phase.
	pub fn phase(&self) -> HydrationPhase {
		self.inner.lifecycle.borrow().current()
	}

	/// Whether hydration completed.
	pub fn is_hydrated(&self) -> bool {
		self.inner.lifecycle.borrow().is_hydrated()
	}

	/// Whether hydration is under way.
	pub fn is_hydrating(&self) -> bool {
		self.inner.lifecycle.borrow().is_hydrating()
	}

	/// Resolves once hydration completed; immediately when it already has.
	pub fn hydrated(&self) -> Completion {
		self.wait_for_phase(HydrationPhase::Complete)
	}

	/// Runs `callback` once hydration completed; immediately when it
	/// already has.
	pub fn on_hydrated(&self, callback: impl FnOnce() + 'static) {
		self.on_phase(HydrationPhase::Complete, callback);
	}

	/// Runs `callback` when `phase` is entered; immediately when it was
	/// already reached.
	pub fn on_phase(&self, phase: HydrationPhase, callback: impl FnOnce() + 'static) {
		let ready = self
			.inner
			.lifecycle
			.borrow_mut()
			.on_phase(phase, Box::new(callback));
		if let Some(callback) = ready {
			run_contained("phase callback", callback);
		}
	}

	/// Resolves once `phase` is entered.
	pub fn wait_for_phase(&self, phase: HydrationPhase) -> Completion {
		if self.is_destroyed() && self.phase() < phase {
			return Completion::failed(HydrationError::Destroyed);
		}
		self.inner.lifecycle.borrow_mut().wait_for_phase(phase)
	}

	/// Adds before/after hooks for the working phases.
	pub fn register_lifecycle_hooks(&self, hooks: LifecycleHooks) {
		self.inner.lifecycle.borrow_mut().register_hooks(hooks);
	}

	/// Renders a portal.
	///
	/// Portals created once `portals_rendering` started are hydrated right
	/// away; earlier ones wait for that phase.
	pub fn create_portal(
		&self,
		content: impl Into<PortalContent>,
		target: impl Into<PortalTarget>,
		component: Option<&str>,
		options: PortalOptions,
	) -> Result<String, PortalError> {
		let id = self
			.inner
			.portals
			.borrow_mut()
			.create_portal(content, target, component, options)?;
		if self.phase() >= HydrationPhase::PortalsRendering {
			self.hydrate_portal(&id);
		}
		Ok(id)
	}

	/// Removes a portal. Returns whether it existed.
	pub fn remove_portal(&self, id: &str) -> bool {
		self.inner.portals.borrow_mut().remove_portal(id)
	}

	/// Replaces a portal's content, re-hydrating it when portals were
	/// already rendered.
	pub fn update_portal(
		&self,
		id: &str,
		content: impl Into<PortalContent>,
		options: Option<PortalOptions>,
	) -> Result<bool, PortalError> {
		let updated = self
			.inner
			.portals
			.borrow_mut()
			.update_portal(id, content, options)?;
		if updated && self.phase() >= HydrationPhase::PortalsRendering {
			self.hydrate_portal(id);
		}
		Ok(updated)
	}

	/// Copy of a portal.
	pub fn get_portal(&self, id: &str) -> Option<Portal> {
		self.inner.portals.borrow().get_portal(id).cloned()
	}

	/// Whether a portal exists.
	pub fn has_portal(&self, id: &str) -> bool {
		self.inner.portals.borrow().has_portal(id)
	}

	/// Copies of every portal in creation order.
	pub fn get_all_portals(&self) -> Vec<Portal> {
		self.inner
			.portals
			.borrow()
			.get_all_portals()
			.into_iter()
			.cloned()
			.collect()
	}

	/// Marks a portal hydrated by hand.
	pub fn mark_portal_hydrated(&self, id: &str) -> bool {
		self.inner.portals.borrow_mut().mark_hydrated(id)
	}

	/// Resolves once a portal is hydrated.
	pub fn wait_for_portal(&self, id: &str) -> Completion {
		self.inner.portals.borrow_mut().wait_hydrated(id)
	}

	fn hydrate_portal(&self, id: &str) {
		let Some(portal) = self.get_portal(id) else {
			return;
		};
		let delegate = self.delegate();
		let outcome = panic::catch_unwind(AssertUnwindSafe(|| delegate.hydrate_portal(self, &portal)))
			.unwrap_or_else(|_| Err(HydrationError::Failed(format!("{} panicked", id))));
		let mut portals = self.inner.portals.borrow_mut();
		match outcome {
			Ok(()) => {
				portals.mark_hydrated(id);
			}
			Err(error) => {
				error_log!("failed to hydrate {}: {}", id, error);
				portals.fail_hydration(id, error);
			}
		}
	}

	/// Evaluates `expression` against the state visible from `component`.
	pub fn evaluate(&self, expression: &str, component: &str) -> Result<Value, EvalError> {
		let context = self.inner.state.component_context(component);
		self.inner
			.evaluator
			.borrow_mut()
			.evaluate_expression(expression, &context, component)
	}

	/// Component owning `node`; empty when unscoped.
	pub fn component_of(&self, node: NodeId) -> String {
		self.inner
			.scopes
			.borrow_mut()
			.find_scope(&self.inner.document, node)
			.unwrap_or_default()
	}

	fn refresh(&self, node: NodeId, component: &str, expression: &str, on_update: &dyn Fn(NodeId, &Value)) {
		match self.evaluate(expression, component) {
			Ok(value) => on_update(node, &value),
			Err(error) => error_log!(
				"[{}] failed to evaluate `{}`: {}",
				component,
				expression,
				error
			),
		}
	}

	fn validate(&self, expression: &str, component: &str) -> Result<(), BindingError> {
		let report = ExpressionValidator::validate(expression, component);
		if report.valid {
			Ok(())
		} else {
			Err(BindingError::Invalid {
				expression: expression.to_string(),
				component: component.to_string(),
				errors: report.errors,
			})
		}
	}

	/// Binds `expression` to `node`.
	///
	/// The expression is validated (errors block the binding, warnings are
	/// logged), evaluated once, and re-evaluated whenever a state key it
	/// reads changes. Evaluation failures are logged and never reach the
	/// flush. `component` defaults to the scope of `node`.
	pub fn bind_expression(
		&self,
		node: NodeId,
		component: Option<&str>,
		expression: &str,
		on_update: impl Fn(NodeId, &Value) + 'static,
	) -> Result<Binding, BindingError> {
		if self.is_destroyed() {
			return Err(BindingError::Destroyed);
		}
		let component = match component {
			Some(component) => component.to_string(),
			None => self.component_of(node),
		};
		self.validate(expression, &component)?;
		let dependencies = self
			.inner
			.evaluator
			.borrow_mut()
			.extract_dependencies(expression, &component, &self.inner.state)?;

		let on_update: UpdateCallback = Rc::new(on_update);
		self.refresh(node, &component, expression, &*on_update);

		let subscription = (!dependencies.is_empty()).then(|| {
			let weak = Rc::downgrade(&self.inner);
			let scope = component.clone();
			let source = expression.to_string();
			let callback = Rc::clone(&on_update);
			let mut subscription = Subscription::new(dependencies.iter().cloned(), move |element, _| {
				if let (Some(runtime), Some(element)) = (Runtime::upgrade(&weak), element) {
					runtime.refresh(element, &scope, &source, &*callback);
				}
			})
			.with_element(node)
			.with_selector(expression);
			if !component.is_empty() {
				subscription = subscription.with_component(component.clone());
			}
			self.inner.state.add_subscription(subscription)
		});

		Ok(Binding {
			subscription,
			dependencies: dependencies.to_vec(),
			component,
		})
	}

	fn render_segments(&self, segments: &[ParsedMustache], component: &str) -> String {
		let mut out = String::new();
		for segment in segments {
			match &segment.expression {
				Some(expression) => match self.evaluate(expression, component) {
					Ok(value) => out.push_str(&value.to_display_string()),
					Err(error) => error_log!(
						"[{}] failed to evaluate `{}`: {}",
						component,
						expression,
						error
					),
				},
				None => out.push_str(&segment.content),
			}
		}
		out
	}

	/// Binds the `{{ }}` blocks of a text node.
	///
	/// Returns `Ok(None)` when the text holds no expression.
	pub fn bind_text(&self, node: NodeId) -> Result<Option<Binding>, BindingError> {
		if self.is_destroyed() {
			return Err(BindingError::Destroyed);
		}
		let Some(template) = self.inner.document.text(node) else {
			return Err(BindingError::NotText(node));
		};
		let single = self.inner.parser.borrow_mut().is_single_expression(&template);
		if let Some(expression) = single {
			let doc = self.inner.document.clone();
			return self
				.bind_expression(node, None, &expression, move |node, value| {
					if let Err(error) = doc.set_text(node, &value.to_display_string()) {
						warn_log!("failed to update {}: {}", node, error);
					}
				})
				.map(Some);
		}

		let segments = self.inner.parser.borrow_mut().parse(&template);
		if !segments.iter().any(ParsedMustache::is_expression) {
			return Ok(None);
		}
		let component = self.component_of(node);
		let mut dependencies: Vec<String> = Vec::new();
		for expression in segments.iter().filter_map(|s| s.expression.as_deref()) {
			self.validate(expression, &component)?;
			let deps = self
				.inner
				.evaluator
				.borrow_mut()
				.extract_dependencies(expression, &component, &self.inner.state)?;
			for dep in deps.iter() {
				if !dependencies.contains(dep) {
					dependencies.push(dep.clone());
				}
			}
		}

		let render = {
			let weak = Rc::downgrade(&self.inner);
			let scope = component.clone();
			move |node: NodeId| {
				let Some(runtime) = Runtime::upgrade(&weak) else {
					return;
				};
				let text = runtime.render_segments(&segments, &scope);
				if let Err(error) = runtime.inner.document.set_text(node, &text) {
					warn_log!("failed to update {}: {}", node, error);
				}
			}
		};
		render(node);

		let subscription = (!dependencies.is_empty()).then(|| {
			let mut subscription =
				Subscription::new(dependencies.iter().cloned(), move |element, _| {
					if let Some(element) = element {
						render(element);
					}
				})
				.with_element(node)
				.with_selector(template.clone());
			if !component.is_empty() {
				subscription = subscription.with_component(component.clone());
			}
			self.inner.state.add_subscription(subscription)
		});

		Ok(Some(Binding {
			subscription,
			dependencies,
			component,
		}))
	}

	fn is_ignored(&self, node: NodeId) -> bool {
		let doc = &self.inner.document;
		let mut current = doc.parent(node);
		while let Some(element) = current {
			if doc.has_attribute(element, attrs::IGNORE)
				|| matches!(doc.tag_name(element).as_deref(), Some("script" | "template"))
			{
				return true;
			}
			current = doc.parent(element);
		}
		false
	}

	/// Binds every `{{ }}` text node under `root`, skipping `pp-ignore`
	/// subtrees and script or template content. Returns the number bound.
	///
	/// A binding that fails validation is logged and skipped.
	pub fn bind_text_nodes(&self, root: NodeId) -> usize {
		let doc = &self.inner.document;
		let candidates: Vec<NodeId> = doc
			.descendants(root)
			.into_iter()
			.filter(|node| doc.text(*node).is_some_and(|t| t.contains(MUSTACHE_OPEN)))
			.filter(|node| !self.is_ignored(*node))
			.collect();
		let mut bound = 0;
		for node in candidates {
			match self.bind_text(node) {
				Ok(Some(_)) => bound += 1,
				Ok(None) => {}
				Err(error) => warn_log!("skipping binding of {}: {}", node, error),
			}
		}
		bound
	}

	/// Root elements of `component` instances.
	pub fn component_elements(&self, component: &str) -> Vec<NodeId> {
		self.inner
			.dom_cache
			.borrow_mut()
			.query_component_elements(&self.inner.document, component)
	}

	/// Elements matching `selector`, memoized until the document changes.
	pub fn query_selector_all(&self, selector: &str) -> Result<Vec<NodeId>, crate::dom::DomError> {
		self.inner
			.dom_cache
			.borrow_mut()
			.query_selector_all(&self.inner.document, selector)
	}

	/// Component names present in the document, in document order.
	pub fn components_in_document(&self) -> Vec<String> {
		let doc = &self.inner.document;
		let mut names: Vec<String> = Vec::new();
		for node in doc.descendants(doc.root()) {
			let name = doc.get_attribute(node, attrs::COMPONENT).or_else(|| {
				match doc.comment_text(node).as_deref().and_then(ScopeMarker::parse) {
					Some(ScopeMarker::Start(name)) => Some(name),
					_ => None,
				}
			});
			if let Some(name) = name {
				if !names.contains(&name) {
					names.push(name);
				}
			}
		}
		names
	}

	fn drain_mutations(&self) -> Vec<MutationEvent> {
		let mut rx = self.inner.mutations.borrow_mut();
		let mut events = Vec::new();
		while let Ok(event) = rx.try_recv() {
			events.push(event);
		}
		events
	}

	fn is_marker(&self, node: NodeId) -> bool {
		self.inner
			.document
			.comment_text(node)
			.as_deref()
			.and_then(ScopeMarker::parse)
			.is_some()
	}

	fn apply_mutation(&self, event: &MutationEvent) {
		let doc = &self.inner.document;
		self.inner.dom_cache.borrow_mut().handle_mutation(doc, event);
		match event {
			MutationEvent::NodeInserted { node, .. } => {
				if self.is_marker(*node) {
					self.inner.scopes.borrow_mut().clear_cache();
				} else {
					self.inner.scopes.borrow_mut().invalidate_tree(doc, *node);
				}
			}
			MutationEvent::NodeRemoved { node, .. } => {
				if self.is_marker(*node) {
					self.inner.scopes.borrow_mut().clear_cache();
				} else {
					self.inner.scopes.borrow_mut().invalidate_tree(doc, *node);
				}
				self.inner.state.with_subscriptions(|subscriptions| {
					subscriptions.queue_cleanup(*node);
					for inner in doc.descendants(*node) {
						subscriptions.queue_cleanup(inner);
					}
				});
				self.inner.portals.borrow_mut().handle_mutation(event);
			}
			MutationEvent::AttributeChanged { node, name } if name == attrs::COMPONENT => {
				self.inner.scopes.borrow_mut().invalidate_tree(doc, *node);
			}
			MutationEvent::AttributeChanged { .. } => {}
		}
	}

	/// Applies pending document mutations to the caches and the
	/// subscription cleanup queue. Returns the number applied.
	pub fn process_mutations(&self) -> usize {
		let events = self.drain_mutations();
		for event in &events {
			self.apply_mutation(event);
		}
		events.len()
	}

	/// Advances time-driven work to `now`.
	///
	/// Applies document mutations, runs the debounced flush when due,
	/// drops subscriptions of detached elements, sweeps the scope cache
	/// and discards stale dependency entries.
	pub fn tick(&self, now: Instant) -> TickReport {
		if self.is_destroyed() {
			return TickReport::default();
		}
		let mutations = self.process_mutations();
		let flushed = self.inner.state.run_scheduled(now);
		let doc = &self.inner.document;
		let removed_subscriptions = self
			.inner
			.state
			.with_subscriptions(|subscriptions| {
				subscriptions.process_cleanup_queue(|node| doc.is_connected(node))
			});
		let swept_scopes = self.inner.scopes.borrow_mut().maybe_cleanup(doc, now);
		let stale_expressions = self
			.inner
			.evaluator
			.borrow_mut()
			.cleanup_stale_expressions(&self.inner.state);
		TickReport {
			mutations,
			flushed,
			removed_subscriptions,
			swept_scopes,
			stale_expressions,
		}
	}

	/// Removes the state, subscriptions, effects, portals and cached
	/// entries of `component` and its nested components. Returns the number
	/// of state keys removed.
	pub fn clear_component_state(&self, component: &str) -> usize {
		let state = &self.inner.state;
		let nested = format!("{}.", component);

		// Bindings evaluated in another scope are still anchored inside this
		// component; resolve their owner before the caches are dropped.
		let anchored = state.subscriptions().subscribed_elements();
		let inside: Vec<NodeId> = anchored
			.into_iter()
			.filter(|node| {
				let owner = self.component_of(*node);
				owner == component || owner.starts_with(&nested)
			})
			.collect();
		let released: usize = state.with_subscriptions(|subscriptions| {
			inside
				.iter()
				.map(|node| subscriptions.cleanup_element(*node))
				.sum()
		});

		let removed = state.clear_component_state(component);
		let effects = self.inner.effects.borrow_mut().take_component(component);
		for effect in effects {
			effect.dispose(state);
		}
		{
			let mut evaluator = self.inner.evaluator.borrow_mut();
			evaluator.invalidate_by_component(component);
			evaluator.invalidate_by_prefix(&nested);
		}
		{
			let mut dom_cache = self.inner.dom_cache.borrow_mut();
			dom_cache.invalidate_by_component(component);
			dom_cache.invalidate_by_prefix(&nested);
		}
		self.inner
			.portals
			.borrow_mut()
			.remove_component_portals(component);
		debug_log!(
			"cleared {} keys and {} anchored subscriptions of {}",
			removed,
			released,
			component
		);
		removed
	}

	/// Memoizes every scope, then removes the sentinel comments from the
	/// document. Returns the number removed.
	///
	/// The removals are not fed back into cache invalidation.
	pub fn cleanup_scope_comments(&self) -> usize {
		self.process_mutations();
		let removed = self
			.inner
			.scopes
			.borrow_mut()
			.remove_scope_comments(&self.inner.document);
		self.drain_mutations();
		removed
	}

	/// Counters of every cache, keyed `"{owner}.{cache}"`.
	pub fn cache_stats(&self) -> BTreeMap<String, CacheStats> {
		let mut stats = BTreeMap::new();
		for (name, entry) in self.inner.dom_cache.borrow().cache_stats() {
			stats.insert(format!("dom.{}", name), entry);
		}
		for (name, entry) in self.inner.evaluator.borrow().cache_stats() {
			stats.insert(format!("expression.{}", name), entry);
		}
		stats.insert(
			"template.mustache".to_string(),
			self.inner.parser.borrow().cache_stats(),
		);
		stats
	}

	/// Restores the server snapshot embedded in the document, if any.
	///
	/// Returns the number of keys restored.
	pub fn load_snapshot(&self) -> Result<usize, HydrationError> {
		let doc = &self.inner.document;
		let Some(script) = doc.get_element_by_id(SNAPSHOT_SCRIPT_ID) else {
			return Ok(0);
		};
		let snapshot = StateSnapshot::from_json(&doc.text_content(script))
			.map_err(|e| HydrationError::StateParseError(e.to_string()))?;
		let restored = self.inner.state.restore(&snapshot);
		debug_log!("restored {} keys from the server snapshot", restored);
		Ok(restored)
	}

	fn run_hooks(hooks: Vec<Hook>, phase: HydrationPhase) {
		for hook in hooks {
			run_contained(phase.as_str(), || hook());
		}
	}

	fn enter_phase(&self, phase: HydrationPhase) -> Result<(), HydrationError> {
		let before = self.inner.lifecycle.borrow().before_hooks(phase);
		Self::run_hooks(before, phase);
		if self.is_destroyed() {
			return Err(HydrationError::Destroyed);
		}
		let callbacks: Vec<SignalCallback> = self.inner.lifecycle.borrow_mut().enter(phase)?;
		for callback in callbacks {
			run_contained("phase callback", callback);
		}
		Ok(())
	}

	fn finish_phase(&self, phase: HydrationPhase) {
		let after = self.inner.lifecycle.borrow().after_hooks(phase);
		Self::run_hooks(after, phase);
	}

	fn execute_scripts(&self) -> usize {
		let scripts = self.inner.scripts.borrow().clone();
		let mut order = vec![String::new()];
		order.extend(self.components_in_document());
		let mut executed = 0;
		for component in &order {
			let Some(list) = scripts.get(component) else {
				continue;
			};
			let scope = self.scope(component);
			for script in list {
				run_contained("component script", || script(&scope));
				executed += 1;
			}
		}
		for component in scripts.keys() {
			if !order.contains(component) {
				debug_log!("{} is not in the document; its scripts were skipped", component);
			}
		}
		executed
	}

	fn run_pending_effects(&self) -> usize {
		let pending = self.inner.effects.borrow_mut().take_pending();
		for effect in &pending {
			effect.activate(&self.inner.state, true);
		}
		pending.len()
	}

	fn hydrate_pending_portals(&self) -> Vec<Completion> {
		let pending = self.inner.portals.borrow().pending_hydration();
		pending
			.iter()
			.map(|id| {
				self.hydrate_portal(id);
				self.wait_for_portal(id)
			})
			.collect()
	}

	async fn run_phases(&self) -> Result<(), HydrationError> {
		self.load_snapshot()?;

		self.enter_phase(HydrationPhase::ScriptsExecuting)?;
		self.inner.state.suspend_subscriptions();
		let scripts = self.execute_scripts();
		debug_log!("executed {} scripts", scripts);
		self.finish_phase(HydrationPhase::ScriptsExecuting);

		self.enter_phase(HydrationPhase::LoopsProcessing)?;
		self.delegate().process_loops(self)?;
		let bound = self.bind_text_nodes(self.inner.document.root());
		debug_log!("bound {} text nodes", bound);
		self.inner.state.resume_subscriptions();
		self.finish_phase(HydrationPhase::LoopsProcessing);

		self.enter_phase(HydrationPhase::EffectsRunning)?;
		let effects = self.run_pending_effects();
		debug_log!("ran {} pending effects", effects);
		self.finish_phase(HydrationPhase::EffectsRunning);

		self.enter_phase(HydrationPhase::PortalsRendering)?;
		for outcome in join_all(self.hydrate_pending_portals()).await {
			if let Err(error) = outcome {
				warn_log!("portal hydration did not complete: {}", error);
			}
		}
		self.finish_phase(HydrationPhase::PortalsRendering);

		self.inner.state.flush_all();
		self.enter_phase(HydrationPhase::Complete)?;
		Ok(())
	}

	/// Hydrates the document.
	///
	/// Walks every phase in order. A second call waits for the first to
	/// finish. On failure the phases not reached yet fail with the same
	/// error.
	pub async fn initialize(&self) -> Result<(), HydrationError> {
		if self.is_destroyed() {
			return Err(HydrationError::Destroyed);
		}
		if self.inner.started.replace(true) {
			return self.hydrated().await;
		}
		info_log!("hydration starting");
		let result = self.run_phases().await;
		match &result {
			Ok(()) => info_log!("hydration complete"),
			Err(error) => {
				error_log!("hydration failed: {}", error);
				self.inner.state.resume_subscriptions();
				self.inner.lifecycle.borrow_mut().abort(error.clone());
			}
		}
		result
	}

	/// Tears everything down. Idempotent; the runtime is unusable after.
	pub fn destroy(&self) {
		if self.inner.destroyed.replace(true) {
			return;
		}
		self.inner
			.lifecycle
			.borrow_mut()
			.abort(HydrationError::Destroyed);
		let effects = self.inner.effects.borrow_mut().take_all();
		for effect in effects {
			effect.dispose(&self.inner.state);
		}
		self.inner.portals.borrow_mut().destroy();
		self.inner.state.destroy();
		self.inner.dom_cache.borrow_mut().destroy();
		self.inner.scopes.borrow_mut().clear_cache();
		self.inner.evaluator.borrow_mut().clear_all_caches();
		self.inner.parser.borrow_mut().clear_cache();
		self.inner.scripts.borrow_mut().clear();
		info_log!("runtime destroyed");
	}

	/// Whether [`destroy`](Self::destroy) was called.
	pub fn is_destroyed(&self) -> bool {
		self.inner.destroyed.get()
	}
}
