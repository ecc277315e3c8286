//! Pulsepoint Reactive - client-side synchronization engine
//!
//! Attaches reactive behavior to server-rendered markup: component-scoped
//! state, `{{ }}` template expressions bound to text nodes, effects and
//! portals, all brought up through an ordered hydration sequence.
//!
//! ## Architecture
//!
//! - [`state`]: the state store, path-aware subscriptions, debounced flushing
//! - [`expression`]: parsing, validation, dependency extraction and evaluation
//! - [`template`]: mustache segmentation and spread directives
//! - [`scope`]: resolving which component a node belongs to
//! - [`dom`]: the document tree the runtime binds against
//! - [`dom_cache`]: memoized component and selector queries
//! - [`portal`]: content rendered outside its component's subtree
//! - [`hydration`]: phases, lifecycle hooks, effects and the [`Runtime`] facade
//! - [`registry`]: the per-thread runtime slot
//! - [`cache`]: the bounded LRU cache the above are built on
//!
//! ## Example
//!
//! ```
//! use futures::executor::block_on;
//! use pulsepoint_reactive::{Document, Runtime};
//!
//! let doc = Document::new();
//! let card = doc.create_element_with("div", &[("pp-component", "Card")]);
//! let text = doc.create_text("Hello, {{ name }}!");
//! doc.append_child(doc.root(), card).unwrap();
//! doc.append_child(card, text).unwrap();
//!
//! let runtime = Runtime::new(doc.clone());
//! runtime.register_script("Card", |scope| {
//!     scope.state("name", "world");
//! });
//! block_on(runtime.initialize()).unwrap();
//! assert_eq!(doc.text(text).as_deref(), Some("Hello, world!"));
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through `tracing` under the `pulsepoint` target; see
//! [`logging`].

#![warn(missing_docs)]

// Logging macros must be defined before the modules that use them
pub mod logging;

#[doc(hidden)]
pub use tracing as __tracing;

pub mod cache;
pub mod config;
pub mod dom;
pub mod dom_cache;
pub mod expression;
pub mod hydration;
pub mod portal;
pub mod registry;
pub mod scope;
pub mod state;
pub mod template;
pub mod value;

pub use cache::{CacheStats, Cacheable, LruCache};
pub use config::{ConfigError, RuntimeConfig};
pub use dom::{Document, DomError, MutationEvent, NodeId};
pub use dom_cache::DomCache;
pub use expression::{EvalError, ExpressionEvaluator, ExpressionValidator, ValidationReport};
pub use hydration::{
	Binding, BindingError, ComponentScope, EffectCleanup, EffectDep, EffectHandle, EffectOptions,
	HydrationDelegate, HydrationError, HydrationPhase, LifecycleHooks, Runtime, RuntimeError,
	TickReport,
};
pub use portal::{Portal, PortalContent, PortalError, PortalManager, PortalOptions, PortalTarget};
pub use scope::{ScopeMarker, ScopeResolver};
pub use state::{
	Ref, StateGetter, StateManager, StateSetter, StateSnapshot, Subscription, SubscriptionId,
	SubscriptionManager,
};
pub use template::{MustacheParser, ParsedMustache};
pub use value::Value;
