//! Integration tests for the reactive state system
//!
//! These tests verify:
//! 1. Writes reach exactly the subscriptions whose dependency paths changed
//! 2. Batches and debounced flushes coalesce notifications
//! 3. Writes made while flushing cascade into later rounds
//! 4. Text bindings follow state through component namespaces

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use pulsepoint_reactive::dom::Document;
use pulsepoint_reactive::hydration::Runtime;
use pulsepoint_reactive::state::{StateManager, Subscription};
use pulsepoint_reactive::value::Value;
use rstest::{fixture, rstest};
use web_time::Instant;

#[fixture]
fn state() -> StateManager {
	StateManager::new()
}

fn counter(state: &StateManager, deps: &[&str]) -> Rc<Cell<u32>> {
	let hits = Rc::new(Cell::new(0));
	let seen = Rc::clone(&hits);
	state.add_subscription(Subscription::new(deps.iter().copied(), move |_, _| {
		seen.set(seen.get() + 1)
	}));
	hits
}

fn user(name: &str, age: f64) -> Value {
	Value::object([("name", Value::from(name)), ("age", Value::from(age))])
}

/// Success Criterion 1: a nested dependency fires only when its path changed
#[rstest]
fn test_nested_path_dependency_filters_unchanged_paths(state: StateManager) {
	state.set_initial_state("Profile.user", user("Ada", 36.0));
	let name_hits = counter(&state, &["Profile.user.name"]);
	let whole_hits = counter(&state, &["Profile.user"]);

	state.set_state("Profile.user", user("Ada", 37.0));
	state.flush_all();
	assert_eq!(name_hits.get(), 0);
	assert_eq!(whole_hits.get(), 1);

	state.set_state("Profile.user", user("Grace", 37.0));
	state.flush_all();
	assert_eq!(name_hits.get(), 1);
	assert_eq!(whole_hits.get(), 2);
}

/// Success Criterion 1: writing below a dependency notifies the ancestor
#[rstest]
fn test_write_below_dependency_notifies_ancestor(state: StateManager) {
	state.set_initial_state("Cart", Value::Null);
	state.set_initial_state("Cart.items", Value::Array(Vec::new()));
	let cart_hits = counter(&state, &["Cart"]);
	let unrelated = counter(&state, &["Cartography"]);

	state.set_state("Cart.items", Value::Array(vec![Value::from(1)]));
	state.flush_all();
	assert_eq!(cart_hits.get(), 1);
	assert_eq!(unrelated.get(), 0);
}

/// Success Criterion 1: one notification per flush even with several matching keys
#[rstest]
fn test_subscription_notified_once_per_flush(state: StateManager) {
	state.set_initial_state("a", 0);
	state.set_initial_state("b", 0);
	let hits = counter(&state, &["a", "b"]);

	state.set_state("a", 1);
	state.set_state("b", 1);
	state.flush_updates();
	assert_eq!(hits.get(), 1);
}

/// Success Criterion 2: a batch flushes once when the outermost batch ends
#[rstest]
fn test_nested_batches_flush_at_outermost_end(state: StateManager) {
	state.set_initial_state("x", 0);
	let hits = counter(&state, &["x"]);

	state.batch(|| {
		state.set_state("x", 1);
		state.batch(|| state.set_state("x", 2));
		assert_eq!(hits.get(), 0);
		state.set_state("x", 3);
	});
	assert_eq!(hits.get(), 1);
	assert_eq!(state.get("x"), Some(Value::from(3)));
}

/// Success Criterion 2: unbatched writes wait for the debounce window
#[rstest]
fn test_debounced_flush_runs_when_due(state: StateManager) {
	state.set_initial_state("q", "");
	let hits = counter(&state, &["q"]);

	let start = Instant::now();
	state.set_state("q", "r");
	state.set_state("q", "ru");
	assert!(state.has_scheduled_flush());
	assert!(!state.run_scheduled(start));
	assert_eq!(hits.get(), 0);

	assert!(state.run_scheduled(start + Duration::from_millis(500)));
	assert_eq!(hits.get(), 1);
	assert!(!state.has_scheduled_flush());
}

/// Success Criterion 2: writing an equal value is not a change
#[rstest]
fn test_deep_equal_write_is_ignored(state: StateManager) {
	state.set_initial_state("list", Value::Array(vec![Value::from(1), Value::from("a")]));
	let hits = counter(&state, &["list"]);
	state.set_state("list", Value::Array(vec![Value::from(1), Value::from("a")]));
	assert_eq!(state.flush_all(), 0);
	assert_eq!(hits.get(), 0);
}

/// Success Criterion 3: derived writes settle over several rounds
#[rstest]
fn test_cascading_writes_settle(state: StateManager) {
	state.set_initial_state("celsius", 0);
	state.set_initial_state("fahrenheit", 32);
	let store = state.clone();
	state.add_subscription(Subscription::new(["celsius"], move |_, _| {
		let c = store.get("celsius").unwrap_or_default().to_number();
		store.set_state("fahrenheit", c * 9.0 / 5.0 + 32.0);
	}));
	let f_hits = counter(&state, &["fahrenheit"]);

	state.set_state("celsius", 100);
	assert_eq!(state.flush_all(), 2);
	assert_eq!(state.get("fahrenheit"), Some(Value::from(212)));
	assert_eq!(f_hits.get(), 1);
}

/// Success Criterion 3: a panicking subscriber does not starve the others
#[rstest]
fn test_panicking_subscriber_is_contained(state: StateManager) {
	state.set_initial_state("n", 0);
	state.add_subscription(Subscription::new(["n"], |_, _| panic!("subscriber failed")));
	let hits = counter(&state, &["n"]);
	state.set_state("n", 1);
	state.flush_all();
	assert_eq!(hits.get(), 1);
}

/// Success Criterion 4: nested components see ancestor and global state
#[rstest]
fn test_binding_resolves_through_component_nesting() {
	let doc = Document::new();
	let page = doc.create_element_with("main", &[("pp-component", "Page")]);
	let card = doc.create_element_with("div", &[("pp-component", "Page.Card")]);
	let text = doc.create_text("{{ title }} / {{ theme }} / {{ label }}");
	doc.append_child(doc.root(), page).unwrap();
	doc.append_child(page, card).unwrap();
	doc.append_child(card, text).unwrap();

	let runtime = Runtime::new(doc.clone());
	let (_, set_theme) = runtime.state(None, "theme", "light");
	runtime.state(Some("Page"), "title", "Home");
	runtime.state(Some("Page.Card"), "label", "news");

	let binding = runtime.bind_text(text).unwrap().unwrap();
	assert_eq!(binding.component, "Page.Card");
	assert_eq!(doc.text(text).as_deref(), Some("Home / light / news"));

	set_theme.set("dark");
	runtime.state_manager().flush_all();
	assert_eq!(doc.text(text).as_deref(), Some("Home / dark / news"));
}

/// Success Criterion 4: a local declaration shadows the ancestor's
#[rstest]
fn test_nearest_declaration_wins() {
	let doc = Document::new();
	let runtime = Runtime::new(doc);
	runtime.state(None, "count", 1);
	runtime.state(Some("List"), "count", 2);
	runtime.state(Some("List.Item"), "count", 3);

	assert_eq!(runtime.evaluate("count", "").unwrap(), Value::from(1));
	assert_eq!(runtime.evaluate("count", "List").unwrap(), Value::from(2));
	assert_eq!(runtime.evaluate("count", "List.Item").unwrap(), Value::from(3));
	assert_eq!(runtime.evaluate("count", "Other").unwrap(), Value::from(1));
}

/// Success Criterion 4: listeners observe every applied key
#[rstest]
fn test_state_change_listener(state: StateManager) {
	let keys = Rc::new(RefCell::new(Vec::new()));
	let sink = Rc::clone(&keys);
	let listener = state.on_state_change(move |key| sink.borrow_mut().push(key.to_string()));

	state.batch(|| {
		state.set_state("a", 1);
		state.set_state("b", 2);
	});
	assert_eq!(*keys.borrow(), vec!["a", "b"]);

	assert!(listener.unsubscribe());
	state.set_state("c", 3);
	state.flush_all();
	assert_eq!(keys.borrow().len(), 2);
}
