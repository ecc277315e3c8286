//! Smoke tests for the `pulsepoint` facade re-exports

use std::cell::Cell;
use std::rc::Rc;

use futures::executor::block_on;
use pulsepoint::{Document, HydrationPhase, Runtime, Value};
use rstest::rstest;

#[rstest]
#[case("Greeting", "Hello, {{ name }}!", "Hello, pulsepoint!")]
#[case("Greeting.Inner", "{{ name.length }}", "10")]
fn test_facade_hydrates_bound_text(
	#[case] component: &str,
	#[case] template: &str,
	#[case] expected: &str,
) {
	let doc = Document::new();
	let outer = doc.create_element_with("section", &[("pp-component", "Greeting")]);
	doc.append_child(doc.root(), outer).unwrap();
	let host = if component == "Greeting" {
		outer
	} else {
		let inner = doc.create_element_with("div", &[("pp-component", component)]);
		doc.append_child(outer, inner).unwrap();
		inner
	};
	let text = doc.create_text(template);
	doc.append_child(host, text).unwrap();

	let runtime = Runtime::new(doc.clone());
	runtime.register_script("Greeting", |scope| {
		scope.state("name", "pulsepoint");
	});

	let hydrated = Rc::new(Cell::new(false));
	let flag = Rc::clone(&hydrated);
	runtime.on_hydrated(move || flag.set(true));

	block_on(runtime.initialize()).unwrap();
	assert!(hydrated.get());
	assert_eq!(runtime.phase(), HydrationPhase::Complete);
	assert_eq!(doc.text(text).as_deref(), Some(expected));
}

#[rstest]
fn test_facade_phase_waiter_after_completion() {
	let runtime = Runtime::new(Document::new());
	block_on(runtime.initialize()).unwrap();
	block_on(runtime.wait_for_phase(HydrationPhase::EffectsRunning)).unwrap();
	assert_eq!(
		runtime.evaluate("1 + 2", "").unwrap(),
		Value::Number(3.0)
	);
}
