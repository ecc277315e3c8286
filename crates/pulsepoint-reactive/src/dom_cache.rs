//! Memoized document queries.
//!
//! Every query is a pure function of the current tree and is served from an
//! LRU cache until invalidated. Invalidation is scoped to one component or
//! one component-name prefix so localized mutations leave the rest of the
//! cache warm. Cached element lists are revalidated on hit: a list that
//! references a detached node is treated as a miss and recomputed.

use std::collections::BTreeMap;

use crate::cache::{CacheStats, Cacheable, LruCache};
use crate::config::{MAX_CACHE_SIZE, SCRIPT_TYPE, attrs};
use crate::debug_log;
use crate::dom::{Document, DomError, MutationEvent, NodeId};

type ListCache = LruCache<String, Vec<NodeId>>;

fn fresh_hit(cache: &mut ListCache, doc: &Document, key: &str) -> Option<Vec<NodeId>> {
	let list = cache.get(key)?;
	if list.iter().all(|node| doc.is_connected(*node)) {
		Some(list.clone())
	} else {
		debug_log!("cached list {:?} references a detached node", key);
		None
	}
}

fn list_key(component: &str, element: Option<NodeId>) -> String {
	match element {
		Some(element) => format!("{}@{}", component, element.index()),
		None => component.to_string(),
	}
}

/// Query cache over one document.
#[derive(Debug)]
pub struct DomCache {
	component_elements: ListCache,
	script_elements: ListCache,
	template_elements: ListCache,
	selectors: ListCache,
	element_component: LruCache<NodeId, Option<String>>,
	context_component: LruCache<NodeId, Option<String>>,
	parent_component: LruCache<String, Option<String>>,
	element_depth: LruCache<NodeId, usize>,
	element_children: LruCache<NodeId, Vec<NodeId>>,
	hits: u64,
	misses: u64,
}

impl Default for DomCache {
	fn default() -> Self {
		Self::new(MAX_CACHE_SIZE)
	}
}

impl DomCache {
	/// Creates a cache whose stores hold at most `max_size` entries each.
	pub fn new(max_size: usize) -> Self {
		Self {
			component_elements: LruCache::new(max_size),
			script_elements: LruCache::new(max_size),
			template_elements: LruCache::new(max_size),
			selectors: LruCache::new(max_size),
			element_component: LruCache::new(max_size),
			context_component: LruCache::new(max_size),
			parent_component: LruCache::new(max_size),
			element_depth: LruCache::new(max_size),
			element_children: LruCache::new(max_size),
			hits: 0,
			misses: 0,
		}
	}

	/// Root elements of every instance of `component`, in document order.
	pub fn query_component_elements(&mut self, doc: &Document, component: &str) -> Vec<NodeId> {
		if let Some(list) = fresh_hit(&mut self.component_elements, doc, component) {
			self.hits += 1;
			return list;
		}
		self.misses += 1;
		let list: Vec<NodeId> = doc
			.descendants(doc.root())
			.into_iter()
			.filter(|node| doc.get_attribute(*node, attrs::COMPONENT).as_deref() == Some(component))
			.collect();
		self.component_elements
			.set(component.to_string(), list.clone());
		list
	}

	/// First root element of `component`.
	pub fn get_first_component_element(&mut self, doc: &Document, component: &str) -> Option<NodeId> {
		self.query_component_elements(doc, component)
			.first()
			.copied()
	}

	/// Document-wide selector query.
	pub fn query_selector_all(&mut self, doc: &Document, selector: &str) -> Result<Vec<NodeId>, DomError> {
		if let Some(list) = fresh_hit(&mut self.selectors, doc, selector) {
			self.hits += 1;
			return Ok(list);
		}
		self.misses += 1;
		let list = doc.query_selector_all(doc.root(), selector)?;
		self.selectors.set(selector.to_string(), list.clone());
		Ok(list)
	}

	/// First match of a document-wide selector query.
	pub fn query_selector(&mut self, doc: &Document, selector: &str) -> Result<Option<NodeId>, DomError> {
		Ok(self.query_selector_all(doc, selector)?.first().copied())
	}

	/// Component owning `element`: the nearest ancestor-or-self carrying
	/// `pp-component`.
	pub fn get_element_component(&mut self, doc: &Document, element: NodeId) -> Option<String> {
		if let Some(cached) = self.element_component.get(&element) {
			self.hits += 1;
			return cached.clone();
		}
		self.misses += 1;
		let mut current = Some(element);
		let mut component = None;
		while let Some(node) = current {
			if let Some(name) = doc.get_attribute(node, attrs::COMPONENT) {
				component = Some(name);
				break;
			}
			current = doc.parent(node);
		}
		self.element_component.set(element, component.clone());
		component
	}

	/// Component in which `element`'s own attributes are evaluated.
	///
	/// For a component root that is the enclosing component (props are
	/// written by the parent); for any other element it is its owner.
	pub fn get_context_component(&mut self, doc: &Document, element: NodeId) -> Option<String> {
		if let Some(cached) = self.context_component.get(&element) {
			self.hits += 1;
			return cached.clone();
		}
		self.misses += 1;
		let component = if doc.has_attribute(element, attrs::COMPONENT) {
			doc.parent(element)
				.and_then(|parent| self.get_element_component(doc, parent))
		} else {
			self.get_element_component(doc, element)
		};
		self.context_component.set(element, component.clone());
		component
	}

	/// Component enclosing the instance of `component` that contains
	/// `element_in_component`.
	pub fn get_parent_of_component(
		&mut self,
		doc: &Document,
		component: &str,
		element_in_component: NodeId,
	) -> Option<String> {
		let key = list_key(component, Some(element_in_component));
		if let Some(cached) = self.parent_component.get(&key) {
			self.hits += 1;
			return cached.clone();
		}
		self.misses += 1;
		let parent = self
			.find_ancestor_root(doc, element_in_component, component)
			.and_then(|root| doc.parent(root))
			.and_then(|node| self.get_element_component(doc, node));
		self.parent_component.set(key, parent.clone());
		parent
	}

	fn find_ancestor_root(&self, doc: &Document, start: NodeId, component: &str) -> Option<NodeId> {
		let mut current = Some(start);
		while let Some(node) = current {
			if doc.get_attribute(node, attrs::COMPONENT).as_deref() == Some(component) {
				return Some(node);
			}
			current = doc.parent(node);
		}
		None
	}

	/// Root of `target` enclosing `start`, falling back to the first
	/// instance anywhere in the document.
	pub fn find_element_for_component(
		&mut self,
		doc: &Document,
		start: NodeId,
		target: &str,
	) -> Option<NodeId> {
		self.find_ancestor_root(doc, start, target)
			.or_else(|| self.get_first_component_element(doc, target))
	}

	/// Number of element ancestors of `element`.
	pub fn get_element_depth_cached(&mut self, doc: &Document, element: NodeId) -> usize {
		if let Some(depth) = self.element_depth.get(&element) {
			self.hits += 1;
			return *depth;
		}
		self.misses += 1;
		let depth = doc.depth(element);
		self.element_depth.set(element, depth);
		depth
	}

	/// Child elements of `element`.
	pub fn get_element_children_cached(&mut self, doc: &Document, element: NodeId) -> Vec<NodeId> {
		if let Some(children) = self.element_children.get(&element) {
			if children.iter().all(|child| doc.parent(*child) == Some(element)) {
				self.hits += 1;
				return children.clone();
			}
		}
		self.misses += 1;
		let children = doc.child_elements(element);
		self.element_children.set(element, children.clone());
		children
	}

	/// Reactive script blocks owned by `component`, optionally restricted to
	/// one instance root.
	pub fn get_component_scripts(
		&mut self,
		doc: &Document,
		component: &str,
		element: Option<NodeId>,
	) -> Vec<NodeId> {
		let key = list_key(component, element);
		if let Some(list) = fresh_hit(&mut self.script_elements, doc, &key) {
			self.hits += 1;
			return list;
		}
		self.misses += 1;
		let list = self.owned_descendants(doc, component, element, |doc, node| {
			doc.tag_name(node).as_deref() == Some("script")
				&& doc.get_attribute(node, "type").as_deref() == Some(SCRIPT_TYPE)
		});
		self.script_elements.set(key, list.clone());
		list
	}

	/// `<template>` elements owned by `component`.
	pub fn get_component_templates(
		&mut self,
		doc: &Document,
		component: &str,
		element: Option<NodeId>,
	) -> Vec<NodeId> {
		let key = list_key(component, element);
		if let Some(list) = fresh_hit(&mut self.template_elements, doc, &key) {
			self.hits += 1;
			return list;
		}
		self.misses += 1;
		let list = self.owned_descendants(doc, component, element, |doc, node| {
			doc.tag_name(node).as_deref() == Some("template")
		});
		self.template_elements.set(key, list.clone());
		list
	}

	/// Descendants of the component's roots matching `pred` whose owner is
	/// `component` itself rather than a nested component.
	fn owned_descendants(
		&mut self,
		doc: &Document,
		component: &str,
		element: Option<NodeId>,
		pred: impl Fn(&Document, NodeId) -> bool,
	) -> Vec<NodeId> {
		let roots = match element {
			Some(element) => vec![element],
			None => self.query_component_elements(doc, component),
		};
		let mut out = Vec::new();
		for root in roots {
			for node in doc.descendants(root) {
				if pred(doc, node)
					&& self.get_element_component(doc, node).as_deref() == Some(component)
				{
					out.push(node);
				}
			}
		}
		out
	}

	/// Drops every entry belonging to `component`.
	pub fn invalidate_by_component(&mut self, component: &str) {
		let scoped = format!("{}@", component);
		self.component_elements.delete(component);
		for cache in [&mut self.script_elements, &mut self.template_elements] {
			cache.delete(component);
			cache.delete_by_prefix(&scoped);
		}
		self.parent_component.delete_by_prefix(&scoped);
		self.selectors.retain(|key, _| !key.contains(component));
		self.element_component
			.retain(|_, owner| owner.as_deref() != Some(component));
		self.context_component
			.retain(|_, owner| owner.as_deref() != Some(component));
	}

	/// Drops every entry whose component name starts with `prefix`, covering
	/// a hierarchical family such as `app.` in one pass.
	pub fn invalidate_by_prefix(&mut self, prefix: &str) {
		self.component_elements.delete_by_prefix(prefix);
		self.script_elements.delete_by_prefix(prefix);
		self.template_elements.delete_by_prefix(prefix);
		self.parent_component.delete_by_prefix(prefix);
		self.selectors.retain(|key, _| !key.contains(prefix));
		let outside = |owner: &Option<String>| !owner.as_deref().is_some_and(|o| o.starts_with(prefix));
		self.element_component.retain(|_, owner| outside(owner));
		self.context_component.retain(|_, owner| outside(owner));
	}

	/// Drops per-element entries of `element` and its subtree.
	pub fn invalidate_element(&mut self, doc: &Document, element: NodeId) {
		if let Some(parent) = doc.parent(element) {
			self.element_children.delete(&parent);
		}
		if let Some(name) = doc.get_attribute(element, attrs::COMPONENT) {
			self.invalidate_by_component(&name);
		}
		for node in std::iter::once(element).chain(doc.descendants(element)) {
			self.element_component.delete(&node);
			self.context_component.delete(&node);
			self.element_depth.delete(&node);
			self.element_children.delete(&node);
		}
	}

	/// Applies the invalidation a structural change requires.
	pub fn handle_mutation(&mut self, doc: &Document, event: &MutationEvent) {
		match event {
			MutationEvent::NodeInserted { node, parent } => {
				self.element_children.delete(parent);
				self.selectors.clear();
				if let Some(owner) = self.get_element_component(doc, *parent) {
					self.invalidate_by_component(&owner);
				}
				for inner in std::iter::once(*node).chain(doc.descendants(*node)) {
					if let Some(name) = doc.get_attribute(inner, attrs::COMPONENT) {
						self.invalidate_by_component(&name);
					}
				}
				self.invalidate_element(doc, *node);
			}
			MutationEvent::NodeRemoved { node, parent } => {
				self.element_children.delete(parent);
				self.invalidate_element(doc, *node);
			}
			MutationEvent::AttributeChanged { node, name } => {
				if name == attrs::COMPONENT {
					self.component_elements.clear();
					self.script_elements.clear();
					self.template_elements.clear();
					self.parent_component.clear();
					self.selectors.clear();
					self.invalidate_element(doc, *node);
				} else {
					self.selectors.retain(|key, _| {
						!(key.contains(name.as_str())
							|| (name == "id" && key.contains('#'))
							|| (name == "class" && key.contains('.')))
					});
				}
			}
		}
	}

	/// Zeroes every hit/miss counter.
	pub fn reset_stats(&mut self) {
		self.hits = 0;
		self.misses = 0;
		self.component_elements.reset_stats();
		self.script_elements.reset_stats();
		self.template_elements.reset_stats();
		self.selectors.reset_stats();
		self.element_component.reset_stats();
		self.context_component.reset_stats();
		self.parent_component.reset_stats();
		self.element_depth.reset_stats();
		self.element_children.reset_stats();
	}

	/// Empties every cache and resets counters.
	pub fn destroy(&mut self) {
		self.clear_all_caches();
		self.reset_stats();
	}
}

impl Cacheable for DomCache {
	fn invalidate_cache(&mut self, key: Option<&str>) {
		match key {
			Some(key) => {
				self.component_elements.delete(key);
				self.script_elements.delete(key);
				self.template_elements.delete(key);
				self.selectors.delete(key);
				self.parent_component.delete(key);
			}
			None => {
				self.component_elements.clear();
				self.script_elements.clear();
				self.template_elements.clear();
				self.selectors.clear();
				self.element_component.clear();
				self.context_component.clear();
				self.parent_component.clear();
				self.element_depth.clear();
				self.element_children.clear();
			}
		}
	}

	fn cache_stats(&self) -> BTreeMap<&'static str, CacheStats> {
		let entries = self.component_elements.len()
			+ self.script_elements.len()
			+ self.template_elements.len()
			+ self.selectors.len()
			+ self.element_component.len()
			+ self.context_component.len()
			+ self.parent_component.len()
			+ self.element_depth.len()
			+ self.element_children.len();
		BTreeMap::from([
			("component_elements", self.component_elements.stats()),
			("scripts", self.script_elements.stats()),
			("templates", self.template_elements.stats()),
			("selectors", self.selectors.stats()),
			("element_component", self.element_component.stats()),
			("context_component", self.context_component.stats()),
			("parent_component", self.parent_component.stats()),
			("element_depth", self.element_depth.stats()),
			("element_children", self.element_children.stats()),
			(
				"queries",
				CacheStats::new(
					entries,
					self.component_elements.max_size() * 9,
					self.hits,
					self.misses,
				),
			),
		])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};

	struct Page {
		doc: Document,
		app: NodeId,
		counter: NodeId,
		counter_script: NodeId,
		app_script: NodeId,
		button: NodeId,
	}

	// <main pp-component="App">
	//   <script type="text/pp"></script>
	//   <div pp-component="Counter">
	//     <script type="text/pp"></script>
	//     <button class="inc"></button>
	//   </div>
	// </main>
	#[fixture]
	fn page() -> Page {
		let doc = Document::new();
		let app = doc.create_element_with("main", &[("pp-component", "App")]);
		let app_script = doc.create_element_with("script", &[("type", "text/pp")]);
		let counter = doc.create_element_with("div", &[("pp-component", "Counter")]);
		let counter_script = doc.create_element_with("script", &[("type", "text/pp")]);
		let button = doc.create_element_with("button", &[("class", "inc")]);
		doc.append_child(doc.root(), app).unwrap();
		doc.append_child(app, app_script).unwrap();
		doc.append_child(app, counter).unwrap();
		doc.append_child(counter, counter_script).unwrap();
		doc.append_child(counter, button).unwrap();
		Page {
			doc,
			app,
			counter,
			counter_script,
			app_script,
			button,
		}
	}

	#[rstest]
	fn test_component_elements_are_memoized(page: Page) {
		let mut cache = DomCache::default();
		assert_eq!(
			cache.query_component_elements(&page.doc, "Counter"),
			vec![page.counter]
		);
		assert_eq!(
			cache.query_component_elements(&page.doc, "Counter"),
			vec![page.counter]
		);
		let stats = cache.cache_stats();
		assert_eq!(stats["queries"].hits, 1);
		assert_eq!(stats["queries"].misses, 1);
	}

	#[rstest]
	fn test_detached_entry_is_a_miss(page: Page) {
		let mut cache = DomCache::default();
		cache.query_selector_all(&page.doc, ".inc").unwrap();
		page.doc.remove(page.button).unwrap();
		assert!(cache.query_selector_all(&page.doc, ".inc").unwrap().is_empty());
		assert_eq!(cache.cache_stats()["queries"].misses, 2);
	}

	#[rstest]
	fn test_scripts_exclude_nested_components(page: Page) {
		let mut cache = DomCache::default();
		assert_eq!(
			cache.get_component_scripts(&page.doc, "App", None),
			vec![page.app_script]
		);
		assert_eq!(
			cache.get_component_scripts(&page.doc, "Counter", Some(page.counter)),
			vec![page.counter_script]
		);
		assert!(cache.get_component_templates(&page.doc, "App", None).is_empty());
	}

	#[rstest]
	fn test_component_relationships(page: Page) {
		let mut cache = DomCache::default();
		assert_eq!(
			cache.get_element_component(&page.doc, page.button),
			Some("Counter".into())
		);
		assert_eq!(
			cache.get_context_component(&page.doc, page.counter),
			Some("App".into())
		);
		assert_eq!(
			cache.get_context_component(&page.doc, page.button),
			Some("Counter".into())
		);
		assert_eq!(
			cache.get_parent_of_component(&page.doc, "Counter", page.button),
			Some("App".into())
		);
		assert_eq!(
			cache.find_element_for_component(&page.doc, page.button, "App"),
			Some(page.app)
		);
		assert_eq!(cache.get_element_depth_cached(&page.doc, page.button), 2);
		assert_eq!(
			cache.get_element_children_cached(&page.doc, page.counter),
			vec![page.counter_script, page.button]
		);
	}

	#[rstest]
	fn test_invalidate_by_component_is_scoped(page: Page) {
		let mut cache = DomCache::default();
		cache.query_component_elements(&page.doc, "App");
		cache.query_component_elements(&page.doc, "Counter");
		cache.get_element_component(&page.doc, page.button);
		cache.get_element_component(&page.doc, page.app_script);

		cache.invalidate_by_component("Counter");
		let stats = cache.cache_stats();
		assert_eq!(stats["component_elements"].size, 1);
		assert_eq!(stats["element_component"].size, 1);
	}

	#[rstest]
	fn test_invalidate_by_prefix_covers_hierarchy() {
		let doc = Document::new();
		for name in ["app.header", "app.footer", "sidebar"] {
			let el = doc.create_element_with("div", &[("pp-component", name)]);
			doc.append_child(doc.root(), el).unwrap();
		}
		let mut cache = DomCache::default();
		for name in ["app.header", "app.footer", "sidebar"] {
			cache.query_component_elements(&doc, name);
		}
		cache.invalidate_by_prefix("app.");
		assert_eq!(cache.cache_stats()["component_elements"].size, 1);
	}

	#[rstest]
	fn test_insertion_invalidates_owner_lists(page: Page) {
		let mut cache = DomCache::default();
		assert_eq!(cache.get_component_scripts(&page.doc, "Counter", None).len(), 1);

		let mut events = page.doc.subscribe_mutations();
		let script = page
			.doc
			.create_element_with("script", &[("type", "text/pp")]);
		page.doc.append_child(page.counter, script).unwrap();
		while let Ok(event) = events.try_recv() {
			cache.handle_mutation(&page.doc, &event);
		}
		assert_eq!(cache.get_component_scripts(&page.doc, "Counter", None).len(), 2);
	}

	#[rstest]
	fn test_destroy_clears_everything(page: Page) {
		let mut cache = DomCache::default();
		cache.query_component_elements(&page.doc, "App");
		cache.destroy();
		let stats = cache.cache_stats();
		assert_eq!(stats["queries"].size, 0);
		assert_eq!(stats["queries"].hits + stats["queries"].misses, 0);
	}
}
