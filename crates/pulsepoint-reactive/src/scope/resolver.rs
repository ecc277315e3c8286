//! Cached node → component lookups.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use web_time::Instant;

use super::ScopeMarker;
use crate::config::{RuntimeConfig, attrs};
use crate::debug_log;
use crate::dom::{Document, NodeId};

/// Observational counters for [`ScopeResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeCacheStats {
	/// Nodes with a memoized scope.
	pub tracked_elements: usize,
	/// Comment nodes with a memoized marker parse.
	pub cached_comments: usize,
	/// Time of the last sweep.
	pub last_cleanup: Option<Instant>,
	/// Whether the tracked set overflowed and a sweep is pending.
	pub cleanup_scheduled: bool,
}

/// Resolves which component owns a node.
///
/// Lookups are memoized per node. Entries are dropped by
/// [`invalidate_element`](Self::invalidate_element) /
/// [`invalidate_tree`](Self::invalidate_tree) when the surrounding structure
/// changes, and detached nodes are swept by [`maybe_cleanup`](Self::maybe_cleanup)
/// no more often than the configured interval.
#[derive(Debug)]
pub struct ScopeResolver {
	scope_cache: HashMap<NodeId, Option<String>>,
	comment_cache: HashMap<NodeId, Option<ScopeMarker>>,
	tracked: HashSet<NodeId>,
	cleanup_interval: Duration,
	max_tracked: usize,
	last_cleanup: Option<Instant>,
	cleanup_scheduled: bool,
}

impl Default for ScopeResolver {
	fn default() -> Self {
		Self::new(&RuntimeConfig::default())
	}
}

impl ScopeResolver {
	/// Creates a resolver using the sweep bounds from `config`.
	pub fn new(config: &RuntimeConfig) -> Self {
		Self {
			scope_cache: HashMap::new(),
			comment_cache: HashMap::new(),
			tracked: HashSet::new(),
			cleanup_interval: config.scope_cleanup_interval(),
			max_tracked: config.max_tracked_elements,
			last_cleanup: None,
			cleanup_scheduled: false,
		}
	}

	/// Component owning `node`, or `None` when it is unscoped.
	///
	/// Absence of a boundary is not an error: callers treat `None` as the
	/// global scope.
	pub fn find_scope(&mut self, doc: &Document, node: NodeId) -> Option<String> {
		if let Some(cached) = self.scope_cache.get(&node) {
			return cached.clone();
		}
		let scope = self.find_scope_uncached(doc, node);
		self.scope_cache.insert(node, scope.clone());
		self.track(node);
		scope
	}

	fn find_scope_uncached(&mut self, doc: &Document, node: NodeId) -> Option<String> {
		let mut current = node;
		loop {
			if current != node {
				if let Some(cached) = self.scope_cache.get(&current) {
					return cached.clone();
				}
			}
			if let Some(name) = doc.get_attribute(current, attrs::COMPONENT) {
				return Some(name);
			}
			if let Some(name) = self.find_scope_in_siblings(doc, current) {
				return Some(name);
			}
			current = doc.parent(current)?;
		}
	}

	/// Walks previous siblings for an unclosed start marker.
	fn find_scope_in_siblings(&mut self, doc: &Document, node: NodeId) -> Option<String> {
		let mut depth = 0usize;
		let mut sibling = doc.previous_sibling(node);
		while let Some(current) = sibling {
			match self.parse_comment(doc, current) {
				Some(ScopeMarker::End(_)) => depth += 1,
				Some(ScopeMarker::Start(name)) => {
					if depth == 0 {
						return Some(name);
					}
					depth -= 1;
				}
				None => {}
			}
			sibling = doc.previous_sibling(current);
		}
		None
	}

	fn parse_comment(&mut self, doc: &Document, node: NodeId) -> Option<ScopeMarker> {
		if let Some(cached) = self.comment_cache.get(&node) {
			return cached.clone();
		}
		let text = doc.comment_text(node)?;
		let marker = ScopeMarker::parse(&text);
		self.comment_cache.insert(node, marker.clone());
		marker
	}

	fn track(&mut self, node: NodeId) {
		self.tracked.insert(node);
		if self.tracked.len() > self.max_tracked && !self.cleanup_scheduled {
			debug_log!(
				"scope cache tracks {} nodes, scheduling sweep",
				self.tracked.len()
			);
			self.cleanup_scheduled = true;
		}
	}

	/// Resolves and memoizes the scope of every element and text node.
	///
	/// Returns the number of nodes resolved.
	pub fn pre_cache_all_scopes(&mut self, doc: &Document) -> usize {
		let nodes: Vec<NodeId> = doc
			.descendants(doc.root())
			.into_iter()
			.filter(|node| doc.is_element(*node) || doc.text(*node).is_some())
			.collect();
		for node in &nodes {
			self.find_scope(doc, *node);
		}
		nodes.len()
	}

	/// Removes every sentinel comment from the document.
	///
	/// Scopes are memoized first so later lookups still resolve. Callers
	/// must drop the mutation events this produces rather than feed them
	/// back into invalidation.
	pub fn remove_scope_comments(&mut self, doc: &Document) -> usize {
		self.pre_cache_all_scopes(doc);
		let markers: Vec<NodeId> = doc
			.descendants(doc.root())
			.into_iter()
			.filter(|node| self.parse_comment(doc, *node).is_some())
			.collect();
		let mut removed = 0;
		for node in markers {
			if doc.remove(node).is_ok() {
				self.comment_cache.remove(&node);
				removed += 1;
			}
		}
		debug_log!("removed {} scope comments", removed);
		removed
	}

	/// Forgets the memoized scope of one node.
	pub fn invalidate_element(&mut self, node: NodeId) {
		self.scope_cache.remove(&node);
		self.comment_cache.remove(&node);
		self.tracked.remove(&node);
	}

	/// Forgets `root` and everything below it.
	pub fn invalidate_tree(&mut self, doc: &Document, root: NodeId) {
		self.invalidate_element(root);
		for node in doc.descendants(root) {
			self.invalidate_element(node);
		}
	}

	/// Sweeps detached nodes when the interval has elapsed.
	///
	/// Returns the number of entries dropped, or zero when the sweep was not
	/// due yet.
	pub fn maybe_cleanup(&mut self, doc: &Document, now: Instant) -> usize {
		let due = self
			.last_cleanup
			.is_none_or(|last| now.saturating_duration_since(last) >= self.cleanup_interval);
		if !due || (self.tracked.is_empty() && !self.cleanup_scheduled) {
			return 0;
		}
		self.perform_cleanup(doc, now)
	}

	/// Sweeps detached nodes regardless of the interval.
	pub fn force_cleanup(&mut self, doc: &Document, now: Instant) -> usize {
		self.perform_cleanup(doc, now)
	}

	fn perform_cleanup(&mut self, doc: &Document, now: Instant) -> usize {
		let detached: Vec<NodeId> = self
			.tracked
			.iter()
			.copied()
			.filter(|node| !doc.is_connected(*node))
			.collect();
		for node in &detached {
			self.invalidate_element(*node);
		}
		self.comment_cache.retain(|node, _| doc.is_connected(*node));

		let mut removed = detached.len();
		if self.tracked.len() > self.max_tracked {
			removed += self.tracked.len();
			self.scope_cache.clear();
			self.tracked.clear();
		}

		self.last_cleanup = Some(now);
		self.cleanup_scheduled = false;
		removed
	}

	/// Observational counters.
	pub fn get_cache_stats(&self) -> ScopeCacheStats {
		ScopeCacheStats {
			tracked_elements: self.tracked.len(),
			cached_comments: self.comment_cache.len(),
			last_cleanup: self.last_cleanup,
			cleanup_scheduled: self.cleanup_scheduled,
		}
	}

	/// Whether `node` has a memoized scope.
	pub fn is_cached(&self, node: NodeId) -> bool {
		self.scope_cache.contains_key(&node)
	}

	/// Drops every memoized entry.
	pub fn clear_cache(&mut self) {
		self.scope_cache.clear();
		self.comment_cache.clear();
		self.tracked.clear();
		self.cleanup_scheduled = false;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::{fixture, rstest};

	struct Page {
		doc: Document,
		counter: NodeId,
		counter_text: NodeId,
		list_item: NodeId,
		after_list: NodeId,
		global: NodeId,
	}

	// <div pp-component="Counter"><span>text</span></div>
	// <!-- pp-scope:List --><li>item</li><!-- /pp-scope:List -->
	// <p>after</p>
	// <footer>global</footer>
	#[fixture]
	fn page() -> Page {
		let doc = Document::new();
		let body = doc.create_element("body");
		doc.append_child(doc.root(), body).unwrap();

		let counter = doc.create_element_with("div", &[("pp-component", "Counter")]);
		let span = doc.create_element("span");
		let counter_text = doc.create_text("text");
		doc.append_child(span, counter_text).unwrap();
		doc.append_child(counter, span).unwrap();
		doc.append_child(body, counter).unwrap();

		let start = doc.create_comment("pp-scope:List");
		let list_item = doc.create_element("li");
		let end = doc.create_comment("/pp-scope:List");
		let after_list = doc.create_element("p");
		doc.append_child(body, start).unwrap();
		doc.append_child(body, list_item).unwrap();
		doc.append_child(body, end).unwrap();
		doc.append_child(body, after_list).unwrap();

		let global = doc.create_element("footer");
		doc.append_child(body, global).unwrap();

		Page {
			doc,
			counter,
			counter_text,
			list_item,
			after_list,
			global,
		}
	}

	#[rstest]
	fn test_component_attribute_scope(page: Page) {
		let mut resolver = ScopeResolver::default();
		assert_eq!(
			resolver.find_scope(&page.doc, page.counter),
			Some("Counter".into())
		);
		assert_eq!(
			resolver.find_scope(&page.doc, page.counter_text),
			Some("Counter".into())
		);
	}

	#[rstest]
	fn test_comment_marker_scope(page: Page) {
		let mut resolver = ScopeResolver::default();
		assert_eq!(
			resolver.find_scope(&page.doc, page.list_item),
			Some("List".into())
		);
		assert_eq!(resolver.find_scope(&page.doc, page.after_list), None);
	}

	#[rstest]
	fn test_unscoped_is_none(page: Page) {
		let mut resolver = ScopeResolver::default();
		assert_eq!(resolver.find_scope(&page.doc, page.global), None);
		assert!(resolver.is_cached(page.global));
	}

	#[rstest]
	fn test_nested_markers_skip_closed_scopes() {
		let doc = Document::new();
		let outer_start = doc.create_comment("pp-scope:Outer");
		let inner_start = doc.create_comment("pp-scope:Inner");
		let inner_item = doc.create_element("b");
		let inner_end = doc.create_comment("/pp-scope:Inner");
		let outer_item = doc.create_element("i");
		for node in [outer_start, inner_start, inner_item, inner_end, outer_item] {
			doc.append_child(doc.root(), node).unwrap();
		}

		let mut resolver = ScopeResolver::default();
		assert_eq!(resolver.find_scope(&doc, inner_item), Some("Inner".into()));
		assert_eq!(resolver.find_scope(&doc, outer_item), Some("Outer".into()));
	}

	#[rstest]
	fn test_invalidate_tree_after_restructure(page: Page) {
		let mut resolver = ScopeResolver::default();
		assert_eq!(resolver.find_scope(&page.doc, page.global), None);

		let parent = page.doc.parent(page.global).unwrap();
		let marker = page.doc.create_comment("pp-scope:Footer");
		page.doc
			.insert_before(parent, marker, Some(page.global))
			.unwrap();
		// Stale until invalidated.
		assert_eq!(resolver.find_scope(&page.doc, page.global), None);

		resolver.invalidate_tree(&page.doc, parent);
		assert_eq!(
			resolver.find_scope(&page.doc, page.global),
			Some("Footer".into())
		);
	}

	#[rstest]
	fn test_remove_scope_comments_keeps_cached_scopes(page: Page) {
		let mut resolver = ScopeResolver::default();
		assert_eq!(resolver.remove_scope_comments(&page.doc), 2);
		assert_eq!(
			resolver.find_scope(&page.doc, page.list_item),
			Some("List".into())
		);
	}

	#[rstest]
	fn test_cleanup_respects_interval(page: Page) {
		let config = RuntimeConfig {
			scope_cleanup_interval_ms: 1000,
			..RuntimeConfig::default()
		};
		let mut resolver = ScopeResolver::new(&config);
		let start = Instant::now();

		resolver.find_scope(&page.doc, page.counter_text);
		assert_eq!(resolver.maybe_cleanup(&page.doc, start), 0);
		assert_eq!(resolver.get_cache_stats().last_cleanup, Some(start));

		page.doc.remove(page.counter).unwrap();
		resolver.find_scope(&page.doc, page.list_item);
		assert_eq!(
			resolver.maybe_cleanup(&page.doc, start + Duration::from_millis(10)),
			0
		);
		assert_eq!(
			resolver.maybe_cleanup(&page.doc, start + Duration::from_millis(1000)),
			1
		);
		assert_eq!(resolver.get_cache_stats().tracked_elements, 1);
	}

	#[rstest]
	fn test_overflow_schedules_cleanup(page: Page) {
		let config = RuntimeConfig {
			max_tracked_elements: 2,
			..RuntimeConfig::default()
		};
		let mut resolver = ScopeResolver::new(&config);
		resolver.pre_cache_all_scopes(&page.doc);
		assert!(resolver.get_cache_stats().cleanup_scheduled);

		resolver.force_cleanup(&page.doc, Instant::now());
		let stats = resolver.get_cache_stats();
		assert!(!stats.cleanup_scheduled);
		assert!(stats.tracked_elements <= 2);
	}
}
