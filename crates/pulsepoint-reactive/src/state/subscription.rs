//! Subscription registry and key index.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::debug_log;
use crate::dom::NodeId;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
	/// Allocates the next id.
	pub fn next() -> Self {
		Self(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed))
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// Payload handed to a subscription callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
	/// The written key that triggered the notification.
	pub key: String,
}

/// Callback invoked with the bound element (if any) and the change.
pub type SubscriptionCallback = Rc<dyn Fn(Option<NodeId>, &StateChange)>;

/// A callback interested in a set of dependency keys.
#[derive(Clone)]
pub struct Subscription {
	/// Identifier, unique per process.
	pub id: SubscriptionId,
	/// Selector describing the binding, for diagnostics.
	pub selector: String,
	/// Fully-qualified keys (or key paths) the callback reads.
	pub dependencies: BTreeSet<String>,
	/// Invoked once per flush when a dependency changed.
	pub callback: SubscriptionCallback,
	/// Element the binding lives on.
	pub element: Option<NodeId>,
	/// Component that registered the binding.
	pub component: Option<String>,
}

impl Subscription {
	/// Creates a subscription with a fresh id.
	pub fn new<I, S, F>(dependencies: I, callback: F) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
		F: Fn(Option<NodeId>, &StateChange) + 'static,
	{
		Self {
			id: SubscriptionId::next(),
			selector: String::new(),
			dependencies: dependencies.into_iter().map(Into::into).collect(),
			callback: Rc::new(callback),
			element: None,
			component: None,
		}
	}

	/// Binds the subscription to an element.
	pub fn with_element(mut self, element: NodeId) -> Self {
		self.element = Some(element);
		self
	}

	/// Records the owning component.
	pub fn with_component(mut self, component: impl Into<String>) -> Self {
		self.component = Some(component.into());
		self
	}

	/// Records a diagnostic selector.
	pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
		self.selector = selector.into();
		self
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription")
			.field("id", &self.id)
			.field("selector", &self.selector)
			.field("dependencies", &self.dependencies)
			.field("element", &self.element)
			.field("component", &self.component)
			.finish_non_exhaustive()
	}
}

/// Counters reported by [`SubscriptionManager::get_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionStats {
	/// Registered subscriptions.
	pub total_subscriptions: usize,
	/// Elements with at least one subscription.
	pub element_subscriptions: usize,
	/// Distinct dependency keys.
	pub key_indexes: usize,
}

/// Stores subscriptions with two indexes: dependency key → ids and
/// element → ids.
///
/// The key index is ordered so that every dependency under a written key
/// (`user.name` under `user`) is a contiguous range.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
	subscriptions: HashMap<SubscriptionId, Subscription>,
	element_subscriptions: HashMap<NodeId, BTreeSet<SubscriptionId>>,
	key_index: BTreeMap<String, BTreeSet<SubscriptionId>>,
	cleanup_queue: BTreeSet<NodeId>,
	cleanup_scheduled: bool,
}

impl SubscriptionManager {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `subscription`, replacing any entry with the same id.
	pub fn add_subscription(&mut self, subscription: Subscription) -> SubscriptionId {
		let id = subscription.id;
		self.remove_subscription(id);
		for key in &subscription.dependencies {
			self.key_index.entry(key.clone()).or_default().insert(id);
		}
		if let Some(element) = subscription.element {
			self.element_subscriptions
				.entry(element)
				.or_default()
				.insert(id);
		}
		self.subscriptions.insert(id, subscription);
		id
	}

	/// Unregisters one subscription and prunes empty index entries.
	pub fn remove_subscription(&mut self, id: SubscriptionId) -> bool {
		let Some(subscription) = self.subscriptions.remove(&id) else {
			return false;
		};
		for key in &subscription.dependencies {
			if let Some(ids) = self.key_index.get_mut(key) {
				ids.remove(&id);
				if ids.is_empty() {
					self.key_index.remove(key);
				}
			}
		}
		if let Some(element) = subscription.element {
			if let Some(ids) = self.element_subscriptions.get_mut(&element) {
				ids.remove(&id);
				if ids.is_empty() {
					self.element_subscriptions.remove(&element);
				}
			}
		}
		true
	}

	/// Unregisters every subscription bound to `element`.
	pub fn cleanup_element(&mut self, element: NodeId) -> usize {
		let ids = self
			.element_subscriptions
			.remove(&element)
			.unwrap_or_default();
		ids.into_iter()
			.filter(|id| self.remove_subscription(*id))
			.count()
	}

	/// Queues `element` for removal once it is confirmed detached.
	pub fn queue_cleanup(&mut self, element: NodeId) {
		if self.element_subscriptions.contains_key(&element) {
			self.cleanup_queue.insert(element);
			self.cleanup_scheduled = true;
		}
	}

	/// Whether a cleanup pass is pending.
	pub fn has_scheduled_cleanup(&self) -> bool {
		self.cleanup_scheduled
	}

	/// Drains the cleanup queue, removing subscriptions of elements that are
	/// still detached. Elements re-attached in the meantime keep theirs.
	pub fn process_cleanup_queue(&mut self, is_connected: impl Fn(NodeId) -> bool) -> usize {
		let queue = std::mem::take(&mut self.cleanup_queue);
		self.cleanup_scheduled = false;
		let removed: usize = queue
			.into_iter()
			.filter(|element| !is_connected(*element))
			.map(|element| self.cleanup_element(element))
			.sum();
		if removed > 0 {
			debug_log!("removed {} subscriptions of detached elements", removed);
		}
		removed
	}

	/// Removes every element-bound subscription whose element is detached.
	pub fn cleanup_stale_subscriptions(&mut self, is_connected: impl Fn(NodeId) -> bool) -> usize {
		let stale: Vec<NodeId> = self
			.element_subscriptions
			.keys()
			.copied()
			.filter(|element| !is_connected(*element))
			.collect();
		stale
			.into_iter()
			.map(|element| self.cleanup_element(element))
			.sum()
	}

	/// Removes subscriptions registered by `component` or any component
	/// nested under it (`component.child`).
	pub fn clear_component(&mut self, component: &str) -> usize {
		let nested = format!("{}.", component);
		let ids: Vec<SubscriptionId> = self
			.subscriptions
			.values()
			.filter(|sub| {
				sub.component
					.as_deref()
					.is_some_and(|c| c == component || c.starts_with(&nested))
			})
			.map(|sub| sub.id)
			.collect();
		ids.into_iter()
			.filter(|id| self.remove_subscription(*id))
			.count()
	}

	/// Removes everything.
	pub fn clear(&mut self) {
		self.subscriptions.clear();
		self.element_subscriptions.clear();
		self.key_index.clear();
		self.cleanup_queue.clear();
		self.cleanup_scheduled = false;
	}

	/// Looks up one subscription.
	pub fn get_subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
		self.subscriptions.get(&id)
	}

	/// Ids depending on exactly `key`.
	pub fn get_subscriptions_for_key(&self, key: &str) -> Option<&BTreeSet<SubscriptionId>> {
		self.key_index.get(key)
	}

	/// Elements that anchor at least one subscription, in id order.
	pub fn subscribed_elements(&self) -> Vec<NodeId> {
		let mut elements: Vec<NodeId> = self.element_subscriptions.keys().copied().collect();
		elements.sort();
		elements
	}

	/// Whether `element` anchors any subscription.
	pub fn has_element(&self, element: NodeId) -> bool {
		self.element_subscriptions.contains_key(&element)
	}

	/// Every registered subscription.
	pub fn get_all_subscriptions(&self) -> &HashMap<SubscriptionId, Subscription> {
		&self.subscriptions
	}

	/// The dependency index.
	pub fn key_index(&self) -> &BTreeMap<String, BTreeSet<SubscriptionId>> {
		&self.key_index
	}

	/// Subscriptions affected by a write to `key`.
	///
	/// Exact matches come first. Path matches follow, deepest dependency
	/// first, ties broken by key order and then id. Each id appears once and
	/// carries every dependency that matched, in that same order.
	pub fn matching(&self, key: &str) -> Vec<Match> {
		let mut paths: Vec<(&String, PathRelation)> = Vec::new();
		if let Some((dep, _)) = self.key_index.get_key_value(key) {
			paths.push((dep, PathRelation::Exact));
		}

		let mut nested: Vec<(&String, PathRelation)> = Vec::new();
		let below = format!("{}.", key);
		nested.extend(
			self.key_index
				.range(below.clone()..)
				.take_while(|(dep, _)| dep.starts_with(&below))
				.map(|(dep, _)| (dep, PathRelation::Descendant)),
		);
		let mut end = key.len();
		while let Some(dot) = key[..end].rfind('.') {
			if let Some((dep, _)) = self.key_index.get_key_value(&key[..dot]) {
				nested.push((dep, PathRelation::Ancestor));
			}
			end = dot;
		}
		nested.sort_by(|(a, _), (b, _)| {
			let depth = |k: &str| k.matches('.').count();
			depth(b).cmp(&depth(a)).then_with(|| a.cmp(b))
		});
		paths.extend(nested);

		let mut out: Vec<Match> = Vec::new();
		for (dep, relation) in paths {
			for id in &self.key_index[dep] {
				let path = MatchedPath {
					dependency: dep.clone(),
					relation,
				};
				match out.iter_mut().find(|m| m.id == *id) {
					Some(existing) => existing.paths.push(path),
					None => out.push(Match {
						id: *id,
						paths: vec![path],
					}),
				}
			}
		}
		out
	}

	/// Counters for diagnostics.
	pub fn get_stats(&self) -> SubscriptionStats {
		SubscriptionStats {
			total_subscriptions: self.subscriptions.len(),
			element_subscriptions: self.element_subscriptions.len(),
			key_indexes: self.key_index.len(),
		}
	}
}

/// How a dependency relates to the written key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRelation {
	/// Same key.
	Exact,
	/// The dependency is below the written key (`user.name` for `user`).
	Descendant,
	/// The dependency is above the written key (`user` for `user.name`).
	Ancestor,
}

/// A dependency of a [`Match`] and how it relates to the written key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPath {
	/// The dependency that matched.
	pub dependency: String,
	/// How `dependency` relates to the written key.
	pub relation: PathRelation,
}

/// One subscription selected for notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
	/// Subscription to notify.
	pub id: SubscriptionId,
	/// Every matched dependency, strongest first.
	pub paths: Vec<MatchedPath>,
}

impl Match {
	/// Relation of the strongest matched dependency.
	pub fn relation(&self) -> PathRelation {
		self.paths
			.first()
			.map_or(PathRelation::Exact, |path| path.relation)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn noop() -> impl Fn(Option<NodeId>, &StateChange) + 'static {
		|_, _| {}
	}

	#[rstest]
	fn test_add_and_remove_keep_indexes_in_sync() {
		let mut manager = SubscriptionManager::new();
		let sub = Subscription::new(["C.a", "C.b"], noop()).with_element(NodeId(4));
		let id = manager.add_subscription(sub);
		assert_eq!(
			manager.get_stats(),
			SubscriptionStats {
				total_subscriptions: 1,
				element_subscriptions: 1,
				key_indexes: 2,
			}
		);

		assert!(manager.remove_subscription(id));
		assert!(!manager.remove_subscription(id));
		assert_eq!(manager.get_stats(), SubscriptionStats::default());
	}

	#[rstest]
	fn test_matching_orders_exact_then_deepest_path() {
		let mut manager = SubscriptionManager::new();
		let user = manager.add_subscription(Subscription::new(["P.user"], noop()));
		let name = manager.add_subscription(Subscription::new(["P.user.name"], noop()));
		let first = manager.add_subscription(Subscription::new(["P.user.name.first"], noop()));
		let other = manager.add_subscription(Subscription::new(["P.username"], noop()));

		let ids: Vec<SubscriptionId> = manager.matching("P.user").into_iter().map(|m| m.id).collect();
		assert_eq!(ids, vec![user, first, name]);
		assert!(!ids.contains(&other));

		let matches = manager.matching("P.user.name");
		assert_eq!(matches[0].id, name);
		assert_eq!(matches[0].relation(), PathRelation::Exact);
		assert_eq!(matches[1].id, first);
		assert_eq!(matches[2].id, user);
		assert_eq!(matches[2].relation(), PathRelation::Ancestor);
	}

	#[rstest]
	fn test_subscription_with_two_matching_paths_appears_once() {
		let mut manager = SubscriptionManager::new();
		let id = manager.add_subscription(Subscription::new(["S.a.x", "S.a.y"], noop()));
		let matches = manager.matching("S.a");
		assert_eq!(matches.len(), 1);
		assert_eq!(matches[0].id, id);
		let deps: Vec<&str> = matches[0]
			.paths
			.iter()
			.map(|path| path.dependency.as_str())
			.collect();
		assert_eq!(deps, vec!["S.a.x", "S.a.y"]);
	}

	#[rstest]
	fn test_cleanup_queue_skips_reattached_elements() {
		let mut manager = SubscriptionManager::new();
		manager.add_subscription(Subscription::new(["k"], noop()).with_element(NodeId(1)));
		manager.add_subscription(Subscription::new(["k"], noop()).with_element(NodeId(2)));
		manager.queue_cleanup(NodeId(1));
		manager.queue_cleanup(NodeId(2));
		manager.queue_cleanup(NodeId(99));
		assert!(manager.has_scheduled_cleanup());

		let removed = manager.process_cleanup_queue(|node| node == NodeId(2));
		assert_eq!(removed, 1);
		assert!(!manager.has_scheduled_cleanup());
		assert_eq!(manager.get_stats().total_subscriptions, 1);
	}

	#[rstest]
	fn test_queue_without_subscriptions_does_not_schedule() {
		let mut manager = SubscriptionManager::new();
		manager.queue_cleanup(NodeId(7));
		assert!(!manager.has_scheduled_cleanup());
	}

	#[rstest]
	fn test_clear_component_includes_nested() {
		let mut manager = SubscriptionManager::new();
		manager.add_subscription(Subscription::new(["x"], noop()).with_component("app"));
		manager.add_subscription(Subscription::new(["x"], noop()).with_component("app.header"));
		manager.add_subscription(Subscription::new(["x"], noop()).with_component("application"));
		assert_eq!(manager.clear_component("app"), 2);
		assert_eq!(manager.get_stats().total_subscriptions, 1);
	}

	#[rstest]
	fn test_cleanup_stale_subscriptions() {
		let mut manager = SubscriptionManager::new();
		manager.add_subscription(Subscription::new(["k"], noop()).with_element(NodeId(1)));
		manager.add_subscription(Subscription::new(["k"], noop()));
		assert_eq!(manager.cleanup_stale_subscriptions(|_| false), 1);
		assert_eq!(manager.get_stats().total_subscriptions, 1);
	}
}
