//! Bounded least-recently-used cache.

use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use super::CacheStats;

#[derive(Debug)]
struct Entry<V> {
	value: V,
	stamp: u64,
}

/// A bounded map evicting its least recently used entry when full.
///
/// Recency is refreshed by [`get`](Self::get) and [`set`](Self::set);
/// [`peek`](Self::peek) and [`has`](Self::has) leave it untouched. Lookups
/// through `get` count towards the hit/miss counters reported by
/// [`stats`](Self::stats).
///
/// # Example
///
/// ```
/// use pulsepoint_reactive::cache::LruCache;
///
/// let mut cache = LruCache::new(2);
/// cache.set("a", 1);
/// cache.set("b", 2);
/// cache.get(&"a");
/// cache.set("c", 3);
/// assert!(cache.has(&"a"));
/// assert!(!cache.has(&"b"));
/// ```
#[derive(Debug)]
pub struct LruCache<K, V> {
	entries: HashMap<K, Entry<V>>,
	// Recency order: smallest stamp is the eviction candidate.
	order: BTreeMap<u64, K>,
	next_stamp: u64,
	max_size: usize,
	hits: u64,
	misses: u64,
}

impl<K, V> LruCache<K, V>
where
	K: Eq + Hash + Clone,
{
	/// Creates a cache holding at most `max_size` entries (minimum one).
	pub fn new(max_size: usize) -> Self {
		Self {
			entries: HashMap::new(),
			order: BTreeMap::new(),
			next_stamp: 0,
			max_size: max_size.max(1),
			hits: 0,
			misses: 0,
		}
	}

	fn bump(&mut self) -> u64 {
		let stamp = self.next_stamp;
		self.next_stamp += 1;
		stamp
	}

	/// Looks a key up, refreshing its recency on a hit.
	pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let stamp = self.bump();
		let Some(entry) = self.entries.get_mut(key) else {
			self.misses += 1;
			return None;
		};
		let previous = std::mem::replace(&mut entry.stamp, stamp);
		if let Some(owned) = self.order.remove(&previous) {
			self.order.insert(stamp, owned);
		}
		self.hits += 1;
		self.entries.get(key).map(|entry| &entry.value)
	}

	/// Reads a value without touching recency or counters.
	pub fn peek<Q>(&self, key: &Q) -> Option<&V>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		self.entries.get(key).map(|entry| &entry.value)
	}

	/// Inserts or replaces a value and marks it most recently used.
	///
	/// Inserting a new key into a full cache evicts the least recently used
	/// entry, which is returned.
	pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
		let stamp = self.bump();
		if let Some(entry) = self.entries.get_mut(&key) {
			let previous = std::mem::replace(&mut entry.stamp, stamp);
			entry.value = value;
			self.order.remove(&previous);
			self.order.insert(stamp, key);
			return None;
		}

		let evicted = if self.entries.len() >= self.max_size {
			self.evict_oldest()
		} else {
			None
		};
		self.order.insert(stamp, key.clone());
		self.entries.insert(key, Entry { value, stamp });
		evicted
	}

	fn evict_oldest(&mut self) -> Option<(K, V)> {
		let (_, key) = self.order.pop_first()?;
		let entry = self.entries.remove(&key)?;
		Some((key, entry.value))
	}

	/// Whether the key is present. Does not refresh recency.
	pub fn has<Q>(&self, key: &Q) -> bool
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		self.entries.contains_key(key)
	}

	/// Removes one entry, returning its value.
	pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
	where
		K: Borrow<Q>,
		Q: Hash + Eq + ?Sized,
	{
		let entry = self.entries.remove(key)?;
		self.order.remove(&entry.stamp);
		Some(entry.value)
	}

	/// Keeps only the entries for which `keep` returns true.
	///
	/// Returns the number of removed entries.
	pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) -> usize {
		let before = self.entries.len();
		let order = &mut self.order;
		self.entries.retain(|key, entry| {
			let kept = keep(key, &entry.value);
			if !kept {
				order.remove(&entry.stamp);
			}
			kept
		});
		before - self.entries.len()
	}

	/// Drops every entry while keeping the counters.
	pub fn clear(&mut self) {
		self.entries.clear();
		self.order.clear();
	}

	/// Keys from least to most recently used.
	pub fn keys(&self) -> impl Iterator<Item = &K> {
		self.order.values()
	}

	/// Number of entries.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Whether the cache holds no entries.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Capacity.
	pub fn max_size(&self) -> usize {
		self.max_size
	}

	/// Current counters.
	pub fn stats(&self) -> CacheStats {
		CacheStats::new(self.entries.len(), self.max_size, self.hits, self.misses)
	}

	/// Zeroes the hit/miss counters.
	pub fn reset_stats(&mut self) {
		self.hits = 0;
		self.misses = 0;
	}
}

impl<K, V> LruCache<K, V>
where
	K: Eq + Hash + Clone + AsRef<str>,
{
	/// Removes every entry whose key starts with `prefix`.
	///
	/// Returns the number of removed entries.
	pub fn delete_by_prefix(&mut self, prefix: &str) -> usize {
		self.retain(|key, _| !key.as_ref().starts_with(prefix))
	}

	/// Keys starting with `prefix`, least recently used first.
	pub fn get_keys_by_prefix(&self, prefix: &str) -> Vec<K> {
		self.order
			.values()
			.filter(|key| key.as_ref().starts_with(prefix))
			.cloned()
			.collect()
	}
}

impl<K, V> Default for LruCache<K, V>
where
	K: Eq + Hash + Clone,
{
	fn default() -> Self {
		Self::new(crate::config::MAX_CACHE_SIZE)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	fn filled(n: usize) -> LruCache<String, usize> {
		let mut cache = LruCache::new(n);
		for i in 0..n {
			cache.set(format!("k{}", i), i);
		}
		cache
	}

	#[rstest]
	fn test_evicts_first_inserted() {
		let mut cache = filled(3);
		let evicted = cache.set("k3".to_string(), 3);
		assert_eq!(evicted, Some(("k0".to_string(), 0)));
		assert!(!cache.has("k0"));
		assert_eq!(cache.len(), 3);
	}

	#[rstest]
	fn test_get_refreshes_recency() {
		let mut cache = filled(3);
		assert_eq!(cache.get("k0"), Some(&0));
		cache.set("k3".to_string(), 3);
		assert!(cache.has("k0"));
		assert!(!cache.has("k1"));
	}

	#[rstest]
	fn test_set_existing_refreshes_without_eviction() {
		let mut cache = filled(2);
		assert_eq!(cache.set("k0".to_string(), 10), None);
		assert_eq!(cache.len(), 2);
		cache.set("k2".to_string(), 2);
		assert_eq!(cache.peek("k0"), Some(&10));
		assert!(!cache.has("k1"));
	}

	#[rstest]
	fn test_peek_does_not_refresh() {
		let mut cache = filled(2);
		assert_eq!(cache.peek("k0"), Some(&0));
		cache.set("k2".to_string(), 2);
		assert!(!cache.has("k0"));
	}

	#[rstest]
	fn test_hits_and_misses() {
		let mut cache = filled(2);
		cache.get("k0");
		cache.get("missing");
		cache.get("k1");
		let stats = cache.stats();
		assert_eq!(stats.hits, 2);
		assert_eq!(stats.misses, 1);
		assert_eq!(stats.size, 2);
		assert_eq!(stats.max_size, 2);

		cache.reset_stats();
		assert_eq!(cache.stats().hit_rate, None);
	}

	#[rstest]
	fn test_delete_by_prefix() {
		let mut cache: LruCache<String, u8> = LruCache::new(10);
		cache.set("Counter::count".to_string(), 1);
		cache.set("Counter::step".to_string(), 2);
		cache.set("Counterpart::x".to_string(), 3);
		cache.set("Other::count".to_string(), 4);

		assert_eq!(cache.delete_by_prefix("Counter::"), 2);
		assert_eq!(cache.len(), 2);
		assert!(cache.has("Counterpart::x"));
		assert_eq!(cache.get_keys_by_prefix("Other"), vec!["Other::count".to_string()]);
	}

	#[rstest]
	fn test_delete_keeps_order_consistent() {
		let mut cache = filled(3);
		assert_eq!(cache.delete("k1"), Some(1));
		assert_eq!(cache.delete("k1"), None);
		cache.set("k3".to_string(), 3);
		cache.set("k4".to_string(), 4);
		let keys: Vec<_> = cache.keys().cloned().collect();
		assert_eq!(keys, vec!["k2", "k3", "k4"]);
	}

	#[rstest]
	fn test_zero_capacity_is_clamped() {
		let mut cache = LruCache::new(0);
		cache.set(1, "a");
		assert_eq!(cache.len(), 1);
		cache.set(2, "b");
		assert_eq!(cache.len(), 1);
		assert!(cache.has(&2));
	}

	#[rstest]
	fn test_clear() {
		let mut cache = filled(4);
		cache.clear();
		assert!(cache.is_empty());
		assert_eq!(cache.keys().count(), 0);
	}
}
