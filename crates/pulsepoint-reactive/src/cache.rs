//! Caching primitives shared by every runtime component.

mod lru;
mod stats;

use std::collections::BTreeMap;

pub use lru::LruCache;
pub use stats::CacheStats;

/// A component that owns one or more invalidation-aware caches.
pub trait Cacheable {
	/// Drops one entry, or everything when `key` is `None`.
	fn invalidate_cache(&mut self, key: Option<&str>);

	/// Drops every entry of every cache the component owns.
	fn clear_all_caches(&mut self) {
		self.invalidate_cache(None);
	}

	/// Counters of each owned cache, keyed by cache name.
	fn cache_stats(&self) -> BTreeMap<&'static str, CacheStats>;
}
