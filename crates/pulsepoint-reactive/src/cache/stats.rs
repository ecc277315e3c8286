//! Cache statistics

use serde::Serialize;

/// Snapshot of one cache's counters.
///
/// Purely observational: nothing in the runtime branches on these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
	/// Current number of entries
	pub size: usize,
	/// Capacity before eviction kicks in
	pub max_size: usize,
	/// Number of lookups that found an entry
	pub hits: u64,
	/// Number of lookups that found nothing
	pub misses: u64,
	/// `hits / (hits + misses)`, absent before the first lookup
	pub hit_rate: Option<f64>,
}

impl CacheStats {
	/// Builds a snapshot, deriving `hit_rate` from the counters.
	///
	/// # Examples
	///
	/// ```
	/// use pulsepoint_reactive::cache::CacheStats;
	///
	/// let stats = CacheStats::new(3, 10, 75, 25);
	/// assert_eq!(stats.hit_rate, Some(0.75));
	/// assert_eq!(CacheStats::new(0, 10, 0, 0).hit_rate, None);
	/// ```
	pub fn new(size: usize, max_size: usize, hits: u64, misses: u64) -> Self {
		let total = hits + misses;
		let hit_rate = if total == 0 {
			None
		} else {
			Some(hits as f64 / total as f64)
		};
		Self {
			size,
			max_size,
			hits,
			misses,
			hit_rate,
		}
	}

	/// Total number of lookups recorded.
	pub fn total_requests(&self) -> u64 {
		self.hits + self.misses
	}

	/// Combines the counters of two caches into one aggregate snapshot.
	pub fn merge(&self, other: &CacheStats) -> CacheStats {
		CacheStats::new(
			self.size + other.size,
			self.max_size + other.max_size,
			self.hits + other.hits,
			self.misses + other.misses,
		)
	}
}
