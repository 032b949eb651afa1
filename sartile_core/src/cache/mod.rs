//! Bounded LRU caches.
//!
//! Two flavors cover every cache in the engine: [`LimitedCache`] bounds
//! the number of entries (tiles, B-tree nodes), [`WeightedCache`] bounds
//! the summed byte weight of its values (decoded chunks). Neither is
//! synchronized; owners wrap them in a mutex and keep critical sections
//! to lookup and insert.

use lru::LruCache;
use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// An entry-count-bounded LRU cache.
pub struct LimitedCache<K, V> {
	cache: LruCache<K, V>,
}

impl<K, V> LimitedCache<K, V>
where
	K: Hash + Eq + Clone,
	V: Clone,
{
	/// Creates a cache holding at most `capacity` entries.
	///
	/// # Panics
	/// Panics if `capacity` is zero; every cache in the engine has a
	/// positive configured size.
	pub fn new(capacity: usize) -> Self {
		Self {
			cache: LruCache::new(NonZeroUsize::new(capacity).expect("cache capacity must be positive")),
		}
	}

	/// Retrieves a clone of the value, marking the key most recently
	/// used.
	pub fn get(&mut self, key: &K) -> Option<V> {
		self.cache.get(key).cloned()
	}

	/// Inserts, evicting the least recently used entry at capacity.
	pub fn insert(&mut self, key: K, value: V) {
		self.cache.put(key, value);
	}

	/// Drops every entry whose key matches the predicate.
	pub fn purge<F: Fn(&K) -> bool>(&mut self, predicate: F) {
		let doomed: Vec<K> = self
			.cache
			.iter()
			.filter(|(k, _)| predicate(k))
			.map(|(k, _)| k.clone())
			.collect();
		for key in doomed {
			self.cache.pop(&key);
		}
	}

	pub fn clear(&mut self) {
		self.cache.clear();
	}

	pub fn len(&self) -> usize {
		self.cache.len()
	}

	pub fn is_empty(&self) -> bool {
		self.cache.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.cache.cap().get()
	}
}

impl<K: Hash + Eq, V> Debug for LimitedCache<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LimitedCache")
			.field("len", &self.cache.len())
			.field("capacity", &self.cache.cap().get())
			.finish()
	}
}

/// A byte-weight-bounded LRU cache.
///
/// Each entry carries an explicit weight (its decoded size); inserting
/// evicts least-recently-used entries until the total weight fits.
/// Values heavier than the whole budget are not cached at all.
pub struct WeightedCache<K, V> {
	cache: LruCache<K, (V, usize)>,
	total_weight: usize,
	max_weight: usize,
}

impl<K, V> WeightedCache<K, V>
where
	K: Hash + Eq + Clone,
	V: Clone,
{
	pub fn new(max_weight: usize) -> Self {
		Self {
			cache: LruCache::unbounded(),
			total_weight: 0,
			max_weight,
		}
	}

	pub fn get(&mut self, key: &K) -> Option<V> {
		self.cache.get(key).map(|(v, _)| v.clone())
	}

	pub fn insert(&mut self, key: K, value: V, weight: usize) {
		if weight > self.max_weight {
			return;
		}
		if let Some((_, old_weight)) = self.cache.put(key, (value, weight)) {
			self.total_weight -= old_weight;
		}
		self.total_weight += weight;
		while self.total_weight > self.max_weight {
			match self.cache.pop_lru() {
				Some((_, (_, evicted))) => self.total_weight -= evicted,
				None => break,
			}
		}
	}

	/// Drops every entry whose key matches the predicate.
	pub fn purge<F: Fn(&K) -> bool>(&mut self, predicate: F) {
		let doomed: Vec<K> = self
			.cache
			.iter()
			.filter(|(k, _)| predicate(k))
			.map(|(k, _)| k.clone())
			.collect();
		for key in doomed {
			if let Some((_, weight)) = self.cache.pop(&key) {
				self.total_weight -= weight;
			}
		}
	}

	pub fn len(&self) -> usize {
		self.cache.len()
	}

	pub fn is_empty(&self) -> bool {
		self.cache.is_empty()
	}

	/// Current summed weight of all entries.
	pub fn weight(&self) -> usize {
		self.total_weight
	}
}

impl<K: Hash + Eq, V> Debug for WeightedCache<K, V> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WeightedCache")
			.field("len", &self.cache.len())
			.field("weight", &self.total_weight)
			.field("max_weight", &self.max_weight)
			.finish()
	}
}
