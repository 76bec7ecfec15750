/// Key-ordered container with at most one entry per key.
///
/// Backs both the registry order and each worker's private view. Lookups
/// binary-search and stop as soon as the key position is known.
#[derive(Debug, Clone)]
pub(crate) struct OrderedIndex<K, V> {
	entries: Vec<(K, V)>,
}

impl<K, V> Default for OrderedIndex<K, V> {
	fn default() -> Self {
		Self { entries: Vec::new() }
	}
}

impl<K: Ord + Copy, V> OrderedIndex<K, V> {
	pub fn new() -> Self {
		Self::default()
	}

	fn position(&self, key: &K) -> Result<usize, usize> {
		self.entries.binary_search_by(|(k, _)| k.cmp(key))
	}

	/// Inserts at the key's sorted position. An existing entry is replaced and returned.
	pub fn insert(&mut self, key: K, value: V) -> Option<V> {
		match self.position(&key) {
			Ok(idx) => Some(std::mem::replace(&mut self.entries[idx].1, value)),
			Err(idx) => {
				self.entries.insert(idx, (key, value));
				None
			}
		}
	}

	pub fn get(&self, key: &K) -> Option<&V> {
		self.position(key).ok().map(|idx| &self.entries[idx].1)
	}

	pub fn contains_key(&self, key: &K) -> bool {
		self.position(key).is_ok()
	}

	pub fn remove(&mut self, key: &K) -> Option<V> {
		self.position(key).ok().map(|idx| self.entries.remove(idx).1)
	}

	pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
		self.entries.iter().map(|(k, v)| (*k, v))
	}

	pub fn values(&self) -> impl Iterator<Item = &V> {
		self.entries.iter().map(|(_, v)| v)
	}

	/// Removes and returns every entry, leaving the index empty.
	pub fn drain(&mut self) -> impl Iterator<Item = (K, V)> + '_ {
		self.entries.drain(..)
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn insert_keeps_ascending_order() {
		let mut idx = OrderedIndex::new();
		for k in [5, 1, 9, 3] {
			assert!(idx.insert(k, k * 10).is_none());
		}
		assert_eq!(idx.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec![1, 3, 5, 9]);
		assert_eq!(idx.get(&9), Some(&90));
		assert_eq!(idx.get(&4), None);
	}

	#[test]
	fn insert_existing_key_replaces_in_place() {
		let mut idx = OrderedIndex::new();
		idx.insert(2, "a");
		idx.insert(7, "b");
		assert_eq!(idx.insert(2, "c"), Some("a"));
		assert_eq!(idx.len(), 2);
		assert_eq!(idx.iter().collect::<Vec<_>>(), vec![(2, &"c"), (7, &"b")]);
	}

	#[test]
	fn remove_and_drain() {
		let mut idx = OrderedIndex::new();
		idx.insert(1, ());
		idx.insert(2, ());
		assert_eq!(idx.remove(&1), Some(()));
		assert_eq!(idx.remove(&1), None);
		assert!(idx.contains_key(&2));
		assert_eq!(idx.drain().count(), 1);
		assert!(idx.is_empty());
	}

	proptest! {
		#[test]
		fn keys_stay_sorted_and_unique(ops in proptest::collection::vec((any::<bool>(), 0u8..32), 0..200)) {
			let mut idx = OrderedIndex::new();
			let mut model = std::collections::BTreeMap::new();
			for (insert, key) in ops {
				if insert {
					prop_assert_eq!(idx.insert(key, ()), model.insert(key, ()));
				} else {
					prop_assert_eq!(idx.remove(&key), model.remove(&key));
				}
			}
			let keys: Vec<_> = idx.iter().map(|(k, _)| k).collect();
			let expected: Vec<_> = model.keys().copied().collect();
			prop_assert_eq!(keys, expected);
		}
	}
}
