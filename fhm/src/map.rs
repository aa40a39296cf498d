use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash, Hasher};

use fnv::FnvBuildHasher;

use crate::error::{FhmError, FhmResult};
use crate::raw::RawTable;

/// A SwissTable-style flat hash map: open addressing over a single heap
/// allocation, `FnvBuildHasher` by default since the intended keys are
/// small integers and short strings rather than attacker-controlled
/// input (see the design notes on hasher choice).
pub struct Map<K, V, S = FnvBuildHasher> {
    raw: RawTable<K, V>,
    hash_builder: S,
    load_limit_pct: u8,
}

impl<K, V> Map<K, V, FnvBuildHasher> {
    /// `initial_capacity` must be zero or a power of two.
    /// `load_limit_pct` must be in `(0, 100]` and governs `growth_left`:
    /// the table grows once live entries would exceed this fraction of
    /// capacity.
    pub fn new(initial_capacity: usize, load_limit_pct: u8) -> FhmResult<Self> {
        Self::with_hasher(initial_capacity, load_limit_pct, FnvBuildHasher::default())
    }
}

impl<K, V> Default for Map<K, V, FnvBuildHasher> {
    fn default() -> Self {
        Self::new(0, 75).expect("default capacity/load_limit_pct are always valid")
    }
}

impl<K, V, S> Map<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    pub fn with_hasher(
        initial_capacity: usize,
        load_limit_pct: u8,
        hash_builder: S,
    ) -> FhmResult<Self> {
        if initial_capacity != 0 && !initial_capacity.is_power_of_two() {
            return Err(FhmError::CapacityNotPowerOfTwo(initial_capacity));
        }
        if load_limit_pct == 0 || load_limit_pct > 100 {
            return Err(FhmError::InvalidLoadLimit(load_limit_pct));
        }
        let mut raw = RawTable::new();
        if initial_capacity != 0 {
            raw.grow(load_limit_pct, initial_capacity, |_| 0);
        }
        Ok(Map {
            raw,
            hash_builder,
            load_limit_pct,
        })
    }

    fn hash_of<Q>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let mut hasher = self.hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn rehash_key(hash_builder: &S, key: &K) -> u64 {
        let mut hasher = hash_builder.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    pub fn len(&self) -> usize {
        self.raw.size
    }

    pub fn is_empty(&self) -> bool {
        self.raw.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.raw.capacity()
    }

    pub fn find<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        self.raw
            .find(hash, |k| k.borrow() == key)
            .map(|idx| unsafe { &self.raw.slot(idx).1 })
    }

    pub fn find_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let idx = self.raw.find(hash, |k| k.borrow() == key)?;
        Some(unsafe { &mut self.raw.slot_mut(idx).1 })
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Inserts `key -> value`, returning the previous value if `key`
    /// was already present. Grows the table first if `growth_left`
    /// has been exhausted.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash_builder = &self.hash_builder;
        self.raw
            .ensure_capacity_for_insert(self.load_limit_pct, |k| Self::rehash_key(hash_builder, k));
        let hash = self.hash_of(&key);
        match self.raw.find_or_prepare_insert(hash, |k| k == &key) {
            Ok(idx) => {
                let slot = unsafe { self.raw.slot_mut(idx) };
                Some(std::mem::replace(&mut slot.1, value))
            }
            Err(idx) => {
                unsafe { self.raw.insert_at(idx, hash, key, value) };
                None
            }
        }
    }

    pub fn erase<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hash_of(key);
        let idx = self.raw.find(hash, |k| k.borrow() == key)?;
        let (_, v) = unsafe { self.raw.remove_at(idx) };
        Some(v)
    }

    /// `operator[]` equivalent: returns a mutable reference to the
    /// value for `key`, inserting `V::default()` first if absent.
    pub fn index(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        let hash_builder = &self.hash_builder;
        self.raw
            .ensure_capacity_for_insert(self.load_limit_pct, |k| Self::rehash_key(hash_builder, k));
        let hash = self.hash_of(&key);
        let idx = match self.raw.find_or_prepare_insert(hash, |k| k == &key) {
            Ok(idx) => idx,
            Err(idx) => {
                unsafe { self.raw.insert_at(idx, hash, key, V::default()) };
                idx
            }
        };
        unsafe { &mut self.raw.slot_mut(idx).1 }
    }

    /// Ensures capacity for at least `additional` more entries without
    /// triggering a grow on the next `additional` inserts.
    pub fn reserve(&mut self, additional: usize) {
        let hash_builder = &self.hash_builder;
        self.raw
            .reserve(additional, self.load_limit_pct, |k| {
                Self::rehash_key(hash_builder, k)
            });
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.raw.iter().map(|(k, v)| (k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_log() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    #[test]
    fn new_rejects_non_power_of_two_capacity() {
        init_test_log();
        assert!(matches!(
            Map::<i32, i32>::new(3, 75),
            Err(FhmError::CapacityNotPowerOfTwo(3))
        ));
    }

    #[test]
    fn new_rejects_invalid_load_limit() {
        init_test_log();
        assert!(matches!(
            Map::<i32, i32>::new(0, 0),
            Err(FhmError::InvalidLoadLimit(0))
        ));
        assert!(matches!(
            Map::<i32, i32>::new(0, 101),
            Err(FhmError::InvalidLoadLimit(101))
        ));
    }

    #[test]
    fn insert_find_erase_roundtrip() {
        init_test_log();
        let mut map = Map::new(0, 75).unwrap();
        assert_eq!(map.insert(1, "one"), None);
        assert_eq!(map.insert(2, "two"), None);
        assert_eq!(map.find(&1), Some(&"one"));
        assert_eq!(map.insert(1, "uno"), Some("one"));
        assert_eq!(map.find(&1), Some(&"uno"));
        assert_eq!(map.erase(&1), Some("uno"));
        assert_eq!(map.find(&1), None);
        assert!(map.contains(&2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn tombstone_slot_is_reused_on_next_insert() {
        init_test_log();
        let mut map = Map::new(128, 75).unwrap();
        for i in 0..64 {
            map.insert(i, i);
        }
        let cap_before = map.capacity();
        for i in 0..32 {
            map.erase(&i);
        }
        map.insert(1000, 1000);
        assert_eq!(map.capacity(), cap_before, "reusing tombstones must not force a grow");
        assert_eq!(map.find(&1000), Some(&1000));
    }

    #[test]
    fn grows_past_load_limit_and_preserves_entries() {
        init_test_log();
        let mut map = Map::new(0, 75).unwrap();
        for i in 0..500 {
            map.insert(i, i * 2);
        }
        assert_eq!(map.len(), 500);
        for i in 0..500 {
            assert_eq!(map.find(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn index_inserts_default_then_mutates() {
        init_test_log();
        let mut map: Map<&str, i32> = Map::new(0, 75).unwrap();
        *map.index("count") += 1;
        *map.index("count") += 1;
        assert_eq!(map.find("count"), Some(&2));
    }

    #[test]
    fn clear_resets_len_but_keeps_capacity() {
        init_test_log();
        let mut map = Map::new(128, 75).unwrap();
        for i in 0..10 {
            map.insert(i, i);
        }
        let cap = map.capacity();
        map.clear();
        assert_eq!(map.len(), 0);
        assert_eq!(map.capacity(), cap);
        assert_eq!(map.find(&5), None);
    }

    #[test]
    fn iter_visits_every_live_entry_exactly_once() {
        init_test_log();
        let mut map = Map::new(0, 75).unwrap();
        for i in 0..50 {
            map.insert(i, i);
        }
        map.erase(&10);
        let mut seen: Vec<i32> = map.iter().map(|(k, _)| *k).collect();
        seen.sort_unstable();
        let expected: Vec<i32> = (0..50).filter(|&i| i != 10).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn heterogeneous_lookup_via_borrow() {
        init_test_log();
        let mut map: Map<String, i32> = Map::new(0, 75).unwrap();
        map.insert("hello".to_string(), 1);
        assert_eq!(map.find("hello"), Some(&1));
        assert!(map.contains("hello"));
    }

    #[test]
    fn reserve_grows_capacity_ahead_of_inserts() {
        init_test_log();
        let mut map: Map<i32, i32> = Map::new(0, 75).unwrap();
        map.reserve(1000);
        let cap = map.capacity();
        assert!(cap >= 1000);
        for i in 0..1000 {
            map.insert(i, i);
        }
        assert_eq!(map.capacity(), cap, "reserve should avoid a second grow");
    }
}
