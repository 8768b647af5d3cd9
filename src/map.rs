// The thin outer layer: turns keys into hashes and forwards everything
// else to `RawTable`. Literal/bulk construction sugar (`FromIterator`,
// `Extend`) and the public iteration surface live here too — the raw
// table only exposes the single "visit occupied slots" primitive.

use crate::probe::GROUP_SIZE;
use crate::raw::{RawTable, TableConfig};
use crate::simd::hash::wyhash;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::iter::FromIterator;

/// The default `BuildHasher`: a wyhash-based streaming hasher seeded
/// per-instance via `fastrand`, the way this codebase seeds its other
/// hash-based index structures rather than pulling OS entropy on every
/// construction.
#[derive(Clone)]
pub struct DefaultHashBuilder {
    seed: u64,
}

impl DefaultHashBuilder {
    pub fn new() -> Self {
        Self {
            seed: fastrand::u64(..),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

impl Default for DefaultHashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildHasher for DefaultHashBuilder {
    type Hasher = WyHasher;

    fn build_hasher(&self) -> Self::Hasher {
        WyHasher {
            seed: self.seed,
            buffer: Vec::new(),
        }
    }
}

/// Streaming `Hasher` over `wyhash`. Buffers every `write` call and
/// mixes the whole accumulated byte stream on `finish`, since wyhash
/// isn't itself an incremental construction.
pub struct WyHasher {
    seed: u64,
    buffer: Vec<u8>,
}

impl Hasher for WyHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        wyhash(&self.buffer, self.seed)
    }
}

fn hash_one<K: Hash + ?Sized, S: BuildHasher>(build_hasher: &S, key: &K) -> u64 {
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);
    hasher.finish()
}

/// A Swiss-table-backed map with copy-on-write clone semantics: cloning
/// a `SwissMap` is a cheap refcount bump, and the clone only pays for a
/// private copy of the storage the first time either side mutates.
pub struct SwissMap<K, V, S = DefaultHashBuilder> {
    table: RawTable<K, V>,
    hash_builder: S,
}

impl<K, V> SwissMap<K, V, DefaultHashBuilder> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::new())
    }

    pub fn with_config(config: TableConfig) -> Self {
        Self {
            table: RawTable::construct(config),
            hash_builder: DefaultHashBuilder::new(),
        }
    }
}

impl<K, V> Default for SwissMap<K, V, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S: BuildHasher> SwissMap<K, V, S> {
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            table: RawTable::construct(TableConfig::default()),
            hash_builder,
        }
    }

    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: RawTable::with_capacity(capacity.max(GROUP_SIZE), TableConfig::default()),
            hash_builder,
        }
    }
}

impl<K, V, S> SwissMap<K, V, S> {
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> SwissMap<K, V, S> {
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = hash_one(&self.hash_builder, key);
        self.table.get(hash, key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }
}

impl<K: Eq + Hash + Clone, V: Clone, S: BuildHasher> SwissMap<K, V, S> {
    /// Insert a key-value pair, returning the previous value if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = hash_one(&self.hash_builder, &key);
        self.table.insert_or_update(hash, key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = hash_one(&self.hash_builder, key);
        self.table.remove(hash, key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = hash_one(&self.hash_builder, key);
        self.table.get_mut(hash, key)
    }

    pub fn get_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        let hash = hash_one(&self.hash_builder, &key);
        if self.table.lookup(hash, &key).is_none() {
            self.table.insert_or_update(hash, key.clone(), default());
        }
        self.table
            .get_mut(hash, &key)
            .expect("key was just inserted")
    }

    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Mutably visit every value. Keys aren't mutable through this
    /// iterator — a changed key's hash would no longer match the slot
    /// it lives in.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.table.iter_mut(),
        }
    }
}

impl<K, V, S: Clone> Clone for SwissMap<K, V, S>
where
    K: Eq + Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            hash_builder: self.hash_builder.clone(),
        }
    }
}

impl<K: Eq + Hash, V: PartialEq, S: BuildHasher> PartialEq for SwissMap<K, V, S> {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|(k, v)| {
            let other_hash = hash_one(&other.hash_builder, k);
            other.table.get(other_hash, k).is_some_and(|ov| ov == v)
        })
    }
}

impl<K: Eq + Hash, V: Eq, S: BuildHasher> Eq for SwissMap<K, V, S> {}

impl<K: Eq + Hash, V: Hash, S: BuildHasher> Hash for SwissMap<K, V, S> {
    /// XOR of each pair's finalized hash, so the result doesn't depend
    /// on physical or iteration order.
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut acc = 0u64;
        for (k, v) in self.iter() {
            let mut pair_hasher = std::collections::hash_map::DefaultHasher::new();
            k.hash(&mut pair_hasher);
            v.hash(&mut pair_hasher);
            acc ^= pair_hasher.finish();
        }
        acc.hash(state);
    }
}

impl<K, V, S> fmt::Debug for SwissMap<K, V, S>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Eq + Hash, V, S: BuildHasher> std::ops::Index<&K> for SwissMap<K, V, S> {
    type Output = V;

    fn index(&self, key: &K) -> &V {
        self.get(key).expect("key not present in map")
    }
}

impl<K: Eq + Hash + Clone, V: Clone> FromIterator<(K, V)> for SwissMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<K: Eq + Hash + Clone, V: Clone, S: BuildHasher> Extend<(K, V)> for SwissMap<K, V, S> {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

pub struct Iter<'a, K, V> {
    inner: crate::iter::Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }
}

pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
}

pub struct ValuesMut<'a, K, V> {
    inner: crate::iter::IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }
}

/// Owned iteration: hands out each `(K, V)` pair by value, draining the
/// map. Forks a private buffer first if the map's storage is shared,
/// same as any other mutating operation.
pub struct IntoIter<K, V> {
    inner: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<'a, K: Eq + Hash, V, S: BuildHasher> IntoIterator for &'a SwissMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K: Eq + Hash + Clone, V: Clone, S: BuildHasher> IntoIterator for &'a mut SwissMap<K, V, S> {
    type Item = &'a mut V;
    type IntoIter = ValuesMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.values_mut()
    }
}

impl<K: Eq + Hash + Clone, V: Clone, S: BuildHasher> IntoIterator for SwissMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(mut self) -> Self::IntoIter {
        let entries = self.table.drain_into_vec();
        IntoIter {
            inner: entries.into_iter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut map: SwissMap<String, i32> = SwissMap::new();
        assert_eq!(map.insert("a".to_string(), 1), None);
        assert_eq!(map.get(&"a".to_string()), Some(&1));
        assert_eq!(map.remove(&"a".to_string()), Some(1));
        assert_eq!(map.get(&"a".to_string()), None);
    }

    #[test]
    fn insert_overwrites_and_reports_previous() {
        let mut map: SwissMap<String, i32> = SwissMap::new();
        map.insert("a".to_string(), 1);
        assert_eq!(map.insert("a".to_string(), 2), Some(1));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn from_iter_and_extend_build_expected_contents() {
        let map: SwissMap<String, i32> = vec![("a".to_string(), 1), ("b".to_string(), 2)]
            .into_iter()
            .collect();
        assert_eq!(map.get(&"a".to_string()), Some(&1));
        assert_eq!(map.get(&"b".to_string()), Some(&2));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn equality_ignores_order() {
        let a: SwissMap<String, i32> = vec![("a".to_string(), 1), ("b".to_string(), 2)]
            .into_iter()
            .collect();
        let b: SwissMap<String, i32> = vec![("b".to_string(), 2), ("a".to_string(), 1)]
            .into_iter()
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn index_panics_on_missing_key() {
        let map: SwissMap<String, i32> = SwissMap::new();
        let missing = "missing".to_string();
        let result = std::panic::catch_unwind(|| &map[&missing]);
        assert!(result.is_err());
    }

    #[test]
    fn clone_is_cow() {
        let mut a: SwissMap<String, i32> = SwissMap::new();
        a.insert("x".to_string(), 1);
        let mut b = a.clone();
        b.insert("x".to_string(), 2);
        assert_eq!(a.get(&"x".to_string()), Some(&1));
        assert_eq!(b.get(&"x".to_string()), Some(&2));
    }

    #[test]
    fn get_or_insert_with_only_calls_default_when_absent() {
        let mut map: SwissMap<String, i32> = SwissMap::new();
        *map.get_or_insert_with("a".to_string(), || 10) += 1;
        assert_eq!(map.get(&"a".to_string()), Some(&11));
    }

    #[test]
    fn values_mut_updates_every_value() {
        let mut map: SwissMap<String, i32> = SwissMap::new();
        for i in 0..50 {
            map.insert(format!("k{i}"), i);
        }
        for v in map.values_mut() {
            *v *= 10;
        }
        for i in 0..50 {
            assert_eq!(map.get(&format!("k{i}")), Some(&(i * 10)));
        }
    }

    #[test]
    fn into_iter_by_mut_ref_matches_values_mut() {
        let mut map: SwissMap<String, i32> = SwissMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        for v in &mut map {
            *v += 1;
        }
        assert_eq!(map.get(&"a".to_string()), Some(&2));
        assert_eq!(map.get(&"b".to_string()), Some(&3));
    }

    #[test]
    fn owned_into_iter_yields_every_pair_once() {
        let mut map: SwissMap<String, i32> = SwissMap::new();
        for i in 0..100 {
            map.insert(format!("k{i}"), i);
        }
        let mut collected: Vec<(String, i32)> = map.into_iter().collect();
        collected.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(collected.len(), 100);
        assert_eq!(collected[0], ("k0".to_string(), 0));
    }

    #[test]
    fn owned_into_iter_forks_shared_storage_without_touching_clone() {
        let mut original: SwissMap<String, i32> = SwissMap::new();
        original.insert("x".to_string(), 1);
        let clone = original.clone();

        let drained: Vec<(String, i32)> = original.into_iter().collect();
        assert_eq!(drained, vec![("x".to_string(), 1)]);
        assert_eq!(clone.get(&"x".to_string()), Some(&1));
    }
}
