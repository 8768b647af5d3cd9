// The table engine: insert/lookup/delete, rehashing, and the
// copy-on-write gate that makes cloning a table handle cheap.
//
// `RawTable` consumes a hash the caller already computed for every
// call — it knows nothing about how to hash a key beyond `K: Eq` for
// comparing it. Every stored entry carries the hash it was inserted
// with, so rehashing an entry during growth or a COW fork reuses that
// stored hash instead of asking the caller to recompute it; the core
// never needs a hasher at all.

use crate::error::{Result, TableError};
use crate::iter::{Iter, IterMut};
use crate::probe::{fingerprint, group_index, is_occupied, Group, EMPTY, GROUP_SIZE};
use crate::storage::{Entry, RawStorage};

const DEFAULT_CAPACITY: usize = GROUP_SIZE;

/// Tunable growth behavior. The mandatory trigger — grow when a probed
/// group is completely full — always applies; `max_group_load` adds an
/// optional, earlier trigger so probe sequences stay short under
/// sustained insert load.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableConfig {
    /// Grow proactively once a probed group's occupancy would reach or
    /// exceed `numerator / denominator`, even if the group isn't full.
    pub max_group_load: Option<(u32, u32)>,
}

impl TableConfig {
    /// No proactive guard: only grow when a probed group saturates.
    pub fn permissive() -> Self {
        Self {
            max_group_load: None,
        }
    }

    /// Grow once a probed group reaches 7/8 occupancy.
    pub fn conservative() -> Self {
        Self {
            max_group_load: Some((7, 8)),
        }
    }
}

/// The table handle. Cheap to clone (a refcount bump on the shared
/// storage buffer); mutating a shared handle forks its own private copy
/// first, so clones never observe each other's writes.
pub struct RawTable<K, V> {
    storage: RawStorage<K, V>,
    len: usize,
    config: TableConfig,
}

impl<K, V> RawTable<K, V> {
    pub fn construct(config: TableConfig) -> Self {
        Self::try_construct(config).expect("failed to allocate initial table storage")
    }

    pub fn try_construct(config: TableConfig) -> Result<Self> {
        Self::try_with_capacity(DEFAULT_CAPACITY, config)
    }

    pub fn with_capacity(capacity: usize, config: TableConfig) -> Self {
        Self::try_with_capacity(capacity, config)
            .expect("failed to allocate table storage for requested capacity")
    }

    pub fn try_with_capacity(capacity: usize, config: TableConfig) -> Result<Self> {
        let capacity = round_up_to_group(capacity.max(GROUP_SIZE).next_power_of_two());
        Ok(Self {
            storage: RawStorage::allocate(capacity)?,
            len: 0,
            config,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    #[inline]
    pub fn config(&self) -> TableConfig {
        self.config
    }

    fn num_groups(&self) -> usize {
        self.capacity() / GROUP_SIZE
    }

    /// Visit occupied slots in storage order. The iterator borrows this
    /// table, so it can't observe a mutation made after it was created.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(&self.storage)
    }

    fn group_at(&self, group_idx: usize) -> Group {
        let start = group_idx * GROUP_SIZE;
        Group::load(&self.storage.ctrl()[start..])
    }
}

impl<K: Eq, V> RawTable<K, V> {
    /// Find a key's slot index, if present.
    ///
    /// A hash maps to exactly one group, and that group is the only one
    /// ever consulted — there is no spillover into neighboring groups.
    /// If the key isn't among that group's matching-fingerprint lanes,
    /// it isn't in the table, whether or not the group still has room;
    /// a full group means only that the *next* insert targeting it must
    /// grow the table first, not that lookups need to probe elsewhere.
    pub fn lookup(&self, hash: u64, key: &K) -> Option<usize> {
        if self.len == 0 {
            return None;
        }

        let fp = fingerprint(hash);
        let group_idx = group_index(hash, self.num_groups());
        let group = self.group_at(group_idx);

        for lane in group.match_byte(fp) {
            let slot = group_idx * GROUP_SIZE + lane;
            let entry = unsafe { self.storage.entry(slot) };
            if entry.hash == hash && &entry.key == key {
                return Some(slot);
            }
        }

        None
    }

    pub fn get(&self, hash: u64, key: &K) -> Option<&V> {
        self.lookup(hash, key)
            .map(|slot| unsafe { &self.storage.entry(slot).value })
    }

    pub fn contains_key(&self, hash: u64, key: &K) -> bool {
        self.lookup(hash, key).is_some()
    }
}

impl<K: Eq + Clone, V: Clone> RawTable<K, V> {
    /// A mutable reference to the value, forking the storage first if
    /// it's shared with another handle.
    pub fn get_mut(&mut self, hash: u64, key: &K) -> Option<&mut V> {
        // Check presence before forking: a miss touches nothing, so a
        // shared handle shouldn't pay for a private copy it didn't need.
        self.lookup(hash, key)?;
        self.ensure_unique();
        let slot = self
            .lookup(hash, key)
            .expect("key located before the fork must still be present after it");
        Some(unsafe { &mut self.storage.entry_mut(slot).value })
    }

    /// Mutably visit every occupied slot, forking first if shared.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        self.ensure_unique();
        IterMut::new(&mut self.storage)
    }

    /// Remove every entry, handing ownership of each key-value pair to
    /// the caller instead of dropping it in place. Forks first if
    /// shared, since the slots this drains are cleared unconditionally.
    pub fn drain_into_vec(&mut self) -> Vec<(K, V)> {
        self.ensure_unique();
        let mut out = Vec::with_capacity(self.len);
        for i in 0..self.storage.capacity() {
            if is_occupied(self.storage.ctrl()[i]) {
                let entry = unsafe { self.storage.read_entry(i) };
                self.storage.ctrl_mut()[i] = EMPTY;
                out.push((entry.key, entry.value));
            }
        }
        self.len = 0;
        out
    }

    /// Insert or overwrite `key`, returning the previous value if any.
    pub fn insert_or_update(&mut self, hash: u64, key: K, value: V) -> Option<V> {
        self.try_insert_or_update(hash, key, value)
            .expect("insert failed to allocate during rehash")
    }

    pub fn try_insert_or_update(&mut self, hash: u64, key: K, value: V) -> Result<Option<V>> {
        self.try_ensure_unique()?;

        if let Some(slot) = self.lookup(hash, &key) {
            let entry = unsafe { self.storage.entry_mut(slot) };
            return Ok(Some(std::mem::replace(&mut entry.value, value)));
        }

        // No spillover: a key's group is fixed by its hash. If that
        // group has no room, grow (which redistributes every entry
        // across more, smaller groups) and recheck — a table that just
        // grew should always have room in the freshly recomputed
        // group, but an adversarial hash distribution could in
        // principle still saturate it, so this keeps growing until
        // there's space rather than assuming one doubling is enough.
        loop {
            self.try_reserve_for_insert(hash)?;

            let fp = fingerprint(hash);
            let group_idx = group_index(hash, self.num_groups());
            let group = self.group_at(group_idx);

            if let Some(lane) = group.match_empty().lowest() {
                let slot = group_idx * GROUP_SIZE + lane;
                unsafe {
                    self.storage.write_entry(slot, Entry { hash, key, value });
                }
                self.storage.ctrl_mut()[slot] = fp;
                self.len += 1;
                return Ok(None);
            }
        }
    }

    /// Remove `key`, returning its value if present.
    pub fn remove(&mut self, hash: u64, key: &K) -> Option<V> {
        self.try_remove(hash, key)
            .expect("remove failed to fork storage")
    }

    pub fn try_remove(&mut self, hash: u64, key: &K) -> Result<Option<V>> {
        if self.len == 0 || self.lookup(hash, key).is_none() {
            return Ok(None);
        }
        self.try_ensure_unique()?;

        let slot = self
            .lookup(hash, key)
            .expect("key located before the fork must still be present after it");

        let entry = unsafe { self.storage.read_entry(slot) };
        self.storage.ctrl_mut()[slot] = EMPTY;
        self.len -= 1;
        Ok(Some(entry.value))
    }

    pub fn clear(&mut self) {
        if self.len == 0 {
            return;
        }
        // A fresh private buffer is simpler and just as correct as
        // forking then wiping; shared clones keep their own contents.
        let capacity = self.capacity();
        self.storage = RawStorage::allocate(capacity)
            .expect("failed to allocate storage while clearing");
        self.len = 0;
    }

    fn try_reserve_for_insert(&mut self, hash: u64) -> Result<()> {
        let num_groups = self.num_groups();
        let probe_group = group_index(hash, num_groups);
        let group = self.group_at(probe_group);
        let occupied = GROUP_SIZE - group.match_empty().count();

        let must_grow = !group.match_empty().any()
            || self.config.max_group_load.is_some_and(|(n, d)| {
                occupied as u32 * d as u32 >= n as u32 * GROUP_SIZE as u32
            });

        if must_grow {
            self.try_grow(self.capacity() * 2)?;
        }
        Ok(())
    }

    /// Grow this table to (at least) `new_capacity`, rebuilding the
    /// control/entry layout. Cloning every entry instead of moving it
    /// keeps this correct even if a destination group ends up
    /// oversubscribed partway through a rebuild attempt — the old
    /// buffer is untouched and still drops cleanly through its own
    /// refcount once this table stops pointing at it.
    ///
    /// No spillover applies here too: if redistributing at
    /// `new_capacity` would overflow some group (rare — doubling
    /// capacity roughly halves average group occupancy — but not
    /// impossible for a pathological hash distribution), this doubles
    /// again rather than letting an entry spill into a neighboring
    /// group.
    fn try_grow(&mut self, new_capacity: usize) -> Result<()> {
        let mut capacity = round_up_to_group(new_capacity.max(GROUP_SIZE));
        loop {
            tracing::debug!(
                old_capacity = self.capacity(),
                new_capacity = capacity,
                len = self.len,
                "growing table storage"
            );

            let mut new_storage = RawStorage::allocate(capacity)?;
            if rebuild_into(&self.storage, self.capacity(), &mut new_storage, capacity) {
                self.storage = new_storage;
                return Ok(());
            }
            capacity *= 2;
        }
    }

    /// Ensure this handle's storage isn't shared, forking a private
    /// copy first if it is. A no-op when the handle is already unique.
    pub(crate) fn ensure_unique(&mut self) {
        self.try_ensure_unique()
            .expect("failed to allocate storage while forking a shared table")
    }

    pub(crate) fn try_ensure_unique(&mut self) -> Result<()> {
        if self.storage.is_unique() {
            return Ok(());
        }

        tracing::trace!(capacity = self.capacity(), "forking shared table storage");

        let capacity = self.capacity();
        let mut new_storage = RawStorage::allocate(capacity)?;
        // A same-capacity fork redistributes the exact same (hash,
        // group) assignments the source already validated, so this
        // never needs to grow further in practice — but fall back to
        // `try_grow` rather than assume it, since every entry's
        // destination group is recomputed from its stored hash and a
        // pathological distribution could in principle still saturate
        // one.
        if rebuild_into(&self.storage, capacity, &mut new_storage, capacity) {
            self.storage = new_storage;
            Ok(())
        } else {
            self.try_grow(capacity * 2)
        }
    }
}

/// Re-insert every occupied entry of `src` into `dst`, cloning keys and
/// values. Used for both COW forks (same capacity) and growth (larger
/// capacity) — the destination always starts from an all-empty buffer.
/// Each entry's stored hash (§3's Entry carries "the 64-bit hash of the
/// key, the key itself, and the value") is reused to pick its
/// destination group, per §4.7 — no caller hasher is needed here.
///
/// Returns `false`, leaving `dst` partially populated, the moment some
/// entry's assigned group has no room left — the caller is expected to
/// discard `dst` and retry at a larger capacity rather than let that
/// entry spill into a neighboring group.
fn rebuild_into<K: Eq + Clone, V: Clone>(
    src: &RawStorage<K, V>,
    src_capacity: usize,
    dst: &mut RawStorage<K, V>,
    dst_capacity: usize,
) -> bool {
    let dst_num_groups = dst_capacity / GROUP_SIZE;

    for i in 0..src_capacity {
        if !is_occupied(src.ctrl()[i]) {
            continue;
        }

        let entry = unsafe { src.entry(i) };
        let fp = fingerprint(entry.hash);
        let group_idx = group_index(entry.hash, dst_num_groups);
        let start = group_idx * GROUP_SIZE;
        let group = Group::load(&dst.ctrl()[start..]);

        match group.match_empty().lowest() {
            Some(lane) => {
                let slot = start + lane;
                unsafe {
                    dst.write_entry(
                        slot,
                        Entry {
                            hash: entry.hash,
                            key: entry.key.clone(),
                            value: entry.value.clone(),
                        },
                    );
                }
                dst.ctrl_mut()[slot] = fp;
            }
            None => return false,
        }
    }

    true
}

fn round_up_to_group(capacity: usize) -> usize {
    (capacity + GROUP_SIZE - 1) / GROUP_SIZE * GROUP_SIZE
}

impl<K: Eq + Clone, V: Clone> Clone for RawTable<K, V> {
    /// Cheap: bumps the shared storage's refcount, no entries copied.
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.share(),
            len: self.len,
            config: self.config,
        }
    }
}

impl<K: Eq, V> Default for RawTable<K, V> {
    fn default() -> Self {
        Self::construct(TableConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_of(k: &str) -> u64 {
        crate::simd::hash::wyhash(k.as_bytes(), 0)
    }

    #[test]
    fn insert_then_lookup_roundtrips() {
        let mut table: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        let h = hash_of("a");
        assert_eq!(table.insert_or_update(h, "a".to_string(), 1), None);
        assert_eq!(table.get(h, &"a".to_string()), Some(&1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn insert_overwrites_existing_key() {
        let mut table: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        let h = hash_of("a");
        table.insert_or_update(h, "a".to_string(), 1);
        let prev = table.insert_or_update(h, "a".to_string(), 2);
        assert_eq!(prev, Some(1));
        assert_eq!(table.get(h, &"a".to_string()), Some(&2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_returns_value_and_forgets_key() {
        let mut table: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        let h = hash_of("a");
        table.insert_or_update(h, "a".to_string(), 1);
        assert_eq!(table.remove(h, &"a".to_string()), Some(1));
        assert_eq!(table.get(h, &"a".to_string()), None);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn remove_absent_key_is_a_noop() {
        let mut table: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        assert_eq!(
            table.remove(hash_of("missing"), &"missing".to_string()),
            None
        );
    }

    #[test]
    fn growth_preserves_all_entries() {
        let mut table: RawTable<String, i32> =
            RawTable::with_capacity(GROUP_SIZE, TableConfig::default());
        for i in 0..500 {
            let key = format!("k{i}");
            table.insert_or_update(hash_of(&key), key, i);
        }
        assert_eq!(table.len(), 500);
        for i in 0..500 {
            let key = format!("k{i}");
            assert_eq!(table.get(hash_of(&key), &key), Some(&i));
        }
    }

    #[test]
    fn clone_is_independent_after_mutation() {
        let mut a: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        a.insert_or_update(hash_of("x"), "x".to_string(), 1);

        let mut b = a.clone();
        b.insert_or_update(hash_of("x"), "x".to_string(), 2);

        assert_eq!(a.get(hash_of("x"), &"x".to_string()), Some(&1));
        assert_eq!(b.get(hash_of("x"), &"x".to_string()), Some(&2));
    }

    #[test]
    fn conservative_config_grows_before_group_is_full() {
        let mut table: RawTable<String, i32> =
            RawTable::with_capacity(GROUP_SIZE, TableConfig::conservative());
        for i in 0..(GROUP_SIZE - 2) {
            let key = format!("k{i}");
            table.insert_or_update(hash_of(&key), key, i as i32);
        }
        assert!(table.capacity() > GROUP_SIZE);
    }

    #[test]
    fn iter_mut_updates_every_value_in_place() {
        let mut table: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        for i in 0..40 {
            let key = format!("k{i}");
            table.insert_or_update(hash_of(&key), key, i);
        }
        for (_, v) in table.iter_mut() {
            *v *= 2;
        }
        for i in 0..40 {
            let key = format!("k{i}");
            assert_eq!(table.get(hash_of(&key), &key), Some(&(i * 2)));
        }
    }

    #[test]
    fn drain_into_vec_empties_table_and_returns_every_pair() {
        let mut table: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        for i in 0..10 {
            let key = format!("k{i}");
            table.insert_or_update(hash_of(&key), key, i);
        }
        let mut drained = table.drain_into_vec();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(drained.len(), 10);
        assert_eq!(drained[0], ("k0".to_string(), 0));
        assert_eq!(table.len(), 0);
        assert_eq!(table.get(hash_of("k0"), &"k0".to_string()), None);
    }

    #[test]
    fn clear_empties_table_without_affecting_clones() {
        let mut a: RawTable<String, i32> = RawTable::construct(TableConfig::default());
        a.insert_or_update(hash_of("x"), "x".to_string(), 1);
        let b = a.clone();
        a.clear();
        assert_eq!(a.len(), 0);
        assert_eq!(a.get(hash_of("x"), &"x".to_string()), None);
        assert_eq!(b.get(hash_of("x"), &"x".to_string()), Some(&1));
    }

    #[test]
    fn rehash_reuses_stored_hash_even_if_a_bogus_hasher_would_scatter_it() {
        // Growth/fork must key off `Entry::hash`, not recompute from `K`.
        // A table built entirely from `hash_of` should keep every key
        // findable through doubling no matter how unrelated a *new*
        // hash for the same key would look.
        let mut table: RawTable<String, i32> =
            RawTable::with_capacity(GROUP_SIZE, TableConfig::default());
        for i in 0..200 {
            let key = format!("k{i}");
            table.insert_or_update(hash_of(&key), key, i);
        }
        let clone = table.clone();
        for i in 0..200 {
            let key = format!("k{i}");
            assert_eq!(clone.get(hash_of(&key), &key), Some(&i));
        }
    }
}
