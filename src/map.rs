//! EvacMap: map descriptor plus the lookup, insert and delete engine.

use crate::bucket::{is_empty, BucketArray, BUCKET_SLOTS, EMPTY_REST};
use crate::cfg::trace;
use crate::error::{Result, TableError};
use crate::hasher::{
    bucket_index, bucket_shift, fresh_seed, over_load_factor, tag, too_many_overflow_buckets,
    DefaultKeyHasher, KeyHasher,
};
use crate::reentrancy::{writing, Flagged, WriteFlag};
use core::borrow::Borrow;
use core::fmt;
use core::ops::Index;
use core::sync::atomic::{AtomicU64, Ordering};
use slotmap::{DefaultKey, SlotMap};

/// Largest bucket-count exponent a capacity hint may ask for.
const MAX_BUCKET_LOG2: u8 = (usize::BITS - 8) as u8;

static NEXT_MAP_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) hash: u64,
}

/// A hash map whose bucket array grows incrementally.
///
/// Entries live in buckets of eight slots addressed by the low bits of the
/// key's hash. When the map crosses its load factor, or collects too many
/// overflow buckets, it starts a growth episode: a new bucket array is
/// allocated and each later write moves at most two old buckets into it, so
/// no single call pays for a full rehash.
///
/// `H` supplies hashing and equality for keys (see [`KeyHasher`]). Each map
/// mixes its own random seed into every hash.
pub struct EvacMap<K, V, H = DefaultKeyHasher> {
    pub(crate) hasher: H,
    pub(crate) seed: u64,
    pub(crate) id: u64,
    /// log2 of the current bucket count.
    pub(crate) b: u8,
    pub(crate) buckets: BucketArray,
    /// Previous generation, present only while a growth episode is active.
    pub(crate) old_buckets: Option<BucketArray>,
    /// Old buckets below this index are all evacuated.
    pub(crate) evacuated: usize,
    pub(crate) same_size_growth: bool,
    /// Approximate overflow bucket count; a growth trigger only.
    pub(crate) overflow: u16,
    pub(crate) entries: SlotMap<DefaultKey, Entry<K, V>>,
    /// Drained generations still pinned by cursors.
    pub(crate) retired: Vec<BucketArray>,
    pub(crate) next_generation: u64,
    pub(crate) clear_epoch: u64,
    pub(crate) doubling_growths: u64,
    pub(crate) same_size_growths: u64,
    pub(crate) flag: WriteFlag,
}

/// Snapshot of a map's internal shape, for diagnostics and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableStats {
    pub len: usize,
    pub bucket_count_log2: u8,
    /// Current bucket count; zero until the first insert into an empty map.
    pub buckets: usize,
    /// Old bucket count while a growth episode is active.
    pub old_buckets: Option<usize>,
    pub evacuated: usize,
    pub same_size_growth: bool,
    pub overflow_count: u16,
    pub overflow_buckets: usize,
    pub retired: usize,
    pub doubling_growths: u64,
    pub same_size_growths: u64,
}

pub(crate) enum Assigned<F> {
    Existing(DefaultKey, F),
    Inserted(DefaultKey),
}

fn fatal<T>(r: Result<T>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => panic!("{e}"),
    }
}

/// Smallest size class that holds `hint` entries under the load factor.
fn size_class(hint: usize) -> Result<u8> {
    let mut b = 0u8;
    while over_load_factor(hint, b) {
        b += 1;
        if b > MAX_BUCKET_LOG2 {
            return Err(TableError::CapacityOverflow { hint });
        }
    }
    Ok(b)
}

impl<K, V> EvacMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultKeyHasher::default())
    }

    pub fn with_capacity(hint: usize) -> Self {
        Self::with_capacity_and_hasher(hint, DefaultKeyHasher::default())
    }
}

impl<K, V, H: Default> Default for EvacMap<K, V, H> {
    fn default() -> Self {
        Self::with_hasher(H::default())
    }
}

impl<K, V, H> Flagged for EvacMap<K, V, H> {
    fn write_flag(&self) -> &WriteFlag {
        &self.flag
    }
}

impl<K, V, H> EvacMap<K, V, H> {
    /// An empty map; no buckets are allocated until the first insert.
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            hasher,
            seed: fresh_seed(),
            id: NEXT_MAP_ID.fetch_add(1, Ordering::Relaxed),
            b: 0,
            buckets: BucketArray::unallocated(),
            old_buckets: None,
            evacuated: 0,
            same_size_growth: false,
            overflow: 0,
            entries: SlotMap::with_key(),
            retired: Vec::new(),
            next_generation: 1,
            clear_epoch: 0,
            doubling_growths: 0,
            same_size_growths: 0,
            flag: WriteFlag::new(),
        }
    }

    /// Presizes the bucket array for `hint` entries. Hints too large to
    /// address fall back to lazy allocation; allocation failure panics.
    pub fn with_capacity_and_hasher(hint: usize, hasher: H) -> Self {
        let mut map = Self::with_hasher(hasher);
        let b = size_class(hint).unwrap_or(0);
        if b > 0 {
            map.buckets = fatal(map.new_array(b));
            map.b = b;
        }
        map
    }

    pub fn try_with_capacity_and_hasher(hint: usize, hasher: H) -> Result<Self> {
        let b = size_class(hint)?;
        let mut map = Self::with_hasher(hasher);
        if b > 0 {
            map.buckets = map.new_array(b)?;
            map.b = b;
        }
        Ok(map)
    }

    pub(crate) fn new_array(&mut self, b: u8) -> Result<BucketArray> {
        let array = BucketArray::try_new(bucket_shift(b), self.next_generation)?;
        self.next_generation += 1;
        Ok(array)
    }

    pub fn len(&self) -> usize {
        self.flag.check_read();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flag.check_read();
        self.entries.is_empty()
    }

    pub fn hasher(&self) -> &H {
        self.flag.check_read();
        &self.hasher
    }

    /// Drops every entry and bucket, returning the map to its initial state.
    ///
    /// Any growth episode in progress is abandoned. Cursors started before
    /// the clear panic on their next step.
    pub fn clear(&mut self) {
        let w = self.flag.begin_write();
        self.old_buckets = None;
        self.buckets = BucketArray::unallocated();
        self.b = 0;
        self.evacuated = 0;
        self.same_size_growth = false;
        self.overflow = 0;
        self.retired.clear();
        self.seed = fresh_seed();
        self.clear_epoch += 1;
        let entries = core::mem::take(&mut self.entries);
        trace!(epoch = self.clear_epoch, "cleared map");
        drop(w);
        // Entry destructors run once the map is consistent again.
        drop(entries);
    }

    pub fn stats(&self) -> TableStats {
        self.flag.check_read();
        TableStats {
            len: self.entries.len(),
            bucket_count_log2: self.b,
            buckets: self.buckets.len(),
            old_buckets: self.old_buckets.as_ref().map(BucketArray::len),
            evacuated: self.evacuated,
            same_size_growth: self.old_buckets.is_some() && self.same_size_growth,
            overflow_count: self.overflow,
            overflow_buckets: self.buckets.overflow_buckets()
                + self
                    .old_buckets
                    .as_ref()
                    .map_or(0, BucketArray::overflow_buckets),
            retired: self.retired.len(),
            doubling_growths: self.doubling_growths,
            same_size_growths: self.same_size_growths,
        }
    }

    /// Locates `key` without side effects.
    ///
    /// While growing, an old bucket that has not been evacuated yet is the
    /// authoritative copy and is searched instead of the new one.
    fn find<Q>(&self, hash: u64, key: &Q) -> Option<DefaultKey>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        let mut head = self.buckets.buckets.get(bucket_index(hash, self.b))?;
        if let Some(old) = &self.old_buckets {
            let old_b = if self.same_size_growth {
                self.b
            } else {
                self.b - 1
            };
            let old_head = &old.buckets[bucket_index(hash, old_b)];
            if !old_head.is_evacuated() {
                head = old_head;
            }
        }
        let top = tag(hash);
        for b in head.chain() {
            for i in 0..BUCKET_SLOTS {
                let t = b.tags[i];
                if t != top {
                    if t == EMPTY_REST {
                        return None;
                    }
                    continue;
                }
                let Some(handle) = b.slots[i] else { continue };
                if self
                    .entries
                    .get(handle)
                    .is_some_and(|e| self.hasher.equal(key, e.key.borrow()))
                {
                    return Some(handle);
                }
            }
        }
        None
    }

    fn lookup<Q>(&self, key: &Q) -> Option<&Entry<K, V>>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        self.flag.check_read();
        if self.entries.is_empty() {
            return None;
        }
        let hash = self.hasher.hash(key, self.seed);
        let handle = self.find(hash, key)?;
        self.entries.get(handle)
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        self.lookup(key).map(|e| &e.value)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        self.lookup(key).map(|e| (&e.key, &e.value))
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        self.lookup(key).is_some()
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        self.flag.check_read();
        if self.entries.is_empty() {
            return None;
        }
        let hash = self.hasher.hash(key, self.seed);
        let handle = self.find(hash, key)?;
        self.entries.get_mut(handle).map(|e| &mut e.value)
    }

    /// Removes `key`, returning the stored pair. Missing keys are a no-op.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        if self.entries.is_empty() {
            return None;
        }
        let hash = self.hasher.hash(key, self.seed);
        let mut w = writing(self);
        let this = &mut *w;
        this.reclaim_retired();

        let idx = bucket_index(hash, this.b);
        if this.is_growing() {
            this.grow_work(idx);
        }

        let top = tag(hash);
        let mut found = None;
        'search: for (depth, b) in this.buckets.buckets[idx].chain().enumerate() {
            for i in 0..BUCKET_SLOTS {
                let t = b.tags[i];
                if t != top {
                    if t == EMPTY_REST {
                        break 'search;
                    }
                    continue;
                }
                let Some(handle) = b.slots[i] else { continue };
                if this
                    .entries
                    .get(handle)
                    .is_some_and(|e| this.hasher.equal(key, e.key.borrow()))
                {
                    found = Some((depth * BUCKET_SLOTS + i, handle));
                    break 'search;
                }
            }
        }

        let (pos, handle) = found?;
        this.buckets.buckets[idx].clear_slot(pos);
        let entry = this.entries.remove(handle)?;
        if this.entries.is_empty() {
            // Fresh seed so a hostile key set cannot be replayed against it.
            this.seed = fresh_seed();
        }
        Some((entry.key, entry.value))
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Deletes `key` if present.
    pub fn delete<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: ?Sized,
        H: KeyHasher<Q>,
    {
        let _ = self.remove_entry(key);
    }
}

impl<K, V, H> EvacMap<K, V, H>
where
    H: KeyHasher<K>,
{
    /// Finds the slot for `key`, creating the entry with `make` if absent.
    ///
    /// Returns `make` back when the key already exists so the caller can
    /// decide whether to overwrite.
    pub(crate) fn assign<F>(&mut self, key: K, make: F) -> Result<Assigned<F>>
    where
        F: FnOnce() -> V,
    {
        let hash = self.hasher.hash(&key, self.seed);
        let mut w = writing(self);
        let this = &mut *w;
        this.reclaim_retired();

        if this.buckets.is_empty() {
            this.buckets = this.new_array(this.b)?;
        }

        loop {
            let idx = bucket_index(hash, this.b);
            if this.is_growing() {
                this.grow_work(idx);
            }

            let top = tag(hash);
            let mut insert_at = None;
            let mut last_depth = 0;
            let mut found = None;
            'scan: for (depth, b) in this.buckets.buckets[idx].chain().enumerate() {
                last_depth = depth;
                for i in 0..BUCKET_SLOTS {
                    let t = b.tags[i];
                    if t != top {
                        if is_empty(t) && insert_at.is_none() {
                            insert_at = Some(depth * BUCKET_SLOTS + i);
                        }
                        if t == EMPTY_REST {
                            break 'scan;
                        }
                        continue;
                    }
                    let Some(handle) = b.slots[i] else { continue };
                    if this
                        .entries
                        .get(handle)
                        .is_some_and(|e| this.hasher.equal(&key, &e.key))
                    {
                        found = Some(handle);
                        break 'scan;
                    }
                }
            }

            if let Some(handle) = found {
                if this.hasher.needs_key_update() {
                    this.entries[handle].key = key;
                }
                return Ok(Assigned::Existing(handle, make));
            }

            // A new entry may push the map into a growth episode, which
            // invalidates the bucket we just scanned.
            if !this.is_growing()
                && (over_load_factor(this.entries.len() + 1, this.b)
                    || too_many_overflow_buckets(this.overflow, this.b))
            {
                this.hash_grow()?;
                continue;
            }

            let pos = match insert_at {
                Some(pos) => pos,
                None => {
                    this.new_overflow(idx, last_depth);
                    (last_depth + 1) * BUCKET_SLOTS
                }
            };
            let handle = this.entries.insert(Entry {
                key,
                value: make(),
                hash,
            });
            let b = this.buckets.buckets[idx].chain_mut(pos / BUCKET_SLOTS);
            b.tags[pos % BUCKET_SLOTS] = top;
            b.slots[pos % BUCKET_SLOTS] = Some(handle);
            return Ok(Assigned::Inserted(handle));
        }
    }

    pub fn try_get_or_insert_with<F>(&mut self, key: K, make: F) -> Result<&mut V>
    where
        F: FnOnce() -> V,
    {
        let handle = match self.assign(key, make)? {
            Assigned::Existing(h, _) | Assigned::Inserted(h) => h,
        };
        Ok(&mut self.entries[handle].value)
    }

    /// The value slot for `key`, created with `make` if the key is absent.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        fatal(self.try_get_or_insert_with(key, make))
    }

    /// The value slot for `key`, holding `V::default()` if the key was absent.
    pub fn get_or_insert_slot(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>> {
        match self.assign(key, move || value)? {
            Assigned::Existing(h, make) => Ok(Some(core::mem::replace(
                &mut self.entries[h].value,
                make(),
            ))),
            Assigned::Inserted(_) => Ok(None),
        }
    }

    /// Inserts or overwrites, returning the previous value.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        fatal(self.try_insert(key, value))
    }
}

impl<K, Q, V, H> Index<&Q> for EvacMap<K, V, H>
where
    K: Borrow<Q>,
    Q: ?Sized,
    H: KeyHasher<Q>,
{
    type Output = V;

    fn index(&self, key: &Q) -> &V {
        self.get(key).expect("no entry found for key")
    }
}

impl<K, V, H> Extend<(K, V)> for EvacMap<K, V, H>
where
    H: KeyHasher<K>,
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, H> FromIterator<(K, V)> for EvacMap<K, V, H>
where
    H: KeyHasher<K> + Default,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let iter = iter.into_iter();
        let mut map = Self::with_capacity_and_hasher(iter.size_hint().0, H::default());
        map.extend(iter);
        map
    }
}

impl<K: fmt::Debug, V: fmt::Debug, H> fmt::Debug for EvacMap<K, V, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
