//! Randomized-start iteration that tolerates growth between steps.
//!
//! A [`Cursor`] does not borrow its map. It remembers the bucket array that
//! was current when it started and pins that generation (and any old
//! generation it is reading from) so the buckets outlive a growth episode.
//! Each step takes the map by shared reference, so the map may be written
//! between steps.
//!
//! Guarantees: an entry present for the whole iteration is yielded exactly
//! once. An entry inserted or removed mid-iteration may or may not be
//! yielded, but never twice.

use crate::bucket::{is_empty, BucketArray, GenerationPin, BUCKET_SLOTS, EVACUATED_EMPTY};
use crate::hasher::{bucket_index, bucket_mask, bucket_shift, fastrand};
use crate::map::EvacMap;
use core::iter::FusedIterator;

#[derive(Debug)]
struct Position {
    array: GenerationPin,
    index: usize,
    depth: usize,
}

/// Iteration state for [`EvacMap::iter_start`] / [`EvacMap::iter_next`].
#[derive(Debug)]
pub struct Cursor {
    map_id: u64,
    clear_epoch: u64,
    done: bool,
    /// Size class of `home` when the cursor started.
    b: u8,
    home: Option<GenerationPin>,
    start_bucket: usize,
    offset: usize,
    wrapped: bool,
    /// Next bucket index of `home` to visit.
    bucket: usize,
    current: Option<Position>,
    slot: usize,
    /// While reading an unevacuated old bucket during a doubling, only
    /// entries bound for this new bucket index are yielded.
    check_bucket: Option<usize>,
}

impl Cursor {
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) {
        self.done = true;
        self.home = None;
        self.current = None;
    }
}

impl<K, V, H> EvacMap<K, V, H> {
    /// Starts an iteration at a random bucket and slot offset.
    pub fn iter_start(&self) -> Cursor {
        self.flag.check_iter();
        let mut it = Cursor {
            map_id: self.id,
            clear_epoch: self.clear_epoch,
            done: true,
            b: self.b,
            home: None,
            start_bucket: 0,
            offset: 0,
            wrapped: false,
            bucket: 0,
            current: None,
            slot: 0,
            check_bucket: None,
        };
        if self.entries.is_empty() {
            return it;
        }
        let r = fastrand();
        it.start_bucket = (r as usize) & bucket_mask(self.b);
        it.offset = ((r >> self.b) as usize) & (BUCKET_SLOTS - 1);
        it.bucket = it.start_bucket;
        it.home = Some(self.buckets.pin());
        it.done = false;
        it
    }

    /// Advances `it`, returning the next entry.
    ///
    /// Panics if `it` was started on a different map or before the map was
    /// last cleared, or if called while the map is being written.
    pub fn iter_next<'a>(&'a self, it: &mut Cursor) -> Option<(&'a K, &'a V)> {
        assert!(
            it.map_id == self.id,
            "cursor used with a map it was not started on"
        );
        assert!(
            it.clear_epoch == self.clear_epoch,
            "cursor used after the map was cleared"
        );
        if it.done {
            return None;
        }
        self.flag.check_iter();
        let Some(home) = it.home.clone() else {
            it.finish();
            return None;
        };

        loop {
            if it.current.is_none() {
                if it.bucket == it.start_bucket && it.wrapped {
                    it.finish();
                    return None;
                }
                let (array, index, check) = match &self.old_buckets {
                    // Started during the growth that is still running.
                    Some(old) if self.b == it.b => {
                        let oldbucket = it.bucket & (old.len() - 1);
                        if old.buckets[oldbucket].is_evacuated() {
                            (home.clone(), it.bucket, None)
                        } else {
                            let check = (!self.same_size_growth).then_some(it.bucket);
                            (old.pin(), oldbucket, check)
                        }
                    }
                    _ => (home.clone(), it.bucket, None),
                };
                it.current = Some(Position {
                    array,
                    index,
                    depth: 0,
                });
                it.check_bucket = check;
                it.bucket += 1;
                if it.bucket == bucket_shift(it.b) {
                    it.bucket = 0;
                    it.wrapped = true;
                }
                it.slot = 0;
            }

            let Some(pos) = it.current.as_mut() else {
                continue;
            };
            let bucket = self
                .generation(pos.array.generation())
                .and_then(|a| a.buckets.get(pos.index))
                .and_then(|head| head.at_depth(pos.depth));
            let Some(bucket) = bucket else {
                it.current = None;
                continue;
            };

            while it.slot < BUCKET_SLOTS {
                let offi = (it.slot + it.offset) & (BUCKET_SLOTS - 1);
                it.slot += 1;
                let t = bucket.tags[offi];
                if is_empty(t) || t == EVACUATED_EMPTY {
                    continue;
                }
                // A stale handle means the entry was deleted after this
                // slot was evacuated.
                let Some(entry) = bucket.slots[offi].and_then(|h| self.entries.get(h)) else {
                    continue;
                };
                if let Some(check) = it.check_bucket {
                    if bucket_index(entry.hash, it.b) != check {
                        continue;
                    }
                }
                return Some((&entry.key, &entry.value));
            }

            if bucket.overflow.is_some() {
                pos.depth += 1;
                it.slot = 0;
            } else {
                it.current = None;
            }
        }
    }

    fn generation(&self, generation: u64) -> Option<&BucketArray> {
        if self.buckets.generation() == generation {
            return Some(&self.buckets);
        }
        if let Some(old) = &self.old_buckets {
            if old.generation() == generation {
                return Some(old);
            }
        }
        self.retired.iter().find(|a| a.generation() == generation)
    }

    pub fn iter(&self) -> Iter<'_, K, V, H> {
        Iter {
            map: self,
            cursor: self.iter_start(),
            remaining: self.entries.len(),
        }
    }

    pub fn keys(&self) -> Keys<'_, K, V, H> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V, H> {
        Values { inner: self.iter() }
    }
}

/// Borrowing iterator over a map's entries, in randomized order.
pub struct Iter<'a, K, V, H> {
    map: &'a EvacMap<K, V, H>,
    cursor: Cursor,
    remaining: usize,
}

impl<'a, K, V, H> Iterator for Iter<'a, K, V, H> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.map.iter_next(&mut self.cursor)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, H> ExactSizeIterator for Iter<'_, K, V, H> {}
impl<K, V, H> FusedIterator for Iter<'_, K, V, H> {}

pub struct Keys<'a, K, V, H> {
    inner: Iter<'a, K, V, H>,
}

impl<'a, K, V, H> Iterator for Keys<'a, K, V, H> {
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub struct Values<'a, K, V, H> {
    inner: Iter<'a, K, V, H>,
}

impl<'a, K, V, H> Iterator for Values<'a, K, V, H> {
    type Item = &'a V;

    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K, V, H> IntoIterator for &'a EvacMap<K, V, H> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, H>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
