//! Growth episodes and bucket evacuation.
//!
//! A growth episode swaps in a new bucket array (twice as large, or the same
//! size to compact overflow chains) and keeps the previous one as
//! `old_buckets`. Every write then evacuates the old bucket it is about to
//! touch plus the lowest not-yet-evacuated one, so the old array drains after
//! at most `old_bucket_count` writes.

use crate::bucket::{
    is_empty, BucketArray, BUCKET_SLOTS, EVACUATED_EMPTY, EVACUATED_X, EVACUATED_Y, MIN_TOP_HASH,
};
use crate::cfg::trace;
use crate::error::Result;
use crate::hasher::{fastrand, over_load_factor};
use crate::map::EvacMap;
use slotmap::DefaultKey;

/// How far past the evacuation mark to look for already-evacuated buckets.
const MARK_SCAN_LIMIT: usize = 1024;

/// Bumps the approximate overflow counter.
///
/// Exact below 2^16 buckets; above that it counts with probability
/// `1 / 2^(b - 15)` so a `u16` stays meaningful.
pub(crate) fn incr_overflow(overflow: &mut u16, b: u8) {
    if b < 16 {
        *overflow = overflow.saturating_add(1);
        return;
    }
    let mask = (1u64 << (b - 15)) - 1;
    if fastrand() & mask == 0 {
        *overflow = overflow.saturating_add(1);
    }
}

/// Where the next entry evacuated to one destination bucket goes.
struct EvacDst {
    index: usize,
    depth: usize,
    slot: usize,
}

impl EvacDst {
    fn new(index: usize) -> Self {
        Self {
            index,
            depth: 0,
            slot: 0,
        }
    }

    fn push(
        &mut self,
        buckets: &mut BucketArray,
        top: u8,
        handle: DefaultKey,
        overflow: &mut u16,
        b: u8,
    ) {
        let head = &mut buckets.buckets[self.index];
        if self.slot == BUCKET_SLOTS {
            head.push_overflow(self.depth);
            incr_overflow(overflow, b);
            self.depth += 1;
            self.slot = 0;
        }
        let dst = head.chain_mut(self.depth);
        dst.tags[self.slot] = top;
        dst.slots[self.slot] = Some(handle);
        self.slot += 1;
    }
}

impl<K, V, H> EvacMap<K, V, H> {
    #[inline]
    pub(crate) fn is_growing(&self) -> bool {
        self.old_buckets.is_some()
    }

    /// Starts a growth episode. The new array is fully allocated before any
    /// state changes, so a failed allocation leaves the map stable.
    pub(crate) fn hash_grow(&mut self) -> Result<()> {
        debug_assert!(!self.is_growing());
        let bigger = over_load_factor(self.entries.len() + 1, self.b);
        let new_b = if bigger { self.b + 1 } else { self.b };
        let new_buckets = self.new_array(new_b)?;

        let old = core::mem::replace(&mut self.buckets, new_buckets);
        self.old_buckets = Some(old);
        self.same_size_growth = !bigger;
        self.b = new_b;
        self.evacuated = 0;
        self.overflow = 0;
        if bigger {
            self.doubling_growths += 1;
        } else {
            self.same_size_growths += 1;
        }
        trace!(
            same_size = !bigger,
            bucket_count_log2 = new_b,
            len = self.entries.len(),
            "started growth"
        );
        Ok(())
    }

    /// Evacuates the old bucket behind `bucket`, plus one more to make
    /// progress on buckets nobody touches.
    pub(crate) fn grow_work(&mut self, bucket: usize) {
        let Some(old_len) = self.old_buckets.as_ref().map(BucketArray::len) else {
            return;
        };
        self.evacuate(bucket & (old_len - 1));
        if self.is_growing() {
            self.evacuate(self.evacuated);
        }
    }

    fn evacuate(&mut self, oldbucket: usize) {
        let Some(old) = self.old_buckets.as_mut() else {
            return;
        };
        let newbit = old.len();
        let pinned = old.is_pinned();
        let head = &mut old.buckets[oldbucket];

        if !head.is_evacuated() {
            // Doubling splits each old bucket between x (same index) and
            // y (index + newbit); same-size growth only uses x.
            let mut dst = [EvacDst::new(oldbucket), EvacDst::new(oldbucket + newbit)];
            let mut cur = Some(&mut *head);
            while let Some(b) = cur {
                for i in 0..BUCKET_SLOTS {
                    let top = b.tags[i];
                    if is_empty(top) {
                        b.tags[i] = EVACUATED_EMPTY;
                        continue;
                    }
                    if top < MIN_TOP_HASH {
                        panic!("bad map state");
                    }
                    let Some(handle) = b.slots[i] else {
                        panic!("bad map state");
                    };
                    let use_y = !self.same_size_growth
                        && self
                            .entries
                            .get(handle)
                            .is_some_and(|e| (e.hash as usize) & newbit != 0);
                    b.tags[i] = if use_y { EVACUATED_Y } else { EVACUATED_X };
                    dst[usize::from(use_y)].push(
                        &mut self.buckets,
                        top,
                        handle,
                        &mut self.overflow,
                        self.b,
                    );
                }
                cur = b.overflow.as_deref_mut();
            }
            // Cursors may still walk a pinned generation.
            if !pinned {
                head.release();
            }
        }

        if oldbucket == self.evacuated {
            self.advance_evacuation_mark(newbit);
        }
    }

    fn advance_evacuation_mark(&mut self, newbit: usize) {
        self.evacuated += 1;
        let stop = (self.evacuated + MARK_SCAN_LIMIT).min(newbit);
        if let Some(old) = &self.old_buckets {
            while self.evacuated != stop && old.buckets[self.evacuated].is_evacuated() {
                self.evacuated += 1;
            }
        }
        if self.evacuated == newbit {
            self.finish_growth();
        }
    }

    fn finish_growth(&mut self) {
        if let Some(old) = self.old_buckets.take() {
            if old.is_pinned() {
                self.retired.push(old);
            }
        }
        self.retired.retain(BucketArray::is_pinned);
        self.same_size_growth = false;
        trace!(
            bucket_count_log2 = self.b,
            retired = self.retired.len(),
            "finished growth"
        );
    }

    /// Links a new overflow bucket after depth `depth` of bucket `idx`.
    pub(crate) fn new_overflow(&mut self, idx: usize, depth: usize) {
        incr_overflow(&mut self.overflow, self.b);
        self.buckets.buckets[idx].push_overflow(depth);
    }

    /// Drops retired generations no cursor holds anymore.
    pub(crate) fn reclaim_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        self.retired.retain(BucketArray::is_pinned);
        trace!(remaining = self.retired.len(), "reclaimed retired buckets");
    }
}
