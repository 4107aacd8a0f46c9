//! Buckets and bucket arrays.
//!
//! A bucket holds eight slots. Each slot has a tag byte and, when occupied,
//! a handle into the map's entry arena. Tags below [`MIN_TOP_HASH`] are
//! sentinels; anything else is the top byte of the slot's hash and serves as
//! a cheap filter before a full key comparison.

use crate::error::{Result, TableError};
use slotmap::DefaultKey;
use std::sync::Arc;

pub(crate) const BUCKET_SLOTS: usize = 8;

/// Slot is empty and so is every later slot in this bucket and its chain.
pub(crate) const EMPTY_REST: u8 = 0;
/// Slot is empty.
pub(crate) const EMPTY_ONE: u8 = 1;
/// Entry moved to the first half of the larger array (same index).
pub(crate) const EVACUATED_X: u8 = 2;
/// Entry moved to the second half of the larger array (index + old count).
pub(crate) const EVACUATED_Y: u8 = 3;
/// Slot was empty when its bucket was evacuated.
pub(crate) const EVACUATED_EMPTY: u8 = 4;
pub(crate) const MIN_TOP_HASH: u8 = 5;

#[inline]
pub(crate) fn is_empty(tag: u8) -> bool {
    tag <= EMPTY_ONE
}

#[derive(Debug)]
pub(crate) struct Bucket {
    pub(crate) tags: [u8; BUCKET_SLOTS],
    pub(crate) slots: [Option<DefaultKey>; BUCKET_SLOTS],
    pub(crate) overflow: Option<Box<Bucket>>,
}

impl Bucket {
    pub(crate) fn new() -> Self {
        Self {
            tags: [EMPTY_REST; BUCKET_SLOTS],
            slots: [None; BUCKET_SLOTS],
            overflow: None,
        }
    }

    /// Whether this (head) bucket has been evacuated to the next generation.
    #[inline]
    pub(crate) fn is_evacuated(&self) -> bool {
        let t = self.tags[0];
        t > EMPTY_ONE && t < MIN_TOP_HASH
    }

    /// This bucket followed by its overflow chain.
    pub(crate) fn chain(&self) -> Chain<'_> {
        Chain { next: Some(self) }
    }

    pub(crate) fn at_depth(&self, depth: usize) -> Option<&Bucket> {
        self.chain().nth(depth)
    }

    pub(crate) fn at_depth_mut(&mut self, depth: usize) -> Option<&mut Bucket> {
        let mut b = self;
        for _ in 0..depth {
            b = b.overflow.as_deref_mut()?;
        }
        Some(b)
    }

    /// The bucket `depth` links down the chain; the depth must exist.
    pub(crate) fn chain_mut(&mut self, depth: usize) -> &mut Bucket {
        match self.at_depth_mut(depth) {
            Some(b) => b,
            None => panic!("bad map state"),
        }
    }

    /// Tag at a chain-wide position (`depth * 8 + slot`).
    #[cfg(test)]
    pub(crate) fn tag_at(&self, pos: usize) -> Option<u8> {
        self.at_depth(pos / BUCKET_SLOTS)
            .map(|b| b.tags[pos % BUCKET_SLOTS])
    }

    /// Links a fresh overflow bucket after the bucket at `depth`.
    pub(crate) fn push_overflow(&mut self, depth: usize) {
        let last = self.chain_mut(depth);
        debug_assert!(last.overflow.is_none());
        last.overflow = Some(Box::new(Bucket::new()));
    }

    /// Empties the slot at chain position `pos`, returning its handle.
    ///
    /// Trailing runs of `EMPTY_ONE` are folded into `EMPTY_REST` so lookups
    /// can keep stopping early. Walks the chain at most twice.
    pub(crate) fn clear_slot(&mut self, pos: usize) -> Option<DefaultKey> {
        let (depth, i) = (pos / BUCKET_SLOTS, pos % BUCKET_SLOTS);
        let b = self.chain_mut(depth);
        let handle = b.slots[i].take();
        b.tags[i] = EMPTY_ONE;
        let next = match b.tags.get(i + 1) {
            Some(&t) => Some(t),
            None => b.overflow.as_ref().map(|o| o.tags[0]),
        };
        if next.is_some_and(|t| t != EMPTY_REST) {
            return handle;
        }

        // Start of the EMPTY_ONE run that ends at `pos`.
        let mut start = 0;
        for (d, b) in self.chain().take(depth + 1).enumerate() {
            for (j, &t) in b.tags.iter().enumerate() {
                let p = d * BUCKET_SLOTS + j;
                if p < pos && t != EMPTY_ONE {
                    start = p + 1;
                }
            }
        }

        let mut cur = Some(self);
        let mut d = 0;
        while let Some(b) = cur {
            for (j, t) in b.tags.iter_mut().enumerate() {
                let p = d * BUCKET_SLOTS + j;
                if p >= start && p <= pos {
                    *t = EMPTY_REST;
                }
            }
            if d == depth {
                break;
            }
            d += 1;
            cur = b.overflow.as_deref_mut();
        }
        handle
    }

    /// Drops the slot handles and overflow chain after evacuation, keeping
    /// the tags that record where each entry went.
    pub(crate) fn release(&mut self) {
        self.slots = [None; BUCKET_SLOTS];
        self.overflow = None;
    }

    pub(crate) fn overflow_len(&self) -> usize {
        self.chain().count() - 1
    }
}

pub(crate) struct Chain<'a> {
    next: Option<&'a Bucket>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Bucket;

    fn next(&mut self) -> Option<&'a Bucket> {
        let b = self.next?;
        self.next = b.overflow.as_deref();
        Some(b)
    }
}

/// Shared token naming one bucket-array generation.
///
/// The array holds one reference; every cursor positioned on the array holds
/// another, which keeps the array from being reclaimed after it is retired.
#[derive(Clone, Debug)]
pub(crate) struct GenerationPin(Arc<u64>);

impl GenerationPin {
    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        *self.0
    }
}

/// One generation of buckets.
#[derive(Debug)]
pub(crate) struct BucketArray {
    pub(crate) buckets: Box<[Bucket]>,
    pin: GenerationPin,
}

impl BucketArray {
    /// The zero-length array of a map that has never been written.
    pub(crate) fn unallocated() -> Self {
        Self {
            buckets: Box::new([]),
            pin: GenerationPin(Arc::new(0)),
        }
    }

    pub(crate) fn try_new(len: usize, generation: u64) -> Result<Self> {
        let mut buckets = Vec::new();
        buckets
            .try_reserve_exact(len)
            .map_err(|source| TableError::Alloc {
                buckets: len,
                source,
            })?;
        buckets.resize_with(len, Bucket::new);
        Ok(Self {
            buckets: buckets.into_boxed_slice(),
            pin: GenerationPin(Arc::new(generation)),
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.pin.generation()
    }

    pub(crate) fn pin(&self) -> GenerationPin {
        self.pin.clone()
    }

    /// Whether any cursor still holds this generation.
    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.pin.0) > 1
    }

    pub(crate) fn overflow_buckets(&self) -> usize {
        self.buckets.iter().map(Bucket::overflow_len).sum()
    }
}
