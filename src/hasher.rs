//! Key capability, per-map seeds, and the hash-to-bucket derivations.

use crate::bucket::{BUCKET_SLOTS, MIN_TOP_HASH};
use core::cell::Cell;
use core::hash::{BuildHasher, Hash, Hasher};
use std::collections::hash_map::RandomState;

/// Hashing and equality for keys of type `Q`, supplied once per map.
///
/// `hash` must be deterministic for a given `(key, seed)` pair for every key
/// that compares equal to itself, and keys that are `equal` must hash alike.
/// Keys for which `equal(k, k)` is false (NaN) may hash arbitrarily; they can
/// be inserted and iterated but never found again.
pub trait KeyHasher<Q: ?Sized> {
    fn hash(&self, key: &Q, seed: u64) -> u64;

    fn equal(&self, a: &Q, b: &Q) -> bool;

    /// Whether overwriting an existing mapping should also store the new key.
    ///
    /// Needed when keys can be equal without being identical, such as
    /// `+0.0` and `-0.0`.
    fn needs_key_update(&self) -> bool {
        false
    }
}

/// Capability for any `Hash + Eq` key, built on a [`BuildHasher`].
#[derive(Clone, Debug, Default)]
pub struct DefaultKeyHasher<S = hashbrown::hash_map::DefaultHashBuilder> {
    build: S,
}

impl<S> DefaultKeyHasher<S> {
    pub fn with_build_hasher(build: S) -> Self {
        Self { build }
    }
}

impl<Q, S> KeyHasher<Q> for DefaultKeyHasher<S>
where
    Q: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, key: &Q, seed: u64) -> u64 {
        let mut h = self.build.build_hasher();
        h.write_u64(seed);
        key.hash(&mut h);
        h.finish()
    }

    #[inline]
    fn equal(&self, a: &Q, b: &Q) -> bool {
        a == b
    }
}

/// Capability for `f64` keys with IEEE equality.
///
/// `+0.0` and `-0.0` are the same key; every NaN is a distinct key that
/// hashes to a fresh random value.
#[derive(Clone, Debug, Default)]
pub struct FloatKeyHasher<S = hashbrown::hash_map::DefaultHashBuilder> {
    build: S,
}

impl<S> FloatKeyHasher<S> {
    pub fn with_build_hasher(build: S) -> Self {
        Self { build }
    }
}

impl<S: BuildHasher> KeyHasher<f64> for FloatKeyHasher<S> {
    fn hash(&self, key: &f64, seed: u64) -> u64 {
        if key.is_nan() {
            return fastrand() ^ seed;
        }
        let bits = if *key == 0.0 { 0 } else { key.to_bits() };
        let mut h = self.build.build_hasher();
        h.write_u64(seed);
        h.write_u64(bits);
        h.finish()
    }

    fn equal(&self, a: &f64, b: &f64) -> bool {
        a == b
    }

    fn needs_key_update(&self) -> bool {
        true
    }
}

/// Tag byte for a hash: its top byte, moved out of the sentinel range.
#[inline]
pub(crate) fn tag(hash: u64) -> u8 {
    let top = (hash >> 56) as u8;
    if top < MIN_TOP_HASH {
        top + MIN_TOP_HASH
    } else {
        top
    }
}

/// `2^b`, the bucket count for a size class.
#[inline]
pub(crate) fn bucket_shift(b: u8) -> usize {
    1usize << b
}

#[inline]
pub(crate) fn bucket_mask(b: u8) -> usize {
    bucket_shift(b) - 1
}

#[inline]
pub(crate) fn bucket_index(hash: u64, b: u8) -> usize {
    (hash as usize) & bucket_mask(b)
}

const LOAD_FACTOR_NUM: usize = 13;
const LOAD_FACTOR_DEN: usize = 2;

/// Whether `count` entries over `2^b` buckets exceed 6.5 entries per bucket.
#[inline]
pub(crate) fn over_load_factor(count: usize, b: u8) -> bool {
    count > BUCKET_SLOTS
        && count > LOAD_FACTOR_NUM.saturating_mul(bucket_shift(b) / LOAD_FACTOR_DEN)
}

/// Whether there are about as many overflow buckets as regular ones.
#[inline]
pub(crate) fn too_many_overflow_buckets(overflow: u16, b: u8) -> bool {
    let b = b.min(15);
    overflow >= 1u16 << b
}

thread_local! {
    static RNG: Cell<u64> = Cell::new(RandomState::new().hash_one(0x9e37_79b9_7f4a_7c15u64));
}

/// Thread-local wyrand step.
pub(crate) fn fastrand() -> u64 {
    RNG.with(|state| {
        let s = state.get().wrapping_add(0xa076_1d64_78bd_642f);
        state.set(s);
        let t = u128::from(s) * u128::from(s ^ 0xe703_7ed1_a0b4_28db);
        ((t >> 64) as u64) ^ (t as u64)
    })
}

/// A fresh per-map seed.
#[inline]
pub(crate) fn fresh_seed() -> u64 {
    fastrand()
}
