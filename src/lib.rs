//! evacmap: a bucketed hash map that grows incrementally.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a general-purpose associative container whose resizes never stall
//!   a caller for O(n) work, and whose iteration stays correct while the
//!   table grows between steps.
//! - Layers:
//!   - Bucket / BucketArray: eight-slot buckets with one tag byte per slot
//!     and an overflow link; an array of them is one generation.
//!   - EvacMap<K, V, H>: the descriptor (size class, current and old
//!     generation, evacuation mark, overflow estimate, seed) plus the
//!     lookup, insert and delete engine.
//!   - Growth engine: starts growth episodes and evacuates old buckets a
//!     couple at a time from inside writes.
//!   - Cursor: detached, randomized-start iteration that pins the
//!     generations it reads.
//!
//! Storage
//! - Keys and values live in a generational arena (`slotmap`); bucket slots
//!   hold arena handles. Each arena entry also stores the full hash computed
//!   once at insertion, so evacuation never calls back into user hashing and
//!   every key's destination is reproducible, NaN keys included.
//! - Tag bytes cache the top byte of each slot's hash; values below
//!   `MIN_TOP_HASH` are sentinels for "empty", "empty and nothing after",
//!   and the three evacuation outcomes.
//!
//! Growth
//! - Doubling when an insert would exceed 6.5 entries per bucket; same-size
//!   when there are about as many overflow buckets as regular ones (delete
//!   and insert churn).
//! - Every insert and delete evacuates the old bucket it maps to, plus the
//!   lowest unevacuated one. The old array drains after at most
//!   `old_bucket_count` writes.
//! - A drained generation still pinned by a cursor moves to a retire list
//!   that is pruned at the start of later writes.
//!
//! Reentrancy policy
//! - A "currently writing" flag is set for the duration of each write and
//!   checked at the entry of every operation. Safe code cannot trip it:
//!   writes take `&mut self`, so a key's `equal` or a value constructor has
//!   no way back into the map. It is a defensive check against aliasing
//!   produced by unsafe code and does not replace synchronization.
//!
//! Notes and non-goals
//! - No shrinking; `clear()` is the only way to release buckets.
//! - Iteration order is deliberately randomized per cursor.
//! - Allocation failure of a bucket array is reported by the `try_*`
//!   methods; the others panic.

mod bucket;
mod cfg;
mod cursor;
mod error;
mod grow;
mod hasher;
mod map;
mod map_proptest;
mod reentrancy;
mod test_hashers;

// Public surface
pub use cursor::{Cursor, Iter, Keys, Values};
pub use error::TableError;
pub use hasher::{DefaultKeyHasher, FloatKeyHasher, KeyHasher};
pub use map::{EvacMap, TableStats};
