use std::collections::TryReserveError;
use thiserror::Error;

/// Errors surfaced by the fallible (`try_*`) entry points of [`EvacMap`](crate::EvacMap).
///
/// Lookups and deletes never fail; a miss is `None`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    /// The allocator could not provide a bucket array of the requested length.
    #[error("failed to allocate a bucket array of {buckets} buckets")]
    Alloc {
        buckets: usize,
        #[source]
        source: TryReserveError,
    },

    /// The capacity hint needs more buckets than can be addressed.
    #[error("capacity hint {hint} exceeds the addressable bucket count")]
    CapacityOverflow { hint: usize },
}

pub type Result<T> = std::result::Result<T, TableError>;
