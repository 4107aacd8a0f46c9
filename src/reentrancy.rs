//! Best-effort detection of overlapping map operations.
//!
//! The flag is set for the duration of every mutating call and checked at
//! the entry of every operation. Writes borrow the map mutably, so safe
//! callers (including a key's `hash`/`equal` and value constructors) can
//! never observe it set; it only fires when unsafe code aliases the map
//! across a write. It is not a substitute for external synchronization.
//! Races on the flag itself are tolerated: the loads and stores are
//! `Relaxed` and a missed detection is acceptable.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Per-map "currently writing" marker.
#[derive(Debug, Default)]
pub(crate) struct WriteFlag {
    writing: AtomicBool,
}

impl WriteFlag {
    pub(crate) const fn new() -> Self {
        Self {
            writing: AtomicBool::new(false),
        }
    }

    /// Mark the map as being written. Panics if a write is already underway.
    #[inline]
    pub(crate) fn begin_write(&self) -> WriteGuard<'_> {
        self.enter();
        WriteGuard { owner: self }
    }

    #[inline]
    fn enter(&self) {
        if self.writing.swap(true, Ordering::Relaxed) {
            panic!("concurrent map writes");
        }
    }

    #[inline]
    fn exit(&self) {
        self.writing.store(false, Ordering::Relaxed);
    }

    /// Panics if a write is underway.
    #[inline]
    pub(crate) fn check_read(&self) {
        if self.writing.load(Ordering::Relaxed) {
            panic!("concurrent map read and map write");
        }
    }

    #[inline]
    pub(crate) fn check_iter(&self) {
        if self.writing.load(Ordering::Relaxed) {
            panic!("concurrent map iteration and map write");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_writing(&self) -> bool {
        self.writing.load(Ordering::Relaxed)
    }
}

/// RAII guard returned by `WriteFlag::begin_write`.
pub(crate) struct WriteGuard<'a> {
    owner: &'a WriteFlag,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.owner.exit();
    }
}

/// Structures that carry a [`WriteFlag`].
pub(crate) trait Flagged {
    fn write_flag(&self) -> &WriteFlag;
}

/// Exclusive access to `T` with its flag held, released on drop.
///
/// Unlike [`WriteGuard`] this owns the `&mut T`, so the write path can keep
/// calling `&mut self` methods through it.
pub(crate) struct Writing<'a, T: Flagged> {
    inner: &'a mut T,
}

#[inline]
pub(crate) fn writing<T: Flagged>(inner: &mut T) -> Writing<'_, T> {
    inner.write_flag().enter();
    Writing { inner }
}

impl<T: Flagged> Deref for Writing<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner
    }
}

impl<T: Flagged> DerefMut for Writing<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
    }
}

impl<T: Flagged> Drop for Writing<'_, T> {
    fn drop(&mut self) {
        self.inner.write_flag().exit();
    }
}
