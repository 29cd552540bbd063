use core::cell::UnsafeCell;
use derive_more::{Deref, DerefMut, Display};
use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;
use std::collections::HashMap as _HashMap;

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Send`.
///
/// Used for state whose exclusive access is guaranteed by something other than
/// the borrow checker: the process-wide binding lock for coherence records, or
/// the dependency graph for memory touched by running nodes.
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

/// Identifier of a memory domain (host RAM or one device's memory).
pub type DomainId = u32;

/// The host memory domain. Always present, always id `0`.
pub const HOST_DOMAIN: DomainId = 0;

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;

/// How an operation touches a buffer.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MemoryAccess {
    /// The operation only reads.
    #[display("RO")]
    ReadOnly,
    /// The operation overwrites without reading (discard semantics).
    #[display("WO")]
    WriteOnly,
    /// The operation reads, then writes.
    #[display("RW")]
    ReadWrite,
}

impl MemoryAccess {
    /// Whether the previous contents must be visible to the operation.
    #[must_use]
    pub const fn reads(self) -> bool {
        !matches!(self, Self::WriteOnly)
    }

    /// Whether the operation produces a new version of the data.
    #[must_use]
    pub const fn writes(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Number of elements along each of three dimensions. Unused dimensions are `1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Extent(pub [usize; 3]);

impl Extent {
    /// One-dimensional extent.
    #[must_use]
    pub const fn d1(s0: usize) -> Self {
        Self([s0, 1, 1])
    }

    /// Two-dimensional extent.
    #[must_use]
    pub const fn d2(s0: usize, s1: usize) -> Self {
        Self([s0, s1, 1])
    }

    /// Three-dimensional extent.
    #[must_use]
    pub const fn d3(s0: usize, s1: usize, s2: usize) -> Self {
        Self([s0, s1, s2])
    }

    /// Total number of elements.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().product()
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self([1, 1, 1])
    }
}

/// Global and work-group extents of an nd-range launch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NdRange {
    /// Total work items per dimension.
    pub global: [usize; 3],
    /// Work items per group per dimension.
    pub local: [usize; 3],
}
