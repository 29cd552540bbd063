use core::{fmt, ptr::NonNull, slice};
use std::sync::Arc;

/// Reference-counted, fixed-size byte region.
///
/// Backs host copies of buffers and simulated device allocations. Clones share
/// the region; it is freed when the last clone drops, so closures running on
/// the worker pool keep the memory they touch alive.
///
/// Concurrent access through [`ptr`](Self::ptr) is not synchronized by this
/// type. Exclusive access for writers is established by the dependency graph.
#[derive(Clone)]
pub struct Memory(Arc<MemoryInner>);

struct MemoryInner {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: `MemoryInner` uniquely owns its allocation; synchronization of the
// contents is the responsibility of the dependency graph.
unsafe impl Send for MemoryInner {}
// SAFETY: see above.
unsafe impl Sync for MemoryInner {}

impl Memory {
    /// Allocate `len` zero bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self::from_boxed(vec![0; len].into_boxed_slice())
    }

    /// Allocate a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_boxed(data.into())
    }

    fn from_boxed(data: Box<[u8]>) -> Self {
        let len = data.len();
        let ptr = NonNull::new(Box::into_raw(data).cast::<u8>()).expect("Memory::from_boxed: [1]");
        Self(Arc::new(MemoryInner { ptr, len }))
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len
    }

    /// Whether the region is zero-sized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// The contents, if this is the only handle to the region.
    #[must_use]
    pub fn get_mut(&mut self) -> Option<&mut [u8]> {
        let inner = Arc::get_mut(&mut self.0)?;
        // SAFETY: the handle is unique, so no other reference to the region exists.
        Some(unsafe { slice::from_raw_parts_mut(inner.ptr.as_ptr(), inner.len) })
    }

    /// Copy of the contents, if this is the only handle to the region.
    #[must_use]
    pub fn to_vec(&mut self) -> Option<Vec<u8>> {
        self.get_mut().map(|bytes| bytes.to_vec())
    }

    /// Whether both handles share one region.
    #[must_use]
    pub fn ptr_eq(&self, other: &Memory) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn ptr(&self) -> *mut u8 {
        self.0.ptr.as_ptr()
    }
}

impl Drop for MemoryInner {
    fn drop(&mut self) {
        let raw = core::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: `ptr`/`len` come from `Box::into_raw` in `Memory::from_boxed`
        // and are released exactly once.
        drop(unsafe { Box::from_raw(raw) });
    }
}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memory")
            .field("ptr", &self.0.ptr)
            .field("len", &self.0.len)
            .finish()
    }
}
