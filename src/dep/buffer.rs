use super::{BindingToken, ManagerInner};
use crate::{
    backend::DeviceBuffer,
    coherence::{Coherence, CoherenceSnapshot},
    memory::Memory,
    types::{Extent, SyncUnsafeCell},
};
use core::fmt;
use std::sync::Arc;

/// Device-visible array whose placement across memory domains is managed
/// automatically.
pub struct Buffer {
    element_size: usize,
    extent: Extent,
    host: Memory,
    coherence: SyncUnsafeCell<Coherence>,
    backend: Box<dyn DeviceBuffer>,
    _manager: Arc<ManagerInner>,
}

impl Buffer {
    pub(super) fn new(
        manager: Arc<ManagerInner>,
        host: Memory,
        element_size: usize,
        extent: Extent,
    ) -> Self {
        let backend = manager.subsystem.new_buffer(&host, element_size, extent);
        Self {
            element_size,
            extent,
            host,
            coherence: SyncUnsafeCell::new(Coherence::new()),
            backend,
            _manager: manager,
        }
    }

    /// Size of one element in bytes.
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Extent in elements.
    #[must_use]
    pub fn extent(&self) -> Extent {
        self.extent
    }

    /// Size in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.host.len()
    }

    /// Backend half of the buffer.
    #[must_use]
    pub fn backend(&self) -> &dyn DeviceBuffer {
        &*self.backend
    }

    /// Coherence record, borrowed for as long as the binding lock is held.
    pub(crate) fn coherence<'s>(&'s self, _token: &'s mut BindingToken) -> &'s mut Coherence {
        // SAFETY: the record is only reached through this method, and the
        // process-wide binding lock witnessed by the exclusively borrowed token
        // allows one such borrow at a time.
        unsafe { &mut *self.coherence.get() }
    }

    /// Current versions.
    ///
    /// Takes the binding lock; inside a binding session use
    /// `BindingSession::snapshot` instead.
    #[must_use]
    pub fn snapshot(&self) -> CoherenceSnapshot {
        let mut token = BindingToken::acquire();
        self.coherence(&mut token).snapshot()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("element_size", &self.element_size)
            .field("extent", &self.extent)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}
