use super::{BindingToken, Buffer, ManagerInner};
use crate::{
    backend::{BackendEndpoint, CopyShape, Device, DeviceTask, HostFn, Kernel},
    coherence::{CoherenceSnapshot, Resolution},
    event::Event,
    memory::Memory,
    types::{DomainId, MemoryAccess, NdRange},
};
use core::{
    fmt,
    ops::{Deref, DerefMut},
};
use std::sync::Arc;
use tracing::debug;

/// One operation to run on a device or on the host.
///
/// Select a target first, then bind parameters inside a
/// [`BindingSession`], then [`submit`](Self::submit).
pub struct Task {
    backend: Box<dyn DeviceTask>,
    target: Option<DomainId>,
    host_domain: DomainId,
    params_bound: bool,
    _manager: Arc<ManagerInner>,
}

impl Task {
    pub(super) fn new(manager: Arc<ManagerInner>) -> Self {
        Self {
            backend: manager.subsystem.new_task(),
            target: None,
            host_domain: manager.subsystem.host_memory_domain(),
            params_bound: false,
            _manager: manager,
        }
    }

    /// Run on `device`.
    ///
    /// # Panics
    /// If a target was already selected.
    pub fn use_device(&mut self, device: &Arc<dyn Device>) {
        self.select(device.memory_domain());
        self.backend.use_device(&**device);
    }

    /// Run on the host.
    ///
    /// # Panics
    /// If a target was already selected.
    pub fn use_host(&mut self) {
        self.select(self.host_domain);
        self.backend.use_host();
    }

    fn select(&mut self, domain: DomainId) {
        assert!(
            self.target.is_none(),
            "Task: target already selected ({:?})",
            self.target
        );
        self.target = Some(domain);
    }

    /// Domain the task runs in, once selected.
    #[must_use]
    pub fn target_domain(&self) -> Option<DomainId> {
        self.target
    }

    /// Record submit/start/end timestamps, readable from the returned event.
    pub fn enable_profiling(&mut self) {
        self.backend.enable_profiling();
    }

    /// Run after `event` completed, in addition to the memory dependencies.
    pub fn depends_on(&mut self, event: &Event) {
        self.backend.depends_on(&event.node().downgrade());
    }

    /// Launch `kernel` as the task body.
    pub fn set_kernel(&mut self, kernel: Kernel) {
        self.backend.set_kernel(kernel);
    }

    /// Run `f` as the task body.
    pub fn set_host_fn(&mut self, f: HostFn) {
        self.backend.set_host_fn(f);
    }

    /// Single work-item launch.
    pub fn set_single(&mut self) {
        self.backend.set_single();
    }

    /// Flat launch.
    pub fn set_range(&mut self, range: [usize; 3]) {
        self.backend.set_range(range);
    }

    /// Work-group launch.
    pub fn set_nd_range(&mut self, range: NdRange) {
        self.backend.set_nd_range(range);
    }

    /// Work-group local memory, in bytes.
    pub fn set_local_mem_size(&mut self, bytes: usize) {
        self.backend.set_local_mem_size(bytes);
    }

    /// Open the binding session. Blocks while another thread is binding.
    ///
    /// # Panics
    /// If a session was already opened for this task.
    pub fn begin_params(&mut self) -> BindingSession<'_> {
        assert!(
            !self.params_bound,
            "Task::begin_params: parameters were already bound"
        );
        self.params_bound = true;
        BindingSession {
            token: BindingToken::acquire(),
            task: self,
        }
    }

    /// Hand the task to the backend.
    ///
    /// # Panics
    /// If no target was selected.
    #[must_use = "dropping the event loses the only completion handle"]
    pub fn submit(self) -> Event {
        let Self {
            backend, target, ..
        } = self;
        let Some(target) = target else {
            panic!("Task::submit: no device selected");
        };
        debug!(target, "task submitted");
        backend.submit()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// One side of an explicit copy.
#[derive(Debug, Copy, Clone)]
pub enum Endpoint<'a> {
    /// A managed buffer, accessed in the task's domain.
    Buffer {
        /// The buffer.
        buffer: &'a Buffer,
        /// How the copy touches it.
        access: MemoryAccess,
        /// Start offset in bytes.
        offset_byte: usize,
    },
    /// Caller-owned host memory; ordering is the caller's responsibility.
    Host {
        /// The memory.
        memory: &'a Memory,
        /// Start offset in bytes.
        offset_byte: usize,
    },
}

impl<'a> Endpoint<'a> {
    /// Buffer endpoint.
    #[must_use]
    pub fn buffer(buffer: &'a Buffer, access: MemoryAccess, offset_byte: usize) -> Self {
        Self::Buffer {
            buffer,
            access,
            offset_byte,
        }
    }

    /// Host memory endpoint.
    #[must_use]
    pub fn host(memory: &'a Memory, offset_byte: usize) -> Self {
        Self::Host {
            memory,
            offset_byte,
        }
    }
}

/// Parameter-binding phase of a [`Task`].
///
/// Holds the process-wide binding lock until dropped or closed with
/// [`end_params`](Self::end_params). Dereferences to the task.
pub struct BindingSession<'a> {
    task: &'a mut Task,
    token: BindingToken,
}

impl Deref for BindingSession<'_> {
    type Target = Task;

    fn deref(&self) -> &Task {
        &*self.task
    }
}

impl DerefMut for BindingSession<'_> {
    fn deref_mut(&mut self) -> &mut Task {
        &mut *self.task
    }
}

impl BindingSession<'_> {
    fn target(&self, op: &str) -> DomainId {
        let Some(target) = self.task.target else {
            panic!("BindingSession::{op}: no device selected");
        };
        target
    }

    /// Resolve `access` to `buffer` in the task's domain and stage a copy
    /// when the domain is stale.
    fn resolve(&mut self, buffer: &Buffer, access: MemoryAccess, target: DomainId) -> Resolution {
        let backend = &mut *self.task.backend;
        let resolution = buffer
            .coherence(&mut self.token)
            .resolve_access(&mut *backend, target, access);
        if resolution.needs_copy() {
            backend.stage(buffer.backend(), resolution.source, target);
        }
        resolution
    }

    /// Append a by-value argument.
    pub fn set_param(&mut self, bytes: &[u8]) {
        self.task.backend.set_param(bytes);
    }

    /// Append `buffer` as an argument.
    ///
    /// # Panics
    /// If no target was selected.
    pub fn set_buffer_param(
        &mut self,
        buffer: &Buffer,
        access: MemoryAccess,
        offset_byte: usize,
    ) -> Resolution {
        let target = self.target("set_buffer_param");
        let resolution = self.resolve(buffer, access, target);
        self.task
            .backend
            .set_buffer_param(buffer.backend(), target, offset_byte);
        resolution
    }

    /// Make an explicit copy the task body. Buffer endpoints are resolved
    /// destination first.
    ///
    /// # Panics
    /// If no target was selected, the task already has a body, or a range is
    /// out of bounds.
    pub fn copy(&mut self, src: Endpoint<'_>, dst: Endpoint<'_>, shape: CopyShape) {
        let target = self.target("copy");
        let dst = self.endpoint(dst, target);
        let src = self.endpoint(src, target);
        self.task.backend.copy(src, dst, shape);
    }

    fn endpoint<'e>(&mut self, endpoint: Endpoint<'e>, target: DomainId) -> BackendEndpoint<'e> {
        match endpoint {
            Endpoint::Buffer {
                buffer,
                access,
                offset_byte,
            } => {
                self.resolve(buffer, access, target);
                BackendEndpoint::Buffer {
                    buffer: buffer.backend(),
                    domain: target,
                    offset_byte,
                }
            }
            Endpoint::Host {
                memory,
                offset_byte,
            } => BackendEndpoint::Host {
                memory,
                offset_byte,
            },
        }
    }

    /// Contiguous copy of `len_byte` bytes.
    pub fn copy_1d(&mut self, src: Endpoint<'_>, dst: Endpoint<'_>, len_byte: usize) {
        self.copy(src, dst, CopyShape::Linear { len_byte });
    }

    /// Copy of `rows` rows of `len_byte` bytes with the given pitches.
    pub fn copy_2d(
        &mut self,
        src: Endpoint<'_>,
        dst: Endpoint<'_>,
        rows: usize,
        len_byte: usize,
        [src_stride, dst_stride]: [usize; 2],
    ) {
        self.copy(
            src,
            dst,
            CopyShape::Planar {
                rows,
                len_byte,
                src_stride,
                dst_stride,
            },
        );
    }

    /// Copy of `loops[0]` planes of `loops[1]` rows of `len_byte` bytes.
    /// Strides are given as `[plane, row]` pitches.
    pub fn copy_3d(
        &mut self,
        src: Endpoint<'_>,
        dst: Endpoint<'_>,
        [i_loop, j_loop]: [usize; 2],
        len_byte: usize,
        [i_src_stride, j_src_stride]: [usize; 2],
        [i_dst_stride, j_dst_stride]: [usize; 2],
    ) {
        self.copy(
            src,
            dst,
            CopyShape::Volume {
                i_loop,
                j_loop,
                len_byte,
                i_src_stride,
                j_src_stride,
                i_dst_stride,
                j_dst_stride,
            },
        );
    }

    /// Make zeroing the first `len_byte` bytes of `buffer` the task body.
    ///
    /// # Panics
    /// If no target was selected or the task already has a body.
    pub fn fill_zero(&mut self, buffer: &Buffer, len_byte: usize) {
        let target = self.target("fill_zero");
        self.resolve(buffer, MemoryAccess::WriteOnly, target);
        self.task.backend.fill(buffer.backend(), target, len_byte);
    }

    /// Versions of `buffer`, read under the lock this session already holds.
    #[must_use]
    pub fn snapshot(&mut self, buffer: &Buffer) -> CoherenceSnapshot {
        buffer.coherence(&mut self.token).snapshot()
    }

    /// Close the session and release the binding lock.
    pub fn end_params(self) {
        drop(self);
    }
}

impl fmt::Debug for BindingSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSession")
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}
