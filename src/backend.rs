//! Contract between the execution core and device runtimes.
//!
//! A backend is selected at runtime and exposed as trait objects: a
//! [`Subsystem`] enumerating [`Platform`]s and [`Device`]s and creating
//! [`DeviceTask`]s and [`DeviceBuffer`]s. The core resolves memory coherence
//! and hands the backend only concrete instructions: which domain's memory to
//! bind, which staging copies to perform, and the operation to run.

pub mod cpu;
mod params;

pub use params::{ARG_ALIGN, ARG_BUF_SIZE, KernelArgs, Launch, MAX_ARGS, ParamStorage};

use crate::{
    coherence::Dependent,
    config::{BackendKind, ConfigError, RuntimeConfig},
    event::Event,
    memory::Memory,
    types::{DomainId, Extent, NdRange},
};
use core::{any::Any, fmt::Debug};
use std::sync::Arc;

/// Device code: invoked once per launch with the bound arguments.
pub type Kernel = Arc<dyn Fn(&KernelArgs<'_>) + Send + Sync>;
/// Host code run as the body of a host task.
pub type HostFn = Box<dyn FnOnce(&KernelArgs<'_>) + Send>;

/// Entry point of a backend.
pub trait Subsystem: Send + Sync + Debug {
    /// Available platforms.
    fn platforms(&self) -> Vec<Arc<dyn Platform>>;

    /// Fresh task, not yet bound to a device.
    fn new_task(&self) -> Box<dyn DeviceTask>;

    /// Backend part of a buffer whose host copy is `host`.
    fn new_buffer(&self, host: &Memory, element_size: usize, extent: Extent) -> Box<dyn DeviceBuffer>;

    /// Domain of host memory.
    fn host_memory_domain(&self) -> DomainId;

    /// Wait for this backend's outstanding work and release its resources.
    /// Must not block when called from a worker thread.
    fn shutdown(&self);
}

/// Group of devices sharing one driver.
pub trait Platform: Send + Sync + Debug {
    /// Devices of this platform.
    fn devices(&self) -> Vec<Arc<dyn Device>>;
    /// Platform name.
    fn name(&self) -> &str;
    /// Platform vendor.
    fn vendor(&self) -> &str;
    /// Platform version string.
    fn version(&self) -> &str;
}

/// Broad device category.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// General purpose processor.
    Cpu,
    /// Graphics processor.
    Gpu,
    /// Fixed-function or other accelerator.
    Accelerator,
}

/// One compute device with its own memory domain.
pub trait Device: Send + Sync + Debug {
    /// Memory domain of this device.
    fn memory_domain(&self) -> DomainId;
    /// Device category.
    fn kind(&self) -> DeviceKind;
    /// Device name.
    fn name(&self) -> &str;
    /// Device vendor.
    fn vendor(&self) -> &str;
    /// Driver version string.
    fn driver_version(&self) -> &str;

    /// Whether this is a CPU device.
    fn is_cpu(&self) -> bool {
        self.kind() == DeviceKind::Cpu
    }
    /// Whether this is a GPU device.
    fn is_gpu(&self) -> bool {
        self.kind() == DeviceKind::Gpu
    }
    /// Whether this is an accelerator device.
    fn is_accelerator(&self) -> bool {
        self.kind() == DeviceKind::Accelerator
    }
}

/// Backend half of a buffer: its allocations in device domains.
pub trait DeviceBuffer: Send + Sync + Debug {
    /// Downcasting hook for backends.
    fn as_any(&self) -> &dyn Any;
    /// Size in bytes.
    fn byte_len(&self) -> usize;
    /// Size of one element in bytes.
    fn element_size(&self) -> usize;
    /// Extent in elements.
    fn extent(&self) -> Extent;
}

/// One side of an explicit copy, with the domain already resolved.
#[derive(Debug, Copy, Clone)]
pub enum BackendEndpoint<'a> {
    /// Buffer memory in `domain`.
    Buffer {
        /// The buffer.
        buffer: &'a dyn DeviceBuffer,
        /// Domain whose allocation is accessed.
        domain: DomainId,
        /// Start offset in bytes.
        offset_byte: usize,
    },
    /// Caller-owned host memory.
    Host {
        /// The memory.
        memory: &'a Memory,
        /// Start offset in bytes.
        offset_byte: usize,
    },
}

/// Geometry of an explicit copy.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CopyShape {
    /// Contiguous bytes.
    Linear {
        /// Bytes copied.
        len_byte: usize,
    },
    /// `rows` rows of `len_byte` bytes.
    Planar {
        /// Number of rows.
        rows: usize,
        /// Bytes per row.
        len_byte: usize,
        /// Source row pitch.
        src_stride: usize,
        /// Destination row pitch.
        dst_stride: usize,
    },
    /// `i_loop` planes of `j_loop` rows of `len_byte` bytes.
    Volume {
        /// Number of planes.
        i_loop: usize,
        /// Rows per plane.
        j_loop: usize,
        /// Bytes per row.
        len_byte: usize,
        /// Source plane pitch.
        i_src_stride: usize,
        /// Source row pitch.
        j_src_stride: usize,
        /// Destination plane pitch.
        i_dst_stride: usize,
        /// Destination row pitch.
        j_dst_stride: usize,
    },
}

impl CopyShape {
    /// Bytes from the source start touched by the copy, or `None` if that
    /// length does not fit in `usize`.
    #[must_use]
    pub fn src_span(&self) -> Option<usize> {
        match *self {
            Self::Linear { len_byte } => Some(len_byte),
            Self::Planar {
                rows,
                len_byte,
                src_stride,
                ..
            } => span(&[(rows, src_stride)], len_byte),
            Self::Volume {
                i_loop,
                j_loop,
                len_byte,
                i_src_stride,
                j_src_stride,
                ..
            } => span(&[(i_loop, i_src_stride), (j_loop, j_src_stride)], len_byte),
        }
    }

    /// Bytes from the destination start touched by the copy, or `None` if
    /// that length does not fit in `usize`.
    #[must_use]
    pub fn dst_span(&self) -> Option<usize> {
        match *self {
            Self::Linear { len_byte } => Some(len_byte),
            Self::Planar {
                rows,
                len_byte,
                dst_stride,
                ..
            } => span(&[(rows, dst_stride)], len_byte),
            Self::Volume {
                i_loop,
                j_loop,
                len_byte,
                i_dst_stride,
                j_dst_stride,
                ..
            } => span(&[(i_loop, i_dst_stride), (j_loop, j_dst_stride)], len_byte),
        }
    }
}

fn span(loops: &[(usize, usize)], len_byte: usize) -> Option<usize> {
    if loops.iter().any(|&(count, _)| count == 0) {
        return Some(0);
    }
    loops.iter().try_fold(len_byte, |total, &(count, stride)| {
        (count - 1).checked_mul(stride)?.checked_add(total)
    })
}

/// Backend half of a task.
///
/// Memory dependencies arrive through [`Dependent::depends_on`]; the backend
/// decides how to order its internal nodes after them.
pub trait DeviceTask: Dependent + Send {
    /// Record profiling timestamps for the main operation.
    fn enable_profiling(&mut self);
    /// Run on `device`.
    fn use_device(&mut self, device: &dyn Device);
    /// Run on the host.
    fn use_host(&mut self);
    /// Launch `kernel` as the task body.
    fn set_kernel(&mut self, kernel: Kernel);
    /// Run `f` on the host as the task body.
    fn set_host_fn(&mut self, f: HostFn);
    /// Single work-item launch.
    fn set_single(&mut self);
    /// Flat launch of `range` work items.
    fn set_range(&mut self, range: [usize; 3]);
    /// Work-group launch.
    fn set_nd_range(&mut self, range: NdRange);
    /// Work-group local memory, in bytes.
    fn set_local_mem_size(&mut self, bytes: usize);
    /// Append a by-value argument.
    fn set_param(&mut self, bytes: &[u8]);
    /// Append the allocation of `buffer` in `domain` as an argument.
    fn set_buffer_param(&mut self, buffer: &dyn DeviceBuffer, domain: DomainId, offset_byte: usize);
    /// Copy the whole buffer from `source` to `target` before the main
    /// operation.
    fn stage(&mut self, buffer: &dyn DeviceBuffer, source: DomainId, target: DomainId);
    /// Make an explicit copy the main operation.
    fn copy(&mut self, src: BackendEndpoint<'_>, dst: BackendEndpoint<'_>, shape: CopyShape);
    /// Make zero-filling `len_byte` bytes of `buffer` in `domain` the main
    /// operation.
    fn fill(&mut self, buffer: &dyn DeviceBuffer, domain: DomainId, len_byte: usize);
    /// Finalize the task.
    fn submit(self: Box<Self>) -> Event;
}

/// Instantiate the backend named by `config`.
///
/// # Errors
/// If the backend is not part of this build.
pub fn make_subsystem(config: &RuntimeConfig) -> Result<Arc<dyn Subsystem>, ConfigError> {
    match config.backend {
        BackendKind::Cpu => Ok(Arc::new(cpu::CpuSubsystem::new(config.cpu_devices))),
        other => Err(ConfigError::BackendUnavailable(other)),
    }
}
