mod buffer;
mod task;

pub use buffer::Buffer;
pub use task::{BindingSession, Endpoint, Task};

use crate::{
    backend::{self, Device, KernelArgs, Platform, Subsystem},
    config::{ConfigError, RuntimeConfig},
    event::Event,
    executor::WorkerPool,
    memory::Memory,
    types::{DomainId, Extent, MemoryAccess},
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tracing::debug;

/// Serializes parameter binding across the process.
static BINDING_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Proof that the current thread holds [`BINDING_LOCK`].
pub(crate) struct BindingToken {
    _guard: MutexGuard<'static, ()>,
}

impl BindingToken {
    pub(crate) fn acquire() -> Self {
        Self {
            _guard: BINDING_LOCK.lock(),
        }
    }
}

pub(crate) struct ManagerInner {
    subsystem: Arc<dyn Subsystem>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.subsystem.shutdown();
    }
}

/// Entry point: creates tasks and buffers on one backend.
///
/// Cheap to clone. The backend is shut down, after draining outstanding work,
/// when the last manager, task and buffer referring to it are gone.
#[derive(Clone)]
pub struct DependencyManager {
    inner: Arc<ManagerInner>,
}

impl DependencyManager {
    /// Manager over an already constructed backend.
    #[must_use]
    pub fn new(subsystem: Arc<dyn Subsystem>) -> Self {
        Self {
            inner: Arc::new(ManagerInner { subsystem }),
        }
    }

    /// Install the worker pool and build the backend described by `config`.
    ///
    /// # Errors
    /// If the worker pool cannot be built or the backend is not available.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        WorkerPool::install(config)?;
        let subsystem = backend::make_subsystem(config)?;
        debug!(backend = %config.backend, "dependency manager created");
        Ok(Self::new(subsystem))
    }

    /// [`from_config`](Self::from_config) with settings read from the
    /// environment.
    ///
    /// # Errors
    /// If the environment is malformed or the backend is not available.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_config(&RuntimeConfig::from_env()?)
    }

    /// Backend platforms.
    #[must_use]
    pub fn platforms(&self) -> Vec<Arc<dyn Platform>> {
        self.inner.subsystem.platforms()
    }

    /// Devices of every platform.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.platforms()
            .iter()
            .flat_map(|platform| platform.devices())
            .collect()
    }

    /// Domain of host memory.
    #[must_use]
    pub fn host_domain(&self) -> DomainId {
        self.inner.subsystem.host_memory_domain()
    }

    /// Fresh task without a target.
    #[must_use]
    pub fn new_task(&self) -> Task {
        Task::new(self.inner.clone())
    }

    /// Buffer of `extent` elements of `element_size` bytes, initialised from
    /// `init` or zeroed.
    ///
    /// # Panics
    /// If `init` does not hold exactly the buffer's size in bytes.
    #[must_use]
    pub fn new_buffer(&self, init: Option<&[u8]>, element_size: usize, extent: Extent) -> Buffer {
        let len = element_size * extent.count();
        let host = match init {
            Some(data) => {
                assert_eq!(
                    data.len(),
                    len,
                    "DependencyManager::new_buffer: initial data size mismatch"
                );
                Memory::from_slice(data)
            }
            None => Memory::zeroed(len),
        };
        Buffer::new(self.inner.clone(), host, element_size, extent)
    }

    /// Current contents of `buffer`, after every operation bound before this
    /// call. Blocks.
    #[must_use]
    pub fn read_buffer(&self, buffer: &Buffer) -> Vec<u8> {
        let out = Arc::new(Mutex::new(Vec::new()));
        let mut task = self.new_task();
        task.use_host();
        let mut params = task.begin_params();
        params.set_buffer_param(buffer, MemoryAccess::ReadOnly, 0);
        params.end_params();
        let sink = out.clone();
        task.set_host_fn(Box::new(move |args: &KernelArgs<'_>| {
            // SAFETY: the graph orders this read after every writer of the
            // host copy and before the next one.
            let bytes = unsafe { args.buffer(0) };
            *sink.lock() = bytes.to_vec();
        }));
        task.submit().wait();
        let mut out = out.lock();
        core::mem::take(&mut *out)
    }

    /// Overwrite the beginning of `buffer` with `data`.
    ///
    /// # Panics
    /// If `data` is longer than the buffer.
    pub fn write_buffer(&self, buffer: &Buffer, data: &[u8]) -> Event {
        assert!(
            data.len() <= buffer.byte_len(),
            "DependencyManager::write_buffer: {} bytes exceed a {}-byte buffer",
            data.len(),
            buffer.byte_len()
        );
        let access = if data.len() == buffer.byte_len() {
            MemoryAccess::WriteOnly
        } else {
            MemoryAccess::ReadWrite
        };
        let data = data.to_vec();
        let mut task = self.new_task();
        task.use_host();
        let mut params = task.begin_params();
        params.set_buffer_param(buffer, access, 0);
        params.end_params();
        task.set_host_fn(Box::new(move |args: &KernelArgs<'_>| {
            // SAFETY: the graph gives this task exclusive access to the host copy.
            let bytes = unsafe { args.buffer_mut(0) };
            bytes[..data.len()].copy_from_slice(&data);
        }));
        task.submit()
    }
}

impl core::fmt::Debug for DependencyManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DependencyManager")
            .field("subsystem", &self.inner.subsystem)
            .finish()
    }
}
