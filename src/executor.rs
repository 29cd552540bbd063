use crate::{
    config::{ConfigError, RuntimeConfig},
    node::{DependencyNode, Work},
};
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static GLOBAL: OnceLock<WorkerPool> = OnceLock::new();

/// Shared pool running the closures of ready dependency nodes.
///
/// One pool exists per process. It is created either explicitly through
/// [`install`](Self::install) (done by `DependencyManager::from_config`) or
/// lazily with default settings the first time a node is dispatched.
#[must_use]
#[derive(Debug)]
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Install the process-wide pool using `config`.
    ///
    /// If a pool is already installed it is returned unchanged.
    ///
    /// # Errors
    /// If the rayon pool could not be built.
    pub fn install(config: &RuntimeConfig) -> Result<&'static Self, ConfigError> {
        if let Some(pool) = GLOBAL.get() {
            return Ok(pool);
        }
        let pool = Self::build(config)?;
        let pool = GLOBAL.get_or_init(|| pool);
        debug!(threads = pool.current_num_threads(), "worker pool installed");
        Ok(pool)
    }

    /// The process-wide pool, created with default settings if none was
    /// installed.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            Self::build(&RuntimeConfig::default()).expect("WorkerPool::global: [1]")
        })
    }

    fn build(config: &RuntimeConfig) -> Result<Self, ConfigError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("offload-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Number of threads in the pool.
    #[must_use]
    pub fn current_num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Whether the calling thread is one of the pool's workers.
    #[must_use]
    pub fn is_worker_thread(&self) -> bool {
        self.pool.current_thread_index().is_some()
    }

    #[cfg(not(feature = "loom"))]
    fn spawn(&self, node: DependencyNode, work: Work) {
        self.pool.spawn(move || run(&node, work));
    }
}

/// Count of one owner's closures that were handed to the graph and have not
/// finished or been dropped yet.
#[derive(Debug, Default)]
pub struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    /// Wrap `work` so it is counted until it returns or is dropped unrun.
    pub(crate) fn track(self: &Arc<Self>, work: Work) -> Work {
        *self.count.lock() += 1;
        let guard = InFlightGuard(self.clone());
        Box::new(move || {
            work();
            drop(guard);
        })
    }

    /// Number of tracked closures still outstanding.
    #[must_use]
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Block until every tracked closure has finished.
    ///
    /// On a worker thread this returns immediately: the caller may itself be
    /// one of the tracked closures.
    pub fn wait_idle(&self) {
        if GLOBAL.get().is_some_and(WorkerPool::is_worker_thread) {
            debug!(outstanding = self.count(), "not draining from a worker thread");
            return;
        }
        let mut count = self.count.lock();
        while *count != 0 {
            self.idle.wait(&mut count);
        }
    }
}

struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Run `work` for a ready node, then complete it.
///
/// A panicking closure aborts the process: rayon aborts on panics escaping
/// `spawn` when no panic handler is configured.
pub(crate) fn dispatch(node: DependencyNode, work: Work) {
    #[cfg(not(feature = "loom"))]
    WorkerPool::global().spawn(node, work);
    #[cfg(feature = "loom")]
    crate::sync::thread::spawn(move || run(&node, work));
}

fn run(node: &DependencyNode, work: Work) {
    node.mark_started();
    work();
    node.complete();
}
