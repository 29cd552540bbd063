use crate::{
    node::{DependencyNode, Profile},
    sync::{Condvar, Mutex},
};
use std::sync::Arc;

/// Completion handle of a submitted operation.
#[derive(Debug, Clone)]
pub struct Event {
    node: DependencyNode,
}

impl Event {
    /// Wrap the node whose completion this event reports.
    #[must_use]
    pub fn new(node: DependencyNode) -> Self {
        Self { node }
    }

    /// The underlying node.
    #[must_use]
    pub fn node(&self) -> &DependencyNode {
        &self.node
    }

    /// An empty barrier to collect events into.
    #[must_use]
    pub fn create_barrier() -> EventBarrier {
        EventBarrier::new()
    }

    /// Block until the operation completed.
    pub fn wait(&self) {
        let mut barrier = EventBarrier::new();
        barrier.add(self);
        barrier.wait();
    }

    /// Whether the operation completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.node.is_done()
    }

    /// Time the operation was submitted, in nanoseconds.
    ///
    /// Blocks until completion. `None` if profiling was not enabled.
    #[must_use]
    pub fn profiling_command_submit(&self) -> Option<u64> {
        self.finished_profile().map(|p| p.submit)
    }

    /// Time the operation started running, in nanoseconds.
    ///
    /// Blocks until completion. `None` if profiling was not enabled.
    #[must_use]
    pub fn profiling_command_start(&self) -> Option<u64> {
        self.finished_profile().map(|p| p.start)
    }

    /// Time the operation completed, in nanoseconds.
    ///
    /// Blocks until completion. `None` if profiling was not enabled.
    #[must_use]
    pub fn profiling_command_end(&self) -> Option<u64> {
        self.finished_profile().map(|p| p.end)
    }

    fn finished_profile(&self) -> Option<Profile> {
        self.wait();
        self.node.profile()
    }
}

/// Blocks the calling thread until a set of events completed.
#[must_use]
#[derive(Debug)]
pub struct EventBarrier {
    sync: DependencyNode,
    signal: Arc<Signal>,
    need_wait: bool,
}

struct Signal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl core::fmt::Debug for Signal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Signal")
    }
}

impl Default for EventBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBarrier {
    /// Empty barrier.
    pub fn new() -> Self {
        let signal = Arc::new(Signal {
            done: Mutex::new(false),
            cond: Condvar::new(),
        });
        let sync = {
            let signal = Arc::clone(&signal);
            DependencyNode::with_work(move || {
                *signal.done.lock() = true;
                signal.cond.notify_all();
            })
        };
        Self {
            sync,
            signal,
            need_wait: false,
        }
    }

    /// Include `event` in the barrier.
    pub fn add(&mut self, event: &Event) {
        if self.sync.runs_after(event.node()) {
            self.need_wait = true;
        }
    }

    /// Block until every added event completed.
    ///
    /// Returns immediately if all of them were already complete when added.
    pub fn wait(self) {
        if !self.need_wait {
            return;
        }
        self.sync.finalize();
        let done = self.signal.done.lock();
        drop(self.signal.cond.wait_until(done, |done| *done));
    }
}
