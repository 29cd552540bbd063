use crate::{executor, sync::Mutex};
use core::{fmt, mem};
use std::{
    sync::{Arc, OnceLock, Weak},
    time::Instant,
};
use tracing::trace;

/// Closure executed by a node once all of its predecessors have completed.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work in the dependency graph.
///
/// A node waits for every predecessor registered through
/// [`runs_after`](Self::runs_after) plus one synthetic signal delivered by
/// [`finalize`](Self::finalize). When the last signal arrives the node either
/// completes inline (no work) or is dispatched onto the shared worker pool,
/// which completes it after the closure returns. Completion wakes every
/// successor.
///
/// Cloning yields another handle to the same node.
#[derive(Clone)]
pub struct DependencyNode {
    inner: Arc<NodeInner>,
}

/// Weak handle to a [`DependencyNode`].
///
/// Used wherever the referenced node may already be gone. A node can only be
/// dropped once nothing waits on it anymore, so a dangling reference is an
/// already satisfied dependency.
#[derive(Clone, Default)]
pub struct NodeRef(Weak<NodeInner>);

/// Profiling timestamps, in nanoseconds since the process time origin.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Profile {
    /// The node was finalized by its creator.
    pub submit: u64,
    /// The node became ready and started running.
    pub start: u64,
    /// The node completed.
    pub end: u64,
}

struct NodeInner {
    state: Mutex<NodeState>,
}

struct NodeState {
    /// Number of signals required before the node may run. Starts at 1 for the
    /// creator's own `finalize`.
    predecessors_outstanding: u16,
    /// Number of signals received so far.
    successors_signaled: u16,
    /// Nodes waiting on this one.
    successors: Vec<DependencyNode>,
    finalized: bool,
    dispatched: bool,
    done: bool,
    work: Option<Work>,
    profile: Option<Profile>,
}

impl DependencyNode {
    /// Create a node. `None` work makes it a join node that completes as soon
    /// as it becomes ready.
    #[must_use]
    pub fn new(work: Option<Work>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                state: Mutex::new(NodeState {
                    predecessors_outstanding: 1,
                    successors_signaled: 0,
                    successors: Vec::with_capacity(8),
                    finalized: false,
                    dispatched: false,
                    done: false,
                    work,
                    profile: None,
                }),
            }),
        }
    }

    /// Join node without work.
    #[must_use]
    pub fn nop() -> Self {
        Self::new(None)
    }

    /// Node running `work` on the worker pool.
    #[must_use]
    pub fn with_work(work: impl FnOnce() + Send + 'static) -> Self {
        Self::new(Some(Box::new(work)))
    }

    /// Replace the node's work. Only valid before the node is finalized.
    pub fn set_work(&self, work: Work) {
        let mut state = self.inner.state.lock();
        assert!(
            !state.finalized,
            "DependencyNode::set_work: node is already finalized"
        );
        state.work = Some(work);
    }

    /// Record submit/start/end timestamps for this node.
    pub fn enable_profiling(&self) {
        let mut state = self.inner.state.lock();
        state.profile.get_or_insert_with(Profile::default);
    }

    /// Make `self` wait for `predecessor`.
    ///
    /// Returns `false` when the predecessor has already completed, in which
    /// case no edge is recorded. The predecessor's lock is always taken before
    /// the successor's; the graph is acyclic, so this order never inverts.
    pub fn runs_after(&self, predecessor: &DependencyNode) -> bool {
        assert!(
            !self.ptr_eq(predecessor),
            "DependencyNode::runs_after: node cannot depend on itself"
        );
        let mut pred = predecessor.inner.state.lock();
        if pred.done {
            return false;
        }
        let mut state = self.inner.state.lock();
        debug_assert!(
            !state.dispatched,
            "DependencyNode::runs_after: successor is already running"
        );
        state.predecessors_outstanding = state
            .predecessors_outstanding
            .checked_add(1)
            .expect("DependencyNode::runs_after: [1]");
        drop(state);
        pred.successors.push(self.clone());
        trace!(
            node = ?Arc::as_ptr(&self.inner),
            predecessor = ?Arc::as_ptr(&predecessor.inner),
            "runs after"
        );
        true
    }

    /// Declare that no more predecessors will be added.
    pub fn finalize(&self) {
        {
            let mut state = self.inner.state.lock();
            assert!(
                !state.finalized,
                "DependencyNode::finalize: node is already finalized"
            );
            state.finalized = true;
            if let Some(profile) = state.profile.as_mut() {
                profile.submit = now_ns();
            }
        }
        self.notify();
    }

    /// Deliver one completion signal.
    ///
    /// Called by completing predecessors and, once, by `finalize`. Signals
    /// beyond the expected count are a wiring bug and trap in debug builds.
    pub fn notify(&self) {
        let mut ready = Vec::new();
        self.signal(&mut ready);
        drain(ready);
    }

    /// Count one signal. A node that becomes ready is dispatched when it has
    /// work and pushed onto `ready` otherwise.
    fn signal(&self, ready: &mut Vec<DependencyNode>) {
        let mut state = self.inner.state.lock();
        state.successors_signaled = state
            .successors_signaled
            .checked_add(1)
            .expect("DependencyNode::notify: [1]");
        debug_assert!(
            state.successors_signaled <= state.predecessors_outstanding,
            "DependencyNode::notify: more signals than predecessors"
        );
        if state.dispatched || state.successors_signaled != state.predecessors_outstanding {
            return;
        }
        state.dispatched = true;
        let work = state.work.take();
        drop(state);

        match work {
            None => ready.push(self.clone()),
            Some(work) => {
                trace!(node = ?Arc::as_ptr(&self.inner), "dispatch");
                executor::dispatch(self.clone(), work);
            }
        }
    }

    /// Mark the node done and wake every successor.
    pub(crate) fn complete(&self) {
        let mut ready = Vec::new();
        for next in self.finish() {
            next.signal(&mut ready);
        }
        drain(ready);
    }

    fn finish(&self) -> Vec<DependencyNode> {
        let successors = {
            let mut state = self.inner.state.lock();
            debug_assert!(!state.done, "DependencyNode::complete: completed twice");
            state.done = true;
            if let Some(profile) = state.profile.as_mut() {
                profile.end = now_ns();
            }
            mem::take(&mut state.successors)
        };
        trace!(
            node = ?Arc::as_ptr(&self.inner),
            successors = successors.len(),
            "complete"
        );
        successors
    }

    pub(crate) fn mark_started(&self) {
        let mut state = self.inner.state.lock();
        if let Some(profile) = state.profile.as_mut() {
            profile.start = now_ns();
        }
    }

    /// Whether the node has completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.lock().done
    }

    /// Whether the creator has finalized the node.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.inner.state.lock().finalized
    }

    /// Signals still missing before the node may run, including the creator's
    /// own `finalize` if it has not happened yet.
    #[must_use]
    pub fn pending_predecessors(&self) -> u16 {
        let state = self.inner.state.lock();
        state.predecessors_outstanding - state.successors_signaled
    }

    /// Profiling timestamps, if profiling was enabled.
    #[must_use]
    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.lock().profile
    }

    /// Weak handle to this node.
    #[must_use]
    pub fn downgrade(&self) -> NodeRef {
        NodeRef(Arc::downgrade(&self.inner))
    }

    /// Whether both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &DependencyNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DependencyNode")
            .field(&Arc::as_ptr(&self.inner))
            .finish()
    }
}

impl NodeRef {
    /// Strong handle, if the node is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<DependencyNode> {
        self.0.upgrade().map(|inner| DependencyNode { inner })
    }

    /// Whether this reference points at `node`.
    #[must_use]
    pub fn points_to(&self, node: &DependencyNode) -> bool {
        Weak::as_ptr(&self.0) == Arc::as_ptr(&node.inner)
    }

    /// Whether both references point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&Weak::as_ptr(&self.0)).finish()
    }
}

/// Complete, iteratively, the join nodes that became ready inline.
fn drain(mut ready: Vec<DependencyNode>) {
    while let Some(node) = ready.pop() {
        node.mark_started();
        for next in node.finish() {
            next.signal(&mut ready);
        }
    }
}

/// Nanoseconds since the first time the clock was read in this process.
pub(crate) fn now_ns() -> u64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    let origin = *ORIGIN.get_or_init(Instant::now);
    u64::try_from(origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
