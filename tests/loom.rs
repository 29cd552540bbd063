#![allow(missing_docs)]
#![cfg(feature = "loom")]

use loom::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use offload::{event::Event, node::DependencyNode};

#[derive(Debug, Clone)]
struct Shared {
    log: Arc<Mutex<Vec<u32>>>,
    runs: Arc<AtomicUsize>,
}

impl Shared {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn node(&self, value: u32) -> DependencyNode {
        let shared = self.clone();
        DependencyNode::with_work(move || {
            shared.runs.fetch_add(1, Ordering::Relaxed);
            shared.log.lock().unwrap().push(value);
        })
    }
}

#[test]
fn loom_join_runs_after_both_parents() {
    loom::model(|| {
        // Graph:
        //   A     B
        //    \   /
        //      C (join)
        let shared = Shared::new();
        let a = shared.node(1);
        let b = shared.node(2);
        let c = DependencyNode::nop();
        assert!(c.runs_after(&a));
        assert!(c.runs_after(&b));
        c.finalize();
        a.finalize();
        b.finalize();

        Event::new(c.clone()).wait();

        assert!(c.is_done());
        assert!(a.is_done());
        assert!(b.is_done());
        assert_eq!(shared.runs.load(Ordering::Relaxed), 2);
        let mut log = shared.log.lock().unwrap().clone();
        log.sort_unstable();
        assert_eq!(log, vec![1, 2]);
    });
}

#[test]
fn loom_edge_races_with_completion() {
    loom::model(|| {
        let shared = Shared::new();
        let pred = shared.node(7);
        pred.finalize();

        // The predecessor may complete before, during or after the edge is added.
        let succ = DependencyNode::nop();
        succ.runs_after(&pred);
        succ.finalize();

        Event::new(succ.clone()).wait();

        assert!(succ.is_done());
        assert!(pred.is_done());
        assert_eq!(shared.runs.load(Ordering::Relaxed), 1);
        assert_eq!(*shared.log.lock().unwrap(), vec![7]);
    });
}

#[test]
fn loom_chain_runs_in_order_exactly_once() {
    loom::model(|| {
        let shared = Shared::new();
        let first = shared.node(1);
        let second = shared.node(2);
        assert!(second.runs_after(&first));
        second.finalize();
        first.finalize();

        Event::new(second.clone()).wait();

        assert_eq!(shared.runs.load(Ordering::Relaxed), 2);
        assert_eq!(*shared.log.lock().unwrap(), vec![1, 2]);
    });
}

#[test]
fn loom_empty_barrier_does_not_block() {
    loom::model(|| {
        let done = DependencyNode::nop();
        done.finalize();
        assert!(done.is_done());

        let mut barrier = Event::create_barrier();
        barrier.add(&Event::new(done));
        barrier.wait();

        Event::create_barrier().wait();
    });
}
