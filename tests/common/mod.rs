#![allow(dead_code)]

use offload::{
    DependencyManager, DependencyNode, Event, RuntimeConfig,
    backend::{Kernel, KernelArgs},
};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn manager(devices: usize) -> DependencyManager {
    init_tracing();
    let config = RuntimeConfig {
        cpu_devices: devices,
        ..RuntimeConfig::default()
    };
    DependencyManager::from_config(&config).unwrap()
}

/// A node that holds back whatever depends on its event until released.
pub struct Gate {
    node: DependencyNode,
    event: Event,
}

impl Gate {
    pub fn new() -> Self {
        let node = DependencyNode::nop();
        let event = Event::new(node.clone());
        Self { node, event }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn release(self) {
        self.node.finalize();
    }
}

/// Kernel writing `bytes` at the start of buffer argument 0.
pub fn write_kernel(bytes: &[u8]) -> Kernel {
    let bytes = bytes.to_vec();
    Arc::new(move |args: &KernelArgs<'_>| {
        let out = unsafe { args.buffer_mut(0) };
        out[..bytes.len()].copy_from_slice(&bytes);
    })
}

/// Kernel that touches nothing.
pub fn noop_kernel() -> Kernel {
    Arc::new(|_: &KernelArgs<'_>| {})
}

pub fn u32s(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
        .collect()
}

pub fn bytes_of(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}
