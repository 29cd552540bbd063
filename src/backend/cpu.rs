//! In-tree backend running every device on host threads.
//!
//! Each simulated device owns a separate memory domain with its own
//! allocations, so coherence copies between the host and a device are real
//! byte copies.

use super::{
    BackendEndpoint, CopyShape, Device, DeviceBuffer, DeviceKind, DeviceTask, HostFn, Kernel,
    KernelArgs, Launch, ParamStorage, Platform, Subsystem,
};
use crate::{
    coherence::Dependent,
    event::Event,
    executor::InFlight,
    memory::Memory,
    node::{DependencyNode, NodeRef, Work},
    types::{DomainId, Extent, HOST_DOMAIN, HashMap, NdRange},
    utils::strided_copy,
};
use core::{any::Any, mem};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// CPU backend entry point.
#[derive(Debug)]
pub struct CpuSubsystem {
    platform: Arc<CpuPlatform>,
    in_flight: Arc<InFlight>,
}

impl CpuSubsystem {
    /// Backend simulating `devices` devices, in domains `1..=devices`.
    #[must_use]
    pub fn new(devices: usize) -> Self {
        let devices: Vec<Arc<dyn Device>> = (1..=devices)
            .map(|n| {
                let domain = DomainId::try_from(n).expect("CpuSubsystem::new: [1]");
                Arc::new(CpuDevice {
                    domain,
                    name: format!("CPU Device #{domain}"),
                }) as Arc<dyn Device>
            })
            .collect();
        debug!(devices = ?devices, "cpu backend initialised");
        Self {
            platform: Arc::new(CpuPlatform { devices }),
            in_flight: Arc::default(),
        }
    }
}

impl Subsystem for CpuSubsystem {
    fn platforms(&self) -> Vec<Arc<dyn Platform>> {
        let platform: Arc<dyn Platform> = self.platform.clone();
        vec![platform]
    }

    fn new_task(&self) -> Box<dyn DeviceTask> {
        Box::new(CpuTask::new(self.in_flight.clone()))
    }

    fn new_buffer(&self, host: &Memory, element_size: usize, extent: Extent) -> Box<dyn DeviceBuffer> {
        Box::new(CpuBuffer {
            host: host.clone(),
            element_size,
            extent,
            devices: Mutex::new(HashMap::default()),
        })
    }

    fn host_memory_domain(&self) -> DomainId {
        HOST_DOMAIN
    }

    fn shutdown(&self) {
        self.in_flight.wait_idle();
        debug!(outstanding = self.in_flight.count(), "cpu backend shut down");
    }
}

/// The single CPU platform.
#[derive(Debug)]
pub struct CpuPlatform {
    devices: Vec<Arc<dyn Device>>,
}

impl Platform for CpuPlatform {
    fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.devices.clone()
    }

    fn name(&self) -> &str {
        "CPU Platform"
    }

    fn vendor(&self) -> &str {
        "offload"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }
}

/// A simulated device.
#[derive(Debug)]
pub struct CpuDevice {
    domain: DomainId,
    name: String,
}

impl Device for CpuDevice {
    fn memory_domain(&self) -> DomainId {
        self.domain
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn vendor(&self) -> &str {
        "offload"
    }

    fn driver_version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }
}

/// Host copy plus one lazily created allocation per device domain.
#[derive(Debug)]
pub struct CpuBuffer {
    host: Memory,
    element_size: usize,
    extent: Extent,
    devices: Mutex<HashMap<DomainId, Memory>>,
}

impl CpuBuffer {
    fn downcast(buffer: &dyn DeviceBuffer) -> &Self {
        buffer
            .as_any()
            .downcast_ref()
            .expect("CpuBuffer::downcast: buffer belongs to another backend")
    }

    /// Allocation of this buffer in `domain`.
    #[must_use]
    pub fn memory(&self, domain: DomainId) -> Memory {
        if domain == HOST_DOMAIN {
            return self.host.clone();
        }
        self.devices
            .lock()
            .entry(domain)
            .or_insert_with(|| Memory::zeroed(self.host.len()))
            .clone()
    }
}

impl DeviceBuffer for CpuBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn byte_len(&self) -> usize {
        self.host.len()
    }

    fn element_size(&self) -> usize {
        self.element_size
    }

    fn extent(&self) -> Extent {
        self.extent
    }
}

enum Body {
    Kernel(Kernel),
    Host(HostFn),
    Op(Work),
}

/// Task of the CPU backend.
///
/// The main node is created up front so memory states can reference it while
/// parameters are still being bound. Dependencies accumulate in `pending`
/// until the next committed operation or submission consumes them.
pub struct CpuTask {
    kernel: DependencyNode,
    pending: Vec<NodeRef>,
    domain: Option<DomainId>,
    launch: Launch,
    params: ParamStorage,
    body: Option<Body>,
    submitted: bool,
    in_flight: Arc<InFlight>,
}

impl CpuTask {
    fn new(in_flight: Arc<InFlight>) -> Self {
        Self {
            kernel: DependencyNode::nop(),
            pending: Vec::new(),
            domain: None,
            launch: Launch::default(),
            params: ParamStorage::default(),
            body: None,
            submitted: false,
            in_flight,
        }
    }

    /// Run `work` in its own node after everything pending; the main node
    /// runs after it.
    fn commit_op(&mut self, work: Work) {
        let op = DependencyNode::new(Some(self.in_flight.track(work)));
        self.wire_pending(&op);
        self.kernel.runs_after(&op);
        op.finalize();
    }

    fn wire_pending(&mut self, node: &DependencyNode) {
        for predecessor in self.pending.drain(..) {
            if let Some(predecessor) = predecessor.upgrade() {
                node.runs_after(&predecessor);
            }
        }
    }

    fn set_core_op(&mut self, work: Work) {
        assert!(
            self.body.is_none(),
            "CpuTask: task already has a main operation"
        );
        self.body = Some(Body::Op(work));
    }

    fn body_work(&mut self) -> Option<Work> {
        let launch = self.launch;
        match self.body.take()? {
            Body::Kernel(kernel) => {
                let params = mem::take(&mut self.params);
                let work: Work = Box::new(move || kernel(&KernelArgs::new(&launch, &params)));
                Some(work)
            }
            Body::Host(f) => {
                let params = mem::take(&mut self.params);
                let work: Work = Box::new(move || f(&KernelArgs::new(&launch, &params)));
                Some(work)
            }
            Body::Op(work) => Some(work),
        }
    }
}

impl Dependent for CpuTask {
    fn handle(&self) -> NodeRef {
        self.kernel.downgrade()
    }

    fn depends_on(&mut self, predecessor: &NodeRef) {
        if predecessor.points_to(&self.kernel) || self.pending.iter().any(|p| p.ptr_eq(predecessor)) {
            return;
        }
        self.pending.push(predecessor.clone());
    }
}

impl DeviceTask for CpuTask {
    fn enable_profiling(&mut self) {
        self.kernel.enable_profiling();
    }

    fn use_device(&mut self, device: &dyn Device) {
        self.domain = Some(device.memory_domain());
    }

    fn use_host(&mut self) {
        self.domain = Some(HOST_DOMAIN);
    }

    fn set_kernel(&mut self, kernel: Kernel) {
        assert!(self.body.is_none(), "CpuTask::set_kernel: body already set");
        self.body = Some(Body::Kernel(kernel));
    }

    fn set_host_fn(&mut self, f: HostFn) {
        assert!(self.body.is_none(), "CpuTask::set_host_fn: body already set");
        self.body = Some(Body::Host(f));
    }

    fn set_single(&mut self) {
        self.launch.range = [1, 1, 1, 1, 1, 1];
        self.launch.nd = false;
    }

    fn set_range(&mut self, range: [usize; 3]) {
        self.launch.range = [range[0], range[1], range[2], 1, 1, 1];
        self.launch.nd = false;
    }

    fn set_nd_range(&mut self, range: NdRange) {
        let NdRange { global, local } = range;
        self.launch.range = [global[0], global[1], global[2], local[0], local[1], local[2]];
        self.launch.nd = true;
    }

    fn set_local_mem_size(&mut self, bytes: usize) {
        self.launch.local_mem = bytes;
    }

    fn set_param(&mut self, bytes: &[u8]) {
        self.params.push_value(bytes);
    }

    fn set_buffer_param(&mut self, buffer: &dyn DeviceBuffer, domain: DomainId, offset_byte: usize) {
        let memory = CpuBuffer::downcast(buffer).memory(domain);
        self.params.push_buffer(memory, offset_byte);
    }

    fn stage(&mut self, buffer: &dyn DeviceBuffer, source: DomainId, target: DomainId) {
        let buffer = CpuBuffer::downcast(buffer);
        let src = buffer.memory(source);
        let dst = buffer.memory(target);
        trace!(src_domain = source, dst_domain = target, len = src.len(), "stage copy");
        self.commit_op(Box::new(move || {
            // SAFETY: distinct allocations of equal size; the graph orders this
            // copy after writers of `src` and before users of `dst`.
            unsafe {
                strided_copy(src.ptr(), dst.ptr(), CopyShape::Linear { len_byte: src.len() });
            }
        }));
    }

    fn copy(&mut self, src: BackendEndpoint<'_>, dst: BackendEndpoint<'_>, shape: CopyShape) {
        let (src, src_offset) = resolve_endpoint(src);
        let (dst, dst_offset) = resolve_endpoint(dst);
        assert!(
            in_bounds(src_offset, shape.src_span(), src.len()),
            "CpuTask::copy: source range out of bounds"
        );
        assert!(
            in_bounds(dst_offset, shape.dst_span(), dst.len()),
            "CpuTask::copy: destination range out of bounds"
        );
        self.set_core_op(Box::new(move || {
            // SAFETY: both spans were bounds-checked above; ordering is
            // established by the graph.
            unsafe {
                strided_copy(src.ptr().add(src_offset), dst.ptr().add(dst_offset), shape);
            }
        }));
    }

    fn fill(&mut self, buffer: &dyn DeviceBuffer, domain: DomainId, len_byte: usize) {
        let memory = CpuBuffer::downcast(buffer).memory(domain);
        assert!(
            len_byte <= memory.len(),
            "CpuTask::fill: {len_byte} bytes exceed a {}-byte buffer",
            memory.len()
        );
        self.set_core_op(Box::new(move || {
            // SAFETY: in bounds by the check above; ordering by the graph.
            unsafe { memory.ptr().write_bytes(0, len_byte) };
        }));
    }

    fn submit(mut self: Box<Self>) -> Event {
        let kernel = self.kernel.clone();
        self.wire_pending(&kernel);
        if let Some(work) = self.body_work() {
            kernel.set_work(self.in_flight.track(work));
        }
        self.submitted = true;
        trace!(domain = ?self.domain, "submit");
        kernel.finalize();
        Event::new(kernel)
    }
}

impl Drop for CpuTask {
    fn drop(&mut self) {
        if self.submitted {
            return;
        }
        warn!(domain = ?self.domain, "task dropped without submit; completing it as a no-op");
        let kernel = self.kernel.clone();
        self.wire_pending(&kernel);
        kernel.finalize();
    }
}

/// `offset + span <= len`, without wrapping.
fn in_bounds(offset: usize, span: Option<usize>, len: usize) -> bool {
    span.and_then(|span| offset.checked_add(span)).is_some_and(|end| end <= len)
}

fn resolve_endpoint(endpoint: BackendEndpoint<'_>) -> (Memory, usize) {
    match endpoint {
        BackendEndpoint::Buffer {
            buffer,
            domain,
            offset_byte,
        } => (CpuBuffer::downcast(buffer).memory(domain), offset_byte),
        BackendEndpoint::Host {
            memory,
            offset_byte,
        } => (memory.clone(), offset_byte),
    }
}
