#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

mod common;

use common::Gate;
use offload::{
    Event, Extent, HOST_DOMAIN, MemoryAccess,
    backend::KernelArgs,
    coherence::{Coherence, Dependent, MemoryState, Phase},
    node::DependencyNode,
};
use std::sync::Arc;

#[test]
fn device_write_then_host_read_copies_once() {
    let manager = common::manager(1);
    let device = manager.devices().remove(0);
    let domain = device.memory_domain();
    let buffer = manager.new_buffer(None, 1, Extent::d1(4));
    let mut copies = 0;

    let mut t1 = manager.new_task();
    t1.use_device(&device);
    let mut params = t1.begin_params();
    let res = params.set_buffer_param(&buffer, MemoryAccess::WriteOnly, 0);
    assert!(res.transfer);
    copies += usize::from(res.needs_copy());
    let snap = params.snapshot(&buffer);
    params.end_params();
    assert_eq!(snap.version, 2);
    assert_eq!(snap.owner, domain);
    assert_eq!(copies, 0);
    t1.set_kernel(common::write_kernel(&[1, 2, 3, 4]));
    let e1 = t1.submit();

    let mut t2 = manager.new_task();
    t2.use_host();
    let mut params = t2.begin_params();
    let res = params.set_buffer_param(&buffer, MemoryAccess::ReadOnly, 0);
    params.end_params();
    assert!(res.needs_copy());
    assert_eq!(res.authoritative(), domain);
    copies += usize::from(res.needs_copy());
    t2.set_kernel(common::noop_kernel());
    let e2 = t2.submit();
    e2.wait();
    assert!(e1.is_complete());

    assert_eq!(copies, 1);
    let snap = buffer.snapshot();
    assert_eq!(snap.version, 2);
    assert_eq!(snap.owner, domain);
    assert_eq!(snap.domain_version(HOST_DOMAIN), Some(2));
    assert_eq!(manager.read_buffer(&buffer), vec![1, 2, 3, 4]);
}

#[test]
fn repeated_reads_do_not_copy_again() {
    let manager = common::manager(1);
    let device = manager.devices().remove(0);
    let buffer = manager.new_buffer(Some(&[9; 8]), 4, Extent::d1(2));

    let mut needed = Vec::new();
    for _ in 0..3 {
        let mut task = manager.new_task();
        task.use_device(&device);
        let mut params = task.begin_params();
        needed.push(params.set_buffer_param(&buffer, MemoryAccess::ReadOnly, 0).needs_copy());
        params.end_params();
        task.set_kernel(common::noop_kernel());
        task.submit().wait();
    }
    assert_eq!(needed, vec![true, false, false]);
    let snap = buffer.snapshot();
    assert_eq!(snap.version, 1);
    assert_eq!(snap.owner, HOST_DOMAIN);
    assert_eq!(snap.domain_version(device.memory_domain()), Some(1));
}

#[test]
fn versions_advance_once_per_write() {
    let manager = common::manager(2);
    let devices = manager.devices();
    let buffer = manager.new_buffer(None, 4, Extent::d1(4));
    let accesses = [
        (Some(0), MemoryAccess::ReadOnly, 1),
        (Some(0), MemoryAccess::ReadWrite, 2),
        (None, MemoryAccess::ReadOnly, 2),
        (Some(1), MemoryAccess::WriteOnly, 3),
        (Some(1), MemoryAccess::ReadOnly, 3),
        (None, MemoryAccess::ReadWrite, 4),
        (Some(0), MemoryAccess::ReadOnly, 4),
    ];
    let mut last = None;
    for (device, access, expected) in accesses {
        let mut task = manager.new_task();
        match device {
            Some(i) => task.use_device(&devices[i]),
            None => task.use_host(),
        }
        let mut params = task.begin_params();
        params.set_buffer_param(&buffer, access, 0);
        let snap = params.snapshot(&buffer);
        params.end_params();
        assert_eq!(snap.version, expected, "{access} on {device:?}");
        let owner = task.target_domain().unwrap();
        if access.writes() {
            assert_eq!(snap.owner, owner);
        }
        task.set_kernel(common::noop_kernel());
        last = Some(task.submit());
    }
    last.unwrap().wait();
}

#[test]
fn readers_order_after_writer_but_not_each_other() {
    let manager = common::manager(1);
    let device = manager.devices().remove(0);
    let buffer = manager.new_buffer(None, 4, Extent::d1(1));
    let hold_writer = Gate::new();
    let hold_first_reader = Gate::new();

    let mut writer = manager.new_task();
    writer.use_device(&device);
    writer.depends_on(hold_writer.event());
    let mut params = writer.begin_params();
    params.set_buffer_param(&buffer, MemoryAccess::WriteOnly, 0);
    params.end_params();
    writer.set_kernel(common::write_kernel(&7u32.to_ne_bytes()));
    let writer = writer.submit();

    let mut readers = Vec::new();
    for hold in [Some(&hold_first_reader), None] {
        let mut task = manager.new_task();
        task.use_device(&device);
        if let Some(gate) = hold {
            task.depends_on(gate.event());
        }
        let mut params = task.begin_params();
        let res = params.set_buffer_param(&buffer, MemoryAccess::ReadOnly, 0);
        assert!(!res.transfer);
        params.end_params();
        task.set_kernel(common::noop_kernel());
        readers.push(task.submit());
    }

    assert!(!writer.is_complete());
    assert!(readers.iter().all(|r| !r.is_complete()));

    hold_writer.release();
    readers[1].wait();
    assert!(writer.is_complete());
    assert!(!readers[0].is_complete());

    hold_first_reader.release();
    readers[0].wait();
    assert_eq!(common::u32s(&manager.read_buffer(&buffer)), vec![7]);
}

#[test]
fn writer_waits_for_pending_reader() {
    let manager = common::manager(1);
    let device = manager.devices().remove(0);
    let buffer = manager.new_buffer(None, 4, Extent::d1(1));
    let hold_reader = Gate::new();

    let mut reader = manager.new_task();
    reader.use_host();
    reader.depends_on(hold_reader.event());
    let mut params = reader.begin_params();
    params.set_buffer_param(&buffer, MemoryAccess::ReadOnly, 0);
    params.end_params();
    reader.set_kernel(common::noop_kernel());
    let reader = reader.submit();

    let mut writer = manager.new_task();
    writer.use_host();
    let mut params = writer.begin_params();
    params.set_buffer_param(&buffer, MemoryAccess::ReadWrite, 0);
    params.end_params();
    writer.set_kernel(common::write_kernel(&1u32.to_ne_bytes()));
    let writer = writer.submit();

    // Write-only in another domain waits on nothing here; the next host read
    // still has to pick up its data.
    let mut overwrite = manager.new_task();
    overwrite.use_device(&device);
    let mut params = overwrite.begin_params();
    params.set_buffer_param(&buffer, MemoryAccess::WriteOnly, 0);
    params.end_params();
    overwrite.set_kernel(common::write_kernel(&2u32.to_ne_bytes()));
    let overwrite = overwrite.submit();

    assert!(!reader.is_complete());
    assert!(!writer.is_complete());

    hold_reader.release();
    writer.wait();
    overwrite.wait();
    assert!(reader.is_complete());
    assert_eq!(common::u32s(&manager.read_buffer(&buffer)), vec![2]);
}

#[test]
fn binding_one_buffer_twice_in_a_task() {
    let manager = common::manager(1);
    let device = manager.devices().remove(0);
    let buffer = manager.new_buffer(Some(&[3, 0, 0, 0]), 4, Extent::d1(1));

    let mut task = manager.new_task();
    task.use_device(&device);
    let mut params = task.begin_params();
    assert!(params.set_buffer_param(&buffer, MemoryAccess::ReadOnly, 0).needs_copy());
    assert!(!params.set_buffer_param(&buffer, MemoryAccess::ReadWrite, 0).transfer);
    params.end_params();
    task.set_kernel(common::write_kernel(&[4]));
    task.submit().wait();
    assert_eq!(manager.read_buffer(&buffer), vec![4, 0, 0, 0]);
}

#[test]
fn memory_state_phases_follow_accesses() {
    let mut state = MemoryState::new(1);
    let mut reader = DependencyNode::nop();
    let mut writer = DependencyNode::nop();

    state.prepare_read(&mut reader);
    assert_eq!(state.phase(), Phase::Reading);
    assert_eq!(state.readers().len(), 1);

    state.prepare_write(&mut writer, 2);
    assert_eq!(state.phase(), Phase::Writing);
    assert!(state.readers().is_empty());
    assert!(state.writer().is_some_and(|w| w.points_to(&writer)));
    assert_eq!(writer.pending_predecessors(), 2);

    let mut late_reader = DependencyNode::nop();
    state.prepare_read(&mut late_reader);
    assert_eq!(late_reader.pending_predecessors(), 2);
    assert!(state.writer().is_some_and(|w| w.points_to(&writer)));

    reader.finalize();
    writer.finalize();
    late_reader.finalize();
    assert!(late_reader.is_done());
}

#[test]
fn first_device_touch_is_a_transfer() {
    let mut coherence = Coherence::new();
    let mut task = DependencyNode::nop();
    assert_eq!(task.handle().upgrade().map(|n| n.ptr_eq(&task)), Some(true));
    let res = coherence.resolve_access(&mut task, 3, MemoryAccess::ReadWrite);
    assert!(res.transfer);
    assert!(res.needs_copy());
    assert_eq!(coherence.version(), 2);
    assert_eq!(coherence.owner(), 3);
    assert_eq!(coherence.state(3).map(MemoryState::version), Some(2));
    assert_eq!(coherence.state(HOST_DOMAIN).map(MemoryState::version), Some(1));
    task.finalize();
}

#[test]
fn concurrent_binders_serialize_on_the_buffer() {
    const THREADS: usize = 8;
    let manager = common::manager(2);
    let devices = manager.devices();
    let buffer = manager.new_buffer(Some(&common::bytes_of(&[0])), 4, Extent::d1(1));

    let events: Vec<Event> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let device = devices[i % devices.len()].clone();
                let (manager, buffer) = (&manager, &buffer);
                scope.spawn(move || {
                    let mut task = manager.new_task();
                    task.use_device(&device);
                    let mut params = task.begin_params();
                    params.set_buffer_param(buffer, MemoryAccess::ReadWrite, 0);
                    params.end_params();
                    task.set_kernel(Arc::new(|args: &KernelArgs<'_>| {
                        let data = unsafe { args.buffer_mut(0) };
                        let v = u32::from_ne_bytes((&*data).try_into().unwrap()) + 1;
                        data.copy_from_slice(&v.to_ne_bytes());
                    }));
                    task.submit()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(common::u32s(&manager.read_buffer(&buffer)), vec![THREADS as u32]);
    assert!(events.iter().all(Event::is_complete));
    assert_eq!(buffer.snapshot().version, THREADS as u64 + 1);
}
