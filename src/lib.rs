//! Execution core of a heterogeneous offload runtime.
//!
//! Callers describe operations (kernel launches, copies, fills, host
//! functions) in any order; this crate turns them into a dependency graph that
//! runs on a shared worker pool. It:
//! - Tracks, per buffer and per memory domain, which version of the data is
//!   resident, and migrates data between host and device domains only when a
//!   domain is stale.
//! - Orders every operation after the operations it conflicts with on the
//!   same memory: writers after readers and writers, readers after the last
//!   writer. Independent operations run concurrently.
//! - Exposes completion through events that can be waited on, combined into
//!   barriers and, optionally, profiled.
//!
//! Key modules:
//! - `node`: the dependency-counted graph node.
//! - `event`: completion handles and barriers over nodes.
//! - `coherence`: per-domain version tracking and access resolution.
//! - `dep`: the `DependencyManager`, `Buffer` and `Task` façade with its
//!   binding session.
//! - `backend`: the contract device runtimes implement, plus the CPU backend.
//! - `config`: runtime settings read from the environment.
//!
//! Quick start:
//! 1. Create a `DependencyManager` (`from_env` or `from_config`).
//! 2. Create buffers with `new_buffer`, tasks with `new_task`.
//! 3. Select a target with `Task::use_device`/`use_host`, bind parameters in
//!    the session returned by `begin_params`, set a body, then `submit`.
//! 4. Wait on the returned `Event`, or read results back with `read_buffer`.
//!
//! Binding is serialized process-wide so that the coherence records of all
//! buffers evolve in one consistent order; running the graph is not.

/// Contract between the execution core and device runtimes.
///
/// Defines the `Subsystem`, `Platform`, `Device`, `DeviceBuffer` and
/// `DeviceTask` traits, parameter storage, launch geometry and copy shapes,
/// and ships the CPU backend.
pub mod backend;
/// Per-domain version tracking.
///
/// `MemoryState` records readers and the last writer of one buffer in one
/// domain; `Coherence::resolve_access` decides ordering and migrations.
pub mod coherence;
/// Runtime settings and configuration errors.
pub mod config;
/// Buffers, tasks and their manager.
pub mod dep;
/// Completion handles.
pub mod event;
/// The shared worker pool running ready nodes.
pub mod executor;
/// Reference-counted byte regions.
pub mod memory;
/// The dependency-counted graph node.
///
/// A node runs once every predecessor completed and its creator finalized it,
/// then wakes its successors.
pub mod node;
mod sync;
/// Common types: domain ids, access modes, extents.
pub mod types;
mod utils;

pub use crate::{
    coherence::{CoherenceSnapshot, Resolution},
    config::{BackendKind, ConfigError, RuntimeConfig},
    dep::{BindingSession, Buffer, DependencyManager, Endpoint, Task},
    event::{Event, EventBarrier},
    memory::Memory,
    node::DependencyNode,
    types::{DomainId, Extent, HOST_DOMAIN, MemoryAccess, NdRange},
};
