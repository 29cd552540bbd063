//! Per-buffer, per-domain version tracking.
//!
//! Every buffer carries a global version counter and the id of the domain
//! holding the data at that version (the owner). Every domain the buffer was
//! touched in carries its own [`MemoryState`]: the version resident there, the
//! last writer, and the readers since that write. Binding a buffer to a task
//! resolves the access against this record, wiring the task after whatever it
//! must wait for and deciding whether the bytes have to be migrated first.

use crate::{
    node::{DependencyNode, NodeRef},
    types::{DomainId, HOST_DOMAIN, IndexMap, MemoryAccess},
};
use tracing::debug;

/// Version of the host copy of a newly created buffer.
pub const HOST_INIT_VERSION: u64 = 1;
/// Version of a domain that never held the data.
pub const DEVICE_INIT_VERSION: u64 = 0;

/// Anything that can be ordered after a dependency node.
pub trait Dependent {
    /// Node standing for this dependant in memory states.
    fn handle(&self) -> NodeRef;

    /// Make this dependant run after `predecessor`.
    ///
    /// Dead or self references are ignored.
    fn depends_on(&mut self, predecessor: &NodeRef);
}

impl Dependent for DependencyNode {
    fn handle(&self) -> NodeRef {
        self.downgrade()
    }

    fn depends_on(&mut self, predecessor: &NodeRef) {
        if predecessor.points_to(self) {
            return;
        }
        if let Some(predecessor) = predecessor.upgrade() {
            self.runs_after(&predecessor);
        }
    }
}

/// Whether a domain's record was last touched by readers or by a writer.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Readers may be present; the writer is kept as the last writer.
    #[default]
    Reading,
    /// The writer is the current writer; no readers.
    Writing,
}

/// Access bookkeeping for one buffer in one domain.
#[derive(Debug, Clone)]
pub struct MemoryState {
    version: u64,
    writer: Option<NodeRef>,
    readers: Vec<NodeRef>,
    phase: Phase,
}

impl MemoryState {
    /// Record for a domain holding `version`.
    #[must_use]
    pub fn new(version: u64) -> Self {
        Self {
            version,
            writer: None,
            readers: Vec::new(),
            phase: Phase::Reading,
        }
    }

    /// Version resident in this domain.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Last writer, if any.
    #[must_use]
    pub fn writer(&self) -> Option<&NodeRef> {
        self.writer.as_ref()
    }

    /// Readers since the last write.
    #[must_use]
    pub fn readers(&self) -> &[NodeRef] {
        &self.readers
    }

    /// Order `task` after the last writer and register it as a reader.
    pub fn prepare_read<D: Dependent + ?Sized>(&mut self, task: &mut D) {
        let handle = task.handle();
        if let Some(writer) = &self.writer {
            task.depends_on(writer);
        }
        self.readers.retain(|reader| reader.upgrade().is_some());
        if !self.readers.iter().any(|reader| reader.ptr_eq(&handle)) {
            self.readers.push(handle);
        }
        self.phase = Phase::Reading;
    }

    /// Order `task` after the last writer and every reader, then make it the
    /// writer of `new_version`.
    pub fn prepare_write<D: Dependent + ?Sized>(&mut self, task: &mut D, new_version: u64) {
        if let Some(writer) = &self.writer {
            task.depends_on(writer);
        }
        for reader in self.readers.drain(..) {
            task.depends_on(&reader);
        }
        self.writer = Some(task.handle());
        self.version = new_version;
        self.phase = Phase::Writing;
    }

    /// Same ordering as [`prepare_write`](Self::prepare_write).
    pub fn prepare_read_write<D: Dependent + ?Sized>(&mut self, task: &mut D, new_version: u64) {
        self.prepare_write(task, new_version);
    }
}

/// Outcome of [`Coherence::resolve_access`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Access that was resolved.
    pub access: MemoryAccess,
    /// Domain holding the authoritative data before the operation.
    pub source: DomainId,
    /// Domain the operation runs in.
    pub target: DomainId,
    /// Whether the target was stale.
    pub transfer: bool,
}

impl Resolution {
    /// Domain the operation must read its input from.
    #[must_use]
    pub fn authoritative(&self) -> DomainId {
        self.source
    }

    /// Whether bytes must be copied from `source` to `target` before the
    /// operation runs.
    #[must_use]
    pub fn needs_copy(&self) -> bool {
        self.transfer && self.access.reads()
    }
}

/// Coherence record of one buffer.
#[derive(Debug, Clone)]
pub struct Coherence {
    version: u64,
    owner: DomainId,
    states: IndexMap<DomainId, MemoryState>,
}

impl Default for Coherence {
    fn default() -> Self {
        Self::new()
    }
}

impl Coherence {
    /// Record of a buffer whose data lives on the host.
    #[must_use]
    pub fn new() -> Self {
        let mut states = IndexMap::default();
        states.insert(HOST_DOMAIN, MemoryState::new(HOST_INIT_VERSION));
        Self {
            version: HOST_INIT_VERSION,
            owner: HOST_DOMAIN,
            states,
        }
    }

    /// Global version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Domain holding the data at the global version.
    #[must_use]
    pub fn owner(&self) -> DomainId {
        self.owner
    }

    /// Record of `domain`, if it was ever touched.
    #[must_use]
    pub fn state(&self, domain: DomainId) -> Option<&MemoryState> {
        self.states.get(&domain)
    }

    /// Resolve `access` by `task` in domain `target`.
    ///
    /// Orders `task` after every operation it conflicts with, advances the
    /// versions and returns whether the data must be migrated first.
    pub fn resolve_access<D: Dependent + ?Sized>(
        &mut self,
        task: &mut D,
        target: DomainId,
        access: MemoryAccess,
    ) -> Resolution {
        let local = self.state_mut(target).version == self.version;
        let resolution = if local {
            let version = self.version;
            let state = self.state_mut(target);
            match access {
                MemoryAccess::ReadOnly => state.prepare_read(task),
                MemoryAccess::WriteOnly => state.prepare_write(task, version + 1),
                MemoryAccess::ReadWrite => state.prepare_read_write(task, version + 1),
            }
            if access.writes() {
                self.version = version + 1;
                self.owner = target;
            }
            Resolution {
                access,
                source: target,
                target,
                transfer: false,
            }
        } else {
            let source = self.owner;
            match access {
                MemoryAccess::ReadOnly => {
                    let version = self.version;
                    self.state_mut(source).prepare_read(task);
                    self.state_mut(target).prepare_write(task, version);
                }
                MemoryAccess::WriteOnly => {
                    self.version += 1;
                    let version = self.version;
                    self.state_mut(target).prepare_write(task, version);
                    self.owner = target;
                }
                MemoryAccess::ReadWrite => {
                    self.version += 1;
                    let version = self.version;
                    self.state_mut(source).prepare_read(task);
                    self.state_mut(target).prepare_read_write(task, version);
                    self.owner = target;
                }
            }
            Resolution {
                access,
                source,
                target,
                transfer: true,
            }
        };
        debug!(
            "buffer {}-{} src={} dst={} version={} owner={}",
            if resolution.transfer { "T" } else { "L" },
            access,
            resolution.source,
            target,
            self.version,
            self.owner,
        );
        debug_assert_eq!(
            self.states[&self.owner].version, self.version,
            "Coherence::resolve_access: [1]"
        );
        resolution
    }

    fn state_mut(&mut self, domain: DomainId) -> &mut MemoryState {
        self.states
            .entry(domain)
            .or_insert_with(|| MemoryState::new(DEVICE_INIT_VERSION))
    }

    /// Versions at this instant.
    #[must_use]
    pub fn snapshot(&self) -> CoherenceSnapshot {
        CoherenceSnapshot {
            version: self.version,
            owner: self.owner,
            domains: self
                .states
                .iter()
                .map(|(&domain, state)| (domain, state.version))
                .collect(),
        }
    }
}

/// Copy of a buffer's versions, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoherenceSnapshot {
    /// Global version.
    pub version: u64,
    /// Owning domain.
    pub owner: DomainId,
    /// Per-domain resident versions, in first-touch order.
    pub domains: Vec<(DomainId, u64)>,
}

impl CoherenceSnapshot {
    /// Version resident in `domain`, if the domain was ever touched.
    #[must_use]
    pub fn domain_version(&self, domain: DomainId) -> Option<u64> {
        self.domains
            .iter()
            .find_map(|&(d, version)| (d == domain).then_some(version))
    }
}
