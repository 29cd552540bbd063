use crate::memory::Memory;
use core::slice;

/// Maximum number of kernel arguments.
pub const MAX_ARGS: usize = 64;
/// Capacity of the by-value argument area, in bytes.
pub const ARG_BUF_SIZE: usize = 4096;
/// Alignment of every by-value argument.
pub const ARG_ALIGN: usize = 16;

#[repr(C, align(16))]
struct ArgBuf([u8; ARG_BUF_SIZE]);

#[derive(Debug, Clone)]
enum Arg {
    Value { offset: usize, len: usize },
    Buffer { memory: Memory, offset: usize },
}

/// Bounded scratch space holding the arguments of one kernel launch.
pub struct ParamStorage {
    buf: Box<ArgBuf>,
    used: usize,
    args: Vec<Arg>,
}

impl Default for ParamStorage {
    fn default() -> Self {
        Self {
            buf: Box::new(ArgBuf([0; ARG_BUF_SIZE])),
            used: 0,
            args: Vec::new(),
        }
    }
}

impl core::fmt::Debug for ParamStorage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParamStorage")
            .field("used", &self.used)
            .field("args", &self.args)
            .finish()
    }
}

impl ParamStorage {
    /// Append a by-value argument.
    pub fn push_value(&mut self, bytes: &[u8]) {
        self.reserve_slot();
        let offset = crate::utils::align_up(self.used, ARG_ALIGN);
        let end = offset + bytes.len();
        assert!(
            end <= ARG_BUF_SIZE,
            "ParamStorage::push_value: argument area exhausted ({end} > {ARG_BUF_SIZE} bytes)"
        );
        self.buf.0[offset..end].copy_from_slice(bytes);
        self.used = end;
        self.args.push(Arg::Value {
            offset,
            len: bytes.len(),
        });
    }

    /// Append a buffer argument starting `offset` bytes into `memory`.
    pub fn push_buffer(&mut self, memory: Memory, offset: usize) {
        self.reserve_slot();
        assert!(
            offset <= memory.len(),
            "ParamStorage::push_buffer: offset {offset} past the end of a {}-byte buffer",
            memory.len()
        );
        self.args.push(Arg::Buffer { memory, offset });
    }

    fn reserve_slot(&self) {
        assert!(
            self.args.len() < MAX_ARGS,
            "ParamStorage: more than {MAX_ARGS} arguments"
        );
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether no argument was pushed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Launch geometry: global extents in slots `0..3`, work-group extents in
/// slots `3..6` for nd-range launches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Launch {
    /// Launch extents.
    pub range: [usize; 6],
    /// Whether slots `3..6` hold work-group extents.
    pub nd: bool,
    /// Work-group local memory, in bytes.
    pub local_mem: usize,
}

impl Default for Launch {
    fn default() -> Self {
        Self {
            range: [1, 1, 1, 1, 1, 1],
            nd: false,
            local_mem: 0,
        }
    }
}

/// View of a launch's arguments handed to kernels and host functions.
#[derive(Debug, Copy, Clone)]
pub struct KernelArgs<'a> {
    launch: &'a Launch,
    params: &'a ParamStorage,
}

impl<'a> KernelArgs<'a> {
    pub(crate) fn new(launch: &'a Launch, params: &'a ParamStorage) -> Self {
        Self { launch, params }
    }

    /// Launch extents.
    #[must_use]
    pub fn range(&self) -> [usize; 6] {
        self.launch.range
    }

    /// Whether this is an nd-range launch.
    #[must_use]
    pub fn is_nd_range(&self) -> bool {
        self.launch.nd
    }

    /// Requested work-group local memory, in bytes.
    #[must_use]
    pub fn local_mem_size(&self) -> usize {
        self.launch.local_mem
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Bytes of by-value argument `index`. The slice is 16-byte aligned.
    ///
    /// # Panics
    /// If `index` is out of range or names a buffer argument.
    #[must_use]
    pub fn value(&self, index: usize) -> &'a [u8] {
        match &self.params.args[index] {
            &Arg::Value { offset, len } => &self.params.buf.0[offset..offset + len],
            Arg::Buffer { .. } => panic!("KernelArgs::value: argument {index} is a buffer"),
        }
    }

    /// Contents of buffer argument `index`, from its bound offset to the end.
    ///
    /// # Safety
    /// No operation may be writing the same memory concurrently. Operations
    /// ordered by the dependency graph satisfy this.
    ///
    /// # Panics
    /// If `index` is out of range or names a by-value argument.
    #[must_use]
    pub unsafe fn buffer(&self, index: usize) -> &'a [u8] {
        let (memory, offset) = self.buffer_arg(index);
        // SAFETY: in bounds by `push_buffer`; aliasing upheld by the caller.
        unsafe { slice::from_raw_parts(memory.ptr().add(offset), memory.len() - offset) }
    }

    /// Mutable contents of buffer argument `index`, from its bound offset to
    /// the end.
    ///
    /// # Safety
    /// No other operation may access the same memory concurrently and the
    /// caller must not hold two views of it at once.
    ///
    /// # Panics
    /// If `index` is out of range or names a by-value argument.
    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn buffer_mut(&self, index: usize) -> &'a mut [u8] {
        let (memory, offset) = self.buffer_arg(index);
        // SAFETY: in bounds by `push_buffer`; exclusivity upheld by the caller.
        unsafe { slice::from_raw_parts_mut(memory.ptr().add(offset), memory.len() - offset) }
    }

    fn buffer_arg(&self, index: usize) -> (&'a Memory, usize) {
        match &self.params.args[index] {
            Arg::Buffer { memory, offset } => (memory, *offset),
            Arg::Value { .. } => panic!("KernelArgs::buffer: argument {index} is a value"),
        }
    }
}
