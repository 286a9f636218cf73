//! Chunk descriptors: classified runs of guest memory.

use std::fmt;

use bitflags::bitflags;

use super::region::Region;

/// How a range of guest memory is currently used.
///
/// Mirrors the guest kernel's memory state enum; only [`MemoryState::Unmapped`]
/// counts as uncommitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryState {
    #[default]
    Unmapped = 0x00,
    Io = 0x01,
    Static = 0x02,
    Code = 0x03,
    CodeData = 0x04,
    Heap = 0x05,
    SharedMemory = 0x06,
    Alias = 0x07,
    AliasCode = 0x08,
    AliasCodeData = 0x09,
    Ipc = 0x0A,
    Stack = 0x0B,
    ThreadLocal = 0x0C,
    TransferMemoryIsolated = 0x0D,
    TransferMemory = 0x0E,
    ProcessMemory = 0x0F,
    Reserved = 0x10,
    NonSecureIpc = 0x11,
    NonDeviceIpc = 0x12,
    KernelStack = 0x13,
    CodeReadOnly = 0x14,
    CodeWritable = 0x15,
}

impl MemoryState {
    /// Whether memory in this state is committed to the guest.
    pub fn is_mapped(self) -> bool {
        self != MemoryState::Unmapped
    }
}

impl fmt::Display for MemoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Guest access permissions for a chunk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permission: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;

        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.contains(Self::READ) { 'R' } else { '-' };
        let w = if self.contains(Self::WRITE) { 'W' } else { '-' };
        let x = if self.contains(Self::EXECUTE) { 'X' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

bitflags! {
    /// Extra attributes the guest kernel tracks per chunk.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemoryAttribute: u8 {
        const BORROWED = 1 << 0;
        const IPC_LOCKED = 1 << 1;
        const DEVICE_SHARED = 1 << 2;
        const UNCACHED = 1 << 3;
    }
}

/// A contiguous run of guest memory sharing one classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkDescriptor {
    /// Guest address of the first byte
    pub ptr: u64,
    /// Size in bytes
    pub size: u64,
    pub state: MemoryState,
    pub permission: Permission,
    pub attributes: MemoryAttribute,
}

impl ChunkDescriptor {
    /// Create a chunk with no attributes set.
    pub fn new(ptr: u64, size: u64, state: MemoryState, permission: Permission) -> Self {
        Self {
            ptr,
            size,
            state,
            permission,
            attributes: MemoryAttribute::empty(),
        }
    }

    /// Create an unmapped, inaccessible chunk covering `region`.
    pub fn unmapped(region: Region) -> Self {
        Self::new(
            region.address,
            region.size,
            MemoryState::Unmapped,
            Permission::empty(),
        )
    }

    /// Builder-style setter for the attribute set.
    pub fn with_attributes(mut self, attributes: MemoryAttribute) -> Self {
        self.attributes = attributes;
        self
    }

    /// One past the last address of the chunk.
    pub fn end(&self) -> u64 {
        self.ptr.saturating_add(self.size)
    }

    /// Check if an address falls within this chunk.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.ptr && addr < self.end()
    }

    /// The address range covered by this chunk.
    pub fn region(&self) -> Region {
        Region::new(self.ptr, self.size)
    }

    /// Two chunks may be merged iff they carry the same classification.
    pub fn is_compatible(&self, other: &ChunkDescriptor) -> bool {
        self.state == other.state
            && self.permission == other.permission
            && self.attributes == other.attributes
    }

    /// Copy `other`'s classification onto this chunk, keeping the range.
    pub(crate) fn retag_from(&mut self, other: &ChunkDescriptor) {
        self.state = other.state;
        self.permission = other.permission;
        self.attributes = other.attributes;
    }
}

impl fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:X} - 0x{:X} {} {}",
            self.ptr,
            self.end(),
            self.state,
            self.permission
        )?;
        if !self.attributes.is_empty() {
            write!(f, " {:?}", self.attributes)?;
        }
        Ok(())
    }
}
