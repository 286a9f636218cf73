//! The guest memory manager.

use tracing::debug;

use crate::builder::MemoryManagerBuilder;
use crate::error::Result;
use crate::host::Carveout;
use crate::memory::{ChunkDescriptor, ChunkMap, Region, RegionLayout};

/// Owner of a guest address space: its region layout, the host carveout
/// backing it, and the chunk map classifying every byte of the base region.
///
/// All methods take `&self`; the chunk map serializes writers and lets
/// readers run concurrently, so a manager can be shared across threads
/// behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use guestmem::{AddressSpaceWidth, ChunkDescriptor, MemoryManager, MemoryState, Permission};
///
/// let manager = MemoryManager::builder()
///     .width(AddressSpaceWidth::Bits36)
///     .base_address(0x800_0000)
///     .build()?;
///
/// let heap = manager.heap();
/// manager.insert_chunk(ChunkDescriptor::new(
///     heap.address,
///     0x10_0000,
///     MemoryState::Heap,
///     Permission::READ_WRITE,
/// ))?;
/// assert_eq!(manager.program_size(), 0x10_0000);
/// # Ok::<(), guestmem::Error>(())
/// ```
#[derive(Debug)]
pub struct MemoryManager {
    layout: RegionLayout,
    chunks: ChunkMap,
    /// Released after the chunk map is gone.
    carveout: Option<Carveout>,
}

impl MemoryManager {
    /// Create a new manager builder.
    pub fn builder() -> MemoryManagerBuilder {
        MemoryManagerBuilder::new()
    }

    pub(crate) fn new(layout: RegionLayout, carveout: Option<Carveout>) -> Result<Self> {
        let chunks = ChunkMap::new(layout.base)?;
        Ok(Self {
            layout,
            chunks,
            carveout,
        })
    }

    /// The full region layout.
    pub fn layout(&self) -> &RegionLayout {
        &self.layout
    }

    /// The whole guest address space, `[0, 2^width)`.
    pub fn address_space(&self) -> Region {
        self.layout.address_space
    }

    /// The span holding every sub-region and tracked by the chunk map.
    pub fn base(&self) -> Region {
        self.layout.base
    }

    pub fn code(&self) -> Region {
        self.layout.code
    }

    pub fn alias(&self) -> Region {
        self.layout.alias
    }

    pub fn heap(&self) -> Region {
        self.layout.heap
    }

    pub fn stack(&self) -> Region {
        self.layout.stack
    }

    pub fn tls_io(&self) -> Region {
        self.layout.tls_io
    }

    /// The host reservation, if the base region was discovered.
    pub fn carveout(&self) -> Option<&Carveout> {
        self.carveout.as_ref()
    }

    /// Operator-facing dump of the region layout.
    pub fn region_map(&self) -> String {
        self.layout.to_string()
    }

    /// Find the chunk containing `addr`.
    pub fn get(&self, addr: u64) -> Option<ChunkDescriptor> {
        self.chunks.get(addr)
    }

    /// Record a guest mapping, unmapping or reprotection.
    pub fn insert_chunk(&self, chunk: ChunkDescriptor) -> Result<()> {
        self.chunks.insert_chunk(chunk).inspect_err(|err| {
            debug!("rejected chunk {}: {}", chunk, err);
        })
    }

    /// Total bytes of guest memory currently mapped.
    pub fn program_size(&self) -> u64 {
        self.chunks.program_size()
    }

    /// Snapshot of every chunk, in address order.
    pub fn chunks(&self) -> Vec<ChunkDescriptor> {
        self.chunks.chunks()
    }
}
