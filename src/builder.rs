//! Builder for configuring and creating memory managers.

use tracing::info;

use crate::error::{Error, Result};
use crate::host::{self, HostReserver, MappingTable, ProcSelfMaps, Reserver};
use crate::manager::MemoryManager;
use crate::memory::layout::DEFAULT_BASE_ADDRESS;
use crate::memory::{code_extent, AddressSpaceWidth, RegionLayout, RegionSizes};

/// Where the executable sits inside the code region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodePlacement {
    /// Loaded at a known guest address.
    Absolute { start: u64, size: u64 },
    /// Loaded at the start of the code region, wherever that ends up.
    RegionStart { size: u64 },
}

/// Builder for creating a [`MemoryManager`].
///
/// Without [`base_address`](Self::base_address), the base is discovered by
/// scanning the host mapping table and reserved before the layout is
/// computed.
///
/// # Example
///
/// ```rust,no_run
/// use guestmem::{AddressSpaceWidth, MemoryManager};
///
/// let manager = MemoryManager::builder()
///     .width(AddressSpaceWidth::Bits39)
///     .code_size(0x40_0000)
///     .build()?;
/// println!("{}", manager.region_map());
/// # Ok::<(), guestmem::Error>(())
/// ```
#[derive(Default)]
pub struct MemoryManagerBuilder {
    width: Option<AddressSpaceWidth>,
    code: Option<CodePlacement>,
    base_address: Option<u64>,
    search_floor: Option<u64>,
    mapping_table: Option<Box<dyn MappingTable>>,
    reserver: Option<Box<dyn Reserver>>,
}

impl MemoryManagerBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the guest address space width.
    ///
    /// Default: 39-bit
    pub fn width(mut self, width: AddressSpaceWidth) -> Self {
        self.width = Some(width);
        self
    }

    /// Set the guest address and size of the loaded executable.
    pub fn code(mut self, start: u64, size: u64) -> Self {
        self.code = Some(CodePlacement::Absolute { start, size });
        self
    }

    /// Set the size of an executable loaded at the start of the code region.
    ///
    /// Default: 0
    pub fn code_size(mut self, size: u64) -> Self {
        self.code = Some(CodePlacement::RegionStart { size });
        self
    }

    /// Place the base region at a fixed guest address instead of
    /// discovering one. No host memory is reserved in this mode.
    pub fn base_address(mut self, address: u64) -> Self {
        self.base_address = Some(address);
        self
    }

    /// Lowest host address the carveout search may return.
    ///
    /// Default: 0x8000000
    pub fn search_floor(mut self, address: u64) -> Self {
        self.search_floor = Some(address);
        self
    }

    /// Replace the host mapping table and the reservation mechanism used
    /// for discovery.
    ///
    /// Default: `/proc/self/maps` and an inaccessible anonymous mapping
    pub fn discover_with(
        mut self,
        table: impl MappingTable + 'static,
        reserver: impl Reserver + 'static,
    ) -> Self {
        self.mapping_table = Some(Box::new(table));
        self.reserver = Some(Box::new(reserver));
        self
    }

    /// Build the memory manager.
    ///
    /// Validates the configuration, reserves host memory if the base is
    /// discovered, and lays out the regions. On error nothing stays
    /// reserved.
    pub fn build(self) -> Result<MemoryManager> {
        let width = self.width.unwrap_or_default();
        let sizes = RegionSizes::for_width(width)?;
        let code = self.code.unwrap_or(CodePlacement::RegionStart { size: 0 });

        let (base_address, carveout) = match self.base_address {
            Some(address) => (address, None),
            None => {
                let required = required_size(&sizes, code)?;
                let table = self.mapping_table.unwrap_or_else(|| Box::new(ProcSelfMaps));
                let reserver = self.reserver.unwrap_or_else(|| Box::new(HostReserver));
                let carveout = host::reserve_carveout(
                    table.as_ref(),
                    reserver.as_ref(),
                    required,
                    width.address_space_size(),
                    self.search_floor.unwrap_or(DEFAULT_BASE_ADDRESS),
                )?;
                if carveout.size() < required {
                    return Err(Error::ReservationFailed {
                        address: carveout.address(),
                        size: required,
                        reason: format!("reserver returned only 0x{:X} bytes", carveout.size()),
                    });
                }
                (carveout.address(), Some(carveout))
            }
        };

        let (code_start, code_size) = match code {
            CodePlacement::Absolute { start, size } => (start, size),
            CodePlacement::RegionStart { size } => (base_address, size),
        };

        // A failed layout drops the carveout, releasing the reservation.
        let layout = RegionLayout::new(width, base_address, code_start, code_size)?;
        info!("guest address space {} laid out at {}", width, layout.base);

        MemoryManager::new(layout, carveout)
    }
}

/// Bytes of host address space a discovered base must provide.
fn required_size(sizes: &RegionSizes, code: CodePlacement) -> Result<u64> {
    let (start, size) = match code {
        CodePlacement::Absolute { start, size } => (start, size),
        CodePlacement::RegionStart { size } => (0, size),
    };
    code_extent(start, size)
        .and_then(|extent| sizes.base_size(extent.size))
        .ok_or(Error::AddressOverflow {
            address: start,
            size,
        })
}
