//! Guest address space layout.
//!
//! The base region is split into five sub-regions. Every size is fixed per
//! address space width except the 39-bit code region, which is the loaded
//! executable rounded out to [`REGION_ALIGNMENT`]:
//!
//! ```text
//! 36-bit: | code (fixed, at base) | alias | stack | heap | tls/io (empty) |
//! 39-bit: | code (fits the image) | alias | heap | stack | tls/io |
//! ```

use std::fmt;

use tracing::debug;

use super::region::{align_down, align_up, is_aligned, Region};
use crate::error::{Error, Result};

/// Granularity the base region and every sub-region boundary is aligned to.
pub const REGION_ALIGNMENT: u64 = 0x20_0000;

/// Lowest guest address handed out to the guest by default.
pub const DEFAULT_BASE_ADDRESS: u64 = 0x800_0000;

/// Width of the guest's virtual address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AddressSpaceWidth {
    /// Legacy 32-bit processes; rejected at initialization.
    Bits32,
    Bits36,
    #[default]
    Bits39,
}

impl AddressSpaceWidth {
    /// Number of address bits.
    pub fn bits(self) -> u32 {
        match self {
            AddressSpaceWidth::Bits32 => 32,
            AddressSpaceWidth::Bits36 => 36,
            AddressSpaceWidth::Bits39 => 39,
        }
    }

    /// Size in bytes of the whole address space, which is also the ceiling
    /// no guest region may cross.
    pub fn address_space_size(self) -> u64 {
        1u64 << self.bits()
    }
}

impl fmt::Display for AddressSpaceWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Sub-region sizes for one address space width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSizes {
    /// Capacity of a code region pinned to the start of `base`, or `None`
    /// when the code region is sized to the loaded executable.
    pub code: Option<u64>,
    pub alias: u64,
    pub heap: u64,
    pub stack: u64,
    pub tls_io: u64,
}

impl RegionSizes {
    const BITS_36: RegionSizes = RegionSizes {
        code: Some(0x7800_0000),
        alias: 0x1_8000_0000,
        heap: 0x1_8000_0000,
        stack: 0x7800_0000,
        tls_io: 0,
    };

    const BITS_39: RegionSizes = RegionSizes {
        code: None,
        alias: 0x10_0000_0000,
        heap: 0x1_8000_0000,
        stack: 0x8000_0000,
        tls_io: 0x10_0000_0000,
    };

    /// Look up the sizes for `width`.
    pub fn for_width(width: AddressSpaceWidth) -> Result<Self> {
        match width {
            AddressSpaceWidth::Bits32 => Err(Error::UnsupportedAddressSpace(width)),
            AddressSpaceWidth::Bits36 => Ok(Self::BITS_36),
            AddressSpaceWidth::Bits39 => Ok(Self::BITS_39),
        }
    }

    /// Size of the base region for an executable of `code_size` bytes loaded
    /// at an aligned address.
    ///
    /// Returns `None` if the size does not fit in a `u64`.
    pub fn base_size(&self, code_size: u64) -> Option<u64> {
        let code = match self.code {
            Some(capacity) => capacity,
            None => align_up(code_size, REGION_ALIGNMENT)?,
        };
        [self.alias, self.heap, self.stack, self.tls_io]
            .into_iter()
            .try_fold(code, u64::checked_add)
    }
}

/// The smallest aligned region holding `[start, start + size)`.
///
/// Returns `None` if the range or its rounded end overflows.
pub fn code_extent(start: u64, size: u64) -> Option<Region> {
    let address = align_down(start, REGION_ALIGNMENT);
    let end = align_up(start.checked_add(size)?, REGION_ALIGNMENT)?;
    Some(Region::new(address, end - address))
}

// Place a region of `size` bytes directly after `prev`.
fn after(prev: Region, size: u64) -> Result<Region> {
    Region::try_new(prev.end(), size)
}

/// The named regions of a guest address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    pub width: AddressSpaceWidth,
    /// `[0, 2^width)`
    pub address_space: Region,
    /// The span holding every sub-region below.
    pub base: Region,
    pub code: Region,
    pub alias: Region,
    pub heap: Region,
    pub stack: Region,
    pub tls_io: Region,
}

impl RegionLayout {
    /// Lay out the address space for `width` starting at `base_address`.
    ///
    /// `[code_start, code_start + code_size)` is the loaded executable. The
    /// 36-bit code region is fixed and must hold it; the 39-bit one is sized
    /// to it. Nothing is produced unless every check passes.
    pub fn new(
        width: AddressSpaceWidth,
        base_address: u64,
        code_start: u64,
        code_size: u64,
    ) -> Result<Self> {
        let sizes = RegionSizes::for_width(width)?;

        if !is_aligned(base_address, REGION_ALIGNMENT) {
            return Err(Error::MisalignedBase(base_address));
        }

        let ceiling = width.address_space_size();
        let too_small = |region: Region| Error::CodeRegionTooSmall {
            code_start,
            code_size,
            region,
        };

        let (code, alias, heap, stack, tls_io) = match sizes.code {
            Some(capacity) => {
                let code = Region::try_new(base_address, capacity)?;
                let code_fits = code_start >= code.address
                    && code_start
                        .checked_add(code_size)
                        .is_some_and(|code_end| code_end <= code.end());
                if !code_fits {
                    return Err(too_small(code));
                }

                let alias = after(code, sizes.alias)?;
                let stack = after(alias, sizes.stack)?;
                let heap = after(stack, sizes.heap)?;
                (code, alias, heap, stack, after(heap, sizes.tls_io)?)
            }
            None => {
                let code = code_extent(code_start, code_size).ok_or(Error::AddressOverflow {
                    address: code_start,
                    size: code_size,
                })?;
                if code.address < base_address {
                    return Err(too_small(code));
                }

                let alias = after(code, sizes.alias)?;
                let heap = after(alias, sizes.heap)?;
                let stack = after(heap, sizes.stack)?;
                (code, alias, heap, stack, after(stack, sizes.tls_io)?)
            }
        };

        let base = Region::new(base_address, tls_io.end() - base_address);
        if base.end() > ceiling {
            return Err(Error::LayoutOutOfBounds { base, ceiling });
        }

        let layout = Self {
            width,
            address_space: Region::new(0, ceiling),
            base,
            code,
            alias,
            heap,
            stack,
            tls_io,
        };
        debug!("{}", layout);

        Ok(layout)
    }

    /// The five sub-regions with their names, in address order.
    pub fn sub_regions(&self) -> [(&'static str, Region); 5] {
        let mut regions = [
            ("Code", self.code),
            ("Alias", self.alias),
            ("Heap", self.heap),
            ("Stack", self.stack),
            ("TLS/IO", self.tls_io),
        ];
        regions.sort_by_key(|(_, region)| region.address);
        regions
    }
}

impl fmt::Display for RegionLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Region Map ({}):", self.width)?;
        writeln!(f, "Base Region: {}", self.base)?;
        for (name, region) in [
            ("Code", self.code),
            ("Alias", self.alias),
            ("Heap", self.heap),
            ("Stack", self.stack),
        ] {
            writeln!(f, "{} Region: {}", name, region)?;
        }
        write!(f, "TLS/IO Region: {}", self.tls_io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_disjoint_and_contained(layout: &RegionLayout) {
        let regions = layout.sub_regions();
        for (name, region) in &regions {
            assert!(
                layout.base.contains_region(region),
                "{name} {region} escapes base {}",
                layout.base
            );
        }
        for (i, (a_name, a)) in regions.iter().enumerate() {
            for (b_name, b) in &regions[i + 1..] {
                assert!(!a.overlaps(b), "{a_name} {a} overlaps {b_name} {b}");
            }
        }
    }

    #[test]
    fn test_32_bit_rejected() {
        let result = RegionLayout::new(AddressSpaceWidth::Bits32, DEFAULT_BASE_ADDRESS, 0, 0);
        assert!(matches!(
            result,
            Err(Error::UnsupportedAddressSpace(AddressSpaceWidth::Bits32))
        ));
    }

    #[test]
    fn test_36_bit_layout() {
        let base = DEFAULT_BASE_ADDRESS;
        let layout =
            RegionLayout::new(AddressSpaceWidth::Bits36, base, base + 0x1000, 0x10000).unwrap();

        assert_eq!(layout.address_space, Region::new(0, 1 << 36));
        assert_eq!(layout.code, Region::new(base, 0x7800_0000));
        assert_eq!(layout.alias, Region::new(base + 0x7800_0000, 0x1_8000_0000));
        assert_eq!(layout.stack.address, layout.alias.end());
        assert_eq!(layout.stack.size, 0x7800_0000);
        assert_eq!(layout.heap.address, layout.stack.end());
        assert_eq!(layout.heap.size, 0x1_8000_0000);
        assert!(layout.tls_io.is_empty());
        assert_eq!(layout.base.end(), layout.heap.end());
        assert_disjoint_and_contained(&layout);
    }

    #[test]
    fn test_39_bit_layout() {
        let base = 0x10_0000_0000;
        let layout = RegionLayout::new(AddressSpaceWidth::Bits39, base, base, 0x7800_0000).unwrap();

        assert_eq!(layout.address_space.size, 1 << 39);
        assert_eq!(layout.alias, Region::new(base + 0x7800_0000, 0x10_0000_0000));
        assert_eq!(layout.heap.address, layout.alias.end());
        assert_eq!(layout.stack.address, layout.heap.end());
        assert_eq!(layout.stack.size, 0x8000_0000);
        assert_eq!(layout.tls_io.address, layout.stack.end());
        assert_eq!(layout.tls_io.end(), layout.base.end());
        assert_eq!(
            Some(layout.base.size),
            RegionSizes::BITS_39.base_size(0x7800_0000)
        );
        assert_disjoint_and_contained(&layout);
    }

    #[test]
    fn test_39_bit_code_fits_small_image() {
        let base = DEFAULT_BASE_ADDRESS;
        let layout = RegionLayout::new(AddressSpaceWidth::Bits39, base, base, 0x40_0000).unwrap();

        assert_eq!(layout.code, Region::new(base, 0x40_0000));
        assert_eq!(layout.alias.address, base + 0x40_0000);
        assert_eq!(layout.heap.address, layout.alias.end());
        assert_eq!(layout.stack.address, layout.heap.end());
        assert_eq!(layout.tls_io.address, layout.stack.end());
        assert_eq!(layout.base.end(), layout.tls_io.end());
        assert_disjoint_and_contained(&layout);
    }

    #[test]
    fn test_39_bit_code_rounded_to_alignment() {
        let base = DEFAULT_BASE_ADDRESS;
        let layout =
            RegionLayout::new(AddressSpaceWidth::Bits39, base, base + 0x30_1000, 0x1000).unwrap();

        assert_eq!(layout.code, Region::new(base + REGION_ALIGNMENT, REGION_ALIGNMENT));
        assert_eq!(layout.alias.address, base + 2 * REGION_ALIGNMENT);
        assert_eq!(layout.base.address, base);
        assert_disjoint_and_contained(&layout);
    }

    #[test]
    fn test_39_bit_code_larger_than_36_bit_capacity() {
        let base = DEFAULT_BASE_ADDRESS;
        let layout =
            RegionLayout::new(AddressSpaceWidth::Bits39, base, base, 0x8000_0000).unwrap();

        assert_eq!(layout.code, Region::new(base, 0x8000_0000));
        assert_eq!(layout.alias, Region::new(base + 0x8000_0000, 0x10_0000_0000));
        assert_disjoint_and_contained(&layout);
    }

    #[test]
    fn test_code_extent() {
        assert_eq!(code_extent(0x20_0000, 0), Some(Region::new(0x20_0000, 0)));
        assert_eq!(
            code_extent(0x21_0000, 0x20_0000),
            Some(Region::new(0x20_0000, 0x40_0000))
        );
        assert_eq!(code_extent(u64::MAX - 0x1000, 0x800), None);
        assert_eq!(code_extent(u64::MAX, 1), None);
    }

    #[test]
    fn test_base_size() {
        assert_eq!(RegionSizes::BITS_36.base_size(0x1234), Some(0x3_F000_0000));
        assert_eq!(
            RegionSizes::BITS_39.base_size(0x1000),
            Some(REGION_ALIGNMENT + 0x10_0000_0000 + 0x1_8000_0000 + 0x8000_0000 + 0x10_0000_0000)
        );
        assert_eq!(RegionSizes::BITS_39.base_size(u64::MAX), None);
    }

    #[test]
    fn test_boundaries_are_aligned() {
        for width in [AddressSpaceWidth::Bits36, AddressSpaceWidth::Bits39] {
            let layout = RegionLayout::new(width, DEFAULT_BASE_ADDRESS, DEFAULT_BASE_ADDRESS, 0)
                .unwrap();
            for (name, region) in layout.sub_regions() {
                assert!(is_aligned(region.address, REGION_ALIGNMENT), "{name}");
                assert!(is_aligned(region.size, REGION_ALIGNMENT), "{name}");
            }
        }
    }

    #[test]
    fn test_code_too_large() {
        let base = DEFAULT_BASE_ADDRESS;
        let result =
            RegionLayout::new(AddressSpaceWidth::Bits36, base, base + 0x1000, 0x7800_0000);
        assert!(matches!(result, Err(Error::CodeRegionTooSmall { .. })));
    }

    #[test]
    fn test_code_before_region() {
        let base = DEFAULT_BASE_ADDRESS;
        let result = RegionLayout::new(AddressSpaceWidth::Bits39, base, base - 0x1000, 0x1000);
        assert!(matches!(result, Err(Error::CodeRegionTooSmall { .. })));
    }

    #[test]
    fn test_code_range_overflow() {
        let base = DEFAULT_BASE_ADDRESS;
        let result = RegionLayout::new(AddressSpaceWidth::Bits36, base, base, u64::MAX);
        assert!(matches!(result, Err(Error::CodeRegionTooSmall { .. })));

        let result = RegionLayout::new(AddressSpaceWidth::Bits39, base, base, u64::MAX);
        assert!(matches!(result, Err(Error::AddressOverflow { .. })));
    }

    #[test]
    fn test_base_past_ceiling() {
        let base = (1 << 36) - REGION_ALIGNMENT;
        let result = RegionLayout::new(AddressSpaceWidth::Bits36, base, base, 0);
        assert!(matches!(result, Err(Error::LayoutOutOfBounds { .. })));
    }

    #[test]
    fn test_misaligned_base() {
        let result = RegionLayout::new(AddressSpaceWidth::Bits39, 0x1000, 0x1000, 0);
        assert!(matches!(result, Err(Error::MisalignedBase(0x1000))));
    }

    #[test]
    fn test_region_map_dump() {
        let base = DEFAULT_BASE_ADDRESS;
        let layout = RegionLayout::new(AddressSpaceWidth::Bits36, base, base, 0).unwrap();
        let dump = layout.to_string();
        assert!(dump.starts_with("Region Map (36-bit):"));
        assert!(dump.contains("Code Region: 0x8000000 - 0x80000000 (Size: 0x78000000)"));
        assert!(dump.contains("TLS/IO Region:"));
    }
}
