//! Guest address range abstraction.

use std::fmt;

use crate::error::{Error, Result};

/// Round `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` if the result would not fit in a `u64`.
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Round `value` down to a multiple of `align` (a power of two).
pub fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// Check whether `value` is a multiple of `align` (a power of two).
pub fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}

/// A half-open range of guest addresses, `[address, address + size)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Region {
    /// First address of the range
    pub address: u64,
    /// Size in bytes
    pub size: u64,
}

impl Region {
    /// Create a new region.
    pub const fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    /// Create a new region, rejecting ranges whose end overflows `u64`.
    pub fn try_new(address: u64, size: u64) -> Result<Self> {
        match address.checked_add(size) {
            Some(_) => Ok(Self { address, size }),
            None => Err(Error::AddressOverflow { address, size }),
        }
    }

    /// One past the last address of the region.
    ///
    /// Saturates for regions that were built with [`Region::new`] from
    /// unchecked values.
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }

    /// Whether the region covers no addresses.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Check if an address falls within this region.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.end()
    }

    /// Check if `other` lies entirely within this region.
    ///
    /// An empty region is contained as long as its address is in bounds.
    pub fn contains_region(&self, other: &Region) -> bool {
        other.address >= self.address && other.end() <= self.end()
    }

    /// Check if the two regions share at least one address.
    pub fn overlaps(&self, other: &Region) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.address < other.end()
            && other.address < self.end()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:X} - 0x{:X} (Size: 0x{:X})",
            self.address,
            self.end(),
            self.size
        )
    }
}
