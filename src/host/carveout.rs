//! Finding and reserving the host span that hosts the guest address space.

use tracing::info;

use super::maps::HostMapping;
use crate::debug_carveout;
use crate::error::{Error, Result};
use crate::memory::{align_up, Region, REGION_ALIGNMENT};

/// Find the lowest aligned gap between host mappings that can hold
/// `required` bytes without reaching past `ceiling`.
///
/// `mappings` must be sorted by start address. The search begins at `floor`;
/// each candidate starts at the previous mapping's end rounded up to
/// [`REGION_ALIGNMENT`], and the space after the last mapping counts as a gap
/// too.
pub fn find_carveout(
    mappings: &[HostMapping],
    required: u64,
    ceiling: u64,
    floor: u64,
) -> Result<u64> {
    let not_found = || Error::NoSuitableCarveout { required, ceiling };

    // Fits below `limit` if the aligned candidate and its end stay in range.
    let candidate = |start: u64, limit: u64| -> Option<u64> {
        let aligned = align_up(start, REGION_ALIGNMENT)?;
        let end = aligned.checked_add(required)?;
        (end <= limit && end <= ceiling).then_some(aligned)
    };

    let mut cursor = floor;
    for mapping in mappings {
        if mapping.end <= cursor {
            continue;
        }

        if let Some(address) = candidate(cursor, mapping.start) {
            debug_carveout!(
                "gap 0x{:X} - 0x{:X} holds 0x{:X} bytes at 0x{:X}",
                cursor,
                mapping.start,
                required,
                address
            );
            return Ok(address);
        }

        cursor = mapping.end;
        // Later gaps only start higher.
        match align_up(cursor, REGION_ALIGNMENT).and_then(|a| a.checked_add(required)) {
            Some(end) if end <= ceiling => {}
            _ => return Err(not_found()),
        }
    }

    candidate(cursor, ceiling).ok_or_else(not_found)
}

/// A span of host address space held with no access rights.
///
/// Reservations made by [`HostReserver`] are released when this is dropped.
#[derive(Debug)]
pub struct Carveout {
    region: Region,
    owned: bool,
}

impl Carveout {
    /// Describe a reservation whose lifetime is managed elsewhere; dropping
    /// it releases nothing.
    pub fn untracked(region: Region) -> Self {
        Self {
            region,
            owned: false,
        }
    }

    /// The reserved span.
    pub fn region(&self) -> Region {
        self.region
    }

    /// Start of the reserved span.
    pub fn address(&self) -> u64 {
        self.region.address
    }

    /// Size of the reserved span in bytes.
    pub fn size(&self) -> u64 {
        self.region.size
    }
}

impl Drop for Carveout {
    fn drop(&mut self) {
        if self.owned {
            #[cfg(unix)]
            {
                unsafe {
                    libc::munmap(
                        self.region.address as *mut libc::c_void,
                        self.region.size as libc::size_t,
                    );
                }
            }
        }
    }
}

/// Reserves host address space at a chosen address.
pub trait Reserver {
    /// Reserve exactly `[address, address + size)` without granting access.
    fn reserve(&self, address: u64, size: u64) -> Result<Carveout>;
}

/// Reserves address space with an inaccessible anonymous private mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostReserver;

impl Reserver for HostReserver {
    #[cfg(unix)]
    fn reserve(&self, address: u64, size: u64) -> Result<Carveout> {
        let failed = |reason: String| Error::ReservationFailed {
            address,
            size,
            reason,
        };
        if size == 0 {
            return Err(failed("size must be greater than 0".to_string()));
        }
        let region = Region::try_new(address, size)?;
        let len =
            usize::try_from(size).map_err(|_| failed("size exceeds host usize".to_string()))?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        let placement = libc::MAP_FIXED_NOREPLACE;
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        let placement = 0;

        let ptr = unsafe {
            libc::mmap(
                address as *mut libc::c_void,
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | placement,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(failed(format!(
                "mmap failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        if ptr as u64 != address {
            // Kernels without MAP_FIXED_NOREPLACE treat the address as a hint.
            unsafe {
                libc::munmap(ptr, len);
            }
            return Err(failed(format!("host placed the mapping at {:p}", ptr)));
        }

        info!("reserved guest carveout {}", region);
        Ok(Carveout {
            region,
            owned: true,
        })
    }

    #[cfg(not(unix))]
    fn reserve(&self, address: u64, size: u64) -> Result<Carveout> {
        Err(Error::ReservationFailed {
            address,
            size,
            reason: "host reservation is only implemented on unix".to_string(),
        })
    }
}
