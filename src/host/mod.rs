//! Host address space discovery and reservation.
//!
//! The guest address space lives inside a single span of the host process's
//! own address space. This module finds a free span by scanning the host
//! mapping table and reserves it with no access rights, so neither the host
//! allocator nor anything else can claim it before the guest regions are
//! populated.
//!
//! Both seams are traits: [`MappingTable`] supplies the table text and
//! [`Reserver`] performs the reservation. The defaults, [`ProcSelfMaps`] and
//! [`HostReserver`], talk to the running process.

mod carveout;
mod maps;

pub use carveout::{find_carveout, Carveout, HostReserver, Reserver};
pub use maps::{parse_mappings, HostMapping, MappingTable, ProcSelfMaps, StaticMaps};

use tracing::info;

use crate::error::Result;

/// Scan `table` for a gap of `required` bytes below `ceiling`, starting at
/// `floor`, and reserve it with `reserver`.
///
/// Nothing is reserved unless a gap is found.
pub fn reserve_carveout(
    table: &dyn MappingTable,
    reserver: &dyn Reserver,
    required: u64,
    ceiling: u64,
    floor: u64,
) -> Result<Carveout> {
    let mappings = parse_mappings(&table.read_maps()?)?;
    let address = find_carveout(&mappings, required, ceiling, floor)?;
    info!(
        "selected carveout at 0x{:X} for 0x{:X} bytes ({} host mappings scanned)",
        address,
        required,
        mappings.len()
    );
    reserver.reserve(address, required)
}
