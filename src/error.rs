//! Error types for guestmem.

use thiserror::Error;

use crate::memory::{AddressSpaceWidth, Region};

/// Result type alias using guestmem's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while setting up or mutating a guest address space.
///
/// None of these are transient: each one is a configuration or caller bug,
/// and the manager must not be used after an initialization error.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("{0} address spaces are not supported")]
    UnsupportedAddressSpace(AddressSpaceWidth),

    #[error("base address 0x{0:X} is not aligned to the region granularity")]
    MisalignedBase(u64),

    // Layout errors
    #[error(
        "code mapping 0x{code_start:X} (size 0x{code_size:X}) does not fit the code region {region}"
    )]
    CodeRegionTooSmall {
        code_start: u64,
        code_size: u64,
        region: Region,
    },

    #[error("layout base {base} exceeds the 0x{ceiling:X} byte address space")]
    LayoutOutOfBounds { base: Region, ceiling: u64 },

    // Host carveout errors
    #[error("cannot find a suitable carveout of 0x{required:X} bytes below 0x{ceiling:X}")]
    NoSuitableCarveout { required: u64, ceiling: u64 },

    #[error("failed to reserve 0x{size:X} bytes at 0x{address:X}: {reason}")]
    ReservationFailed {
        address: u64,
        size: u64,
        reason: String,
    },

    #[error("malformed host mapping on line {line}: {text:?}")]
    MalformedMapping { line: usize, text: String },

    // Chunk map errors
    #[error("chunk 0x{start:X} - 0x{end:X} inserted outside address space {base}")]
    OutsideAddressSpace { start: u64, end: u64, base: Region },

    #[error("chunk at 0x{0:X} has zero size")]
    EmptyChunk(u64),

    #[error("range 0x{address:X} + 0x{size:X} overflows the address type")]
    AddressOverflow { address: u64, size: u64 },

    #[error("chunk map invariant violated: {0}")]
    InvariantViolation(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
