//! Guest address space bookkeeping.
//!
//! This module provides the region and chunk types, the fixed region layout
//! for each supported address space width, and the chunk map that tracks how
//! every byte of the base region is currently classified.

mod chunk;
mod chunk_map;
pub mod layout;
mod region;

pub use chunk::{ChunkDescriptor, MemoryAttribute, MemoryState, Permission};
pub use chunk_map::ChunkMap;
pub use layout::{code_extent, AddressSpaceWidth, RegionLayout, RegionSizes, REGION_ALIGNMENT};
pub use region::{align_down, align_up, is_aligned, Region};
