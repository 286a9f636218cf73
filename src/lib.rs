//! # guestmem
//!
//! Guest virtual address space management for user-mode emulators.
//!
//! A guest's whole address space is hosted inside one span of the host
//! process's own address space. `guestmem` finds and reserves that span,
//! lays it out into the guest's code, alias, heap, stack and TLS/IO regions,
//! and tracks how every byte of it is currently classified.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use guestmem::{AddressSpaceWidth, ChunkDescriptor, MemoryManager, MemoryState, Permission, Result};
//!
//! fn main() -> Result<()> {
//!     let manager = MemoryManager::builder()
//!         .width(AddressSpaceWidth::Bits39)
//!         .code_size(0x40_0000)
//!         .build()?;
//!
//!     let code = manager.code();
//!     manager.insert_chunk(ChunkDescriptor::new(
//!         code.address,
//!         0x40_0000,
//!         MemoryState::Code,
//!         Permission::READ_EXECUTE,
//!     ))?;
//!     Ok(())
//! }
//! ```
//!
//! ## Address Space Widths
//!
//! - **36-bit**: 64 GiB address space
//! - **39-bit**: 512 GiB address space
//! - **32-bit**: not supported

mod builder;
pub mod debug;
mod error;
mod manager;

pub mod host;
pub mod memory;

// Re-exports
pub use builder::MemoryManagerBuilder;
pub use error::{Error, Result};
pub use manager::MemoryManager;
pub use memory::{
    AddressSpaceWidth, ChunkDescriptor, ChunkMap, MemoryAttribute, MemoryState, Permission,
    Region, RegionLayout,
};
