//! The chunk map: an ordered partition of the base region into classified
//! chunks.
//!
//! The map always satisfies three invariants:
//! - the chunks cover `base` exactly, first to last,
//! - each chunk ends where the next one starts,
//! - no two neighbouring chunks are compatible (they would have been merged).
//!
//! Readers take the lock shared, [`ChunkMap::insert_chunk`] takes it
//! exclusively. Every accessor hands out copies, never references into the
//! chunk storage.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::chunk::ChunkDescriptor;
use super::region::Region;
use crate::debug_chunks;
use crate::error::{Error, Result};

/// Ordered, gap-free, maximally coalesced chunks spanning a base region.
#[derive(Debug)]
pub struct ChunkMap {
    base: Region,
    chunks: RwLock<Vec<ChunkDescriptor>>,
}

impl ChunkMap {
    /// Create a map holding one unmapped chunk over all of `base`.
    pub fn new(base: Region) -> Result<Self> {
        if base.is_empty() {
            return Err(Error::EmptyChunk(base.address));
        }
        let base = Region::try_new(base.address, base.size)?;

        Ok(Self {
            base,
            chunks: RwLock::new(vec![ChunkDescriptor::unmapped(base)]),
        })
    }

    /// The region this map partitions.
    pub fn base(&self) -> Region {
        self.base
    }

    // Mutations keep the invariants intact up to the point where they could
    // panic, so a poisoned lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, Vec<ChunkDescriptor>> {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ChunkDescriptor>> {
        self.chunks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the chunk containing `addr`.
    ///
    /// Returns `None` for addresses outside the base region.
    pub fn get(&self, addr: u64) -> Option<ChunkDescriptor> {
        let chunks = self.read();
        let upper = chunks.partition_point(|chunk| chunk.ptr <= addr);
        let chunk = chunks.get(upper.checked_sub(1)?)?;
        chunk.contains(addr).then_some(*chunk)
    }

    /// Classify `[chunk.ptr, chunk.ptr + chunk.size)` with `chunk`'s state,
    /// permission and attributes.
    ///
    /// Existing chunks under the range are removed, split or truncated, and
    /// the result is merged with compatible neighbours on either side.
    pub fn insert_chunk(&self, chunk: ChunkDescriptor) -> Result<()> {
        if chunk.size == 0 {
            return Err(Error::EmptyChunk(chunk.ptr));
        }
        let end = chunk
            .ptr
            .checked_add(chunk.size)
            .ok_or(Error::AddressOverflow {
                address: chunk.ptr,
                size: chunk.size,
            })?;
        if chunk.ptr < self.base.address || end > self.base.end() {
            return Err(self.outside(&chunk));
        }

        let mut chunks = self.write();
        let at = insert_into(&mut chunks, chunk).ok_or_else(|| self.outside(&chunk))?;

        debug_chunks!(
            "insert {} -> index {} of {} chunks",
            chunk,
            at,
            chunks.len()
        );
        Ok(())
    }

    fn outside(&self, chunk: &ChunkDescriptor) -> Error {
        Error::OutsideAddressSpace {
            start: chunk.ptr,
            end: chunk.end(),
            base: self.base,
        }
    }

    /// Total size of all chunks that are not [`MemoryState::Unmapped`].
    ///
    /// [`MemoryState::Unmapped`]: super::chunk::MemoryState::Unmapped
    pub fn program_size(&self) -> u64 {
        self.read()
            .iter()
            .filter(|chunk| chunk.state.is_mapped())
            .map(|chunk| chunk.size)
            .sum()
    }

    /// Snapshot of every chunk, in address order.
    pub fn chunks(&self) -> Vec<ChunkDescriptor> {
        self.read().clone()
    }

    /// Number of chunks currently in the map.
    pub fn chunk_count(&self) -> usize {
        self.read().len()
    }

    /// Verify coverage, contiguity and maximality of the map.
    pub fn check_invariants(&self) -> Result<()> {
        let chunks = self.read();

        let (first, last) = match (chunks.first(), chunks.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(Error::InvariantViolation("chunk map is empty".to_string())),
        };
        if first.ptr != self.base.address || last.end() != self.base.end() {
            return Err(Error::InvariantViolation(format!(
                "chunks span 0x{:X} - 0x{:X}, base is {}",
                first.ptr,
                last.end(),
                self.base
            )));
        }
        if let Some(empty) = chunks.iter().find(|chunk| chunk.size == 0) {
            return Err(Error::InvariantViolation(format!(
                "empty chunk at 0x{:X}",
                empty.ptr
            )));
        }

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.end() != next.ptr {
                return Err(Error::InvariantViolation(format!(
                    "chunk {} is followed by {}",
                    prev, next
                )));
            }
            if prev.is_compatible(next) {
                return Err(Error::InvariantViolation(format!(
                    "compatible neighbours {} and {}",
                    prev, next
                )));
            }
        }

        Ok(())
    }
}

/// Paint `chunk` over `chunks`, returning the index of the chunk that now
/// covers `chunk.ptr`.
///
/// `chunk` must be non-empty and lie inside the span of `chunks`. Returns
/// `None` without touching the map if it starts before the first chunk.
fn insert_into(chunks: &mut Vec<ChunkDescriptor>, chunk: ChunkDescriptor) -> Option<usize> {
    let end = chunk.end();

    let upper = chunks.partition_point(|c| c.ptr <= chunk.ptr);
    if upper == 0 {
        return None;
    }

    // Chunks starting inside the new range are dropped, except a last one
    // that runs past its end, which loses its head instead.
    let covered_end = upper + chunks[upper..].partition_point(|c| c.ptr < end);
    let mut removed_end = covered_end;
    if covered_end > upper {
        let straddling = &mut chunks[covered_end - 1];
        if straddling.end() > end {
            straddling.size = straddling.end() - end;
            straddling.ptr = end;
            removed_end -= 1;
        }
    }
    chunks.drain(upper..removed_end);

    let lower_index = upper - 1;
    let lower = chunks[lower_index];

    let at = if lower.ptr == chunk.ptr && lower.size == chunk.size {
        chunks[lower_index].retag_from(&chunk);
        lower_index
    } else if lower.end() > end {
        if lower.is_compatible(&chunk) {
            return Some(lower_index);
        }

        let right = ChunkDescriptor {
            ptr: end,
            size: lower.end() - end,
            ..lower
        };
        if lower.ptr == chunk.ptr {
            chunks[lower_index] = chunk;
            chunks.insert(upper, right);
            lower_index
        } else {
            chunks[lower_index].size = chunk.ptr - lower.ptr;
            chunks.splice(upper..upper, [chunk, right]);
            upper
        }
    } else if lower.is_compatible(&chunk) {
        chunks[lower_index].size = end - lower.ptr;
        lower_index
    } else if lower.ptr == chunk.ptr {
        chunks[lower_index] = chunk;
        lower_index
    } else {
        chunks[lower_index].size = chunk.ptr - lower.ptr;
        match chunks.get_mut(upper) {
            Some(next) if next.is_compatible(&chunk) => {
                next.size = next.end() - chunk.ptr;
                next.ptr = chunk.ptr;
            }
            _ => chunks.insert(upper, chunk),
        }
        upper
    };

    Some(coalesce_around(chunks, at))
}

/// Merge the chunk at `index` with compatible neighbours, returning its new
/// index.
fn coalesce_around(chunks: &mut Vec<ChunkDescriptor>, mut index: usize) -> usize {
    if index + 1 < chunks.len() && chunks[index].is_compatible(&chunks[index + 1]) {
        let next = chunks.remove(index + 1);
        chunks[index].size += next.size;
    }
    if index > 0 && chunks[index - 1].is_compatible(&chunks[index]) {
        let merged = chunks.remove(index);
        index -= 1;
        chunks[index].size += merged.size;
    }
    index
}
