//! Block allocation bitmap.
//!
//! One bit per 128-byte block of the record area, least significant bit
//! first. The map only covers blocks that exist in the source; bits for
//! blocks past the end of a truncated file are ignored.

use serde::{Deserialize, Serialize};

use super::header::FileHeader;
use super::{ALLOCATION_TABLE_OFFSET, BLOCK_AREA_OFFSET, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::source::Source;

/// A contiguous byte range of the record area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub offset: u64,
    pub size: u64,
}

impl BlockRange {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Decoded allocation bitmap
#[derive(Debug, Clone)]
pub struct AllocationMap {
    bitmap: Vec<u8>,
    block_count: u32,
}

impl AllocationMap {
    /// Read the bitmap described by `header`
    pub fn decode<S: Source + ?Sized>(source: &S, header: &FileHeader) -> Result<Self> {
        let bitmap_len = (header.number_of_blocks as u64).div_ceil(8) as usize;
        let bitmap = source
            .read(ALLOCATION_TABLE_OFFSET, bitmap_len)
            .map_err(|err| match err {
                Error::TruncatedRead { .. } => Error::corrupt_header(format!(
                    "allocation bitmap of {} bytes truncated",
                    bitmap_len
                )),
                other => other,
            })?;

        let map = Self::from_bitmap(bitmap, header.usable_blocks());

        if map.allocated_count() != header.number_of_allocated_blocks {
            tracing::warn!(
                header = header.number_of_allocated_blocks,
                bitmap = map.allocated_count(),
                "Allocated block count differs from bitmap"
            );
        }

        Ok(map)
    }

    /// Build a map over the first `block_count` bits of `bitmap`
    pub fn from_bitmap(bitmap: Vec<u8>, block_count: u32) -> Self {
        let block_count = block_count.min((bitmap.len() as u64 * 8).min(u32::MAX as u64) as u32);
        Self {
            bitmap,
            block_count,
        }
    }

    /// Number of blocks covered
    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Whether block `index` is marked in use. Out-of-range blocks are not.
    pub fn is_allocated(&self, index: u32) -> bool {
        if index >= self.block_count {
            return false;
        }
        self.bitmap[(index / 8) as usize] & (1 << (index % 8)) != 0
    }

    /// Lazy `(block_index, allocated)` walk from block 0.
    ///
    /// Each call starts a fresh iterator.
    pub fn blocks(&self) -> impl Iterator<Item = (u32, bool)> + '_ {
        (0..self.block_count).map(move |index| (index, self.is_allocated(index)))
    }

    pub fn allocated_count(&self) -> u32 {
        self.blocks().filter(|(_, allocated)| *allocated).count() as u32
    }

    /// Byte offset of block `index`
    pub fn block_offset(index: u32) -> u64 {
        BLOCK_AREA_OFFSET + index as u64 * BLOCK_SIZE
    }

    /// Unallocated blocks coalesced into byte ranges, in offset order
    pub fn unallocated_ranges(&self) -> Vec<BlockRange> {
        let mut ranges: Vec<BlockRange> = Vec::new();

        for (index, allocated) in self.blocks() {
            if allocated {
                continue;
            }
            let offset = Self::block_offset(index);
            match ranges.last_mut() {
                Some(last) if last.end() == offset => last.size += BLOCK_SIZE,
                _ => ranges.push(BlockRange {
                    offset,
                    size: BLOCK_SIZE,
                }),
            }
        }

        ranges
    }
}
