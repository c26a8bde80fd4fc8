//! Recovery scanning - find records the hash table no longer points at.
//!
//! Walks the record area block by block, probing every block boundary that
//! is not already claimed by a live record or a HASH record. A successful
//! decode is emitted as a recovered item and the scan jumps past it; a
//! failed decode advances by a single block so the scan resynchronises on
//! the next boundary.
//!
//! # Design
//!
//! - **Claimed ranges**: live items and HASH records are kept as sorted,
//!   coalesced byte ranges; a candidate whose span runs into one keeps
//!   only its unclaimed leading blocks and is emitted as `PARTIAL`
//! - **Allocation aware**: by default only blocks the bitmap marks in use
//!   are probed; free blocks (deleted records) are opt-in
//! - **Same decoder as the hash walk**: any record the live list would
//!   hold, generic records included, can be recovered
//! - **Lazy and abortable**: the scanner is an iterator and checks the abort
//!   flag before every block step

use serde::{Deserialize, Serialize};

use crate::abort::AbortHandle;
use crate::codepage::Codepage;
use crate::format::allocation::{AllocationMap, BlockRange};
use crate::format::header::FormatVersion;
use crate::format::record::{Item, ItemFlags, RecordDecoder};
use crate::format::{BLOCK_AREA_OFFSET, BLOCK_SIZE};
use crate::source::Source;

/// Options for a recovery scan
#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    /// Also probe blocks the allocation bitmap marks free
    pub include_unallocated: bool,
    /// Cooperative cancellation
    pub abort: Option<AbortHandle>,
}

/// Counters from a recovery scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Block boundaries probed with the record decoder
    pub blocks_probed: u32,
    /// Blocks skipped because a live or HASH record owns them
    pub blocks_claimed: u32,
    /// Free blocks skipped because unallocated probing is off
    pub blocks_unallocated_skipped: u32,
    pub records_recovered: u32,
    /// Recovered records cut short by a claimed range
    pub records_partial: u32,
    /// Candidates with an accepted signature that failed to decode
    pub records_rejected: u32,
    pub aborted: bool,
}

// ============================================================================
// Claimed ranges
// ============================================================================

/// Sorted, coalesced set of byte ranges already accounted for
#[derive(Debug, Clone, Default)]
pub struct ClaimedRanges {
    ranges: Vec<BlockRange>,
}

impl ClaimedRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `size` bytes at `offset`, merging with touching ranges
    pub fn insert(&mut self, offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        let mut start = offset;
        let mut end = offset.saturating_add(size);

        let lo = self.ranges.partition_point(|r| r.end() < start);
        let mut hi = lo;
        while hi < self.ranges.len() && self.ranges[hi].offset <= end {
            start = start.min(self.ranges[hi].offset);
            end = end.max(self.ranges[hi].end());
            hi += 1;
        }

        self.ranges.splice(
            lo..hi,
            [BlockRange {
                offset: start,
                size: end - start,
            }],
        );
    }

    /// The claimed range containing `offset`, if any
    pub fn containing(&self, offset: u64) -> Option<BlockRange> {
        let idx = self.ranges.partition_point(|r| r.end() <= offset);
        self.ranges
            .get(idx)
            .filter(|r| r.offset <= offset)
            .copied()
    }

    /// Whether any claimed byte falls inside `[offset, offset + size)`
    pub fn overlaps(&self, offset: u64, size: u64) -> bool {
        let end = offset.saturating_add(size);
        let idx = self.ranges.partition_point(|r| r.end() <= offset);
        self.ranges.get(idx).is_some_and(|r| r.offset < end)
    }

    /// Bytes of `[offset, offset + size)` before the first claimed byte
    pub fn unclaimed_prefix(&self, offset: u64, size: u64) -> u64 {
        let end = offset.saturating_add(size);
        let idx = self.ranges.partition_point(|r| r.end() <= offset);
        match self.ranges.get(idx) {
            Some(r) if r.offset < end => r.offset.saturating_sub(offset),
            _ => size,
        }
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

// ============================================================================
// Scanner
// ============================================================================

/// Lazy recovery scan over the record area
pub struct RecoveryScanner<'a, S: ?Sized> {
    decoder: RecordDecoder<'a, S>,
    map: &'a AllocationMap,
    claimed: &'a ClaimedRanges,
    options: RecoveryOptions,
    block: u32,
    stats: RecoveryStats,
}

impl<'a, S: Source + ?Sized> RecoveryScanner<'a, S> {
    pub fn new(
        source: &'a S,
        version: FormatVersion,
        codepage: Codepage,
        map: &'a AllocationMap,
        claimed: &'a ClaimedRanges,
        options: RecoveryOptions,
    ) -> Self {
        Self {
            decoder: RecordDecoder::new(source, version, codepage),
            map,
            claimed,
            options,
            block: 0,
            stats: RecoveryStats::default(),
        }
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    pub fn into_stats(self) -> RecoveryStats {
        self.stats
    }

    fn aborted(&mut self) -> bool {
        let signalled = self
            .options
            .abort
            .as_ref()
            .is_some_and(|a| a.is_signalled());
        if signalled && !self.stats.aborted {
            tracing::debug!(block = self.block, "Recovery scan aborted");
            self.stats.aborted = true;
        }
        signalled
    }

    /// Block index at or after byte `offset`
    fn block_at_or_after(offset: u64) -> u32 {
        (offset.saturating_sub(BLOCK_AREA_OFFSET).div_ceil(BLOCK_SIZE)).min(u32::MAX as u64) as u32
    }

    /// Probe the current block. Returns an item and advances past it, or
    /// advances by one block.
    fn probe(&mut self, allocated: bool) -> Option<Item> {
        let offset = AllocationMap::block_offset(self.block);
        self.stats.blocks_probed += 1;

        let prologue = match self.decoder.prologue(offset) {
            Ok(prologue) => prologue,
            Err(_) => {
                self.block += 1;
                return None;
            }
        };

        if prologue.is_hash() {
            // An orphaned HASH record: step over it as a unit
            self.block = self.block.saturating_add(prologue.blocks);
            return None;
        }
        if !self.decoder.accepts(&prologue) {
            self.block += 1;
            return None;
        }

        let partial = self.claimed.overlaps(offset, prologue.size());
        let (decoded, blocks) = if partial {
            // The probed block itself is unclaimed, so at least one block survives
            let prefix = self.claimed.unclaimed_prefix(offset, prologue.size());
            let blocks = (prefix / BLOCK_SIZE) as u32;
            tracing::debug!(
                offset,
                blocks = prologue.blocks,
                kept = blocks,
                "Candidate runs into a claimed record, keeping its leading blocks"
            );
            (
                self.decoder.decode_partial(offset, blocks as u64 * BLOCK_SIZE),
                blocks,
            )
        } else {
            (self.decoder.decode(offset), prologue.blocks)
        };

        match decoded {
            Ok(mut item) if blocks > 0 => {
                item.flags.insert(ItemFlags::RECOVERED);
                if !allocated {
                    item.flags.insert(ItemFlags::UNALLOCATED);
                }
                if partial {
                    item.flags.insert(ItemFlags::PARTIAL);
                    self.stats.records_partial += 1;
                }
                tracing::debug!(offset, blocks, partial, "Recovered record");
                self.stats.records_recovered += 1;
                self.block = self.block.saturating_add(blocks);
                Some(item)
            }
            Ok(_) => {
                self.stats.records_rejected += 1;
                self.block += 1;
                None
            }
            Err(err) => {
                tracing::debug!(offset, reason = %err, "Candidate record rejected");
                self.stats.records_rejected += 1;
                self.block += 1;
                None
            }
        }
    }
}

impl<S: Source + ?Sized> Iterator for RecoveryScanner<'_, S> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        while self.block < self.map.block_count() {
            if self.aborted() {
                return None;
            }

            let offset = AllocationMap::block_offset(self.block);
            if let Some(range) = self.claimed.containing(offset) {
                let next = Self::block_at_or_after(range.end()).max(self.block + 1);
                self.stats.blocks_claimed += next - self.block;
                self.block = next;
                continue;
            }

            let allocated = self.map.is_allocated(self.block);
            if !allocated && !self.options.include_unallocated {
                self.stats.blocks_unallocated_skipped += 1;
                self.block += 1;
                continue;
            }

            if let Some(item) = self.probe(allocated) {
                return Some(item);
            }
        }
        None
    }
}

// ============================================================================
// Tests
// ============================================================================
