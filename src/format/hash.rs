//! HASH table walk.
//!
//! The index of live records is a singly linked chain of HASH records, each
//! holding `(hash, record offset)` pairs. The walker follows the chain from
//! the header's first HASH offset and lazily yields every usable record
//! offset.
//!
//! # Design
//!
//! - **Cycle guard**: a visited set of HASH offsets plus a hop budget of
//!   `file size / block size`; either tripping abandons the chain
//! - **Soft failure**: a bad signature, an impossible block count or an
//!   out-of-bounds next pointer ends the chain, never the walk's caller
//! - **Abort**: the flag is checked before each HASH record and each entry

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::allocation::BlockRange;
use super::{is_block_aligned, BLOCK_SIZE};
use crate::abort::AbortHandle;
use crate::source::Source;

/// Signature of a HASH record
pub const HASH_SIGNATURE: &[u8; 4] = b"HASH";

/// HASH record header: signature, blocks, next offset, sequence number
const HASH_HEADER_SIZE: usize = 16;

const HASH_ENTRY_SIZE: usize = 8;

/// Hash values written into never-used slots
const UNINITIALIZED_HASHES: [u32; 2] = [0x0BAD_F00D, 0xDEAD_BEEF];

/// Counters gathered during a walk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkStats {
    /// HASH records successfully read
    pub hash_records: u32,
    /// Record offsets yielded
    pub entries_yielded: u32,
    /// Entries dropped as empty, uninitialized, invalidated or unaligned
    pub entries_skipped: u32,
    /// Entries pointing at an offset already yielded
    pub duplicate_entries: u32,
    /// Chains cut short by a cycle, a bad record or a bad pointer
    pub chains_abandoned: u32,
    /// Whether the walk stopped because of an abort
    pub aborted: bool,
}

/// Why a HASH table entry is not used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySkip {
    Empty,
    Uninitialized,
    Invalidated,
    Unaligned,
}

/// Classify one `(hash, offset)` pair
pub fn classify_entry(hash: u32, offset: u32) -> std::result::Result<u64, EntrySkip> {
    if hash == offset {
        return Err(EntrySkip::Empty);
    }
    if UNINITIALIZED_HASHES.contains(&hash) {
        return Err(EntrySkip::Uninitialized);
    }
    if hash & 0x0f == 0x01 {
        return Err(EntrySkip::Invalidated);
    }
    if !is_block_aligned(offset as u64) {
        return Err(EntrySkip::Unaligned);
    }
    Ok(offset as u64)
}

/// Lazy walk over the HASH chain
pub struct HashTableWalker<'a, S: ?Sized> {
    source: &'a S,
    size: u64,
    next_table: Option<u64>,
    pending: std::vec::IntoIter<u64>,
    visited_tables: HashSet<u64>,
    yielded: HashSet<u64>,
    hops_left: u64,
    abort: Option<AbortHandle>,
    stats: WalkStats,
    table_spans: Vec<BlockRange>,
}

impl<'a, S: Source + ?Sized> HashTableWalker<'a, S> {
    /// Start a walk at `first_table`, or an empty walk for `None`
    pub fn new(source: &'a S, first_table: Option<u64>) -> Self {
        let size = source.size();
        Self {
            source,
            size,
            next_table: first_table,
            pending: Vec::new().into_iter(),
            visited_tables: HashSet::new(),
            yielded: HashSet::new(),
            hops_left: size / BLOCK_SIZE,
            abort: None,
            stats: WalkStats::default(),
            table_spans: Vec::new(),
        }
    }

    pub fn with_abort(mut self, abort: AbortHandle) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn stats(&self) -> &WalkStats {
        &self.stats
    }

    /// Byte ranges of the HASH records read so far
    pub fn table_spans(&self) -> &[BlockRange] {
        &self.table_spans
    }

    /// Consume the walker, returning what it gathered
    pub fn finish(self) -> (WalkStats, Vec<BlockRange>) {
        (self.stats, self.table_spans)
    }

    fn aborted(&mut self) -> bool {
        if self.abort.as_ref().is_some_and(|a| a.is_signalled()) {
            if !self.stats.aborted {
                tracing::debug!("Hash table walk aborted");
            }
            self.stats.aborted = true;
            self.next_table = None;
            self.pending = Vec::new().into_iter();
            return true;
        }
        false
    }

    fn abandon(&mut self, offset: u64, reason: &str) {
        tracing::warn!(offset, reason, "Abandoning hash chain");
        self.stats.chains_abandoned += 1;
        self.next_table = None;
    }

    /// Read the HASH record at `offset`, queue its entries and advance the
    /// chain pointer.
    fn load_table(&mut self, offset: u64) {
        if self.hops_left == 0 {
            self.abandon(offset, "hop budget exhausted");
            return;
        }
        self.hops_left -= 1;

        if !self.visited_tables.insert(offset) {
            self.abandon(offset, "cycle detected");
            return;
        }

        match self.read_table(offset) {
            Ok((entries, next)) => {
                self.pending = entries.into_iter();
                self.next_table = next;
            }
            Err(reason) => self.abandon(offset, &reason),
        }
    }

    fn read_table(&mut self, offset: u64) -> std::result::Result<(Vec<u64>, Option<u64>), String> {
        let header = self
            .source
            .read(offset, HASH_HEADER_SIZE)
            .map_err(|e| e.to_string())?;

        if &header[0..4] != HASH_SIGNATURE {
            return Err("missing HASH signature".to_string());
        }

        let le32 = |off: usize| u32::from_le_bytes([header[off], header[off + 1], header[off + 2], header[off + 3]]);
        let blocks = le32(4) as u64;
        let next = le32(8) as u64;
        let record_size = blocks * BLOCK_SIZE;

        if blocks == 0 || offset + record_size > self.size {
            return Err(format!("HASH record of {} blocks exceeds file", blocks));
        }

        let data = self
            .source
            .read(offset + HASH_HEADER_SIZE as u64, record_size as usize - HASH_HEADER_SIZE)
            .map_err(|e| e.to_string())?;

        self.stats.hash_records += 1;
        self.table_spans.push(BlockRange {
            offset,
            size: record_size,
        });

        let mut entries = Vec::new();
        for entry in data.chunks_exact(HASH_ENTRY_SIZE) {
            let hash = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let target = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
            match classify_entry(hash, target) {
                Ok(record_offset) => entries.push(record_offset),
                Err(_) => self.stats.entries_skipped += 1,
            }
        }

        tracing::debug!(
            offset,
            blocks,
            next,
            entries = entries.len(),
            "Read HASH record"
        );

        let next = if next == 0 {
            None
        } else if !is_block_aligned(next) || next + HASH_HEADER_SIZE as u64 > self.size {
            // Entries of this record are still good; only the link is bad
            self.stats.chains_abandoned += 1;
            tracing::warn!(offset, next, "HASH next pointer out of bounds");
            None
        } else {
            Some(next)
        };

        Ok((entries, next))
    }
}

impl<S: Source + ?Sized> Iterator for HashTableWalker<'_, S> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        loop {
            if self.aborted() {
                return None;
            }

            if let Some(offset) = self.pending.next() {
                if self.yielded.insert(offset) {
                    self.stats.entries_yielded += 1;
                    return Some(offset);
                }
                self.stats.duplicate_entries += 1;
                continue;
            }

            let table = self.next_table.take()?;
            self.load_table(table);
        }
    }
}

/// Walk the whole chain eagerly
pub fn walk<S: Source + ?Sized>(source: &S, first_table: Option<u64>) -> Vec<u64> {
    HashTableWalker::new(source, first_table).collect()
}
