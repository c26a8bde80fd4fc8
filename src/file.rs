//! The opened cache file.
//!
//! `File` runs the whole pipeline once at open time: signature, header,
//! allocation bitmap, hash walk, and optionally the recovery scan. Only
//! record offsets and discovery flags are kept afterwards; items are decoded
//! again on every access so a codepage change applies to later reads.
//!
//! # Design
//!
//! - **Immutable after open**: the source is never written and the item
//!   lists never change, so reads need no locking
//! - **Record-local failures are dropped**: a live offset whose record does
//!   not decode is logged and left out of the item list
//! - **Explicit close**: after `close` every accessor answers `NotOpen`

use std::path::Path;
use std::time::Instant;

use crate::abort::AbortHandle;
use crate::codepage::Codepage;
use crate::error::{Error, Result};
use crate::format::allocation::{AllocationMap, BlockRange};
use crate::format::hash::{HashTableWalker, WalkStats};
use crate::format::header::{FileHeader, FormatVersion};
use crate::format::record::{Item, ItemFlags, RecordDecoder};
use crate::format::{self, CacheDirectory};
use crate::recovery::{ClaimedRanges, RecoveryOptions, RecoveryScanner, RecoveryStats};
use crate::source::{MmapSource, Source};

/// Options for [`File::open_with`]
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Codepage for non-Unicode strings
    pub codepage: Codepage,
    /// Run the recovery scan after the hash walk
    pub recovery: bool,
    /// Let recovery probe blocks the bitmap marks free
    pub include_unallocated: bool,
    /// Cancellation flag checked by the hash walk and the recovery scan
    pub abort: Option<AbortHandle>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            codepage: Codepage::default(),
            recovery: true,
            include_unallocated: false,
            abort: None,
        }
    }
}

/// Where an item lives and how it was found
#[derive(Debug, Clone, Copy)]
struct Descriptor {
    offset: u64,
    size: u64,
    flags: ItemFlags,
}

impl Descriptor {
    fn of(item: &Item) -> Self {
        Self {
            offset: item.offset,
            size: item.record_size,
            flags: item.flags,
        }
    }
}

struct Opened<S> {
    source: S,
    header: FileHeader,
    items: Vec<Descriptor>,
    recovered: Vec<Descriptor>,
    unallocated: Vec<BlockRange>,
    walk_stats: WalkStats,
    recovery_stats: RecoveryStats,
}

/// An open MSIECF file
pub struct File<S> {
    opened: Option<Opened<S>>,
    codepage: Codepage,
}

impl File<MmapSource> {
    /// Memory-map `path` read-only and open it with default options
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open_path_with(path, OpenOptions::default())
    }

    pub fn open_path_with(path: &Path, options: OpenOptions) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Opening cache file");
        Self::open_with(MmapSource::open(path)?, options)
    }
}

impl<S: Source> File<S> {
    pub fn open(source: S) -> Result<Self> {
        Self::open_with(source, OpenOptions::default())
    }

    pub fn open_with(source: S, options: OpenOptions) -> Result<Self> {
        let start = Instant::now();
        let abort = options.abort.clone().unwrap_or_default();

        let version = match format::detect(&source) {
            Err(Error::SignatureMismatch) if is_truncated_signature(&source) => {
                return Err(Error::corrupt_header(format!(
                    "file truncated to {} bytes",
                    source.size()
                )));
            }
            other => other?,
        };
        let header = FileHeader::decode(&source)?;
        let map = AllocationMap::decode(&source, &header)?;

        // Live items
        let decoder = RecordDecoder::new(&source, version, options.codepage);
        let mut walker =
            HashTableWalker::new(&source, header.hash_table_offset).with_abort(abort.clone());
        let mut items = Vec::new();
        let mut claimed = ClaimedRanges::new();
        let mut skipped = 0u32;

        for offset in walker.by_ref() {
            match decoder.decode(offset) {
                Ok(item) => {
                    claimed.insert(item.offset, item.record_size);
                    items.push(Descriptor::of(&item));
                }
                Err(err) if err.is_record_local() => {
                    tracing::debug!(offset, reason = %err, "Skipping undecodable live record");
                    skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let (walk_stats, hash_spans) = walker.finish();
        if walk_stats.aborted {
            return Err(Error::Aborted);
        }
        for span in &hash_spans {
            claimed.insert(span.offset, span.size);
        }
        if walk_stats.chains_abandoned > 0 {
            tracing::warn!(
                abandoned = walk_stats.chains_abandoned,
                hash_records = walk_stats.hash_records,
                "Hash table chain cut short"
            );
        }

        // Recovered items
        let mut recovered = Vec::new();
        let mut recovery_stats = RecoveryStats::default();
        if options.recovery {
            let mut scanner = RecoveryScanner::new(
                &source,
                version,
                options.codepage,
                &map,
                &claimed,
                RecoveryOptions {
                    include_unallocated: options.include_unallocated,
                    abort: Some(abort.clone()),
                },
            );
            recovered.extend(scanner.by_ref().map(|item| Descriptor::of(&item)));
            recovery_stats = scanner.into_stats();
            if recovery_stats.aborted {
                return Err(Error::Aborted);
            }
        }

        let unallocated = map.unallocated_ranges();

        tracing::info!(
            version = %version,
            items = items.len(),
            recovered = recovered.len(),
            skipped,
            unallocated_ranges = unallocated.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Cache file opened"
        );

        Ok(Self {
            opened: Some(Opened {
                source,
                header,
                items,
                recovered,
                unallocated,
                walk_stats,
                recovery_stats,
            }),
            codepage: options.codepage,
        })
    }

    fn opened(&self) -> Result<&Opened<S>> {
        self.opened.as_ref().ok_or(Error::NotOpen)
    }

    /// Release the source. Closing twice is harmless.
    pub fn close(&mut self) {
        if self.opened.take().is_some() {
            tracing::debug!("Cache file closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened.is_some()
    }

    // ========================================================================
    // Header
    // ========================================================================

    /// File size as declared in the header
    pub fn size(&self) -> Result<u64> {
        Ok(self.opened()?.header.declared_size)
    }

    /// Size of the underlying source
    pub fn actual_size(&self) -> Result<u64> {
        Ok(self.opened()?.header.actual_size)
    }

    pub fn format_version(&self) -> Result<FormatVersion> {
        Ok(self.opened()?.header.version)
    }

    pub fn header(&self) -> Result<&FileHeader> {
        Ok(&self.opened()?.header)
    }

    pub fn codepage(&self) -> Codepage {
        self.codepage
    }

    /// Switch the codepage for subsequent string decoding.
    ///
    /// An unsupported identifier leaves the current codepage in place.
    pub fn set_codepage(&mut self, id: u32) -> Result<()> {
        self.codepage = Codepage::from_id(id)?;
        Ok(())
    }

    // ========================================================================
    // Cache directories
    // ========================================================================

    pub fn cache_directory_count(&self) -> Result<u32> {
        Ok(self.opened()?.header.cache_directories.len() as u32)
    }

    /// Directory name, or `None` when the index is out of range or the slot
    /// is unused
    pub fn cache_directory(&self, index: u32) -> Result<Option<String>> {
        Ok(self.cache_directory_entry(index)?.and_then(|dir| dir.name.clone()))
    }

    pub fn cache_directory_entry(&self, index: u32) -> Result<Option<&CacheDirectory>> {
        Ok(self.opened()?.header.cache_directories.get(index as usize))
    }

    /// Whether a URL item's directory index names a used directory slot
    pub fn is_valid_cache_directory_index(&self, index: i8) -> Result<bool> {
        let Ok(index) = u8::try_from(index) else {
            return Ok(false);
        };
        Ok(self
            .cache_directory_entry(index as u32)?
            .is_some_and(CacheDirectory::is_used))
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub fn item_count(&self) -> Result<u32> {
        Ok(self.opened()?.items.len() as u32)
    }

    /// Decode the live item at `index`
    pub fn item(&self, index: u32) -> Result<Item> {
        let opened = self.opened()?;
        self.decode_at(opened, &opened.items, index)
    }

    /// Every live item in hash-walk order
    pub fn items(&self) -> impl Iterator<Item = Result<Item>> + '_ {
        let count = self.item_count().unwrap_or(0);
        (0..count).map(move |index| self.item(index))
    }

    pub fn recovered_item_count(&self) -> Result<u32> {
        Ok(self.opened()?.recovered.len() as u32)
    }

    /// Decode the recovered item at `index`
    pub fn recovered_item(&self, index: u32) -> Result<Item> {
        let opened = self.opened()?;
        self.decode_at(opened, &opened.recovered, index)
    }

    /// Every recovered item in file order
    pub fn recovered_items(&self) -> impl Iterator<Item = Result<Item>> + '_ {
        let count = self.recovered_item_count().unwrap_or(0);
        (0..count).map(move |index| self.recovered_item(index))
    }

    fn decode_at(&self, opened: &Opened<S>, list: &[Descriptor], index: u32) -> Result<Item> {
        let descriptor = list.get(index as usize).ok_or(Error::IndexOutOfRange {
            index,
            count: list.len() as u32,
        })?;

        let decoder = RecordDecoder::new(&opened.source, opened.header.version, self.codepage);
        let mut item = if descriptor.flags.contains(ItemFlags::PARTIAL) {
            decoder.decode_partial(descriptor.offset, descriptor.size)?
        } else {
            decoder.decode(descriptor.offset)?
        };
        item.flags = descriptor.flags;
        Ok(item)
    }

    // ========================================================================
    // Unallocated blocks
    // ========================================================================

    pub fn unallocated_block_count(&self) -> Result<u32> {
        Ok(self.opened()?.unallocated.len() as u32)
    }

    /// `(offset, size)` of the unallocated range at `index`
    pub fn unallocated_block(&self, index: u32) -> Result<(u64, u64)> {
        let ranges = &self.opened()?.unallocated;
        ranges
            .get(index as usize)
            .map(|r| (r.offset, r.size))
            .ok_or(Error::IndexOutOfRange {
                index,
                count: ranges.len() as u32,
            })
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn walk_stats(&self) -> Result<&WalkStats> {
        Ok(&self.opened()?.walk_stats)
    }

    pub fn recovery_stats(&self) -> Result<&RecoveryStats> {
        Ok(&self.opened()?.recovery_stats)
    }
}

/// A source too short for the signature probe whose bytes so far match it
fn is_truncated_signature<S: Source + ?Sized>(source: &S) -> bool {
    let size = source.size();
    if size >= format::SIGNATURE_PROBE_SIZE as u64 {
        return false;
    }
    let Ok(prefix) = source.read(0, size as usize) else {
        return false;
    };
    let len = prefix.len().min(format::SIGNATURE.len());
    prefix[..len] == format::SIGNATURE[..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::record::URL_SIGNATURE;
    use crate::format::SIGNATURE;
    use crate::source::MemorySource;

    const BLOCKS: usize = 16;

    fn put32(data: &mut [u8], off: usize, v: u32) {
        data[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Header, two directories, full bitmap, no hash table
    fn minimal() -> Vec<u8> {
        let size = 0x4000 + BLOCKS * 128;
        let mut data = vec![0u8; size];
        data[..24].copy_from_slice(SIGNATURE);
        data[24..28].copy_from_slice(b"5.2\0");
        put32(&mut data, 0x1c, size as u32);
        put32(&mut data, 0x24, BLOCKS as u32);
        put32(&mut data, 0x48, 2);
        put32(&mut data, 0x4c, 3);
        data[0x50..0x58].copy_from_slice(b"ABCD1234");
        data[0x250] = 0xff;
        data[0x251] = 0xff;
        put32(&mut data, 0x28, BLOCKS as u32);
        data
    }

    #[test]
    fn test_open_minimal() {
        let file = File::open(MemorySource::new(minimal())).unwrap();
        assert_eq!(file.size().unwrap(), (0x4000 + BLOCKS * 128) as u64);
        assert_eq!(file.format_version().unwrap(), FormatVersion::V5_2);
        assert_eq!(file.item_count().unwrap(), 0);
        assert_eq!(file.recovered_item_count().unwrap(), 0);
        assert_eq!(file.cache_directory_count().unwrap(), 2);
        assert_eq!(file.cache_directory(0).unwrap().as_deref(), Some("ABCD1234"));
        assert_eq!(file.cache_directory(1).unwrap(), None);
        assert_eq!(file.cache_directory(40).unwrap(), None);
        assert!(file.is_valid_cache_directory_index(0).unwrap());
        assert!(!file.is_valid_cache_directory_index(1).unwrap());
        assert!(!file.is_valid_cache_directory_index(-1).unwrap());
    }

    #[test]
    fn test_open_rejects_foreign_data() {
        let result = File::open(MemorySource::new(vec![0u8; 0x5000]));
        assert!(matches!(result, Err(Error::SignatureMismatch)));
    }

    #[test]
    fn test_open_truncated_is_corrupt_header() {
        let data = minimal();
        for len in [0, 10, 27, 28, 0x40, 0x4b] {
            let result = File::open(MemorySource::new(data[..len].to_vec()));
            assert!(
                matches!(result, Err(Error::CorruptHeader(_))),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_item_index_out_of_range() {
        let file = File::open(MemorySource::new(minimal())).unwrap();
        assert!(matches!(
            file.item(0),
            Err(Error::IndexOutOfRange { index: 0, count: 0 })
        ));
        assert!(matches!(
            file.recovered_item(3),
            Err(Error::IndexOutOfRange { index: 3, count: 0 })
        ));
    }

    #[test]
    fn test_orphaned_record_is_recovered() {
        let mut data = minimal();
        let r = 0x4000 + 2 * 128;
        data[r..r + 4].copy_from_slice(URL_SIGNATURE);
        put32(&mut data, r + 4, 1);

        let file = File::open(MemorySource::new(data.clone())).unwrap();
        assert_eq!(file.recovered_item_count().unwrap(), 1);
        let item = file.recovered_item(0).unwrap();
        assert_eq!(item.offset(), r as u64);
        assert!(item.is_recovered());

        let options = OpenOptions {
            recovery: false,
            ..Default::default()
        };
        let file = File::open_with(MemorySource::new(data), options).unwrap();
        assert_eq!(file.recovered_item_count().unwrap(), 0);
    }

    #[test]
    fn test_set_codepage() {
        let mut file = File::open(MemorySource::new(minimal())).unwrap();
        assert_eq!(file.codepage().id(), 1252);

        file.set_codepage(1251).unwrap();
        assert_eq!(file.codepage().id(), 1251);

        assert!(matches!(
            file.set_codepage(65001),
            Err(Error::UnsupportedCodepage(65001))
        ));
        assert_eq!(file.codepage().id(), 1251);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut file = File::open(MemorySource::new(minimal())).unwrap();
        file.close();
        file.close();
        assert!(!file.is_open());
        assert!(matches!(file.item_count(), Err(Error::NotOpen)));
        assert!(matches!(file.size(), Err(Error::NotOpen)));
        assert_eq!(file.items().count(), 0);
    }

    #[test]
    fn test_abort_before_open_fails() {
        let abort = AbortHandle::new();
        abort.signal();
        let options = OpenOptions {
            abort: Some(abort),
            ..Default::default()
        };
        let result = File::open_with(MemorySource::new(minimal()), options);
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[test]
    fn test_unallocated_ranges() {
        let mut data = minimal();
        data[0x250] = 0b0000_1111;
        data[0x251] = 0b1111_1110;
        let file = File::open(MemorySource::new(data)).unwrap();
        assert_eq!(file.unallocated_block_count().unwrap(), 1);
        assert_eq!(file.unallocated_block(0).unwrap(), (0x4000 + 4 * 128, 5 * 128));
        assert!(file.unallocated_block(1).is_err());
    }
}
