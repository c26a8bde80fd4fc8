//! On-disk structures of the MSIECF (`index.dat`) container.
//!
//! # Design
//!
//! - **Block granular**: everything past the fixed header region lives in
//!   128-byte blocks starting at [`BLOCK_AREA_OFFSET`]; records are block
//!   aligned and their size is a block count
//! - **Stateless decoders**: each submodule decodes from a [`Source`] at an
//!   absolute offset and keeps no cursor
//! - **Version passed explicitly**: record decoding takes the
//!   [`FormatVersion`] as an argument instead of pointing back at the file

pub mod allocation;
pub mod directory;
pub mod hash;
pub mod header;
pub mod record;
pub mod time;

use std::path::Path;

use crate::error::{Error, Result};
use crate::readonly::open_readonly;
use crate::source::Source;

pub use allocation::AllocationMap;
pub use directory::CacheDirectory;
pub use hash::{HashTableWalker, WalkStats};
pub use header::{FileHeader, FormatVersion};
pub use record::{
    CacheEntryFlags, Item, ItemFlags, ItemKind, ItemType, LeakPayload, RecordDecoder,
    RedirectedPayload, UrlPayload, UrlType,
};
pub use time::{FatDateTime, Filetime, Timestamp};

// ============================================================================
// Layout constants
// ============================================================================

/// File signature, followed by the `M.m\0` version string
pub const SIGNATURE: &[u8; 24] = b"Client UrlCache MMF Ver ";

/// Signature plus the four version bytes
pub const SIGNATURE_PROBE_SIZE: usize = 28;

/// Size of the fixed header fields
pub const FILE_HEADER_SIZE: u64 = 0x48;

/// Start of the cache directory table
pub const CACHE_DIRECTORY_TABLE_OFFSET: u64 = 0x48;

/// Bytes per cache directory entry (u32 file count + 8-byte name)
pub const CACHE_DIRECTORY_ENTRY_SIZE: u64 = 12;

/// Start of the allocation bitmap
pub const ALLOCATION_TABLE_OFFSET: u64 = 0x250;

/// First byte of the record area
pub const BLOCK_AREA_OFFSET: u64 = 0x4000;

/// Record granule
pub const BLOCK_SIZE: u64 = 128;

/// Upper bound on directory entries that fit before the bitmap
pub const MAX_CACHE_DIRECTORIES: u32 =
    ((ALLOCATION_TABLE_OFFSET - CACHE_DIRECTORY_TABLE_OFFSET - 4) / CACHE_DIRECTORY_ENTRY_SIZE)
        as u32;

/// Minimum source size for `open`: the header region plus the directory count
pub const MINIMUM_FILE_SIZE: u64 = CACHE_DIRECTORY_TABLE_OFFSET + 4;

// ============================================================================
// Signature detection
// ============================================================================

/// Check the signature and parse the version that follows it.
///
/// Returns `SignatureMismatch` for anything that is not an MSIECF file,
/// including sources too short to hold the probe.
pub fn detect<S: Source + ?Sized>(source: &S) -> Result<FormatVersion> {
    if source.size() < SIGNATURE_PROBE_SIZE as u64 {
        return Err(Error::SignatureMismatch);
    }
    let probe = source.read(0, SIGNATURE_PROBE_SIZE)?;
    detect_bytes(&probe)
}

/// Signature check over an in-memory prefix
pub fn detect_bytes(probe: &[u8]) -> Result<FormatVersion> {
    if probe.len() < SIGNATURE_PROBE_SIZE || &probe[..SIGNATURE.len()] != SIGNATURE {
        return Err(Error::SignatureMismatch);
    }
    FormatVersion::parse(&probe[SIGNATURE.len()..SIGNATURE_PROBE_SIZE])
        .ok_or(Error::SignatureMismatch)
}

/// Boolean probe over an open source. Never fails.
pub fn detect_signature<S: Source + ?Sized>(source: &S) -> bool {
    detect(source).is_ok()
}

/// Open `path`, probe the signature, and close it again.
///
/// I/O errors opening the path are reported; a file that is merely not an
/// MSIECF container yields `Ok(false)`.
pub fn check_file_signature(path: &Path) -> Result<bool> {
    use std::io::Read;

    let file = open_readonly(path)?;
    let mut probe = Vec::with_capacity(SIGNATURE_PROBE_SIZE);
    file.take(SIGNATURE_PROBE_SIZE as u64).read_to_end(&mut probe)?;

    Ok(detect_bytes(&probe).is_ok())
}

/// Whether `offset` is a block boundary inside the record area
pub(crate) fn is_block_aligned(offset: u64) -> bool {
    offset >= BLOCK_AREA_OFFSET && (offset - BLOCK_AREA_OFFSET) % BLOCK_SIZE == 0
}
