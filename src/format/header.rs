//! Fixed file header: signature, version, sizes and sub-structure offsets.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::directory::{self, CacheDirectory};
use super::{
    detect_bytes, ALLOCATION_TABLE_OFFSET, BLOCK_AREA_OFFSET, BLOCK_SIZE,
    CACHE_DIRECTORY_TABLE_OFFSET, FILE_HEADER_SIZE, MAX_CACHE_DIRECTORIES, MINIMUM_FILE_SIZE,
};
use crate::error::{Error, Result};
use crate::source::Source;

/// Format version from the signature string (`"4.7"`, `"5.2"`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
}

impl FormatVersion {
    pub const V4_7: FormatVersion = FormatVersion { major: 4, minor: 7 };
    pub const V5_2: FormatVersion = FormatVersion { major: 5, minor: 2 };

    /// Parse `digit '.' digit NUL`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [major, b'.', minor, 0, ..] if major.is_ascii_digit() && minor.is_ascii_digit() => {
                Some(FormatVersion {
                    major: major - b'0',
                    minor: minor - b'0',
                })
            }
            _ => None,
        }
    }

    /// Version 4.7 stores the URL expiration time as a FILETIME; every
    /// other version uses a FAT date-time.
    pub fn is_v47(self) -> bool {
        self == Self::V4_7
    }

    /// Whether this is one of the two versions seen in the wild
    pub fn is_known(self) -> bool {
        self == Self::V4_7 || self == Self::V5_2
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Decoded file header
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHeader {
    pub version: FormatVersion,
    /// File size recorded in the header
    pub declared_size: u64,
    /// Size of the source actually opened; used for all bounds checks
    pub actual_size: u64,
    /// Offset of the first HASH record, if any
    pub hash_table_offset: Option<u64>,
    pub number_of_blocks: u32,
    pub number_of_allocated_blocks: u32,
    pub cache_size_limit: u32,
    pub cache_size: u32,
    pub non_releasable_cache_size: u32,
    /// One entry per directory slot, unused slots included
    pub cache_directories: Vec<CacheDirectory>,
}

impl FileHeader {
    /// Decode and validate the header region.
    ///
    /// Every failure here is fatal for `open`, so truncation, a bad
    /// signature and out-of-range mandatory offsets all surface as
    /// `CorruptHeader`.
    pub fn decode<S: Source + ?Sized>(source: &S) -> Result<Self> {
        let actual_size = source.size();
        if actual_size < MINIMUM_FILE_SIZE {
            return Err(Error::corrupt_header(format!(
                "file too small: {} bytes, need at least {}",
                actual_size, MINIMUM_FILE_SIZE
            )));
        }

        if actual_size < BLOCK_AREA_OFFSET {
            return Err(Error::corrupt_header(format!(
                "file ends at {} bytes, before the record area at 0x{:x}",
                actual_size, BLOCK_AREA_OFFSET
            )));
        }

        let data = source.read(0, MINIMUM_FILE_SIZE as usize).map_err(header_io)?;
        let version = detect_bytes(&data)
            .map_err(|_| Error::corrupt_header("signature re-validation failed"))?;

        let le32 = |off: usize| u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);

        let declared_size = le32(0x1c) as u64;
        let hash_offset = le32(0x20) as u64;
        let number_of_blocks = le32(0x24);
        let number_of_allocated_blocks = le32(0x28);
        let cache_size_limit = le32(0x30);
        let cache_size = le32(0x38);
        let non_releasable_cache_size = le32(0x40);
        let number_of_directories = le32(FILE_HEADER_SIZE as usize);

        if !version.is_known() {
            tracing::warn!(%version, "Unrecognised format version, decoding with the 5.2 layout");
        }

        if declared_size != actual_size {
            tracing::warn!(
                declared = declared_size,
                actual = actual_size,
                "Declared file size differs from source size"
            );
        }

        let hash_table_offset = if hash_offset == 0 {
            None
        } else if hash_offset < BLOCK_AREA_OFFSET || hash_offset + 8 > actual_size {
            return Err(Error::corrupt_header(format!(
                "hash table offset 0x{:08x} outside file (size {})",
                hash_offset, actual_size
            )));
        } else {
            Some(hash_offset)
        };

        if number_of_directories > MAX_CACHE_DIRECTORIES {
            return Err(Error::corrupt_header(format!(
                "{} cache directories exceeds maximum of {}",
                number_of_directories, MAX_CACHE_DIRECTORIES
            )));
        }

        let bitmap_len = (number_of_blocks as u64).div_ceil(8);
        if ALLOCATION_TABLE_OFFSET + bitmap_len > BLOCK_AREA_OFFSET {
            return Err(Error::corrupt_header(format!(
                "allocation bitmap for {} blocks overruns the record area",
                number_of_blocks
            )));
        }

        let cache_directories = directory::decode_table(
            source,
            CACHE_DIRECTORY_TABLE_OFFSET + 4,
            number_of_directories,
        )
        .map_err(header_io)?;

        tracing::debug!(
            %version,
            declared_size,
            hash_table_offset = hash_offset,
            number_of_blocks,
            number_of_allocated_blocks,
            directories = number_of_directories,
            "Decoded file header"
        );

        Ok(FileHeader {
            version,
            declared_size,
            actual_size,
            hash_table_offset,
            number_of_blocks,
            number_of_allocated_blocks,
            cache_size_limit,
            cache_size,
            non_releasable_cache_size,
            cache_directories,
        })
    }

    /// Blocks actually backed by the source, capped by the header count
    pub fn usable_blocks(&self) -> u32 {
        let available = self.actual_size.saturating_sub(BLOCK_AREA_OFFSET) / BLOCK_SIZE;
        available.min(self.number_of_blocks as u64) as u32
    }
}

/// Short reads inside the header region mean the header is unusable
fn header_io(err: Error) -> Error {
    match err {
        Error::TruncatedRead { offset, length, size } => Error::corrupt_header(format!(
            "header region truncated: {} bytes at 0x{:x} beyond size {}",
            length, offset, size
        )),
        other => other,
    }
}
