//! Cache directory table.

use serde::{Deserialize, Serialize};

use super::CACHE_DIRECTORY_ENTRY_SIZE;
use crate::error::Result;
use crate::source::Source;

/// One cache directory slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirectory {
    /// 8-character short name, `None` for an unused slot
    pub name: Option<String>,
    /// Number of cached files stored in the directory
    pub cached_file_count: u32,
}

impl CacheDirectory {
    fn from_entry(entry: &[u8]) -> Self {
        let cached_file_count = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let raw = &entry[4..12];

        let name = if raw.iter().all(|&b| b == 0) {
            None
        } else {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            Some(String::from_utf8_lossy(&raw[..end]).into_owned())
        };

        CacheDirectory {
            name,
            cached_file_count,
        }
    }

    pub fn is_used(&self) -> bool {
        self.name.is_some()
    }
}

/// Read `count` directory entries starting at `offset`
pub(crate) fn decode_table<S: Source + ?Sized>(
    source: &S,
    offset: u64,
    count: u32,
) -> Result<Vec<CacheDirectory>> {
    let data = source.read(offset, (count as u64 * CACHE_DIRECTORY_ENTRY_SIZE) as usize)?;

    Ok(data
        .chunks_exact(CACHE_DIRECTORY_ENTRY_SIZE as usize)
        .map(CacheDirectory::from_entry)
        .collect())
}
