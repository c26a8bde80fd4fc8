//! Record decoding: prologue validation and per-type field decoders.
//!
//! Every record starts with a 4-byte signature and a block count. The
//! decoder validates the declared span against the source before reading
//! anything else, so per-type decoders work on an in-memory copy of a record
//! that is known to be complete.
//!
//! # Design
//!
//! - **Tagged variant**: [`ItemKind`] is a sum type; the offset, size and
//!   discovery flags live once on the [`Item`] envelope
//! - **Version as input**: the URL layout depends on the format version,
//!   which the caller passes in
//! - **Strings**: addressed by an intra-record offset, terminated by the
//!   first NUL inside the record; offset 0 or an empty string is `None`

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::hash::HASH_SIGNATURE;
use super::header::FormatVersion;
use super::time::{FatDateTime, Filetime, Timestamp};
use super::{is_block_aligned, BLOCK_SIZE};
use crate::codepage::Codepage;
use crate::error::{Error, Result};
use crate::source::Source;

pub const URL_SIGNATURE: &[u8; 4] = b"URL ";
pub const LEAK_SIGNATURE: &[u8; 4] = b"LEAK";
pub const REDIRECTED_SIGNATURE: &[u8; 4] = b"REDR";

/// Signature plus block count
pub const RECORD_PROLOGUE_SIZE: usize = 8;

const URL_HEADER_SIZE_V47: usize = 100;
const URL_HEADER_SIZE_V52: usize = 96;
const LEAK_HEADER_SIZE: usize = 96;
const REDIRECTED_HEADER_SIZE: usize = 16;

// ============================================================================
// Flags
// ============================================================================

/// Cache entry flags stored in URL records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheEntryFlags(pub u32);

impl CacheEntryFlags {
    pub const NORMAL: u32 = 0x0000_0001;
    pub const STICKY: u32 = 0x0000_0004;
    pub const EDITED: u32 = 0x0000_0008;
    pub const TRACK_OFFLINE: u32 = 0x0000_0010;
    pub const TRACK_ONLINE: u32 = 0x0000_0020;
    pub const SPARSE: u32 = 0x0001_0000;
    pub const COOKIE: u32 = 0x0010_0000;
    pub const URL_HISTORY: u32 = 0x0020_0000;

    const NAMES: [(u32, &'static str); 8] = [
        (Self::NORMAL, "NORMAL"),
        (Self::STICKY, "STICKY"),
        (Self::EDITED, "EDITED"),
        (Self::TRACK_OFFLINE, "TRACK_OFFLINE"),
        (Self::TRACK_ONLINE, "TRACK_ONLINE"),
        (Self::SPARSE, "SPARSE"),
        (Self::COOKIE, "COOKIE"),
        (Self::URL_HISTORY, "URLHISTORY"),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Names of the known flags that are set
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(bit, _)| self.0 & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }

    /// Bits with no known meaning
    pub fn unknown_bits(self) -> u32 {
        Self::NAMES.iter().fold(self.0, |acc, (bit, _)| acc & !bit)
    }
}

impl fmt::Display for CacheEntryFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.names().iter().map(|s| s.to_string()).collect();
        if self.unknown_bits() != 0 {
            parts.push(format!("0x{:08x}", self.unknown_bits()));
        }
        if parts.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&parts.join(" | "))
        }
    }
}

/// How an item was discovered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemFlags(pub u8);

impl ItemFlags {
    /// Found by the recovery scan rather than the hash table
    pub const RECOVERED: u8 = 0x01;
    /// Record starts in a block the bitmap marks free
    pub const UNALLOCATED: u8 = 0x02;
    /// Only the leading blocks survived; a live record reuses the rest
    pub const PARTIAL: u8 = 0x04;

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u8) {
        self.0 |= flag;
    }
}

// ============================================================================
// Item types
// ============================================================================

/// URL record sub-type, derived from the location prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UrlType {
    Cache,
    Compatibility,
    Cookie,
    DomStore,
    Download,
    History,
    HistoryDaily,
    HistoryWeekly,
    InprivateFiltering,
    RssFeed,
    Tld,
    UserData,
}

impl UrlType {
    /// Classify a raw (undecoded) location
    pub fn from_location(location: &[u8]) -> UrlType {
        if let Some(days) = history_period_days(location) {
            match days {
                1 => return UrlType::HistoryDaily,
                7 => return UrlType::HistoryWeekly,
                _ => {}
            }
        }

        const PREFIXES: [(&[u8], UrlType); 9] = [
            (b"iedownload:", UrlType::Download),
            (b"DOMStore:", UrlType::DomStore),
            (b"feedplat:", UrlType::RssFeed),
            (b"iecompat:", UrlType::Compatibility),
            (b"PrivacIE:", UrlType::InprivateFiltering),
            (b"userdata:", UrlType::UserData),
            (b"Visited:", UrlType::History),
            (b"Cookie:", UrlType::Cookie),
            (b"ietld:", UrlType::Tld),
        ];

        PREFIXES
            .iter()
            .find(|(prefix, _)| location.starts_with(prefix))
            .map(|(_, url_type)| *url_type)
            .unwrap_or(UrlType::Cache)
    }
}

/// Days spanned by a `:YYYYMMDDYYYYMMDD:` history container prefix
fn history_period_days(location: &[u8]) -> Option<i64> {
    if location.len() < 18 || location[0] != b':' || location[17] != b':' {
        return None;
    }
    let digits = &location[1..17];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let number = |range: std::ops::Range<usize>| {
        digits[range]
            .iter()
            .fold(0u32, |acc, d| acc * 10 + (d - b'0') as u32)
    };
    let first = NaiveDate::from_ymd_opt(number(0..4) as i32, number(4..6), number(6..8))?;
    let second = NaiveDate::from_ymd_opt(number(8..12) as i32, number(12..14), number(14..16))?;

    Some(second.signed_duration_since(first).num_days())
}

/// Flat item type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemType {
    Url,
    Leak,
    Redirected,
    Compatibility,
    Cookie,
    DomStore,
    Download,
    History,
    HistoryDaily,
    HistoryWeekly,
    InprivateFiltering,
    RssFeed,
    Tld,
    UserData,
    Unknown,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Url => "URL",
            ItemType::Leak => "LEAK",
            ItemType::Redirected => "REDIRECTED",
            ItemType::Compatibility => "COMPATIBILITY",
            ItemType::Cookie => "COOKIE",
            ItemType::DomStore => "DOM-STORE",
            ItemType::Download => "DOWNLOAD",
            ItemType::History => "HISTORY",
            ItemType::HistoryDaily => "HISTORY-DAILY",
            ItemType::HistoryWeekly => "HISTORY-WEEKLY",
            ItemType::InprivateFiltering => "INPRIVATE-FILTERING",
            ItemType::RssFeed => "RSS-FEED",
            ItemType::Tld => "TLD",
            ItemType::UserData => "USER-DATA",
            ItemType::Unknown => "UNKNOWN",
        }
    }
}

impl From<UrlType> for ItemType {
    fn from(url_type: UrlType) -> Self {
        match url_type {
            UrlType::Cache => ItemType::Url,
            UrlType::Compatibility => ItemType::Compatibility,
            UrlType::Cookie => ItemType::Cookie,
            UrlType::DomStore => ItemType::DomStore,
            UrlType::Download => ItemType::Download,
            UrlType::History => ItemType::History,
            UrlType::HistoryDaily => ItemType::HistoryDaily,
            UrlType::HistoryWeekly => ItemType::HistoryWeekly,
            UrlType::InprivateFiltering => ItemType::InprivateFiltering,
            UrlType::RssFeed => ItemType::RssFeed,
            UrlType::Tld => ItemType::Tld,
            UrlType::UserData => ItemType::UserData,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Fields of a `URL ` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPayload {
    pub url_type: UrlType,
    pub primary_time: Filetime,
    pub secondary_time: Filetime,
    /// FILETIME in version 4.7, FAT date-time otherwise
    pub expiration_time: Timestamp,
    pub last_checked_time: FatDateTime,
    pub cached_file_size: u64,
    /// Seconds
    pub non_releasable_time_delta: u32,
    /// Raw index; negative means no cache directory
    pub cache_directory_index: i8,
    pub number_of_hits: u32,
    pub cache_entry_flags: CacheEntryFlags,
    pub location: Option<String>,
    pub filename: Option<String>,
    pub data: Option<Vec<u8>>,
}

impl UrlPayload {
    /// Directory index, or `None` for the "no directory" sentinel
    pub fn cache_directory(&self) -> Option<u8> {
        u8::try_from(self.cache_directory_index).ok()
    }
}

/// Fields of a `LEAK` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeakPayload {
    pub cached_file_size: u64,
    pub cache_directory_index: u8,
    pub filename: Option<String>,
}

/// Fields of a `REDR` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectedPayload {
    pub location: Option<String>,
}

/// Per-type record payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum ItemKind {
    Url(UrlPayload),
    Leak(LeakPayload),
    Redirected(RedirectedPayload),
    /// A well-formed record of a type without a dedicated decoder
    Generic { signature: [u8; 4] },
}

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub offset: u64,
    pub record_size: u64,
    pub flags: ItemFlags,
    pub kind: ItemKind,
}

impl Item {
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn kind(&self) -> &ItemKind {
        &self.kind
    }

    /// `(offset, size)` of the record in the source
    pub fn range(&self) -> (u64, u64) {
        (self.offset, self.record_size)
    }

    pub fn item_type(&self) -> ItemType {
        match &self.kind {
            ItemKind::Url(url) => url.url_type.into(),
            ItemKind::Leak(_) => ItemType::Leak,
            ItemKind::Redirected(_) => ItemType::Redirected,
            ItemKind::Generic { .. } => ItemType::Unknown,
        }
    }

    pub fn is_recovered(&self) -> bool {
        self.flags.contains(ItemFlags::RECOVERED)
    }

    pub fn as_url(&self) -> Option<&UrlPayload> {
        match &self.kind {
            ItemKind::Url(url) => Some(url),
            _ => None,
        }
    }

    pub fn as_leak(&self) -> Option<&LeakPayload> {
        match &self.kind {
            ItemKind::Leak(leak) => Some(leak),
            _ => None,
        }
    }

    pub fn as_redirected(&self) -> Option<&RedirectedPayload> {
        match &self.kind {
            ItemKind::Redirected(redr) => Some(redr),
            _ => None,
        }
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Prologue of a record, read without decoding the body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPrologue {
    pub signature: [u8; 4],
    pub blocks: u32,
}

impl RecordPrologue {
    pub fn size(&self) -> u64 {
        self.blocks as u64 * BLOCK_SIZE
    }

    pub fn is_hash(&self) -> bool {
        &self.signature == HASH_SIGNATURE
    }

    /// URL, LEAK or REDR
    pub fn is_item(&self) -> bool {
        [URL_SIGNATURE, LEAK_SIGNATURE, REDIRECTED_SIGNATURE].contains(&&self.signature)
    }
}

/// Decodes records at absolute offsets
pub struct RecordDecoder<'a, S: ?Sized> {
    source: &'a S,
    version: FormatVersion,
    codepage: Codepage,
    allow_generic: bool,
}

impl<'a, S: Source + ?Sized> RecordDecoder<'a, S> {
    pub fn new(source: &'a S, version: FormatVersion, codepage: Codepage) -> Self {
        Self {
            source,
            version,
            codepage,
            allow_generic: true,
        }
    }

    /// Whether unknown but plausible signatures decode as `Generic`
    pub fn allow_generic(mut self, allow: bool) -> Self {
        self.allow_generic = allow;
        self
    }

    /// Whether `decode` would attempt a record with this prologue
    pub fn accepts(&self, prologue: &RecordPrologue) -> bool {
        prologue.is_item()
            || (self.allow_generic
                && !prologue.is_hash()
                && is_plausible_signature(&prologue.signature))
    }

    /// Read and validate the prologue at `offset`
    pub fn prologue(&self, offset: u64) -> Result<RecordPrologue> {
        if !is_block_aligned(offset) {
            return Err(Error::malformed(offset, "record offset not block aligned"));
        }

        let raw = self.source.read(offset, RECORD_PROLOGUE_SIZE)?;
        let prologue = RecordPrologue {
            signature: [raw[0], raw[1], raw[2], raw[3]],
            blocks: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        };

        if prologue.blocks == 0 {
            return Err(Error::malformed(offset, "zero block count"));
        }
        let size = self.source.size();
        if offset.checked_add(prologue.size()).map_or(true, |end| end > size) {
            return Err(Error::malformed(
                offset,
                format!(
                    "declared length of {} blocks exceeds file size {}",
                    prologue.blocks, size
                ),
            ));
        }

        Ok(prologue)
    }

    /// Decode the record at `offset`
    pub fn decode(&self, offset: u64) -> Result<Item> {
        let prologue = self.prologue(offset)?;
        self.decode_span(offset, &prologue, prologue.size(), false)
    }

    /// Decode only the first `size` bytes of the record at `offset`.
    ///
    /// Strings and data that run past `size` are cut at the end of the
    /// span, and offsets beyond it read as absent.
    pub fn decode_partial(&self, offset: u64, size: u64) -> Result<Item> {
        let prologue = self.prologue(offset)?;
        self.decode_span(offset, &prologue, size.min(prologue.size()), true)
    }

    fn decode_span(
        &self,
        offset: u64,
        prologue: &RecordPrologue,
        record_size: u64,
        lenient: bool,
    ) -> Result<Item> {
        let kind = match &prologue.signature {
            s if s == URL_SIGNATURE => {
                let record = self.source.read(offset, record_size as usize)?;
                ItemKind::Url(self.decode_url(offset, &record, lenient)?)
            }
            s if s == LEAK_SIGNATURE => {
                let record = self.source.read(offset, record_size as usize)?;
                ItemKind::Leak(self.decode_leak(offset, &record, lenient)?)
            }
            s if s == REDIRECTED_SIGNATURE => {
                let record = self.source.read(offset, record_size as usize)?;
                ItemKind::Redirected(self.decode_redirected(offset, &record, lenient)?)
            }
            s if s == HASH_SIGNATURE => {
                return Err(Error::malformed(offset, "HASH record is not an item"));
            }
            s if self.allow_generic && is_plausible_signature(s) => {
                ItemKind::Generic { signature: *s }
            }
            s => {
                return Err(Error::malformed(
                    offset,
                    format!("unknown record signature {}", hex::encode(s)),
                ));
            }
        };

        Ok(Item {
            offset,
            record_size,
            flags: ItemFlags::default(),
            kind,
        })
    }

    fn decode_url(&self, offset: u64, record: &[u8], lenient: bool) -> Result<UrlPayload> {
        let v47 = self.version.is_v47();
        let header_size = if v47 {
            URL_HEADER_SIZE_V47
        } else {
            URL_HEADER_SIZE_V52
        };
        if record.len() < header_size {
            return Err(Error::malformed(offset, "URL record shorter than its header"));
        }

        // Fields past the expiration time shift by 4 in version 4.7
        let shift = if v47 { 4 } else { 0 };

        let expiration_time = if v47 {
            Timestamp::Filetime(Filetime(le64(record, 0x18)))
        } else {
            Timestamp::Fat(FatDateTime(le32(record, 0x18)))
        };

        let location_offset = le32(record, 0x34 + shift);
        let filename_offset = le32(record, 0x3c + shift);
        let data_offset = le32(record, 0x44 + shift);
        let data_size = le32(record, 0x48 + shift);

        let location_raw = string_bytes(record, offset, location_offset, "location", lenient)?;
        let url_type = location_raw
            .map(UrlType::from_location)
            .unwrap_or(UrlType::Cache);

        let data = if data_offset == 0 || data_size == 0 {
            None
        } else {
            let start = data_offset as usize;
            let end = start.saturating_add(data_size as usize);
            if end <= record.len() {
                Some(record[start..end].to_vec())
            } else if lenient {
                record.get(start..).filter(|tail| !tail.is_empty()).map(<[u8]>::to_vec)
            } else {
                return Err(Error::malformed(offset, "data exceeds record"));
            }
        };

        Ok(UrlPayload {
            url_type,
            secondary_time: Filetime(le64(record, 0x08)),
            primary_time: Filetime(le64(record, 0x10)),
            expiration_time,
            cached_file_size: le32(record, 0x20) as u64,
            non_releasable_time_delta: le32(record, 0x2c + shift),
            cache_directory_index: record[0x38 + shift] as i8,
            cache_entry_flags: CacheEntryFlags(le32(record, 0x40 + shift)),
            last_checked_time: FatDateTime(le32(record, 0x50 + shift)),
            number_of_hits: le32(record, 0x54 + shift),
            location: location_raw.map(|raw| self.codepage.decode(raw)),
            filename: self.string(record, offset, filename_offset, "filename", lenient)?,
            data,
        })
    }

    fn decode_leak(&self, offset: u64, record: &[u8], lenient: bool) -> Result<LeakPayload> {
        if record.len() < LEAK_HEADER_SIZE {
            return Err(Error::malformed(offset, "LEAK record shorter than its header"));
        }

        Ok(LeakPayload {
            cached_file_size: le32(record, 0x20) as u64,
            cache_directory_index: record[0x38],
            filename: self.string(record, offset, le32(record, 0x3c), "filename", lenient)?,
        })
    }

    fn decode_redirected(
        &self,
        offset: u64,
        record: &[u8],
        lenient: bool,
    ) -> Result<RedirectedPayload> {
        if record.len() <= REDIRECTED_HEADER_SIZE {
            return Err(Error::malformed(offset, "REDR record has no location"));
        }

        Ok(RedirectedPayload {
            location: self.string(
                record,
                offset,
                REDIRECTED_HEADER_SIZE as u32,
                "location",
                lenient,
            )?,
        })
    }

    fn string(
        &self,
        record: &[u8],
        offset: u64,
        string_offset: u32,
        field: &str,
        lenient: bool,
    ) -> Result<Option<String>> {
        Ok(string_bytes(record, offset, string_offset, field, lenient)?
            .map(|raw| self.codepage.decode(raw)))
    }
}

/// Bytes of a NUL-terminated string inside `record`, without the NUL.
///
/// When `lenient`, an offset past the end reads as absent and a missing
/// terminator ends the string at the end of the record.
fn string_bytes<'r>(
    record: &'r [u8],
    offset: u64,
    string_offset: u32,
    field: &str,
    lenient: bool,
) -> Result<Option<&'r [u8]>> {
    if string_offset == 0 {
        return Ok(None);
    }

    let start = string_offset as usize;
    if start >= record.len() {
        if lenient {
            return Ok(None);
        }
        return Err(Error::malformed(
            offset,
            format!("{} offset 0x{:x} beyond record end", field, string_offset),
        ));
    }

    let tail = &record[start..];
    let len = match tail.iter().position(|&b| b == 0) {
        Some(len) => len,
        None if lenient => tail.len(),
        None => {
            return Err(Error::malformed(
                offset,
                format!("unterminated {} string", field),
            ))
        }
    };

    Ok((len > 0).then(|| &tail[..len]))
}

/// Four printable uppercase letters or spaces, not all spaces
fn is_plausible_signature(signature: &[u8; 4]) -> bool {
    signature.iter().all(|&b| b.is_ascii_uppercase() || b == b' ')
        && signature.iter().any(|&b| b != b' ')
}

fn le32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn le64(data: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(bytes)
}
