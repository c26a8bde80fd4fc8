//! Error types for the MSIECF reader.
//!
//! Errors fall into three groups:
//!
//! - **Probe results**: [`Error::SignatureMismatch`] is the expected answer
//!   when a file simply is not an `index.dat`.
//! - **Fatal for `open`**: [`Error::CorruptHeader`], and any I/O failure
//!   while reading the mandatory header region.
//! - **Record local**: [`Error::MalformedRecord`] and [`Error::TruncatedRead`]
//!   only ever cost the one record being decoded. Enumeration and recovery
//!   skip the offset and carry on.

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The source does not start with the MSIECF signature
    #[error("signature mismatch: not an MSIE cache file")]
    SignatureMismatch,

    /// The fixed header region is unusable
    #[error("corrupt header: {0}")]
    CorruptHeader(String),

    /// A record failed validation; the caller skips it
    #[error("malformed record at offset 0x{offset:08x}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    /// Fewer bytes available than requested
    #[error("truncated read: {length} bytes at offset 0x{offset:08x} exceeds source size {size}")]
    TruncatedRead { offset: u64, length: u64, size: u64 },

    /// Codepage identifier outside the supported set
    #[error("unsupported codepage: {0}")]
    UnsupportedCodepage(u32),

    /// Strict index accessor called past the end
    #[error("index {index} out of range (count {count})")]
    IndexOutOfRange { index: u32, count: u32 },

    /// Timestamp cannot be represented as a calendar date-time
    #[error("timestamp value 0x{0:x} out of representable range")]
    TimestampOutOfRange(u64),

    /// The file was closed
    #[error("file is not open")]
    NotOpen,

    /// A cooperative abort was signalled
    #[error("operation aborted")]
    Aborted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt_header(reason: impl Into<String>) -> Self {
        Error::CorruptHeader(reason.into())
    }

    /// Whether this error only invalidates a single record.
    ///
    /// Enumeration and recovery scanning treat these as "skip and continue".
    pub fn is_record_local(&self) -> bool {
        matches!(
            self,
            Error::MalformedRecord { .. } | Error::TruncatedRead { .. }
        )
    }
}
