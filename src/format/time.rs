//! Timestamp encodings.
//!
//! Two encodings appear in records: 64-bit FILETIME (100 ns intervals since
//! 1601-01-01 UTC) and 32-bit FAT date-time (2-second resolution). Raw
//! values are kept as stored; conversion to a calendar date is pure and can
//! only fail with `TimestampOutOfRange`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH_SECS: i64 = 11_644_473_600;

const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

/// 64-bit FILETIME
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filetime(pub u64);

impl Filetime {
    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn to_datetime(self) -> Result<DateTime<Utc>> {
        let secs = (self.0 / FILETIME_TICKS_PER_SEC) as i64 - FILETIME_UNIX_EPOCH_SECS;
        let nanos = ((self.0 % FILETIME_TICKS_PER_SEC) * 100) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .ok_or(Error::TimestampOutOfRange(self.0))
    }
}

/// 32-bit FAT date-time: date in the low 16 bits, time in the high 16 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FatDateTime(pub u32);

impl FatDateTime {
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn to_datetime(self) -> Result<DateTime<Utc>> {
        let date = (self.0 & 0xffff) as u16;
        let time = (self.0 >> 16) as u16;

        let day = (date & 0x1f) as u32;
        let month = ((date >> 5) & 0x0f) as u32;
        let year = 1980 + (date >> 9) as i32;

        let seconds = ((time & 0x1f) * 2) as u32;
        let minutes = ((time >> 5) & 0x3f) as u32;
        let hours = (time >> 11) as u32;

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hours, minutes, seconds))
            .map(|naive: NaiveDateTime| naive.and_utc())
            .ok_or(Error::TimestampOutOfRange(self.0 as u64))
    }
}

/// A timestamp field whose encoding depends on the format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "value", rename_all = "snake_case")]
pub enum Timestamp {
    Filetime(Filetime),
    Fat(FatDateTime),
}

impl Timestamp {
    /// The stored bits, zero-extended
    pub fn raw(self) -> u64 {
        match self {
            Timestamp::Filetime(ft) => ft.raw(),
            Timestamp::Fat(fat) => fat.raw() as u64,
        }
    }

    pub fn is_zero(self) -> bool {
        self.raw() == 0
    }

    pub fn to_datetime(self) -> Result<DateTime<Utc>> {
        match self {
            Timestamp::Filetime(ft) => ft.to_datetime(),
            Timestamp::Fat(fat) => fat.to_datetime(),
        }
    }
}

impl From<Filetime> for Timestamp {
    fn from(ft: Filetime) -> Self {
        Timestamp::Filetime(ft)
    }
}

impl From<FatDateTime> for Timestamp {
    fn from(fat: FatDateTime) -> Self {
        Timestamp::Fat(fat)
    }
}
