//! Reports for the `info` and `export` commands.
//!
//! Report structs are plain serde data so the CLI can print them either as
//! aligned human text or as JSON. URL data blobs are never copied into a
//! report; only their size and a BLAKE3 digest are kept.

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::file::File;
use crate::format::record::{Item, ItemFlags, ItemKind};
use crate::format::time::Timestamp;
use crate::format::{FatDateTime, Filetime, WalkStats};
use crate::recovery::RecoveryStats;
use crate::source::Source;

/// Which collection an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Live,
    Recovered,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Live => "live",
            Collection::Recovered => "recovered",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryReport {
    pub index: u32,
    pub name: Option<String>,
    pub cached_files: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangeReport {
    pub offset: u64,
    pub size: u64,
}

/// Summary of an opened file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileReport {
    pub source: String,
    pub version: String,
    pub declared_size: u64,
    pub actual_size: u64,
    pub number_of_blocks: u32,
    pub number_of_allocated_blocks: u32,
    pub cache_size_limit: u32,
    pub cache_size: u32,
    pub non_releasable_cache_size: u32,
    pub codepage: String,
    pub cache_directories: Vec<DirectoryReport>,
    pub items: u32,
    pub recovered_items: u32,
    pub walk: WalkStats,
    pub recovery: RecoveryStats,
    pub unallocated: Vec<RangeReport>,
}

impl FileReport {
    pub fn build<S: Source>(file: &File<S>, source: &str) -> Result<Self> {
        let header = file.header()?;

        let cache_directories = header
            .cache_directories
            .iter()
            .enumerate()
            .map(|(index, dir)| DirectoryReport {
                index: index as u32,
                name: dir.name.clone(),
                cached_files: dir.cached_file_count,
            })
            .collect();

        let mut unallocated = Vec::new();
        for index in 0..file.unallocated_block_count()? {
            let (offset, size) = file.unallocated_block(index)?;
            unallocated.push(RangeReport { offset, size });
        }

        Ok(Self {
            source: source.to_string(),
            version: header.version.to_string(),
            declared_size: header.declared_size,
            actual_size: header.actual_size,
            number_of_blocks: header.number_of_blocks,
            number_of_allocated_blocks: header.number_of_allocated_blocks,
            cache_size_limit: header.cache_size_limit,
            cache_size: header.cache_size,
            non_releasable_cache_size: header.non_releasable_cache_size,
            codepage: file.codepage().name().to_string(),
            cache_directories,
            items: file.item_count()?,
            recovered_items: file.recovered_item_count()?,
            walk: file.walk_stats()?.clone(),
            recovery: file.recovery_stats()?.clone(),
            unallocated,
        })
    }
}

/// One timestamp field, raw and converted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeReport {
    pub name: String,
    pub raw: u64,
    /// RFC 3339, absent when zero or not representable
    pub datetime: Option<String>,
}

impl TimeReport {
    fn new(name: &str, value: Timestamp) -> Self {
        let datetime = if value.is_zero() {
            None
        } else {
            value
                .to_datetime()
                .ok()
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.fZ").to_string())
        };
        Self {
            name: name.to_string(),
            raw: value.raw(),
            datetime,
        }
    }

    fn filetime(name: &str, value: Filetime) -> Self {
        Self::new(name, value.into())
    }

    fn fat(name: &str, value: FatDateTime) -> Self {
        Self::new(name, value.into())
    }

    fn render(&self) -> String {
        match (&self.datetime, self.raw) {
            (_, 0) => "Not set (0)".to_string(),
            (Some(dt), _) => dt.clone(),
            (None, raw) => format!("0x{:x} (not representable)", raw),
        }
    }
}

/// One item, flattened for output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemReport {
    pub collection: Collection,
    pub index: u32,
    pub offset: u64,
    pub record_size: u64,
    pub item_type: String,
    pub unallocated: bool,
    /// Only the leading blocks of the record survived
    pub partial: bool,
    pub location: Option<String>,
    pub filename: Option<String>,
    pub cache_directory_index: Option<i8>,
    pub cache_directory: Option<String>,
    pub cached_file_size: Option<u64>,
    pub number_of_hits: Option<u32>,
    pub non_releasable_time_delta: Option<u32>,
    pub cache_entry_flags: Option<String>,
    pub times: Vec<TimeReport>,
    pub data_size: Option<u64>,
    pub data_blake3: Option<String>,
    /// Signature of a record without a dedicated decoder
    pub signature: Option<String>,
}

impl ItemReport {
    pub fn build<S: Source>(
        file: &File<S>,
        item: &Item,
        collection: Collection,
        index: u32,
    ) -> Result<Self> {
        let mut report = Self {
            collection,
            index,
            offset: item.offset,
            record_size: item.record_size,
            item_type: item.item_type().to_string(),
            unallocated: item.flags.contains(ItemFlags::UNALLOCATED),
            partial: item.flags.contains(ItemFlags::PARTIAL),
            location: None,
            filename: None,
            cache_directory_index: None,
            cache_directory: None,
            cached_file_size: None,
            number_of_hits: None,
            non_releasable_time_delta: None,
            cache_entry_flags: None,
            times: Vec::new(),
            data_size: None,
            data_blake3: None,
            signature: None,
        };

        match &item.kind {
            ItemKind::Url(url) => {
                report.location = url.location.clone();
                report.filename = url.filename.clone();
                report.cache_directory_index = Some(url.cache_directory_index);
                if let Some(dir) = url.cache_directory() {
                    report.cache_directory = file.cache_directory(dir as u32)?;
                }
                report.cached_file_size = Some(url.cached_file_size);
                report.number_of_hits = Some(url.number_of_hits);
                report.non_releasable_time_delta = Some(url.non_releasable_time_delta);
                report.cache_entry_flags = Some(url.cache_entry_flags.to_string());
                report.times = vec![
                    TimeReport::filetime("primary", url.primary_time),
                    TimeReport::filetime("secondary", url.secondary_time),
                    TimeReport::new("expiration", url.expiration_time),
                    TimeReport::fat("last_checked", url.last_checked_time),
                ];
                if let Some(data) = &url.data {
                    report.data_size = Some(data.len() as u64);
                    report.data_blake3 = Some(blake3::hash(data).to_hex().to_string());
                }
            }
            ItemKind::Leak(leak) => {
                report.filename = leak.filename.clone();
                report.cache_directory_index = i8::try_from(leak.cache_directory_index).ok();
                report.cache_directory = file.cache_directory(leak.cache_directory_index as u32)?;
                report.cached_file_size = Some(leak.cached_file_size);
            }
            ItemKind::Redirected(redr) => {
                report.location = redr.location.clone();
            }
            ItemKind::Generic { signature } => {
                report.signature = Some(hex::encode(signature));
            }
        }

        Ok(report)
    }
}

// ============================================================================
// Human rendering
// ============================================================================

fn size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

pub fn format_file_report(report: &FileReport, show_unallocated: bool) -> String {
    let mut out = String::new();

    out.push_str(&format!("\n  {}\n", "MSIE Cache File information".bold()));
    out.push_str("  ==========================================\n\n");
    out.push_str(&format!("  Source:                   {}\n", report.source));
    out.push_str(&format!("  Format version:           {}\n", report.version));
    out.push_str(&format!(
        "  File size:                {} ({} bytes)\n",
        size(report.declared_size),
        report.declared_size
    ));
    if report.actual_size != report.declared_size {
        out.push_str(&format!(
            "  Actual size:              {} ({} bytes) {}\n",
            size(report.actual_size),
            report.actual_size,
            "[size mismatch]".yellow()
        ));
    }
    out.push_str(&format!(
        "  Blocks:                   {} ({} allocated)\n",
        report.number_of_blocks, report.number_of_allocated_blocks
    ));
    out.push_str(&format!(
        "  Cache size:               {} of {} limit\n",
        size(report.cache_size as u64),
        size(report.cache_size_limit as u64)
    ));
    out.push_str(&format!(
        "  Non-releasable:           {}\n",
        size(report.non_releasable_cache_size as u64)
    ));
    out.push_str(&format!("  Codepage:                 {}\n", report.codepage));

    out.push_str(&format!(
        "\n  Cache directories:        {}\n",
        report.cache_directories.len()
    ));
    for dir in &report.cache_directories {
        out.push_str(&format!(
            "    {:>2}: {:<10} {} files\n",
            dir.index,
            dir.name.as_deref().unwrap_or("(unused)"),
            dir.cached_files
        ));
    }

    out.push_str(&format!("\n  Items:                    {}\n", report.items));
    out.push_str(&format!(
        "  Recovered items:          {}\n",
        report.recovered_items
    ));
    out.push_str(&format!(
        "  HASH records:             {} ({} entries skipped)\n",
        report.walk.hash_records, report.walk.entries_skipped
    ));
    if report.walk.chains_abandoned > 0 {
        out.push_str(&format!(
            "  {}\n",
            format!("Hash chain cut short {} time(s)", report.walk.chains_abandoned).yellow()
        ));
    }

    if show_unallocated {
        out.push_str(&format!(
            "\n  Unallocated ranges:       {}\n",
            report.unallocated.len()
        ));
        for range in &report.unallocated {
            out.push_str(&format!(
                "    0x{:08x} - 0x{:08x} ({})\n",
                range.offset,
                range.offset + range.size,
                size(range.size)
            ));
        }
    }

    out
}

pub fn format_item_report(report: &ItemReport) -> String {
    let mut out = String::new();

    let heading = format!(
        "{} item {}: {} at 0x{:08x} ({} bytes)",
        report.collection.as_str(),
        report.index + 1,
        report.item_type,
        report.offset,
        report.record_size
    );
    match report.collection {
        Collection::Live => out.push_str(&format!("\n  {}\n", heading.bold())),
        Collection::Recovered => out.push_str(&format!("\n  {}\n", heading.yellow().bold())),
    }
    if report.unallocated {
        out.push_str("    [in unallocated blocks]\n");
    }
    if report.partial {
        out.push_str("    [partial: later blocks reused by a live record]\n");
    }

    if let Some(signature) = &report.signature {
        out.push_str(&format!("    Signature:              {}\n", signature));
    }
    if let Some(location) = &report.location {
        out.push_str(&format!("    Location:               {}\n", location));
    }
    for time in &report.times {
        out.push_str(&format!(
            "    {:<24}{}\n",
            format!("{} time:", time.name.replace('_', " ")),
            time.render()
        ));
    }
    if let Some(flags) = &report.cache_entry_flags {
        out.push_str(&format!("    Cache entry flags:      {}\n", flags));
    }
    if let Some(hits) = report.number_of_hits {
        out.push_str(&format!("    Number of hits:         {}\n", hits));
    }
    if let Some(delta) = report.non_releasable_time_delta {
        out.push_str(&format!("    Non-releasable delta:   {} seconds\n", delta));
    }
    if let Some(cached) = report.cached_file_size {
        out.push_str(&format!("    Cached file size:       {}\n", size(cached)));
    }
    if let Some(index) = report.cache_directory_index {
        out.push_str(&format!(
            "    Cache directory:        {} ({})\n",
            report.cache_directory.as_deref().unwrap_or("none"),
            index
        ));
    }
    if let Some(filename) = &report.filename {
        out.push_str(&format!("    Filename:               {}\n", filename));
    }
    if let (Some(len), Some(digest)) = (report.data_size, &report.data_blake3) {
        out.push_str(&format!("    Data:                   {} bytes, blake3 {}\n", len, digest));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_report_rendering() {
        let epoch = TimeReport::filetime("primary", Filetime(116_444_736_000_000_000));
        assert_eq!(epoch.datetime.as_deref(), Some("1970-01-01T00:00:00Z"));

        let unset = TimeReport::fat("last_checked", FatDateTime(0));
        assert_eq!(unset.render(), "Not set (0)");

        // Month 13 is not a date
        let bad = TimeReport::fat("expiration", FatDateTime(13 << 5 | 1));
        assert!(bad.datetime.is_none());
        assert!(bad.render().contains("not representable"));
    }

    #[test]
    fn test_item_rendering_mentions_fields() {
        colored::control::set_override(false);
        let report = ItemReport {
            collection: Collection::Recovered,
            index: 0,
            offset: 0x5000,
            record_size: 256,
            item_type: "HISTORY".to_string(),
            unallocated: true,
            partial: true,
            location: Some("Visited: x".to_string()),
            filename: None,
            cache_directory_index: None,
            cache_directory: None,
            cached_file_size: None,
            number_of_hits: Some(3),
            non_releasable_time_delta: None,
            cache_entry_flags: None,
            times: Vec::new(),
            data_size: None,
            data_blake3: None,
            signature: None,
        };
        let text = format_item_report(&report);
        assert!(text.contains("recovered item 1: HISTORY at 0x00005000"));
        assert!(text.contains("[in unallocated blocks]"));
        assert!(text.contains("[partial: later blocks reused by a live record]"));
        assert!(text.contains("Visited: x"));
        assert!(text.contains("Number of hits:         3"));
    }

    #[test]
    fn test_collection_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Collection::Recovered).unwrap(), "\"recovered\"");
        assert_eq!(Collection::Live.as_str(), "live");
    }
}
