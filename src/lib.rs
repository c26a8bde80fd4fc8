//! MSIECF Drill Library
//!
//! Read-only forensic reader for the MSIE Cache File format (`index.dat`)
//! used by Internet Explorer for its cache, history and cookie indexes.
//!
//! # Features
//!
//! - **Format detection**: signature probe over any source or path
//! - **Hash table walk**: live entries, with cycle and bounds guards
//! - **Recovery**: orphaned and deleted records found by block scanning
//! - **Read-Only Safe**: sources are never written
//! - **Codepages**: narrow strings decoded through `encoding_rs`
//!
//! # Example
//!
//! ```no_run
//! use msiecf_drill::File;
//! use std::path::Path;
//!
//! fn main() -> msiecf_drill::Result<()> {
//!     let file = File::open_path(Path::new("index.dat"))?;
//!
//!     for item in file.items() {
//!         let item = item?;
//!         println!("{} at 0x{:08x}", item.item_type(), item.offset());
//!     }
//!
//!     println!("{} recovered", file.recovered_item_count()?);
//!     Ok(())
//! }
//! ```

pub mod abort;
pub mod cli;
pub mod codepage;
pub mod config;
pub mod error;
pub mod file;
pub mod format;
pub mod readonly;
pub mod recovery;
pub mod report;
pub mod source;

// Re-export commonly used types
pub use abort::AbortHandle;
pub use codepage::Codepage;
pub use config::Config;
pub use error::{Error, Result};
pub use file::{File, OpenOptions};
pub use format::{
    check_file_signature, detect, detect_signature, CacheEntryFlags, FileHeader, FormatVersion,
    Item, ItemFlags, ItemKind, ItemType, LeakPayload, RedirectedPayload, Timestamp, UrlPayload,
    UrlType,
};
pub use readonly::{is_readonly_enforced, open_readonly, run_safety_checks};
pub use recovery::{RecoveryOptions, RecoveryScanner, RecoveryStats};
pub use source::{MemorySource, MmapSource, Source, StreamSource};
