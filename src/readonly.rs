//! Read-Only Enforcement Module
//!
//! Evidence files are only ever opened for reading. On top of that:
//! - A global enforcement toggle (on by default)
//! - A write-access probe that warns when the evidence is not write protected
//! - Pre-operation safety checks for the CLI

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use colored::Colorize;

// ============================================================================
// Global Read-Only State
// ============================================================================

static READONLY_ENFORCED: AtomicBool = AtomicBool::new(true);

/// Enable the write-access probe on every evidence open
pub fn enable_readonly_enforcement() {
    READONLY_ENFORCED.store(true, Ordering::SeqCst);
    tracing::debug!("Read-only enforcement enabled");
}

/// Disable the write-access probe
pub fn disable_readonly_enforcement() {
    READONLY_ENFORCED.store(false, Ordering::SeqCst);
    tracing::warn!("Read-only enforcement disabled");
}

pub fn is_readonly_enforced() -> bool {
    READONLY_ENFORCED.load(Ordering::SeqCst)
}

// ============================================================================
// Safe File Opening
// ============================================================================

/// Open an evidence file for reading.
///
/// The returned handle never carries write access. With enforcement on, a
/// file that *could* be opened for writing is reported at warn level.
pub fn open_readonly(path: &Path) -> io::Result<File> {
    if is_readonly_enforced() && is_writable(path) {
        tracing::warn!(
            path = %path.display(),
            "Evidence file is writable; consider working on a write-protected copy"
        );
    }

    File::open(path)
}

/// Probe for write access without truncating or creating anything
pub fn is_writable(path: &Path) -> bool {
    OpenOptions::new()
        .write(true)
        .create(false)
        .open(path)
        .is_ok()
}

// ============================================================================
// Pre-Operation Checks
// ============================================================================

/// Run safety checks before touching a source. Prints a short status block
/// to stderr so report output stays clean.
pub fn run_safety_checks(source: &Path) -> Result<(), String> {
    if !source.exists() {
        return Err(format!("Source does not exist: {}", source.display()));
    }

    let metadata = std::fs::metadata(source)
        .map_err(|e| format!("Cannot read source metadata: {}: {}", source.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("Source is not a regular file: {}", source.display()));
    }

    if is_readonly_enforced() {
        eprintln!("  {} Read-only enforcement enabled", "✓".green());
    } else {
        eprintln!("  {} Read-only enforcement is DISABLED", "⚠".yellow());
    }

    if metadata.permissions().readonly() {
        eprintln!("  {} Source is write protected", "🔒".green());
    } else {
        eprintln!(
            "  {} {}",
            "⚠".yellow().bold(),
            "Source is writable; it will still only be read".yellow()
        );
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
