//! Random-access byte sources.
//!
//! Every read is addressed by absolute offset and bounds-checked against
//! [`Source::size`] before any I/O happens. There is no shared cursor: the
//! hash walker and the recovery scanner interleave reads freely.
//!
//! # Design
//!
//! - **MemorySource**: owned buffer, used by tests and small inputs
//! - **MmapSource**: read-only `memmap2` mapping of an evidence file
//! - **StreamSource**: any `Read + Seek` the host hands us; every read
//!   seeks to its absolute offset first, so the stream position carries no
//!   meaning between calls

use std::cell::RefCell;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};
use crate::readonly::open_readonly;

/// A read-only, randomly addressable byte container of fixed size
pub trait Source {
    /// Total number of bytes available
    fn size(&self) -> u64;

    /// Fill `buf` from `offset`. Callers have already bounds-checked.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Read `length` bytes at `offset`, failing with `TruncatedRead` when
    /// the source is too short.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        check_bounds(self.size(), offset, length as u64)?;
        let mut buf = vec![0u8; length];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Read a little-endian u32 at `offset`
    fn read_u32(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        check_bounds(self.size(), offset, 4)?;
        self.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

impl<S: Source + ?Sized> Source for &S {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

fn check_bounds(size: u64, offset: u64, length: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::TruncatedRead {
            offset,
            length,
            size,
        }),
    }
}

// ============================================================================
// In-memory buffer
// ============================================================================

/// Owned in-memory source
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl Source for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.size(), offset, buf.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }
}

// ============================================================================
// Memory-mapped evidence file
// ============================================================================

/// Read-only memory map over a file on disk
pub struct MmapSource {
    mmap: Option<memmap2::Mmap>,
}

impl MmapSource {
    /// Map `path` read-only. Empty files are accepted and report size 0.
    pub fn open(path: &Path) -> Result<Self> {
        let file = open_readonly(path)?;
        let len = file.metadata()?.len();

        // Mapping a zero-length file fails on some platforms
        if len == 0 {
            return Ok(Self { mmap: None });
        }

        // SAFETY: the file is opened read-only and the mapping is never
        // written through. External truncation while mapped is outside our
        // control, as with any mmap-based reader.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };

        tracing::debug!(path = %path.display(), size = len, "Mapped source file");
        Ok(Self { mmap: Some(mmap) })
    }

    fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl Source for MmapSource {
    fn size(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.size(), offset, buf.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.bytes()[start..start + buf.len()]);
        Ok(())
    }
}

// ============================================================================
// Host-supplied stream
// ============================================================================

/// Adapter over any seekable reader
pub struct StreamSource<R> {
    inner: RefCell<R>,
    size: u64,
}

impl<R: Read + Seek> StreamSource<R> {
    /// Wrap `reader`, measuring its length by seeking to the end
    pub fn new(mut reader: R) -> Result<Self> {
        let size = reader.seek(SeekFrom::End(0))?;
        Ok(Self {
            inner: RefCell::new(reader),
            size,
        })
    }

    /// Give the reader back
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: Read + Seek> Source for StreamSource<R> {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(self.size, offset, buf.len() as u64)?;
        let mut reader = self.inner.borrow_mut();
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::TruncatedRead {
                    offset,
                    length: buf.len() as u64,
                    size: self.size,
                }
            } else {
                Error::Io(e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_memory_read_in_bounds() {
        let src = MemorySource::new((0u8..16).collect());
        assert_eq!(src.size(), 16);
        assert_eq!(src.read(4, 4).unwrap(), vec![4, 5, 6, 7]);
        assert_eq!(src.read(16, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_memory_read_past_end_is_truncated() {
        let src = MemorySource::new(vec![0u8; 8]);
        match src.read(6, 4) {
            Err(Error::TruncatedRead {
                offset,
                length,
                size,
            }) => {
                assert_eq!((offset, length, size), (6, 4, 8));
            }
            other => panic!("expected TruncatedRead, got {:?}", other),
        }
    }

    #[test]
    fn test_offset_overflow_is_truncated() {
        let src = MemorySource::new(vec![0u8; 8]);
        assert!(matches!(
            src.read(u64::MAX - 1, 4),
            Err(Error::TruncatedRead { .. })
        ));
    }

    #[test]
    fn test_stream_reads_are_position_independent() {
        let src = StreamSource::new(Cursor::new((0u8..32).collect::<Vec<_>>())).unwrap();
        assert_eq!(src.size(), 32);
        assert_eq!(src.read(20, 2).unwrap(), vec![20, 21]);
        assert_eq!(src.read(2, 2).unwrap(), vec![2, 3]);
        assert_eq!(src.read_u32(0).unwrap(), u32::from_le_bytes([0, 1, 2, 3]));
    }

    #[test]
    fn test_mmap_source_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"abcdefgh").unwrap();

        let src = MmapSource::open(&path).unwrap();

        assert_eq!(src.size(), 8);
        assert_eq!(src.read(2, 3).unwrap(), b"cde".to_vec());
    }

    #[test]
    fn test_mmap_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let src = MmapSource::open(&path).unwrap();

        assert_eq!(src.size(), 0);
        assert!(src.read(0, 1).is_err());
    }
}
