//! Synthetic index.dat builder shared by the integration tests and benches

#![allow(dead_code)]

pub const BLOCK_AREA: usize = 0x4000;
pub const BLOCK: usize = 128;
const BITMAP: usize = 0x250;

/// Fields of a synthetic URL record
#[derive(Debug, Clone, Default)]
pub struct UrlSpec {
    pub location: Option<Vec<u8>>,
    pub filename: Option<Vec<u8>>,
    pub primary_time: u64,
    pub secondary_time: u64,
    /// Written as 8 bytes for 4.7 files, 4 bytes otherwise
    pub expiration: u64,
    pub last_checked: u32,
    pub cached_file_size: u32,
    pub directory: i8,
    pub hits: u32,
    pub flags: u32,
    pub data: Option<Vec<u8>>,
}

impl UrlSpec {
    pub fn location(location: &str) -> Self {
        Self {
            location: Some(nul_terminated(location.as_bytes())),
            directory: -1,
            ..Default::default()
        }
    }
}

pub fn nul_terminated(bytes: &[u8]) -> Vec<u8> {
    let mut out = bytes.to_vec();
    out.push(0);
    out
}

pub fn block_offset(block: u32) -> u64 {
    (BLOCK_AREA + block as usize * BLOCK) as u64
}

/// Builds an MSIECF file block by block
pub struct CacheFileBuilder {
    data: Vec<u8>,
    version: [u8; 4],
    blocks: u32,
    directories: u32,
    declared_size: Option<u32>,
    next_hash: u32,
}

impl CacheFileBuilder {
    /// Empty file with `blocks` record blocks and the version string `"5.2"`
    pub fn new(version: &str, blocks: u32) -> Self {
        let mut v = [0u8; 4];
        v[..3].copy_from_slice(&version.as_bytes()[..3]);

        let size = BLOCK_AREA + blocks as usize * BLOCK;
        let mut data = vec![0u8; size];
        data[..24].copy_from_slice(b"Client UrlCache MMF Ver ");
        data[24..28].copy_from_slice(&v);

        Self {
            data,
            version: v,
            blocks,
            directories: 0,
            declared_size: None,
            next_hash: 0x1000,
        }
    }

    fn is_v47(&self) -> bool {
        &self.version[..3] == b"4.7"
    }

    fn put32(&mut self, off: usize, v: u32) {
        self.data[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn put64(&mut self, off: usize, v: u64) {
        self.data[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn directory(mut self, name: &str, files: u32) -> Self {
        let entry = 0x4c + self.directories as usize * 12;
        self.put32(entry, files);
        let bytes = name.as_bytes();
        self.data[entry + 4..entry + 4 + bytes.len().min(8)]
            .copy_from_slice(&bytes[..bytes.len().min(8)]);
        self.directories += 1;
        self
    }

    pub fn declared_size(mut self, size: u32) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn allocate(&mut self, block: u32, count: u32) {
        for b in block..block + count {
            self.data[BITMAP + b as usize / 8] |= 1 << (b % 8);
        }
    }

    pub fn free(mut self, block: u32, count: u32) -> Self {
        for b in block..block + count {
            self.data[BITMAP + b as usize / 8] &= !(1 << (b % 8));
        }
        self
    }

    fn write_record(&mut self, block: u32, signature: &[u8; 4], body: &[u8]) -> (u64, u32) {
        let blocks = body.len().div_ceil(BLOCK).max(1) as u32;
        let off = block_offset(block) as usize;
        self.data[off..off + body.len()].copy_from_slice(body);
        self.data[off..off + 4].copy_from_slice(signature);
        self.put32(off + 4, blocks);
        self.allocate(block, blocks);
        (off as u64, blocks)
    }

    /// URL record at `block`; returns its offset
    pub fn url(&mut self, block: u32, spec: &UrlSpec) -> u64 {
        let v47 = self.is_v47();
        let shift = if v47 { 4 } else { 0 };
        let header = if v47 { 100 } else { 96 };

        let mut body = vec![0u8; header];
        let append = |body: &mut Vec<u8>, bytes: &[u8]| -> u32 {
            let at = body.len() as u32;
            body.extend_from_slice(bytes);
            at
        };

        let location = spec.location.as_ref().map(|l| append(&mut body, l)).unwrap_or(0);
        let filename = spec.filename.as_ref().map(|f| append(&mut body, f)).unwrap_or(0);
        let data = spec.data.as_ref().map(|d| append(&mut body, d)).unwrap_or(0);
        let data_size = spec.data.as_ref().map_or(0, |d| d.len() as u32);

        let le32 = |body: &mut Vec<u8>, off: usize, v: u32| {
            body[off..off + 4].copy_from_slice(&v.to_le_bytes());
        };
        body[0x08..0x10].copy_from_slice(&spec.secondary_time.to_le_bytes());
        body[0x10..0x18].copy_from_slice(&spec.primary_time.to_le_bytes());
        if v47 {
            body[0x18..0x20].copy_from_slice(&spec.expiration.to_le_bytes());
        } else {
            le32(&mut body, 0x18, spec.expiration as u32);
        }
        le32(&mut body, 0x20, spec.cached_file_size);
        le32(&mut body, 0x34 + shift, location);
        body[0x38 + shift] = spec.directory as u8;
        le32(&mut body, 0x3c + shift, filename);
        le32(&mut body, 0x40 + shift, spec.flags);
        le32(&mut body, 0x44 + shift, data);
        le32(&mut body, 0x48 + shift, data_size);
        le32(&mut body, 0x50 + shift, spec.last_checked);
        le32(&mut body, 0x54 + shift, spec.hits);

        self.write_record(block, b"URL ", &body).0
    }

    pub fn leak(&mut self, block: u32, filename: &str, directory: u8) -> u64 {
        let mut body = vec![0u8; 96];
        body[0x38] = directory;
        body[0x3c..0x40].copy_from_slice(&96u32.to_le_bytes());
        body.extend_from_slice(&nul_terminated(filename.as_bytes()));
        self.write_record(block, b"LEAK", &body).0
    }

    pub fn redirected(&mut self, block: u32, location: &str) -> u64 {
        let mut body = vec![0u8; 16];
        body.extend_from_slice(&nul_terminated(location.as_bytes()));
        self.write_record(block, b"REDR", &body).0
    }

    /// Record prologue only, with an arbitrary block count
    pub fn raw_prologue(&mut self, block: u32, signature: &[u8; 4], blocks: u32) -> u64 {
        let off = block_offset(block) as usize;
        self.data[off..off + 4].copy_from_slice(signature);
        self.put32(off + 4, blocks);
        self.allocate(block, 1);
        off as u64
    }

    /// HASH record at `block` holding `(hash, offset)` pairs
    pub fn hash_raw(&mut self, block: u32, blocks: u32, next: Option<u32>, entries: &[(u32, u32)]) -> u64 {
        let mut body = vec![0u8; blocks as usize * BLOCK];
        body[8..12].copy_from_slice(&next.map_or(0, |b| block_offset(b) as u32).to_le_bytes());
        // Every slot starts out as the "uninitialized" marker
        for slot in body[16..].chunks_exact_mut(8) {
            slot[..4].copy_from_slice(&0x0BAD_F00Du32.to_le_bytes());
        }
        for (i, (hash, target)) in entries.iter().enumerate() {
            let at = 16 + i * 8;
            body[at..at + 4].copy_from_slice(&hash.to_le_bytes());
            body[at + 4..at + 8].copy_from_slice(&target.to_le_bytes());
        }
        self.write_record(block, b"HASH", &body).0
    }

    /// HASH record pointing at `targets` with valid hash values
    pub fn hash(&mut self, block: u32, blocks: u32, next: Option<u32>, targets: &[u64]) -> u64 {
        let entries: Vec<(u32, u32)> = targets
            .iter()
            .map(|&target| {
                self.next_hash += 0x10;
                (self.next_hash, target as u32)
            })
            .collect();
        self.hash_raw(block, blocks, next, &entries)
    }

    pub fn first_hash(mut self, block: u32) -> Self {
        let off = block_offset(block) as u32;
        self.put32(0x20, off);
        self
    }

    /// Point the header at an arbitrary hash offset
    pub fn first_hash_offset(mut self, offset: u32) -> Self {
        self.put32(0x20, offset);
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let size = self.declared_size.unwrap_or(self.data.len() as u32);
        self.put32(0x1c, size);
        self.put32(0x24, self.blocks);
        let allocated: u32 = self.data[BITMAP..BITMAP + (self.blocks as usize).div_ceil(8)]
            .iter()
            .map(|b| b.count_ones())
            .sum();
        self.put32(0x28, allocated);
        self.put32(0x30, 0x0200_0000);
        self.put32(0x38, 0x0010_0000);
        self.put32(0x48, self.directories);
        self.data
    }
}

/// A small but complete history file: one HASH record pointing at a URL,
/// a LEAK and a REDR record, plus two directories
pub fn sample_file(version: &str) -> (Vec<u8>, Vec<u64>) {
    let mut builder = CacheFileBuilder::new(version, 64)
        .directory("ABCD1234", 12)
        .directory("EFGH5678", 3);

    let url = builder.url(
        4,
        &UrlSpec {
            filename: Some(nul_terminated(b"page[1].htm")),
            primary_time: 0x01CB_0000_0000_0000,
            expiration: 0x3CEF_6A4B,
            cached_file_size: 4096,
            directory: 1,
            hits: 5,
            flags: 0x0020_0001,
            data: Some(vec![0xAB; 24]),
            ..UrlSpec::location("Visited: alice@http://example.com/")
        },
    );
    let leak = builder.leak(12, "old[2].gif", 0);
    let redr = builder.redirected(14, "http://example.com/moved");
    builder.hash(0, 4, None, &[url, leak, redr]);

    (builder.first_hash(0).build(), vec![url, leak, redr])
}
