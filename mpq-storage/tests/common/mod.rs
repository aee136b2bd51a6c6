//! In-memory archive fixtures.
//!
//! The crate only reads archives, so the tests assemble their own: the
//! builder lays out storage regions, sector offset tables and the two
//! encrypted tables exactly as the reader expects to find them.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use mpq_crypto::{CryptTable, HashKind, normalize_path};
use mpq_storage::compression::tag;
use mpq_storage::{BlockEntry, BlockFlags, MAGIC};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const HEADER_SIZE: u32 = 32;

/// One entry to be packed into a fixture archive.
pub struct FileSpec {
    pub path: String,
    pub data: Vec<u8>,
    pub flags: u32,
    pub codec: u8,
    /// Verbatim storage region, bypassing the regular layout.
    pub blob_override: Option<Vec<u8>>,
}

impl FileSpec {
    pub fn stored(path: &str, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            data: data.to_vec(),
            flags: BlockFlags::EXISTS,
            codec: 0,
            blob_override: None,
        }
    }

    pub fn deflated(path: &str, data: &[u8]) -> Self {
        Self {
            flags: BlockFlags::EXISTS | BlockFlags::COMPRESSED,
            codec: tag::DEFLATE,
            ..Self::stored(path, data)
        }
    }

    pub fn imploded(path: &str, data: &[u8]) -> Self {
        Self {
            flags: BlockFlags::EXISTS | BlockFlags::IMPLODED,
            codec: tag::IMPLODE,
            ..Self::stored(path, data)
        }
    }

    pub fn with_flags(mut self, extra: u32) -> Self {
        self.flags |= extra;
        self
    }

    pub fn with_blob(mut self, blob: Vec<u8>) -> Self {
        self.blob_override = Some(blob);
        self
    }
}

/// Builds a syntactically valid archive image in memory.
pub struct ArchiveBuilder {
    sector_shift: u16,
    version: u16,
    hash_slots: u32,
    files: Vec<FileSpec>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            sector_shift: 0,
            version: 0,
            hash_slots: 16,
            files: Vec::new(),
        }
    }

    pub fn sector_shift(mut self, shift: u16) -> Self {
        self.sector_shift = shift;
        self
    }

    pub fn version(mut self, version: u16) -> Self {
        self.version = version;
        self
    }

    pub fn file(mut self, spec: FileSpec) -> Self {
        assert!(self.files.len() < self.hash_slots as usize);
        self.files.push(spec);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let crypt = CryptTable::get();
        let sector_size = 0x200usize << self.sector_shift;

        let mut out = vec![0u8; HEADER_SIZE as usize];
        let mut block_words: Vec<u32> = Vec::new();

        for spec in &self.files {
            let normalized = normalize_path(&spec.path);
            let file_pos = out.len() as u32;
            let flags = BlockFlags::from_bits(spec.flags);

            let entry = BlockEntry {
                file_pos,
                compressed_size: 0,
                file_size: spec.data.len() as u32,
                flags,
            };
            let seed = entry.encryption_seed(&normalized);

            let blob = match &spec.blob_override {
                Some(blob) => blob.clone(),
                None => build_blob(spec, flags, sector_size, seed),
            };

            block_words.extend([
                file_pos,
                blob.len() as u32,
                spec.data.len() as u32,
                spec.flags,
            ]);
            out.extend_from_slice(&blob);
        }

        // Hash table: one slot per file in declaration order, the rest
        // empty.
        let mut slots: Vec<u32> = Vec::with_capacity(self.hash_slots as usize * 4);
        for (index, spec) in self.files.iter().enumerate() {
            let normalized = normalize_path(&spec.path);
            slots.extend([
                crypt.hash_string(&normalized, HashKind::NameA),
                crypt.hash_string(&normalized, HashKind::NameB),
                0,
                index as u32,
            ]);
        }
        for _ in self.files.len()..self.hash_slots as usize {
            slots.extend([0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF, 0xFFFF_FFFF]);
        }

        let hash_table_offset = out.len() as u32;
        crypt.encrypt_words(&mut slots, crypt.hash_string("(hash table)", HashKind::FileKey));
        for word in &slots {
            out.extend_from_slice(&word.to_le_bytes());
        }

        let block_table_offset = out.len() as u32;
        crypt.encrypt_words(
            &mut block_words,
            crypt.hash_string("(block table)", HashKind::FileKey),
        );
        for word in &block_words {
            out.extend_from_slice(&word.to_le_bytes());
        }

        // Patch the header in place.
        let archive_size = out.len() as u32;
        let header = [
            &MAGIC[..],
            &HEADER_SIZE.to_le_bytes(),
            &archive_size.to_le_bytes(),
            &self.version.to_le_bytes(),
            &self.sector_shift.to_le_bytes(),
            &hash_table_offset.to_le_bytes(),
            &block_table_offset.to_le_bytes(),
            &self.hash_slots.to_le_bytes(),
            &(self.files.len() as u32).to_le_bytes(),
        ]
        .concat();
        out[..HEADER_SIZE as usize].copy_from_slice(&header);

        out
    }

    pub fn build_cursor(self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }
}

fn build_blob(spec: &FileSpec, flags: BlockFlags, sector_size: usize, seed: u32) -> Vec<u8> {
    let crypt = CryptTable::get();
    let encrypt = flags.is_encrypted() && spec.data.len() > 3;

    if !flags.has_compression() {
        let mut blob = spec.data.clone();
        if encrypt {
            if flags.is_single_unit() {
                crypt.encrypt_bytes(&mut blob, seed);
            } else {
                for (index, chunk) in blob.chunks_mut(sector_size).enumerate() {
                    crypt.encrypt_bytes(chunk, seed.wrapping_add(index as u32));
                }
            }
        }
        return blob;
    }

    if flags.is_single_unit() {
        let mut blob = compress(&spec.data, spec.codec);
        if blob.len() >= spec.data.len() {
            blob = spec.data.clone();
        }
        if encrypt {
            crypt.encrypt_bytes(&mut blob, seed);
        }
        return blob;
    }

    if spec.data.is_empty() {
        return Vec::new();
    }

    // Sectored: offset table first, then each sector, compressed only
    // where that actually saves space.
    let sectors: Vec<Vec<u8>> = spec
        .data
        .chunks(sector_size)
        .map(|chunk| {
            let packed = compress(chunk, spec.codec);
            if packed.len() < chunk.len() {
                packed
            } else {
                chunk.to_vec()
            }
        })
        .collect();

    let table_bytes = (sectors.len() + 1) * 4;
    let mut offsets = Vec::with_capacity(sectors.len() + 1);
    let mut cursor = table_bytes as u32;
    offsets.push(cursor);
    for sector in &sectors {
        cursor += sector.len() as u32;
        offsets.push(cursor);
    }

    if encrypt {
        crypt.encrypt_words(&mut offsets, seed.wrapping_sub(1));
    }

    let mut blob = Vec::new();
    for word in &offsets {
        blob.extend_from_slice(&word.to_le_bytes());
    }
    for (index, sector) in sectors.into_iter().enumerate() {
        let mut sector = sector;
        if encrypt {
            crypt.encrypt_bytes(&mut sector, seed.wrapping_add(index as u32));
        }
        blob.extend_from_slice(&sector);
    }
    blob
}

/// Tagged sector image for `data`: method byte, then the packed payload.
pub fn compress(data: &[u8], codec: u8) -> Vec<u8> {
    let payload = match codec {
        tag::DEFLATE => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
        tag::IMPLODE => pklib::implode_bytes(
            data,
            pklib::CompressionMode::Binary,
            pklib::DictionarySize::Size2K,
        )
        .unwrap(),
        other => panic!("fixture has no compressor for tag {other:#04x}"),
    };

    let mut sector = vec![codec];
    sector.extend_from_slice(&payload);
    sector
}

/// `Read + Seek` wrapper that counts operations hitting the source, so
/// tests can observe which reads were served from the sector cache.
pub struct CountingReader<R> {
    inner: R,
    seeks: Arc<AtomicUsize>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R) -> (Self, Arc<AtomicUsize>) {
        let seeks = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                seeks: Arc::clone(&seeks),
            },
            seeks,
        )
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for CountingReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.seeks.fetch_add(1, Ordering::Relaxed);
        self.inner.seek(pos)
    }
}
