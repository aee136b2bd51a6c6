//! Seekable streams over individual archive entries.

use byteorder::{LittleEndian, ReadBytesExt};
use mpq_crypto::CryptTable;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::trace;

use crate::compression::SectorCodecs;
use crate::tables::BlockEntry;
use crate::{Error, Result};

/// A read-only, seekable view of one archive entry.
///
/// Sectors are materialized lazily: at most one decoded sector is cached
/// at a time, reads crossing a boundary replace it with the next, and
/// seeks within the cached sector move the cursor without touching the
/// source. Streams over the same entry are fully independent; the
/// underlying archive source is shared behind a lock and only held for
/// the duration of one raw sector read.
pub struct FileStream<R> {
    source: Arc<Mutex<R>>,
    codecs: Arc<SectorCodecs>,
    block: BlockEntry,
    sector_size: usize,
    /// Cipher seed for the entry's payload; `None` when not encrypted.
    key: Option<u32>,
    /// Sector boundaries relative to the entry's storage region; present
    /// only for compressed multi-sector entries.
    sector_offsets: Option<Vec<u32>>,
    position: u64,
    cached_sector: Option<usize>,
    cache: Vec<u8>,
}

impl<R: Read + Seek> FileStream<R> {
    pub(crate) fn open(
        source: Arc<Mutex<R>>,
        codecs: Arc<SectorCodecs>,
        block: BlockEntry,
        normalized_path: &str,
        sector_size: usize,
    ) -> Result<Self> {
        if block.flags.is_patch_file() {
            return Err(Error::UnsupportedFeature("patch files"));
        }

        let key = block
            .flags
            .is_encrypted()
            .then(|| block.encryption_seed(normalized_path));

        let mut stream = Self {
            source,
            codecs,
            block,
            sector_size,
            key,
            sector_offsets: None,
            position: 0,
            cached_sector: None,
            cache: Vec::new(),
        };

        if block.flags.has_compression() && !block.flags.is_single_unit() && block.file_size > 0 {
            stream.sector_offsets = Some(stream.load_sector_offsets()?);
        }

        Ok(stream)
    }

    /// Decompressed size of the entry. Costs no IO.
    pub fn size(&self) -> u64 {
        u64::from(self.block.file_size)
    }

    /// Current stream position.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn sector_count(&self) -> usize {
        (self.block.file_size as usize).div_ceil(self.sector_size)
    }

    /// Load the per-entry sector offset table: one boundary per sector
    /// plus a terminal entry, encrypted one seed below the payload.
    fn load_sector_offsets(&mut self) -> Result<Vec<u32>> {
        let entry_count = self.sector_count() + 1;
        let table_bytes = entry_count * 4;

        let mut offsets = vec![0u32; entry_count];
        {
            let mut source = self.source.lock();
            source.seek(SeekFrom::Start(u64::from(self.block.file_pos)))?;
            source
                .read_u32_into::<LittleEndian>(&mut offsets)
                .map_err(short_read("sector offset table"))?;
        }

        if let Some(key) = self.key {
            CryptTable::get().decrypt_words(&mut offsets, key.wrapping_sub(1));
        }

        // Self-check: the table locates itself at the start of the
        // region, and the first sector ends within one sector of it.
        if offsets[0] as usize != table_bytes {
            return Err(Error::CorruptArchive(format!(
                "sector offset table leads with {:#x}, expected {table_bytes:#x}",
                offsets[0]
            )));
        }
        if offsets[1] as usize > self.sector_size + table_bytes {
            return Err(Error::CorruptArchive(format!(
                "first sector ends at {:#x}, past the sector size bound",
                offsets[1]
            )));
        }

        trace!(sectors = entry_count - 1, "loaded sector offset table");
        Ok(offsets)
    }

    /// Make the cache cover the sector under the current position.
    fn fill_cache(&mut self) -> Result<()> {
        if self.block.flags.is_single_unit() {
            if self.cached_sector.is_none() {
                self.cache = self.load_single_unit()?;
                self.cached_sector = Some(0);
            }
            return Ok(());
        }

        let index = (self.position / self.sector_size as u64) as usize;
        if self.cached_sector != Some(index) {
            self.cache = self.load_sector(index)?;
            self.cached_sector = Some(index);
        }
        Ok(())
    }

    fn load_single_unit(&mut self) -> Result<Vec<u8>> {
        let mut data = vec![0u8; self.block.compressed_size as usize];
        {
            let mut source = self.source.lock();
            source.seek(SeekFrom::Start(u64::from(self.block.file_pos)))?;
            source.read_exact(&mut data).map_err(short_read("single-unit entry"))?;
        }

        if let Some(key) = self.key
            && self.block.file_size > 3
        {
            CryptTable::get().decrypt_bytes(&mut data, key);
        }

        let expected = self.block.file_size as usize;
        if data.len() != expected {
            data = self.codecs.decompress(&data, expected)?;
        }

        trace!(bytes = data.len(), "materialized single-unit entry");
        Ok(data)
    }

    fn load_sector(&mut self, index: usize) -> Result<Vec<u8>> {
        let sector_size = self.sector_size as u64;
        let start_in_entry = index as u64 * sector_size;
        let expected = (u64::from(self.block.file_size) - start_in_entry).min(sector_size) as usize;

        let (raw_start, raw_len) = match &self.sector_offsets {
            Some(offsets) => {
                let start = u64::from(offsets[index]);
                let end = u64::from(offsets[index + 1]);
                if end < start || end > u64::from(self.block.compressed_size) {
                    return Err(Error::CorruptArchive(format!(
                        "sector {index} spans {start:#x}..{end:#x} outside its region"
                    )));
                }
                (start, (end - start) as usize)
            }
            None => (start_in_entry, expected),
        };

        let mut data = vec![0u8; raw_len];
        {
            let mut source = self.source.lock();
            source.seek(SeekFrom::Start(u64::from(self.block.file_pos) + raw_start))?;
            source.read_exact(&mut data).map_err(short_read("sector"))?;
        }

        if let Some(key) = self.key
            && self.block.file_size > 3
        {
            CryptTable::get().decrypt_bytes(&mut data, key.wrapping_add(index as u32));
        }

        if data.len() != expected {
            data = self.codecs.decompress(&data, expected)?;
        }

        trace!(index, bytes = data.len(), "loaded sector");
        Ok(data)
    }
}

impl<R: Read + Seek> Read for FileStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;

        while copied < buf.len() && self.position < self.size() {
            self.fill_cache().map_err(io::Error::other)?;

            let in_sector = if self.block.flags.is_single_unit() {
                self.position as usize
            } else {
                (self.position % self.sector_size as u64) as usize
            };
            let available = self.cache.len().saturating_sub(in_sector);
            if available == 0 {
                break;
            }

            let take = available.min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&self.cache[in_sector..in_sector + take]);
            self.position += take as u64;
            copied += take;
        }

        Ok(copied)
    }
}

impl<R: Read + Seek> Seek for FileStream<R> {
    /// Reposition the cursor. Seeking past end-of-file is allowed; reads
    /// there return 0 bytes. Seeking before the start is an error.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i128::from(offset),
            SeekFrom::Current(delta) => i128::from(self.position) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size()) + i128::from(delta),
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }

        self.position = target as u64;
        Ok(self.position)
    }
}

fn short_read(what: &'static str) -> impl FnOnce(io::Error) -> Error {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::CorruptArchive(format!("short read in {what}"))
        } else {
            Error::Io(e)
        }
    }
}
