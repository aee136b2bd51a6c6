//! The archive facade: open once, resolve paths, hand out streams.

use mpq_crypto::{CryptTable, HashKind, normalize_path};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::compression::SectorCodecs;
use crate::header::Header;
use crate::stream::FileStream;
use crate::tables::{BlockEntry, BlockTable, HashTable};
use crate::{Error, LISTFILE_NAME, Result};

/// An open archive.
///
/// The header and both tables are read and decrypted once at open time and
/// immutable afterwards; entry access goes through independent
/// [`FileStream`]s over the shared source.
pub struct Archive<R> {
    source: Arc<Mutex<R>>,
    codecs: Arc<SectorCodecs>,
    header: Header,
    hash_table: HashTable,
    block_table: BlockTable,
}

impl Archive<BufReader<File>> {
    /// Open an archive file from disk.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::open(BufReader::new(file))
    }
}

impl<R: Read + Seek> Archive<R> {
    /// Open an archive over any seekable source with the default codecs.
    pub fn open(source: R) -> Result<Self> {
        Self::with_codecs(source, SectorCodecs::new())
    }

    /// Open an archive with injected audio decoders.
    pub fn with_codecs(mut source: R, codecs: SectorCodecs) -> Result<Self> {
        let header = Header::parse(&mut source)?;
        let hash_table = HashTable::read(
            &mut source,
            u64::from(header.hash_table_offset),
            header.hash_table_count,
        )?;
        let block_table = BlockTable::read(
            &mut source,
            u64::from(header.block_table_offset),
            header.block_table_count,
        )?;
        sanity_check(&header, &hash_table, &block_table);

        debug!(
            hash_entries = hash_table.len(),
            block_entries = block_table.len(),
            "opened archive"
        );

        Ok(Self {
            source: Arc::new(Mutex::new(source)),
            codecs: Arc::new(codecs),
            header,
            hash_table,
            block_table,
        })
    }

    /// Header as parsed at open time.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Sector size for multi-sector entries.
    pub fn sector_size(&self) -> usize {
        self.header.sector_size()
    }

    /// Number of usable entries in the block table.
    pub fn file_count(&self) -> usize {
        self.block_table
            .entries()
            .iter()
            .filter(|block| block.is_usable())
            .count()
    }

    /// Whether `path` resolves to a usable entry. Never fails.
    pub fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_ok()
    }

    /// Open `path` as a seekable stream.
    pub fn open_file(&self, path: &str) -> Result<FileStream<R>> {
        let (normalized, block) = self.resolve(path)?;
        debug!(
            path = normalized.as_str(),
            size = block.file_size,
            flags = block.flags.bits(),
            "opening entry"
        );
        FileStream::open(
            Arc::clone(&self.source),
            Arc::clone(&self.codecs),
            block,
            &normalized,
            self.header.sector_size(),
        )
    }

    /// Read a whole entry into memory.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut stream = self.open_file(path)?;
        let mut data = Vec::with_capacity(stream.size() as usize);
        stream
            .read_to_end(&mut data)
            .map_err(Error::from_stream_io)?;
        Ok(data)
    }

    /// Paths recorded in the archive's own listing entry.
    ///
    /// Archives without one yield an empty list; that is not an error.
    pub fn list_files(&self) -> Result<Vec<String>> {
        if !self.exists(LISTFILE_NAME) {
            return Ok(Vec::new());
        }

        let data = self.read_file(LISTFILE_NAME)?;
        let text = String::from_utf8_lossy(&data);
        Ok(text
            .split(['\r', '\n', ';'])
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn resolve(&self, path: &str) -> Result<(String, BlockEntry)> {
        let normalized = normalize_path(path);
        let table = CryptTable::get();
        let hash_a = table.hash_string(&normalized, HashKind::NameA);
        let hash_b = table.hash_string(&normalized, HashKind::NameB);

        let Some(entry) = self.hash_table.find(hash_a, hash_b) else {
            return Err(Error::FileNotFound(path.to_string()));
        };

        let block = self
            .block_table
            .get(entry.block_index as usize)
            .filter(|block| block.is_usable())
            .copied()
            .ok_or_else(|| Error::FileNotFound(path.to_string()))?;

        Ok((normalized, block))
    }
}

/// Decryption with a wrong seed produces garbage with no explicit error;
/// flag entries that cannot be right so misconfigured archives show up in
/// logs instead of as mystery read failures.
fn sanity_check(header: &Header, hash_table: &HashTable, block_table: &BlockTable) {
    for (slot, entry) in hash_table.entries().iter().enumerate() {
        if entry.is_occupied() && entry.block_index as usize >= block_table.len() {
            warn!(
                slot,
                block_index = entry.block_index,
                "hash entry points past the block table"
            );
        }
    }
    for (index, block) in block_table.entries().iter().enumerate() {
        let end = u64::from(block.file_pos) + u64::from(block.compressed_size);
        if block.is_usable() && end > u64::from(header.archive_size) {
            warn!(
                index,
                end,
                archive_size = header.archive_size,
                "block entry extends past the declared archive size"
            );
        }
    }
}
