//! Archive header parsing.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;
use tracing::debug;

use crate::{Error, MAGIC, Result};

/// On-disk size of the header in bytes.
pub const HEADER_SIZE: u32 = 32;

/// The only format revision this reader accepts.
pub const FORMAT_VERSION: u16 = 0;

/// Fixed-size archive header; all integers little-endian.
#[derive(Debug, Clone)]
pub struct Header {
    /// Total archive size in bytes, as declared when it was built.
    pub archive_size: u32,
    /// Format revision.
    pub format_version: u16,
    /// Sector size exponent: sectors are `0x200 << sector_size_shift`
    /// bytes.
    pub sector_size_shift: u16,
    /// Hash table offset from the start of the archive.
    pub hash_table_offset: u32,
    /// Block table offset from the start of the archive.
    pub block_table_offset: u32,
    /// Number of hash table entries.
    pub hash_table_count: u32,
    /// Number of block table entries.
    pub block_table_count: u32,
}

impl Header {
    /// Parse and validate the header at the reader's current position.
    ///
    /// Magic, declared header size and format version are all checked
    /// here, before any table is touched.
    pub fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidArchive(format!(
                "bad magic {}",
                hex::encode(magic)
            )));
        }

        let header_size = reader.read_u32::<LittleEndian>()?;
        if header_size != HEADER_SIZE {
            return Err(Error::InvalidArchive(format!(
                "declared header size {header_size}, expected {HEADER_SIZE}"
            )));
        }

        let archive_size = reader.read_u32::<LittleEndian>()?;
        let format_version = reader.read_u16::<LittleEndian>()?;
        if format_version != FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(format_version));
        }

        let sector_size_shift = reader.read_u16::<LittleEndian>()?;
        if sector_size_shift > 15 {
            return Err(Error::InvalidArchive(format!(
                "sector size shift {sector_size_shift} out of range"
            )));
        }

        let header = Self {
            archive_size,
            format_version,
            sector_size_shift,
            hash_table_offset: reader.read_u32::<LittleEndian>()?,
            block_table_offset: reader.read_u32::<LittleEndian>()?,
            hash_table_count: reader.read_u32::<LittleEndian>()?,
            block_table_count: reader.read_u32::<LittleEndian>()?,
        };

        debug!(
            archive_size = header.archive_size,
            sector_size = header.sector_size(),
            hash_entries = header.hash_table_count,
            block_entries = header.block_table_count,
            "parsed archive header"
        );

        Ok(header)
    }

    /// Sector size in bytes for multi-sector entries.
    pub fn sector_size(&self) -> usize {
        0x200 << self.sector_size_shift
    }
}
