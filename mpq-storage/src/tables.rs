//! The two on-disk tables: the hashed name index and the block index.
//!
//! Both are stored as encrypted `u32` arrays and decrypted table-wide at
//! open time with seeds hashed from fixed literal names. The literals are
//! part of the wire contract; a mismatch yields silent garbage rather than
//! an error, which is why the facade runs a sanity pass over the decoded
//! entries.

use byteorder::{LittleEndian, ReadBytesExt};
use mpq_crypto::{CryptTable, HashKind, base_name};
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

use crate::{Error, Result};

/// Bytes per table entry on disk.
const ENTRY_SIZE: usize = 16;

const HASH_TABLE_SEED_NAME: &str = "(hash table)";
const BLOCK_TABLE_SEED_NAME: &str = "(block table)";

/// Seed base used in place of a filename hash for fix-key entries.
const FIX_KEY_SEED: u32 = 0xFFFF_FFFF;

/// Hash table entry: two salted name hashes and a block table index.
#[derive(Debug, Clone, Copy)]
pub struct HashEntry {
    /// [`HashKind::NameA`] hash of the entry's normalized path.
    pub hash_a: u32,
    /// [`HashKind::NameB`] hash of the entry's normalized path.
    pub hash_b: u32,
    /// Windows LANGID of the entry, 0 for neutral.
    pub locale: u16,
    /// Target platform code, 0 for all platforms.
    pub platform: u16,
    /// Block table index, or one of the slot sentinels.
    pub block_index: u32,
}

impl HashEntry {
    /// Slot that has never held an entry.
    pub const EMPTY: u32 = 0xFFFF_FFFF;
    /// Slot whose entry was deleted.
    pub const DELETED: u32 = 0xFFFF_FFFE;

    pub fn is_empty(&self) -> bool {
        self.block_index == Self::EMPTY
    }

    pub fn is_deleted(&self) -> bool {
        self.block_index == Self::DELETED
    }

    /// Slot holds a live block reference.
    pub fn is_occupied(&self) -> bool {
        self.block_index < Self::DELETED
    }
}

/// Storage flags of a block entry.
///
/// Wire bit positions stay inside this type; everything downstream goes
/// through the named predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFlags(u32);

impl BlockFlags {
    /// Payload compressed with PKWARE implode.
    pub const IMPLODED: u32 = 0x0000_0100;
    /// Payload compressed, sectors carrying a method tag byte.
    pub const COMPRESSED: u32 = 0x0000_0200;
    /// Payload encrypted with the per-entry seed.
    pub const ENCRYPTED: u32 = 0x0001_0000;
    /// Entry uses the fixed seed base instead of its filename hash.
    pub const FIX_KEY: u32 = 0x0002_0000;
    /// Entry is a binary patch against a base archive.
    pub const PATCH_FILE: u32 = 0x0010_0000;
    /// Payload stored as one unit with no sector subdivision.
    pub const SINGLE_UNIT: u32 = 0x0100_0000;
    /// Entry is tombstoned.
    pub const DELETE_MARKER: u32 = 0x0200_0000;
    /// Sector checksums follow the payload.
    pub const SECTOR_CRC: u32 = 0x0400_0000;
    /// Entry is present.
    pub const EXISTS: u32 = 0x8000_0000;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_imploded(self) -> bool {
        self.0 & Self::IMPLODED != 0
    }

    pub fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }

    /// Either compression scheme.
    pub fn has_compression(self) -> bool {
        self.0 & (Self::IMPLODED | Self::COMPRESSED) != 0
    }

    pub fn is_encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    pub fn has_fix_key(self) -> bool {
        self.0 & Self::FIX_KEY != 0
    }

    pub fn is_patch_file(self) -> bool {
        self.0 & Self::PATCH_FILE != 0
    }

    pub fn is_single_unit(self) -> bool {
        self.0 & Self::SINGLE_UNIT != 0
    }

    pub fn is_delete_marker(self) -> bool {
        self.0 & Self::DELETE_MARKER != 0
    }

    pub fn has_sector_crc(self) -> bool {
        self.0 & Self::SECTOR_CRC != 0
    }

    pub fn exists(self) -> bool {
        self.0 & Self::EXISTS != 0
    }
}

/// Block table entry: where an entry's bytes live and how they are stored.
#[derive(Debug, Clone, Copy)]
pub struct BlockEntry {
    /// Byte offset of the storage region from the start of the archive.
    pub file_pos: u32,
    /// Stored (possibly compressed) size in bytes.
    pub compressed_size: u32,
    /// Size in bytes after decompression.
    pub file_size: u32,
    /// Storage flags.
    pub flags: BlockFlags,
}

impl BlockEntry {
    /// Usable entries are present and not tombstoned.
    pub fn is_usable(&self) -> bool {
        self.flags.exists() && !self.flags.is_delete_marker()
    }

    /// Cipher seed for this entry's payload.
    ///
    /// The base is the [`HashKind::FileKey`] hash of the entry's base name
    /// — or the fixed constant when the fix-key flag replaces it — and is
    /// then perturbed by the entry's position and size. Only meaningful
    /// for encrypted entries.
    pub fn encryption_seed(&self, normalized_path: &str) -> u32 {
        let base = if self.flags.has_fix_key() {
            FIX_KEY_SEED
        } else {
            CryptTable::get().hash_string(base_name(normalized_path), HashKind::FileKey)
        };
        base.wrapping_add(self.file_pos) ^ self.file_size
    }
}

/// The decrypted hash table.
#[derive(Debug)]
pub struct HashTable {
    entries: Vec<HashEntry>,
}

impl HashTable {
    /// Read `count` entries at `offset`, decrypting the region with the
    /// fixed `"(hash table)"` seed.
    pub fn read<R: Read + Seek>(reader: &mut R, offset: u64, count: u32) -> Result<Self> {
        let words = read_table_words(reader, offset, count, HASH_TABLE_SEED_NAME)?;
        let entries = words
            .chunks_exact(ENTRY_SIZE / 4)
            .map(|words| HashEntry {
                hash_a: words[0],
                hash_b: words[1],
                locale: (words[2] & 0xFFFF) as u16,
                platform: (words[2] >> 16) as u16,
                block_index: words[3],
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[HashEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry matching a name hash pair: a full linear scan for an
    /// exact `(hash_a, hash_b)` match. Empty and deleted slots never
    /// match.
    pub fn find(&self, hash_a: u32, hash_b: u32) -> Option<&HashEntry> {
        self.entries
            .iter()
            .find(|entry| entry.is_occupied() && entry.hash_a == hash_a && entry.hash_b == hash_b)
    }
}

/// The decrypted block table.
#[derive(Debug)]
pub struct BlockTable {
    entries: Vec<BlockEntry>,
}

impl BlockTable {
    /// Read `count` entries at `offset`, decrypting the region with the
    /// fixed `"(block table)"` seed.
    pub fn read<R: Read + Seek>(reader: &mut R, offset: u64, count: u32) -> Result<Self> {
        let words = read_table_words(reader, offset, count, BLOCK_TABLE_SEED_NAME)?;
        let entries = words
            .chunks_exact(ENTRY_SIZE / 4)
            .map(|words| BlockEntry {
                file_pos: words[0],
                compressed_size: words[1],
                file_size: words[2],
                flags: BlockFlags::from_bits(words[3]),
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[BlockEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BlockEntry> {
        self.entries.get(index)
    }
}

fn read_table_words<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    count: u32,
    seed_name: &str,
) -> Result<Vec<u32>> {
    reader.seek(SeekFrom::Start(offset))?;

    let mut words = vec![0u32; count as usize * (ENTRY_SIZE / 4)];
    reader.read_u32_into::<LittleEndian>(&mut words).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::InvalidArchive(format!("truncated table at {offset:#x}"))
        } else {
            Error::Io(e)
        }
    })?;

    let table = CryptTable::get();
    let seed = table.hash_string(seed_name, HashKind::FileKey);
    table.decrypt_words(&mut words, seed);

    debug!(offset, count, seed_name, "loaded table");
    Ok(words)
}
