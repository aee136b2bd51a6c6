//! Filename hashing and path normalization.
//!
//! Archives never store filenames; they store two salted 32-bit hashes of
//! the normalized path. Normalization and hashing therefore have to agree
//! byte for byte with whatever wrote the archive: backslash separators, no
//! leading separator, case-insensitive.

use crate::table::CryptTable;

/// Salt selecting which 256-entry group of the substitution table a hash
/// draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// Nominal table-slot hash.
    TableOffset = 0,
    /// First half of a filename's identity pair.
    NameA = 1,
    /// Second half of a filename's identity pair.
    NameB = 2,
    /// Seed material for the stream cipher.
    FileKey = 3,
}

impl CryptTable {
    /// Hash `text` with the given salt.
    ///
    /// Bytes are ASCII-uppercased before hashing, so the result is
    /// case-insensitive for ASCII input. All arithmetic wraps.
    pub fn hash_string(&self, text: &str, kind: HashKind) -> u32 {
        let group = kind as usize * 256;
        let mut seed1: u32 = 0x7FED_7FED;
        let mut seed2: u32 = 0xEEEE_EEEE;

        for &byte in text.as_bytes() {
            let ch = u32::from(byte.to_ascii_uppercase());
            seed1 = self.slot(group + ch as usize) ^ seed1.wrapping_add(seed2);
            seed2 = ch
                .wrapping_add(seed1)
                .wrapping_add(seed2)
                .wrapping_add(seed2 << 5)
                .wrapping_add(3);
        }

        seed1
    }

    /// Packed 64-bit identity of a path: the [`HashKind::NameA`] hash of
    /// the normalized form in the low word, [`HashKind::NameB`] in the
    /// high word.
    pub fn hash_path(&self, path: &str) -> u64 {
        let normalized = normalize_path(path);
        let a = self.hash_string(&normalized, HashKind::NameA);
        let b = self.hash_string(&normalized, HashKind::NameB);
        u64::from(b) << 32 | u64::from(a)
    }
}

/// Canonical in-archive form of a path: backslash separators, no leading
/// separator, ASCII lower case.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('/', "\\").to_ascii_lowercase();
    if normalized.starts_with('\\') {
        normalized.remove(0);
    }
    normalized
}

/// Final component of a normalized path.
pub fn base_name(path: &str) -> &str {
    match path.rfind('\\') {
        Some(separator) => &path[separator + 1..],
        None => path,
    }
}
