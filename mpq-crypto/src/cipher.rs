//! The rolling two-seed stream cipher.
//!
//! One keystream word is produced per 32-bit word of data, and the
//! decrypted word feeds back into the state for the next one. A buffer can
//! therefore only be processed sequentially from its start with the seed
//! it was encrypted under; there is no way to resume mid-buffer.

use crate::table::CryptTable;

const SEED2_INIT: u32 = 0xEEEE_EEEE;

struct Keystream<'a> {
    table: &'a CryptTable,
    seed1: u32,
    seed2: u32,
}

impl<'a> Keystream<'a> {
    fn new(table: &'a CryptTable, seed: u32) -> Self {
        Self {
            table,
            seed1: seed,
            seed2: SEED2_INIT,
        }
    }

    // The seed2 feedback always takes the plaintext word, which is the
    // output when decrypting and the input when encrypting.
    fn decrypt(&mut self, word: u32) -> u32 {
        self.seed2 = self
            .seed2
            .wrapping_add(self.table.slot(0x400 + (self.seed1 & 0xFF) as usize));
        let plain = word ^ self.seed1.wrapping_add(self.seed2);
        self.advance(plain);
        plain
    }

    fn encrypt(&mut self, word: u32) -> u32 {
        self.seed2 = self
            .seed2
            .wrapping_add(self.table.slot(0x400 + (self.seed1 & 0xFF) as usize));
        let cipher = word ^ self.seed1.wrapping_add(self.seed2);
        self.advance(word);
        cipher
    }

    fn advance(&mut self, plain: u32) {
        self.seed1 = (!self.seed1 << 0x15).wrapping_add(0x1111_1111) | (self.seed1 >> 0x0B);
        self.seed2 = plain
            .wrapping_add(self.seed2)
            .wrapping_add(self.seed2 << 5)
            .wrapping_add(3);
    }
}

impl CryptTable {
    /// Decrypt `words` in place with the given seed.
    pub fn decrypt_words(&self, words: &mut [u32], seed: u32) {
        let mut stream = Keystream::new(self, seed);
        for word in words {
            *word = stream.decrypt(*word);
        }
    }

    /// Encrypt `words` in place; the exact inverse of
    /// [`CryptTable::decrypt_words`] under the same seed.
    pub fn encrypt_words(&self, words: &mut [u32], seed: u32) {
        let mut stream = Keystream::new(self, seed);
        for word in words {
            *word = stream.encrypt(*word);
        }
    }

    /// Decrypt `bytes` in place, treating them as little-endian 32-bit
    /// words. A trailing remainder shorter than 4 bytes is left untouched.
    pub fn decrypt_bytes(&self, bytes: &mut [u8], seed: u32) {
        let mut stream = Keystream::new(self, seed);
        for chunk in bytes.chunks_exact_mut(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            chunk.copy_from_slice(&stream.decrypt(word).to_le_bytes());
        }
    }

    /// Encrypt counterpart of [`CryptTable::decrypt_bytes`].
    pub fn encrypt_bytes(&self, bytes: &mut [u8], seed: u32) {
        let mut stream = Keystream::new(self, seed);
        for chunk in bytes.chunks_exact_mut(4) {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            chunk.copy_from_slice(&stream.encrypt(word).to_le_bytes());
        }
    }
}
