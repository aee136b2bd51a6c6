//! The precomputed substitution table behind all archive hashing and
//! encryption.

use std::sync::OnceLock;
use tracing::debug;

/// Number of `u32` slots in the table: four 256-entry hashing groups plus
/// the cipher group at `0x400`.
pub const TABLE_LEN: usize = 1280;

const GENERATOR_SEED: u32 = 0x0010_0001;

/// The substitution table.
///
/// Generated deterministically from a fixed seed, so every instance holds
/// the same values. Code paths that just need *a* table should use
/// [`CryptTable::get`]; constructing fresh instances with
/// [`CryptTable::new`] is intended for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptTable([u32; TABLE_LEN]);

impl CryptTable {
    /// Generate the table from the fixed seed.
    ///
    /// The generator is a linear congruential sequence stepped twice per
    /// slot, the two 16-bit halves packed high-then-low. Slots are filled
    /// in five column-major passes of 256, one per group.
    pub fn new() -> Self {
        let mut table = [0u32; TABLE_LEN];
        let mut seed = GENERATOR_SEED;

        for first in 0..256 {
            let mut slot = first;
            for _ in 0..5 {
                seed = (seed * 125 + 3) % 0x002A_AAAB;
                let high = (seed & 0xFFFF) << 16;
                seed = (seed * 125 + 3) % 0x002A_AAAB;
                let low = seed & 0xFFFF;

                table[slot] = high | low;
                slot += 256;
            }
        }

        debug!("generated {TABLE_LEN}-entry crypt table");
        Self(table)
    }

    /// The shared process-wide table, generated on first use.
    pub fn get() -> &'static Self {
        static TABLE: OnceLock<CryptTable> = OnceLock::new();
        TABLE.get_or_init(Self::new)
    }

    pub(crate) fn slot(&self, index: usize) -> u32 {
        self.0[index]
    }
}

impl Default for CryptTable {
    fn default() -> Self {
        Self::new()
    }
}
