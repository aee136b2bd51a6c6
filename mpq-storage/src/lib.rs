//! Read-only access to MPQ (Mo'PaQ) game archives.
//!
//! An archive is a single file holding many named entries. Filenames are
//! never stored: a lookup hashes the path twice and scans an encrypted
//! hash table for the pair, which points into an encrypted block table,
//! which locates the entry's storage region. Entry payloads are split into
//! fixed-size sectors, each independently compressed and encrypted, so an
//! open entry can still be served as an ordinary seekable byte stream that
//! materializes one sector at a time.
//!
//! ```no_run
//! use mpq_storage::Archive;
//! use std::io::Read;
//!
//! let archive = Archive::open_path("data/base.mpq")?;
//! if archive.exists("music\\intro.wav") {
//!     let mut stream = archive.open_file("music\\intro.wav")?;
//!     let mut bytes = Vec::new();
//!     stream.read_to_end(&mut bytes)?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Archives are opened once and immutable afterwards; every stream handed
//! out by [`Archive::open_file`] carries its own cursor and sector cache
//! and can be used independently of its siblings.

pub mod archive;
pub mod compression;
pub mod error;
pub mod header;
pub mod stream;
pub mod tables;

pub use archive::Archive;
pub use compression::SectorCodecs;
pub use error::{Error, Result};
pub use header::Header;
pub use stream::FileStream;
pub use tables::{BlockEntry, BlockFlags, HashEntry};

/// Archive signature, the first four bytes of every archive.
pub const MAGIC: [u8; 4] = *b"MPQ\x1A";

/// Reserved entry holding the archive's own file listing.
pub const LISTFILE_NAME: &str = "(listfile)";
