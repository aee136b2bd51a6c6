//! Error types for archive parsing and entry access.

use thiserror::Error;

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Archive error types.
///
/// The first three are archive-level and abort opening; everything else is
/// scoped to the single lookup, stream or read that triggered it and never
/// invalidates the opened tables or sibling streams.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the underlying archive source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The source is not an archive: bad magic or a malformed header.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// The header declares a format revision this reader does not handle.
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    /// No usable entry under that path.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The entry relies on a feature this reader does not implement.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    /// Damaged per-entry metadata or a truncated storage region.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// Sector method tag with no decoder behind it.
    #[error("unsupported codec tag {0:#04x}")]
    UnsupportedCodec(u8),

    /// A decoder failed or produced the wrong amount of data.
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Recover an archive error that crossed a `std::io` boundary.
    ///
    /// Stream reads surface crate errors wrapped in `std::io::Error`; this
    /// unwraps them back so callers see the original taxonomy.
    pub(crate) fn from_stream_io(error: std::io::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(inner) => inner,
            Err(error) => Self::Io(error),
        }
    }
}
