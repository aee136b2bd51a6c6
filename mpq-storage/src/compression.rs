//! Sector decompression: method-tag dispatch over pluggable decoders.
//!
//! A compressed sector leads with one method tag byte; the rest is the
//! payload. Deflate and implode are always wired. The audio codecs have no
//! bodies in this crate and fail with [`Error::UnsupportedCodec`] until a
//! decoder is injected.

use flate2::read::ZlibDecoder;
use std::fmt;
use std::io::Read;
use tracing::trace;

use crate::{Error, Result};

/// Sector method tags.
pub mod tag {
    /// Deflate (zlib stream).
    pub const DEFLATE: u8 = 0x02;
    /// PKWARE implode.
    pub const IMPLODE: u8 = 0x08;
    /// IMA ADPCM, one channel.
    pub const ADPCM_MONO: u8 = 0x40;
    /// IMA ADPCM, two channels.
    pub const ADPCM_STEREO: u8 = 0x80;
    /// Huffman, then stereo ADPCM over its output.
    pub const HUFFMAN_ADPCM_STEREO: u8 = 0x81;
}

/// Decoder contract shared by every codec: compressed payload and the
/// expected decompressed size in, decompressed bytes out.
pub type CodecFn = dyn Fn(&[u8], usize) -> Result<Vec<u8>> + Send + Sync;

/// The decoder set used for sector payloads.
pub struct SectorCodecs {
    huffman: Option<Box<CodecFn>>,
    adpcm_mono: Option<Box<CodecFn>>,
    adpcm_stereo: Option<Box<CodecFn>>,
}

impl SectorCodecs {
    /// Decoder set with only the built-in deflate and implode codecs.
    pub fn new() -> Self {
        Self {
            huffman: None,
            adpcm_mono: None,
            adpcm_stereo: None,
        }
    }

    /// Inject a Huffman decoder, used by the chained audio tag.
    pub fn with_huffman(mut self, decoder: Box<CodecFn>) -> Self {
        self.huffman = Some(decoder);
        self
    }

    /// Inject a one-channel ADPCM decoder.
    pub fn with_adpcm_mono(mut self, decoder: Box<CodecFn>) -> Self {
        self.adpcm_mono = Some(decoder);
        self
    }

    /// Inject a two-channel ADPCM decoder.
    pub fn with_adpcm_stereo(mut self, decoder: Box<CodecFn>) -> Self {
        self.adpcm_stereo = Some(decoder);
        self
    }

    /// Decompress one sector to `expected` bytes.
    ///
    /// Only called for sectors whose stored length differs from their
    /// decompressed length; equal-length sectors are stored raw with no
    /// tag byte and never reach the dispatch.
    pub fn decompress(&self, sector: &[u8], expected: usize) -> Result<Vec<u8>> {
        let Some((&method, payload)) = sector.split_first() else {
            return Err(Error::CorruptArchive("empty compressed sector".into()));
        };

        trace!(
            method,
            payload_len = payload.len(),
            expected,
            "decompressing sector"
        );

        match method {
            tag::DEFLATE => inflate(payload, expected),
            tag::IMPLODE => explode(payload, expected),
            tag::ADPCM_MONO => run_decoder(self.adpcm_mono.as_deref(), method, payload, expected),
            tag::ADPCM_STEREO => {
                run_decoder(self.adpcm_stereo.as_deref(), method, payload, expected)
            }
            tag::HUFFMAN_ADPCM_STEREO => {
                // Chained right to left through the tag's bit composition:
                // Huffman first, then the stereo ADPCM decoder.
                let unpacked = run_decoder(self.huffman.as_deref(), method, payload, expected)?;
                run_decoder(self.adpcm_stereo.as_deref(), method, &unpacked, expected)
            }
            // Huffman alone, bzip2, lzma and the remaining sparse or
            // chained forms are valid tags with no decoder behind them.
            other => Err(Error::UnsupportedCodec(other)),
        }
    }
}

impl Default for SectorCodecs {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SectorCodecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectorCodecs")
            .field("huffman", &self.huffman.is_some())
            .field("adpcm_mono", &self.adpcm_mono.is_some())
            .field("adpcm_stereo", &self.adpcm_stereo.is_some())
            .finish()
    }
}

fn run_decoder(
    decoder: Option<&CodecFn>,
    method: u8,
    payload: &[u8],
    expected: usize,
) -> Result<Vec<u8>> {
    match decoder {
        Some(decode) => decode(payload, expected),
        None => Err(Error::UnsupportedCodec(method)),
    }
}

fn inflate(payload: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut output = Vec::with_capacity(expected);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Codec(format!("inflate failed: {e}")))?;

    if output.len() != expected {
        return Err(Error::Codec(format!(
            "inflate produced {} bytes, expected {expected}",
            output.len()
        )));
    }
    Ok(output)
}

fn explode(payload: &[u8], expected: usize) -> Result<Vec<u8>> {
    let output = pklib::explode_bytes(payload)
        .map_err(|e| Error::Codec(format!("explode failed: {e}")))?;

    if output.len() != expected {
        return Err(Error::Codec(format!(
            "explode produced {} bytes, expected {expected}",
            output.len()
        )));
    }
    Ok(output)
}
