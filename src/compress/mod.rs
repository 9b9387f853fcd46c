//! Per-page codec registry.
//!
//! The algorithm tag is an on-disk contract; dispatch happens through a
//! table of `(encode, decode, name)` triples so the tag stays decoupled from
//! the codec wiring. Codecs are opaque: they fill a caller-provided buffer
//! and report a byte count or a static error string. The caller must size
//! the destination at `2 * BLCKSZ`; compressed output may exceed the input.

use std::fmt;
use std::str::FromStr;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use serde::{Deserialize, Serialize};

use crate::Error;

/// First byte of any zlib stream; used by the legacy compression predicate.
pub const ZLIB_MAGIC: u8 = 0x78;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CompressAlg {
    #[default]
    NotDefined,
    None,
    Pglz,
    Zlib,
}

impl CompressAlg {
    fn slot(self) -> &'static CodecSlot {
        match self {
            CompressAlg::NotDefined => &NOT_DEFINED_SLOT,
            CompressAlg::None => &NONE_SLOT,
            CompressAlg::Pglz => &PGLZ_SLOT,
            CompressAlg::Zlib => &ZLIB_SLOT,
        }
    }
}

impl fmt::Display for CompressAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slot().name)
    }
}

impl FromStr for CompressAlg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(CompressAlg::None),
            "pglz" => Ok(CompressAlg::Pglz),
            "zlib" => Ok(CompressAlg::Zlib),
            other => Err(Error::UnsupportedCompressionAlgorithm(other.to_string()).into()),
        }
    }
}

/// Codec failure: an optional codec-owned static message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecError(pub Option<&'static str>);

impl CodecError {
    const SILENT: CodecError = CodecError(None);

    pub fn message(self) -> &'static str {
        self.0.unwrap_or("compression error")
    }
}

type EncodeFn = fn(dst: &mut [u8], src: &[u8], level: u32) -> Result<usize, CodecError>;
type DecodeFn = fn(dst: &mut [u8], src: &[u8]) -> Result<usize, CodecError>;

struct CodecSlot {
    name: &'static str,
    encode: Option<EncodeFn>,
    decode: Option<DecodeFn>,
    decode_error: &'static str,
}

static NOT_DEFINED_SLOT: CodecSlot = CodecSlot {
    name: "not-defined",
    encode: None,
    decode: None,
    decode_error: "Invalid compression algorithm",
};

static NONE_SLOT: CodecSlot = CodecSlot {
    name: "none",
    encode: None,
    decode: None,
    decode_error: "Invalid compression algorithm",
};

// The pglz tag is part of the on-disk contract, but this build ships no pglz
// codec; both directions surface the same message.
static PGLZ_SLOT: CodecSlot = CodecSlot {
    name: "pglz",
    encode: None,
    decode: None,
    decode_error: "pglz compression is not supported",
};

static ZLIB_SLOT: CodecSlot = CodecSlot {
    name: "zlib",
    encode: Some(zlib_compress),
    decode: Some(zlib_decompress),
    decode_error: "zlib decompression error",
};

fn zlib_compress(dst: &mut [u8], src: &[u8], level: u32) -> Result<usize, CodecError> {
    let mut state = Compress::new(Compression::new(level), true);
    match state.compress(src, dst, FlushCompress::Finish) {
        Ok(Status::StreamEnd) => Ok(state.total_out() as usize),
        Ok(_) => Err(CodecError(Some("buffer error"))),
        Err(_) => Err(CodecError(Some("stream error"))),
    }
}

fn zlib_decompress(dst: &mut [u8], src: &[u8]) -> Result<usize, CodecError> {
    let mut state = Decompress::new(true);
    match state.decompress(src, dst, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => Ok(state.total_out() as usize),
        Ok(_) => Err(CodecError(Some("buffer error"))),
        Err(_) => Err(CodecError(Some("data error"))),
    }
}

/// Compress `src` into `dst`. Returns the number of bytes written, or an
/// error when the algorithm carries no encoder or the codec fails.
pub fn compress(
    dst: &mut [u8],
    src: &[u8],
    alg: CompressAlg,
    level: u32,
) -> Result<usize, CodecError> {
    match alg.slot().encode {
        Some(encode) => encode(dst, src, level),
        None => Err(CodecError::SILENT),
    }
}

/// Decompress `src` into `dst`. Returns the number of bytes produced, or an
/// error naming the problem ("Invalid compression algorithm" for tags that
/// can never appear on compressed payloads).
pub fn decompress(dst: &mut [u8], src: &[u8], alg: CompressAlg) -> Result<usize, CodecError> {
    let slot = alg.slot();
    match slot.decode {
        Some(decode) => decode(dst, src),
        None => Err(CodecError(Some(slot.decode_error))),
    }
}
