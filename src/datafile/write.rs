//! Framed page output: `(header, MAXALIGN(payload))` records.

use std::io::Write;

use tracing::warn;

use super::BackupCrc;
use crate::catalog::FileEntry;
use crate::compress::{compress, CompressAlg};
use crate::page::{maxalign, PageBuf, BLCKSZ};
use crate::Result;

/// On-disk frame header, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Block number within the segment.
    pub block: u32,
    /// Payload size; `BLCKSZ` means stored raw, [`super::PAGE_TRUNCATED`]
    /// marks truncation.
    pub compressed_size: i32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.block.to_le_bytes());
        buf[4..8].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            block: u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes")),
            compressed_size: i32::from_le_bytes(buf[4..8].try_into().expect("4 bytes")),
        }
    }
}

/// Compress and append one page as a frame.
///
/// A page only counts as compressed when the codec shrank it; failure or
/// expansion stores the raw page with `compressed_size == BLCKSZ`. The CRC is
/// fed exactly the staged bytes, padding included, in write order.
pub fn write_frame(
    out: &mut impl Write,
    file: &mut FileEntry,
    blknum: u32,
    page: &PageBuf,
    crc: &mut BackupCrc,
    calg: CompressAlg,
    clevel: u32,
    from_path: &str,
    to_path: &str,
) -> Result<()> {
    // Compressed output may need more space than the input.
    let mut compressed = [0u8; BLCKSZ * 2];
    let mut staged = [0u8; FrameHeader::SIZE + BLCKSZ];

    let compressed_size = match compress(&mut compressed, page, calg, clevel) {
        Ok(n) => n as i32,
        Err(err) => {
            if let Some(message) = err.0 {
                warn!(
                    "An error occured during compressing block {blknum} of file \"{from_path}\": {message}"
                );
            }
            -1
        }
    };

    let staged_len;
    if compressed_size > 0 && (compressed_size as usize) < BLCKSZ {
        let header = FrameHeader {
            block: blknum,
            compressed_size,
        };
        let payload_len = maxalign(compressed_size as usize);
        staged[..FrameHeader::SIZE].copy_from_slice(&header.encode());
        staged[FrameHeader::SIZE..FrameHeader::SIZE + compressed_size as usize]
            .copy_from_slice(&compressed[..compressed_size as usize]);
        staged_len = FrameHeader::SIZE + payload_len;
    } else {
        let header = FrameHeader {
            block: blknum,
            compressed_size: BLCKSZ as i32,
        };
        staged[..FrameHeader::SIZE].copy_from_slice(&header.encode());
        staged[FrameHeader::SIZE..FrameHeader::SIZE + BLCKSZ].copy_from_slice(page);
        staged_len = FrameHeader::SIZE + BLCKSZ;
    }

    crc.update(&staged[..staged_len]);

    out.write_all(&staged[..staged_len]).map_err(|e| {
        anyhow::anyhow!("File: \"{to_path}\", cannot write at block {blknum}: {e}")
    })?;

    file.write_size += staged_len as i64;
    file.uncompressed_size += BLCKSZ as i64;

    Ok(())
}
