//! Validation drivers: live data files and stored backup files.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, info, warn};

use super::backup::BackupContext;
use super::read::{prepare_page, ReadOutcome};
use super::restore::{page_may_be_compressed, read_frame_header};
use super::{backup_uses_crc32c, BackupCrc, PAGE_TRUNCATED, STDIO_BUFSIZE};
use crate::cancel::CancelToken;
use crate::catalog::{BackupMode, FileEntry};
use crate::compress::decompress;
use crate::page::validate::{validate_one_page, PageCheck};
use crate::page::{absolute_blkno, maxalign, Lsn, PageBuf, BLCKSZ};
use crate::Result;

/// Classify every block of a live data file.
///
/// Non-strict: corruption is logged and the scan continues. Returns true when
/// every block was readable; a missing file is also fine, the database may
/// have dropped it underneath us.
pub fn check_data_file(
    file: &FileEntry,
    from_path: &Path,
    checksum_enabled: bool,
    cancel: &CancelToken,
) -> Result<bool> {
    let from = from_path.display().to_string();
    let mut is_valid = true;

    let src = match File::open(from_path) {
        Ok(src) => src,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("File \"{from}\" is not found");
            return Ok(true);
        }
        Err(e) => {
            warn!("Cannot open file \"{from}\": {e}");
            return Ok(false);
        }
    };

    if file.size % BLCKSZ as u64 != 0 {
        warn!("File: \"{from}\", invalid file size {}", file.size);
    }
    let nblocks = (file.size / BLCKSZ as u64) as u32;

    let mut ctx = BackupContext::local(BackupMode::Full, cancel.clone());
    ctx.checksum_enabled = checksum_enabled;

    let mut page: PageBuf = [0u8; BLCKSZ];
    for blknum in 0..nblocks {
        let (state, _lsn) = prepare_page(&ctx, file, blknum, &src, &mut page, false, &from)?;

        match state {
            ReadOutcome::Truncated => break,
            // Already logged by the reader.
            ReadOutcome::Corrupted => is_valid = false,
            _ => {}
        }
    }

    Ok(is_valid)
}

/// Replay a framed backup file: recompute the rolling CRC, decompress where
/// needed, and run every page through the validator with `stop_lsn` engaged.
///
/// Frame damage, header/checksum failures and a CRC mismatch make the file
/// invalid; a page LSN past `stop_lsn` is reported but tolerated: it only
/// means the backup predates recovery.
pub fn check_file_pages(
    file: &FileEntry,
    fullpath: &Path,
    stop_lsn: Lsn,
    checksum_enabled: bool,
    backup_version: u32,
    cancel: &CancelToken,
) -> Result<bool> {
    let path = fullpath.display().to_string();
    let mut is_valid = true;

    debug!("Validate relation blocks for file \"{path}\"");

    let in_file = match File::open(fullpath) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("File \"{path}\" is not found");
            return Ok(false);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Cannot open file \"{path}\": {e}"));
        }
    };
    let mut reader = BufReader::with_capacity(STDIO_BUFSIZE, in_file);

    let mut crc = BackupCrc::new(backup_uses_crc32c(backup_version));
    let mut blknum: u32 = 0;

    loop {
        cancel.check("data file validation")?;

        let header = match read_frame_header(&mut reader) {
            Ok(None) => break,
            Ok(Some(header)) => header,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                warn!("Odd size page found at block {blknum} of \"{path}\"");
                return Ok(false);
            }
            Err(e) => {
                warn!("Cannot read header of block {blknum} of \"{path}\": {e}");
                return Ok(false);
            }
        };

        crc.update(&header.encode());

        if header.block == 0 && header.compressed_size == 0 {
            debug!("Skip empty block of \"{path}\"");
            continue;
        }

        if header.block < blknum {
            warn!("Backup is broken at block {blknum} of \"{path}\"");
            return Ok(false);
        }
        blknum = header.block;

        if header.compressed_size == PAGE_TRUNCATED {
            debug!("Block {blknum} of \"{path}\" is truncated");
            continue;
        }

        if header.compressed_size > BLCKSZ as i32 || header.compressed_size <= 0 {
            warn!(
                "Invalid compressed size {} at block {blknum} of \"{path}\"",
                header.compressed_size
            );
            return Ok(false);
        }

        let compressed_size = header.compressed_size as usize;
        let padded = maxalign(compressed_size);
        let mut payload: PageBuf = [0u8; BLCKSZ];
        if let Err(e) = reader.read_exact(&mut payload[..padded]) {
            warn!("Cannot read block {blknum} of \"{path}\": {e}");
            return Ok(false);
        }

        crc.update(&payload[..padded]);

        let absolute = absolute_blkno(file.segno, blknum);

        let check = if compressed_size != BLCKSZ
            || page_may_be_compressed(&payload, file.compress_alg, backup_version)
        {
            let mut page: PageBuf = [0u8; BLCKSZ];
            let uncompressed_size =
                match decompress(&mut page, &payload[..compressed_size], file.compress_alg) {
                    Ok(n) => n as i64,
                    Err(err) => {
                        warn!(
                            "An error occured during decompressing block {blknum} of file \"{path}\": {}",
                            err.message()
                        );
                        -1
                    }
                };

            if uncompressed_size != BLCKSZ as i64 {
                // A wrong guess by the legacy predicate just means the page
                // itself is bad; anything else breaks the whole file.
                if compressed_size == BLCKSZ {
                    is_valid = false;
                    continue;
                }
                warn!(
                    "Page of file \"{path}\" uncompressed to {uncompressed_size} bytes, expected {BLCKSZ}"
                );
                return Ok(false);
            }

            validate_one_page(&page, absolute, Some(stop_lsn), checksum_enabled)
        } else {
            validate_one_page(&payload, absolute, Some(stop_lsn), checksum_enabled)
        };

        match check {
            PageCheck::Zeroed => {
                debug!("File: \"{}\" blknum {blknum}, empty zeroed page", file.rel_path);
            }
            PageCheck::Valid(_) => {}
            PageCheck::HeaderInvalid => {
                warn!(
                    "Page header is looking insane: {}, block {blknum}",
                    file.rel_path
                );
                is_valid = false;
            }
            PageCheck::ChecksumMismatch(_) => {
                warn!(
                    "File: {} blknum {blknum} have wrong checksum",
                    file.rel_path
                );
                is_valid = false;
            }
            PageCheck::LsnFromFuture(page_lsn) => {
                warn!(
                    "File: {}, block {blknum}, checksum is {}. Page is from future: pageLSN {page_lsn} stopLSN {stop_lsn}",
                    file.rel_path,
                    if checksum_enabled { "correct" } else { "not enabled" },
                );
            }
        }
    }

    if crc.finish() != file.crc {
        warn!(
            "Invalid CRC of backup file \"{path}\": {:X}. Expected {:X}",
            crc.finish(),
            file.crc
        );
        is_valid = false;
    }

    Ok(is_valid)
}
