//! Retry-until-stable page reads from a live data file.
//!
//! Under a running database a block may be caught half-flushed, so a failed
//! header or checksum check is first treated as a torn read and retried; only
//! a block that stays broken for [`PAGE_READ_ATTEMPTS`] rounds is corruption.

use std::fs::File;
use std::os::unix::fs::FileExt;

use tracing::{debug, warn};

use super::backup::BackupContext;
use super::PAGE_READ_ATTEMPTS;
use crate::catalog::{BackupMode, FileEntry};
use crate::page::checksum::page_checksum;
use crate::page::validate::{
    checksum_error_message, header_error_message, validate_one_page, PageCheck,
};
use crate::page::{absolute_blkno, set_page_checksum, Lsn, PageBuf, BLCKSZ};
use crate::{Error, Result};

/// What became of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Page retrieved; the buffer holds its final contents.
    Ok,
    /// The file ends before this block. Fine on a shrinking relation.
    Truncated,
    /// DELTA filter: the page predates the previous backup, skip it.
    Skip,
    /// Unrecoverable damage; only surfaced in non-strict mode.
    Corrupted,
}

/// Supplies blocks from the database's shared buffers, for change-tracking
/// versions that cannot be trusted to have flushed them to disk yet.
/// Implementations are shared across file workers.
pub trait BlockProvider: Send + Sync {
    /// `None` means the block was truncated away.
    fn get_block(
        &self,
        db_oid: u32,
        tblspc_oid: u32,
        rel_oid: u32,
        absolute_blkno: u32,
    ) -> Result<Option<Vec<u8>>>;
}

/// Result of the retry kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryRead {
    Truncated,
    Zeroed,
    Valid(Lsn),
    /// Attempts exhausted; carries the last classification.
    Failed(PageCheck),
}

/// Read one block through `read_block` until it validates or the attempts
/// run out. Generic over the reader so torn reads are injectable.
pub fn read_page_with_retries<F>(
    mut read_block: F,
    page: &mut PageBuf,
    absolute_blkno: u32,
    checksum_enabled: bool,
    path: &str,
    blknum: u32,
) -> Result<RetryRead>
where
    F: FnMut(&mut PageBuf) -> std::io::Result<usize>,
{
    let mut last_check = PageCheck::HeaderInvalid;

    for _ in 0..PAGE_READ_ATTEMPTS {
        let read_len = read_block(page).map_err(|e| {
            anyhow::anyhow!("Cannot read block {blknum} of \"{path}\": {e}")
        })?;

        if read_len == 0 {
            debug!("Cannot read block {blknum} of \"{path}\": block truncated");
            return Ok(RetryRead::Truncated);
        }
        if read_len != BLCKSZ {
            warn!(
                "Cannot read block {blknum} of \"{path}\": read {read_len} of {BLCKSZ}, try again"
            );
            continue;
        }

        match validate_one_page(page, absolute_blkno, None, checksum_enabled) {
            PageCheck::Zeroed => {
                debug!("File: \"{path}\" blknum {blknum}, empty page");
                return Ok(RetryRead::Zeroed);
            }
            PageCheck::Valid(lsn) => return Ok(RetryRead::Valid(lsn)),
            check @ PageCheck::HeaderInvalid => {
                debug!("File: \"{path}\" blknum {blknum} have wrong page header, try again");
                last_check = check;
            }
            check @ PageCheck::ChecksumMismatch(_) => {
                debug!("File: \"{path}\" blknum {blknum} have wrong checksum, try again");
                last_check = check;
            }
            // stop_lsn is not engaged here, so this cannot come back.
            PageCheck::LsnFromFuture(_) => unreachable!("stop_lsn disabled during read"),
        }
    }

    Ok(RetryRead::Failed(last_check))
}

/// Retrieve block `blknum` of `file` into `page`, honouring the backup mode.
///
/// In strict mode corruption is fatal; otherwise it is logged and reported as
/// [`ReadOutcome::Corrupted`] so the caller can keep scanning.
pub fn prepare_page(
    ctx: &BackupContext<'_>,
    file: &FileEntry,
    blknum: u32,
    src: &File,
    page: &mut PageBuf,
    strict: bool,
    from_path: &str,
) -> Result<(ReadOutcome, Lsn)> {
    ctx.cancel.check("page reading")?;

    let absolute = absolute_blkno(file.segno, blknum);
    let mut page_lsn = Lsn::INVALID;

    // Change-tracking 1.x is the only mode that bypasses the disk read.
    let ptrack_from_memory =
        ctx.mode == BackupMode::Ptrack && (15..20).contains(&ctx.ptrack_version);

    if !ptrack_from_memory {
        let offset = blknum as u64 * BLCKSZ as u64;
        let outcome = read_page_with_retries(
            |buf| src.read_at(buf, offset),
            page,
            absolute,
            ctx.checksum_enabled,
            from_path,
            blknum,
        )?;

        match outcome {
            RetryRead::Truncated => return Ok((ReadOutcome::Truncated, Lsn::INVALID)),
            RetryRead::Zeroed => return Ok((ReadOutcome::Ok, Lsn::INVALID)),
            RetryRead::Valid(lsn) => {
                // Only DELTA needs the LSN downstream; everyone else is done.
                if ctx.mode != BackupMode::Delta {
                    return Ok((ReadOutcome::Ok, lsn));
                }
                page_lsn = lsn;
            }
            RetryRead::Failed(check) => {
                let reason = match check {
                    PageCheck::ChecksumMismatch(_) => checksum_error_message(page, absolute),
                    _ => header_error_message(page),
                };
                let err = Error::Corruption {
                    path: from_path.to_string(),
                    blknum,
                    reason,
                };
                if strict {
                    return Err(err.into());
                }
                warn!("{err}");
                return Ok((ReadOutcome::Corrupted, Lsn::INVALID));
            }
        }

        // checkdb not going further
        if !strict {
            return Ok((ReadOutcome::Ok, page_lsn));
        }
    } else {
        let provider = ctx.provider.ok_or_else(|| {
            anyhow::anyhow!("no shared-buffer block provider configured for ptrack backup")
        })?;

        let block = provider.get_block(file.db_oid, file.tblspc_oid, file.rel_oid, absolute)?;
        let block = match block {
            // This block was truncated.
            None => return Ok((ReadOutcome::Truncated, Lsn::INVALID)),
            Some(block) => block,
        };
        if block.len() != BLCKSZ {
            return Err(Error::BadProviderPage {
                path: from_path.to_string(),
                blknum,
                expected: BLCKSZ,
                actual: block.len(),
            }
            .into());
        }
        page.copy_from_slice(&block);

        // Shared buffers may hand back a zeroed page (fine) or a stale
        // checksum (fixable), but never an insane header.
        match validate_one_page(page, absolute, None, ctx.checksum_enabled) {
            PageCheck::Zeroed => return Ok((ReadOutcome::Ok, Lsn::INVALID)),
            PageCheck::HeaderInvalid => {
                return Err(Error::Corruption {
                    path: from_path.to_string(),
                    blknum,
                    reason: header_error_message(page),
                }
                .into());
            }
            check => page_lsn = check.lsn(),
        }

        if ctx.checksum_enabled {
            let fresh = page_checksum(page, absolute);
            set_page_checksum(page, fresh);
        }
    }

    // Skip the page when its LSN predates the parent backup. Nullified pages
    // are always copied by DELTA, just to be safe.
    if ctx.mode == BackupMode::Delta
        && file.exists_in_prev
        && page_lsn.is_valid()
        && page_lsn < ctx.prev_start_lsn
    {
        debug!("Skipping blknum {blknum} in file: \"{from_path}\"");
        return Ok((ReadOutcome::Skip, page_lsn));
    }

    Ok((ReadOutcome::Ok, page_lsn))
}
