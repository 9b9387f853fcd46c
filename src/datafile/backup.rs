//! Per-file backup drivers.
//!
//! `backup_data_file` runs the block pipeline: select blocks (pagemap or
//! sequential), read each through the retry loop, frame survivors into the
//! destination. `backup_non_data_file` is the framing-free path for files
//! that are not relation segments.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use super::read::{prepare_page, BlockProvider, ReadOutcome};
use super::write::write_frame;
use super::{BackupCrc, FILE_PERMISSION, STDIO_BUFSIZE};
use crate::cancel::CancelToken;
use crate::catalog::{BackupMode, FileEntry, BYTES_INVALID, FILE_NOT_FOUND};
use crate::compress::CompressAlg;
use crate::page::{Lsn, PageBuf, BLCKSZ};
use crate::remote::{PageAgent, SendPagesOutcome};
use crate::{Error, Result};

/// Everything one backup pass holds constant across files.
pub struct BackupContext<'a> {
    pub mode: BackupMode,
    /// START LSN of the parent backup; drives the DELTA filter.
    pub prev_start_lsn: Lsn,
    pub calg: CompressAlg,
    pub clevel: u32,
    pub checksum_enabled: bool,
    /// Change-tracking interface version scaled by ten (15 = 1.5); zero when
    /// not applicable.
    pub ptrack_version: u32,
    pub provider: Option<&'a dyn BlockProvider>,
    /// Present when the source database is on a remote host.
    pub agent: Option<&'a dyn PageAgent>,
    pub cancel: CancelToken,
}

impl<'a> BackupContext<'a> {
    pub fn local(mode: BackupMode, cancel: CancelToken) -> Self {
        Self {
            mode,
            prev_start_lsn: Lsn::INVALID,
            calg: CompressAlg::NotDefined,
            clevel: 0,
            checksum_enabled: true,
            ptrack_version: 0,
            provider: None,
            agent: None,
            cancel,
        }
    }
}

/// Back up one data file, block by block, into `to_path`.
///
/// The source is read while the database keeps writing to it, so sizes are
/// advisory and every torn read is retried. When nothing needed copying the
/// destination is removed and `write_size` records the sentinel instead.
pub fn backup_data_file(
    ctx: &BackupContext<'_>,
    file: &mut FileEntry,
    from_path: &Path,
    to_path: &Path,
    missing_ok: bool,
) -> Result<()> {
    let from = from_path.display().to_string();
    let to = to_path.display().to_string();

    if file.size % BLCKSZ as u64 != 0 {
        warn!("File: \"{from}\", invalid file size {}", file.size);
    }

    // The file may well grow or shrink while we work; this is a snapshot.
    let nblocks = (file.size / BLCKSZ as u64) as u32;
    file.n_blocks = nblocks;

    let pagemap_is_empty = file.pagemap.as_ref().map_or(true, |m| m.is_empty());

    // Skip unchanged file only if it exists in the previous backup. This way
    // null-sized files, which no pagemap ever tracks, are still handled.
    if matches!(ctx.mode, BackupMode::Page | BackupMode::Ptrack)
        && pagemap_is_empty
        && file.exists_in_prev
        && !file.pagemap_absent
    {
        file.write_size = BYTES_INVALID;
        return Ok(());
    }

    file.read_size = 0;
    file.write_size = 0;
    file.uncompressed_size = 0;
    file.compress_alg = ctx.calg;
    let mut crc = BackupCrc::new(true);

    let use_pagemap =
        !pagemap_is_empty && !file.pagemap_absent && file.exists_in_prev && file.pagemap.is_some();

    // Remote source: the agent runs the whole loop next to the data and
    // appends frames itself; we only prepare the destination.
    if let Some(agent) = ctx.agent {
        create_destination(to_path, FILE_PERMISSION)?;

        let lsn_cutoff = if ctx.mode == BackupMode::Delta && file.exists_in_prev {
            ctx.prev_start_lsn
        } else {
            Lsn::INVALID
        };
        let pagemap = if use_pagemap { file.pagemap.take() } else { None };

        let outcome = agent.send_pages(
            &from,
            &to,
            file,
            lsn_cutoff,
            ctx.calg,
            ctx.clevel,
            ctx.checksum_enabled,
            pagemap.as_ref(),
        )?;

        // The agent maintains the counters and CRC of `file` itself.
        match outcome {
            SendPagesOutcome::Blocks(n) => {
                file.read_size = n as u64 * BLCKSZ as u64;
            }
            SendPagesOutcome::RemoteError { blknum } => {
                return Err(anyhow::anyhow!("Cannot read block {blknum} of \"{from}\""));
            }
            SendPagesOutcome::PageCorruption { blknum, message } => {
                return Err(Error::Corruption {
                    path: from,
                    blknum,
                    reason: message.unwrap_or_default(),
                }
                .into());
            }
            SendPagesOutcome::WriteFailed { blknum } => {
                return Err(anyhow::anyhow!("Cannot write block {blknum} of \"{to}\""));
            }
        }
    } else {
        let src = match File::open(from_path) {
            Ok(src) => src,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                file.crc = crc.finish();
                // Deleted by a concurrent transaction, most likely.
                if missing_ok {
                    info!("File \"{from}\" is not found");
                    file.write_size = FILE_NOT_FOUND;
                    return Ok(());
                }
                return Err(anyhow::anyhow!("File \"{from}\" is not found"));
            }
            Err(e) => return Err(anyhow::anyhow!("Cannot open file \"{from}\": {e}")),
        };

        let out_file = create_destination(to_path, FILE_PERMISSION)?;
        let mut out = BufWriter::with_capacity(STDIO_BUFSIZE, out_file);

        let pagemap = file.pagemap.take();
        let mut page: PageBuf = [0u8; BLCKSZ];

        let blocks: Box<dyn Iterator<Item = u32> + '_> = if use_pagemap {
            Box::new(pagemap.as_ref().expect("use_pagemap implies map").iter())
        } else {
            Box::new(0..nblocks)
        };

        for blknum in blocks {
            if blknum >= nblocks {
                break;
            }

            let (state, _lsn) = prepare_page(ctx, file, blknum, &src, &mut page, true, &from)?;
            match state {
                ReadOutcome::Truncated => break,
                ReadOutcome::Skip => {}
                ReadOutcome::Ok => write_frame(
                    &mut out,
                    file,
                    blknum,
                    &page,
                    &mut crc,
                    ctx.calg,
                    ctx.clevel,
                    &from,
                    &to,
                )?,
                ReadOutcome::Corrupted => {
                    // Strict reads surface corruption as an error instead.
                    return Err(anyhow::anyhow!(
                        "unexpected page state for block {blknum} of \"{from}\""
                    ));
                }
            }

            file.read_size += BLCKSZ as u64;
        }

        out.flush()
            .map_err(|e| anyhow::anyhow!("Cannot close the backup file \"{to}\": {e}"))?;

        file.crc = crc.finish();
    }

    // FULL and DELTA walked the whole file, so they know the real block
    // count; PAGE and PTRACK only saw a subset.
    if matches!(ctx.mode, BackupMode::Full | BackupMode::Delta) {
        file.n_blocks = (file.read_size / BLCKSZ as u64) as u32;
    }

    // An incremental pass that wrote nothing means the file did not change.
    if ctx.mode.is_incremental()
        && file.exists_in_prev
        && file.write_size == 0
        && file.n_blocks > 0
    {
        file.write_size = BYTES_INVALID;
    }

    // No point in storing empty files.
    if file.write_size <= 0 {
        fs::remove_file(to_path)
            .map_err(|e| anyhow::anyhow!("Cannot remove file \"{to}\": {e}"))?;
    }

    Ok(())
}

fn create_destination(to_path: &Path, mode: u32) -> Result<File> {
    let to = to_path.display().to_string();
    let out = File::create(to_path)
        .map_err(|e| anyhow::anyhow!("Cannot open backup file \"{to}\": {e}"))?;
    fs::set_permissions(to_path, fs::Permissions::from_mode(mode))
        .map_err(|e| anyhow::anyhow!("Cannot change mode of \"{to}\": {e}"))?;
    Ok(out)
}

/// Back up a non-data file verbatim, skipping it when the previous backup
/// already holds an identical copy (same mtime window and whole-file CRC).
pub fn backup_non_data_file(
    file: &mut FileEntry,
    prev_file: Option<&FileEntry>,
    from_path: &Path,
    to_path: &Path,
    parent_backup_time: i64,
    missing_ok: bool,
    cancel: &CancelToken,
) -> Result<()> {
    if let Some(prev) = prev_file {
        if file.exists_in_prev && file.mtime <= parent_backup_time {
            if let Ok(crc) = whole_file_crc(from_path) {
                file.crc = crc;
                if crc == prev.crc {
                    file.write_size = BYTES_INVALID;
                    return Ok(());
                }
            }
        }
    }

    backup_non_data_file_internal(file, from_path, to_path, missing_ok, cancel)
}

fn whole_file_crc(path: &Path) -> Result<u32> {
    let mut src = File::open(path)?;
    let mut crc = BackupCrc::new(true);
    let mut buf = vec![0u8; STDIO_BUFSIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            break;
        }
        crc.update(&buf[..n]);
    }
    Ok(crc.finish())
}

fn backup_non_data_file_internal(
    file: &mut FileEntry,
    from_path: &Path,
    to_path: &Path,
    missing_ok: bool,
    cancel: &CancelToken,
) -> Result<()> {
    let from = from_path.display().to_string();
    let to = to_path.display().to_string();

    let mut crc = BackupCrc::new(true);
    file.read_size = 0;
    file.write_size = 0;
    file.uncompressed_size = 0;

    let mut src = match File::open(from_path) {
        Ok(src) => src,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            file.crc = crc.finish();
            if missing_ok {
                info!("File \"{from}\" is not found");
                file.write_size = FILE_NOT_FOUND;
                return Ok(());
            }
            return Err(anyhow::anyhow!("File \"{from}\" is not found"));
        }
        Err(e) => return Err(anyhow::anyhow!("Cannot open source file \"{from}\": {e}")),
    };

    let out_file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(to_path)
        .map_err(|e| anyhow::anyhow!("Cannot open destination file \"{to}\": {e}"))?;
    fs::set_permissions(to_path, fs::Permissions::from_mode(file.mode))
        .map_err(|e| anyhow::anyhow!("Cannot change mode of \"{to}\": {e}"))?;
    let mut out = BufWriter::with_capacity(STDIO_BUFSIZE, out_file);

    let mut buf = vec![0u8; STDIO_BUFSIZE];
    loop {
        cancel.check("non-data file backup")?;

        let read_len = src
            .read(&mut buf)
            .with_context(|| format!("Cannot read from source file \"{from}\""))?;
        if read_len == 0 {
            break;
        }

        out.write_all(&buf[..read_len])
            .with_context(|| format!("Cannot write to \"{to}\""))?;

        crc.update(&buf[..read_len]);
        file.read_size += read_len as u64;
    }

    file.write_size = file.read_size as i64;
    if file.write_size > 0 {
        file.uncompressed_size = file.write_size;
    }
    file.crc = crc.finish();

    out.flush()
        .with_context(|| format!("Cannot write \"{to}\""))?;

    Ok(())
}
