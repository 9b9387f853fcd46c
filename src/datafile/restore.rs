//! Replaying framed backup files into a rebuilt data file.
//!
//! A restore walks the parent chain oldest (FULL) to newest and lets later
//! layers overwrite earlier blocks; block numbers inside one framed file are
//! monotone, so the FULL pass streams sequentially and only incremental
//! layers seek.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use super::write::FrameHeader;
use super::{PAGE_TRUNCATED, STDIO_BUFSIZE};
use crate::cancel::CancelToken;
use crate::catalog::{parse_program_version, Backup, FileEntry, BYTES_INVALID};
use crate::compress::{decompress, CompressAlg, ZLIB_MAGIC};
use crate::page::{maxalign, PageBuf, PageHeader, BLCKSZ};
use crate::{Error, Result};

/// Destination of restored blocks. The local implementation decompresses on
/// the spot; a remote implementation may forward compressed payloads to the
/// peer holding the data directory instead.
pub trait BlockWriter {
    fn seek(&mut self, pos: u64) -> Result<()>;
    fn write_raw(&mut self, page: &[u8]) -> Result<()>;
    fn write_compressed(&mut self, payload: &[u8], alg: CompressAlg) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    /// Flush, rewind and cut the file to `len` bytes.
    fn truncate(&mut self, len: u64) -> Result<()>;
}

pub struct LocalBlockWriter {
    out: BufWriter<File>,
    path: String,
}

impl LocalBlockWriter {
    pub fn create(to_path: &Path) -> Result<Self> {
        let path = to_path.display().to_string();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(to_path)
            .map_err(|e| anyhow::anyhow!("Cannot open restore target \"{path}\": {e}"))?;
        Ok(Self {
            out: BufWriter::with_capacity(STDIO_BUFSIZE, file),
            path,
        })
    }

    pub fn into_inner(self) -> Result<File> {
        let path = self.path;
        self.out
            .into_inner()
            .map_err(|e| anyhow::anyhow!("Cannot flush \"{path}\": {e}"))
    }
}

impl BlockWriter for LocalBlockWriter {
    fn seek(&mut self, pos: u64) -> Result<()> {
        self.out
            .seek(SeekFrom::Start(pos))
            .with_context(|| format!("Cannot seek in \"{}\"", self.path))?;
        Ok(())
    }

    fn write_raw(&mut self, page: &[u8]) -> Result<()> {
        self.out
            .write_all(page)
            .with_context(|| format!("Cannot write to \"{}\"", self.path))?;
        Ok(())
    }

    fn write_compressed(&mut self, payload: &[u8], alg: CompressAlg) -> Result<()> {
        let mut page: PageBuf = [0u8; BLCKSZ];
        let n = decompress(&mut page, payload, alg).map_err(|e| {
            anyhow::anyhow!("Cannot write to \"{}\": {}", self.path, e.message())
        })?;
        if n != BLCKSZ {
            return Err(Error::BadUncompressedSize {
                path: self.path.clone(),
                actual: n as i64,
                expected: BLCKSZ,
            }
            .into());
        }
        self.write_raw(&page)
    }

    fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .with_context(|| format!("Cannot flush file \"{}\"", self.path))?;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.flush()?;
        self.out
            .get_ref()
            .set_len(len)
            .with_context(|| format!("Cannot truncate file \"{}\"", self.path))?;
        Ok(())
    }
}

/// Pre-2.0.23 backups could write a page whose compressed form happened to be
/// exactly `BLCKSZ` without marking it compressed. There is no airtight
/// criterion, so only pages that fail header validation are suspected, and
/// for zlib the stream magic settles it.
pub fn page_may_be_compressed(page: &PageBuf, alg: CompressAlg, backup_version: u32) -> bool {
    let header = PageHeader::decode(page);
    if header.is_sane() {
        return false;
    }
    if backup_version >= 20023 {
        return false;
    }
    if alg == CompressAlg::Zlib && page[0] != ZLIB_MAGIC {
        return false;
    }
    true
}

/// Rebuild `dest_file` by replaying its framed copies across the chain.
///
/// Entries recorded as unchanged (`BYTES_INVALID`) or empty contribute
/// nothing; the newest entry's block count caps writes from older layers.
/// Returns the number of bytes written.
pub fn restore_data_file(
    parent_chain: &[&Backup],
    dest_file: &FileEntry,
    out: &mut dyn BlockWriter,
    to_path: &Path,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut total_write_len = 0;
    let nblocks = (dest_file.n_blocks > 0).then_some(dest_file.n_blocks);

    for backup in parent_chain {
        let entry = match backup.lookup_file(&dest_file.rel_path) {
            Some(entry) => entry,
            // Destination file does not exist yet at this point of the chain.
            None => continue,
        };

        // Unchanged since the previous backup, nothing was stored.
        if entry.write_size == BYTES_INVALID {
            continue;
        }
        // Truncated to zero in this backup; later layers rebuild any content.
        if entry.write_size == 0 {
            continue;
        }

        let from_path = backup.database_dir().join(&entry.rel_path);
        let from = from_path.display().to_string();
        let in_file = File::open(&from_path)
            .map_err(|e| anyhow::anyhow!("Cannot open backup file \"{from}\": {e}"))?;
        let mut reader = BufReader::with_capacity(STDIO_BUFSIZE, in_file);

        total_write_len += restore_data_file_internal(
            &mut reader,
            out,
            entry,
            parse_program_version(&backup.program_version),
            nblocks,
            &from,
            &to_path.display().to_string(),
            cancel,
        )?;
    }

    Ok(total_write_len)
}

/// Read 8 header bytes; clean EOF yields `None`, a torn tail is an
/// `UnexpectedEof` error for the caller to interpret.
pub(crate) fn read_frame_header(reader: &mut impl Read) -> std::io::Result<Option<FrameHeader>> {
    let mut buf = [0u8; FrameHeader::SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    match filled {
        0 => Ok(None),
        n if n == buf.len() => Ok(Some(FrameHeader::decode(&buf))),
        _ => Err(std::io::ErrorKind::UnexpectedEof.into()),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn restore_data_file_internal(
    reader: &mut impl Read,
    out: &mut dyn BlockWriter,
    file: &FileEntry,
    backup_version: u32,
    nblocks: Option<u32>,
    from_path: &str,
    to_path: &str,
    cancel: &CancelToken,
) -> Result<u64> {
    let mut blknum: u32 = 0;
    let mut write_len: u64 = 0;

    // Seeks flush the output buffer, so track the write cursor and only seek
    // when a block lands elsewhere. FULL layers never do.
    let mut cur_pos: u64 = 0;
    out.seek(cur_pos)?;

    loop {
        cancel.check("data file restore")?;

        let header = match read_frame_header(reader) {
            Ok(None) => break,
            Ok(Some(header)) => header,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::OddSizePage {
                    path: from_path.to_string(),
                    blknum,
                }
                .into());
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Cannot read header of block {blknum} of \"{from_path}\": {e}"
                ));
            }
        };

        if header.block == 0 && header.compressed_size == 0 {
            warn!("Skip empty block of \"{from_path}\"");
            continue;
        }

        if header.block < blknum {
            return Err(Error::BackupBroken {
                path: from_path.to_string(),
                blknum,
            }
            .into());
        }
        blknum = header.block;

        if header.compressed_size == PAGE_TRUNCATED {
            // The source file ended here at backup time.
            debug!("Truncate file \"{to_path}\" to block {blknum}");
            out.truncate(blknum as u64 * BLCKSZ as u64)?;
            break;
        }

        // No point in writing blocks the destination no longer has.
        if let Some(nblocks) = nblocks {
            if blknum >= nblocks {
                break;
            }
        }

        if header.compressed_size > BLCKSZ as i32 {
            return Err(Error::FrameTooLarge {
                blknum,
                size: header.compressed_size,
            }
            .into());
        }
        if header.compressed_size <= 0 {
            return Err(anyhow::anyhow!(
                "Invalid compressed size {} at block {blknum} of \"{from_path}\"",
                header.compressed_size
            ));
        }

        let compressed_size = header.compressed_size as usize;
        let mut payload: PageBuf = [0u8; BLCKSZ];
        reader
            .read_exact(&mut payload[..maxalign(compressed_size)])
            .map_err(|e| {
                anyhow::anyhow!("Cannot read block {blknum} of \"{from_path}\": {e}")
            })?;

        let is_compressed = compressed_size != BLCKSZ
            || page_may_be_compressed(&payload, file.compress_alg, backup_version);

        let write_pos = blknum as u64 * BLCKSZ as u64;
        if cur_pos != write_pos {
            out.seek(write_pos)
                .with_context(|| format!("Cannot seek block {blknum} of \"{to_path}\""))?;
            cur_pos = write_pos;
        }

        if is_compressed {
            out.write_compressed(&payload[..compressed_size], file.compress_alg)
                .with_context(|| format!("Cannot write block {blknum} of \"{to_path}\""))?;
        } else {
            out.write_raw(&payload[..BLCKSZ])
                .with_context(|| format!("Cannot write block {blknum} of \"{to_path}\""))?;
        }

        write_len += BLCKSZ as u64;
        cur_pos = write_pos + BLCKSZ as u64;
    }

    debug!("Copied file \"{from_path}\": {write_len} bytes");
    Ok(write_len)
}

/// Restore a non-data file from the newest layer that stored a full copy.
pub fn restore_non_data_file(
    parent_chain: &[&Backup],
    dest_backup: &Backup,
    dest_file: &FileEntry,
    to_path: &Path,
    cancel: &CancelToken,
) -> Result<i64> {
    let (tmp_backup, tmp_file) = if dest_file.write_size > 0 {
        (dest_backup, dest_file)
    } else {
        // Walk from the direct parent towards the FULL backup and take the
        // first full copy. A zero-length copy ends the search too.
        let mut found = None;
        for backup in parent_chain.iter().rev().skip(1) {
            let entry = backup.lookup_file(&dest_file.rel_path).ok_or_else(|| {
                anyhow::anyhow!(
                    "Failed to locate non-data file \"{}\" in backup {}",
                    dest_file.rel_path,
                    backup.id
                )
            })?;
            if entry.write_size == 0 {
                return Ok(0);
            }
            if entry.write_size > 0 {
                found = Some((*backup, entry));
                break;
            }
        }
        found.ok_or_else(|| {
            anyhow::anyhow!(
                "Failed to find a backup containing full copy of non-data file \"{}\"",
                to_path.display()
            )
        })?
    };

    let from_path = tmp_backup.database_dir().join(&tmp_file.rel_path);
    let from = from_path.display().to_string();
    let to = to_path.display().to_string();

    let mut src = File::open(&from_path)
        .map_err(|e| anyhow::anyhow!("Cannot open backup file \"{from}\": {e}"))?;
    let mut out = BufWriter::with_capacity(
        STDIO_BUFSIZE,
        File::create(to_path)
            .map_err(|e| anyhow::anyhow!("Cannot open destination file \"{to}\": {e}"))?,
    );

    let mut buf = vec![0u8; STDIO_BUFSIZE];
    loop {
        cancel.check("non-data file restore")?;

        let read_len = src
            .read(&mut buf)
            .with_context(|| format!("Cannot read backup file \"{from}\""))?;
        if read_len == 0 {
            break;
        }
        out.write_all(&buf[..read_len])
            .with_context(|| format!("Cannot write to \"{to}\""))?;
    }
    out.flush()
        .with_context(|| format!("Cannot write to \"{to}\""))?;

    debug!("Copied file \"{from}\": {} bytes", tmp_file.write_size);
    Ok(tmp_file.write_size)
}

/// Materialise a zero-length entry during restore.
pub fn create_empty_file(to_root: &Path, file: &FileEntry) -> Result<()> {
    let to_path = to_root.join(&file.rel_path);
    let to = to_path.display().to_string();

    if let Some(parent) = to_path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(&to_path)
        .map_err(|e| anyhow::anyhow!("Cannot open destination file \"{to}\": {e}"))?;
    fs::set_permissions(&to_path, fs::Permissions::from_mode(file.mode))
        .map_err(|e| anyhow::anyhow!("Cannot change mode of \"{to}\": {e}"))?;
    Ok(())
}
