//! `pgbak backup`: back up an instance directory into the store.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Args;
use tracing::info;
use walkdir::WalkDir;

use crate::cancel;
use crate::catalog::{
    sort_filelist, Backup, BackupMode, BackupStatus, BackupStore, FileEntry,
};
use crate::compress::CompressAlg;
use crate::datafile::{backup_data_file, backup_non_data_file, BackupContext};
use crate::page::Lsn;
use crate::pagemap::PageBitmap;
use crate::workers::run_jobs;
use crate::{Error, Result};

// PostgreSQL OID is u32: up to 10 decimal digits.
const MAX_OID_DIGITS: usize = 10;
// Segment numbers stay small: up to 5 digits.
const MAX_SEGMENT_DIGITS: usize = 5;

#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    /// Backup store directory.
    #[arg(short = 'B', long)]
    pub store: PathBuf,

    /// Instance data directory to back up.
    #[arg(short = 'D', long)]
    pub pgdata: PathBuf,

    /// Backup mode: full, page, delta or ptrack.
    #[arg(short = 'b', long, default_value = "full")]
    pub mode: String,

    /// Per-page compression algorithm: none, pglz or zlib.
    #[arg(long, default_value = "none")]
    pub compress_alg: String,

    /// Compression level for algorithms that take one.
    #[arg(long, default_value_t = 1)]
    pub compress_level: u32,

    /// Treat data checksums as disabled in this cluster.
    #[arg(long)]
    pub no_checksum: bool,

    /// Change-tracking interface version, e.g. "2.2".
    #[arg(long, default_value = "2.2")]
    pub ptrack_version: String,

    /// WAL position at backup start, `hi/lo` hex form.
    #[arg(long)]
    pub start_lsn: Option<String>,

    /// WAL position at backup stop, `hi/lo` hex form.
    #[arg(long)]
    pub stop_lsn: Option<String>,

    /// Number of parallel file workers.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,
}

pub fn execute(args: BackupArgs) -> Result<()> {
    let mode = parse_mode(&args.mode)?;
    let calg = CompressAlg::from_str(&args.compress_alg)?;

    fs::create_dir_all(&args.store)?;
    let store = BackupStore::load(&args.store)?;

    let parent: Option<&Backup> = if mode.is_incremental() {
        Some(store.latest_ok().ok_or_else(|| {
            Error::Cli(format!(
                "cannot take an incremental backup: no valid parent in {}",
                args.store.display()
            ))
        })?)
    } else {
        None
    };

    let mut backup = store.create_backup(
        mode,
        parent.map(|p| p.id.clone()),
        calg,
        args.compress_level,
        !args.no_checksum,
    )?;
    if let Some(lsn) = &args.start_lsn {
        backup.start_lsn = Lsn::from_str(lsn)?;
    }
    if let Some(lsn) = &args.stop_lsn {
        backup.stop_lsn = Lsn::from_str(lsn)?;
    }

    let mut files = collect_files(&args.pgdata)?;

    // Change maps and prev-backup linkage are per-file state for the drivers.
    for file in &mut files {
        file.exists_in_prev = parent
            .map(|p| p.lookup_file(&file.rel_path).is_some())
            .unwrap_or(false);

        if file.is_datafile && matches!(mode, BackupMode::Page | BackupMode::Ptrack) {
            file.pagemap = PageBitmap::load_sidecar(&args.pgdata.join(&file.rel_path))?;
            file.pagemap_absent = file.pagemap.is_none();
        }
    }

    // All frame files land under database/, mirroring the source tree.
    let database_dir = backup.database_dir();
    for file in &files {
        if let Some(parent_dir) = database_dir.join(&file.rel_path).parent() {
            fs::create_dir_all(parent_dir)?;
        }
    }

    backup.save()?;

    let token = cancel::shared_token();
    let prev_start_lsn = parent.map(|p| p.start_lsn).unwrap_or(Lsn::INVALID);
    let parent_backup_time = parent.map(|p| p.start_time).unwrap_or(0);
    let ptrack_version = parse_ptrack_version(&args.ptrack_version);

    let ctx = BackupContext {
        mode,
        prev_start_lsn,
        calg,
        clevel: args.compress_level,
        checksum_enabled: !args.no_checksum,
        ptrack_version,
        provider: None,
        agent: None,
        cancel: token.clone(),
    };

    let pgdata = args.pgdata.clone();
    let mut results = run_jobs(files, args.jobs, &token, |mut file| {
        let from = pgdata.join(&file.rel_path);
        let to = database_dir.join(&file.rel_path);

        if file.is_datafile {
            backup_data_file(&ctx, &mut file, &from, &to, true)?;
        } else {
            let prev_file = parent.and_then(|p| p.lookup_file(&file.rel_path));
            backup_non_data_file(
                &mut file,
                prev_file,
                &from,
                &to,
                parent_backup_time,
                true,
                &token,
            )?;
        }
        Ok(file)
    })?;

    sort_filelist(&mut results);
    backup.files = results;
    backup.status = BackupStatus::Ok;
    backup.save()?;

    let stored: i64 = backup.files.iter().map(|f| f.write_size.max(0)).sum();
    info!(
        "backup {} complete: {} files, {} bytes stored",
        backup.id,
        backup.files.len(),
        stored
    );

    Ok(())
}

pub(crate) fn parse_mode(mode: &str) -> Result<BackupMode> {
    match mode.to_lowercase().as_str() {
        "full" => Ok(BackupMode::Full),
        "page" => Ok(BackupMode::Page),
        "delta" => Ok(BackupMode::Delta),
        "ptrack" => Ok(BackupMode::Ptrack),
        other => Err(Error::Cli(format!("unknown backup mode: {other}")).into()),
    }
}

fn parse_ptrack_version(version: &str) -> u32 {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    major * 10 + minor
}

/// Walk the instance directory into a filelist. Change-map sidecars are
/// control data, not payload, so they are left out.
pub(crate) fn collect_files(pgdata: &Path) -> Result<Vec<FileEntry>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(pgdata).follow_links(false) {
        let entry = entry.map_err(|e| anyhow::anyhow!("cannot walk {}: {e}", pgdata.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel_path = entry
            .path()
            .strip_prefix(pgdata)
            .expect("walked path under root")
            .to_string_lossy()
            .into_owned();
        if rel_path.ends_with(".pagemap") {
            continue;
        }

        let meta = entry.metadata().map_err(|e| {
            anyhow::anyhow!("cannot stat \"{}\": {e}", entry.path().display())
        })?;

        let mut file = FileEntry::new(rel_path);
        file.size = meta.len();
        file.mode = meta.permissions().mode() & 0o7777;
        file.mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        if let Some((rel_oid, segno)) = datafile_name(&file.rel_path) {
            if in_relation_dir(&file.rel_path) {
                file.is_datafile = true;
                file.rel_oid = rel_oid;
                file.segno = segno;
                file.db_oid = db_oid_from_path(&file.rel_path);
            }
        }

        files.push(file);
    }

    sort_filelist(&mut files);
    Ok(files)
}

fn in_relation_dir(rel_path: &str) -> bool {
    rel_path.starts_with("base/") || rel_path.starts_with("global/")
}

fn db_oid_from_path(rel_path: &str) -> u32 {
    let mut parts = rel_path.split('/');
    match (parts.next(), parts.next()) {
        (Some("base"), Some(db)) => db.parse().unwrap_or(0),
        _ => 0,
    }
}

/// Main-fork relation file names: `<oid>` or `<oid>.<segno>`, decimal with no
/// leading zero, no fork suffix (`_vm`, `_fsm`, `_init` and friends all fail
/// the digit check).
pub fn datafile_name(rel_path: &str) -> Option<(u32, u32)> {
    let name = rel_path.rsplit('/').next()?;

    let (oid_part, seg_part) = match name.split_once('.') {
        Some((oid, seg)) => (oid, Some(seg)),
        None => (name, None),
    };

    if oid_part.is_empty()
        || oid_part.len() > MAX_OID_DIGITS
        || oid_part.starts_with('0')
        || !oid_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let rel_oid: u32 = oid_part.parse().ok()?;

    let segno = match seg_part {
        None => 0,
        Some(seg) => {
            if seg.is_empty()
                || seg.len() > MAX_SEGMENT_DIGITS
                || seg.starts_with('0')
                || !seg.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            seg.parse().ok()?
        }
    };

    Some((rel_oid, segno))
}
