//! `pgbak validate`: re-read a stored backup and verify every byte of it.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use crate::cancel;
use crate::catalog::{parse_program_version, BackupStatus, BackupStore};
use crate::datafile::{backup_uses_crc32c, check_file_pages, BackupCrc, STDIO_BUFSIZE};
use crate::workers::run_jobs;
use crate::{Error, Result};

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// Backup store directory.
    #[arg(short = 'B', long)]
    pub store: PathBuf,

    /// Backup to validate.
    #[arg(short = 'i', long)]
    pub backup_id: String,

    /// Number of parallel file workers.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    let store = BackupStore::load(&args.store)?;
    let backup = store
        .find_backup(&args.backup_id)
        .ok_or_else(|| Error::MissingBackup(args.backup_id.clone()))?;

    let backup_version = parse_program_version(&backup.program_version);
    let database_dir = backup.database_dir();
    let token = cancel::shared_token();

    let jobs: Vec<_> = backup.files.iter().filter(|f| f.is_stored()).collect();

    let results = run_jobs(jobs, args.jobs, &token, |file| {
        let fullpath = database_dir.join(&file.rel_path);

        let valid = if file.is_datafile {
            check_file_pages(
                file,
                &fullpath,
                backup.stop_lsn,
                backup.checksum_enabled,
                backup_version,
                &token,
            )?
        } else {
            // Non-data files carry no frames; their whole-file CRC is the
            // only witness.
            let mut crc = BackupCrc::new(backup_uses_crc32c(backup_version));
            let mut src = File::open(&fullpath).map_err(|e| {
                anyhow::anyhow!("Cannot open file \"{}\": {e}", fullpath.display())
            })?;
            let mut buf = vec![0u8; STDIO_BUFSIZE];
            loop {
                token.check("file validation")?;
                let n = src.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                crc.update(&buf[..n]);
            }
            let ok = crc.finish() == file.crc;
            if !ok {
                warn!(
                    "Invalid CRC of backup file \"{}\": {:X}. Expected {:X}",
                    fullpath.display(),
                    crc.finish(),
                    file.crc
                );
            }
            ok
        };

        Ok((file.rel_path.clone(), valid))
    })?;

    let corrupted: Vec<_> = results
        .iter()
        .filter(|(_, valid)| !valid)
        .map(|(path, _)| path.as_str())
        .collect();

    if !corrupted.is_empty() {
        let mut marked = backup.clone();
        marked.status = BackupStatus::Corrupt;
        marked.save()?;
        return Err(Error::Cli(format!(
            "backup {} is corrupt: {} invalid files",
            backup.id,
            corrupted.len()
        ))
        .into());
    }

    info!("backup {} is valid: {} files checked", backup.id, results.len());
    Ok(())
}
