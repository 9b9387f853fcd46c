//! `pgbak restore`: rebuild a data directory from a backup chain.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::cancel;
use crate::catalog::{parent_chain, BackupStore, FILE_NOT_FOUND};
use crate::datafile::{
    create_empty_file, restore_data_file, restore_non_data_file, BlockWriter, LocalBlockWriter,
};
use crate::workers::run_jobs;
use crate::{Error, Result};

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Backup store directory.
    #[arg(short = 'B', long)]
    pub store: PathBuf,

    /// Backup to restore; its whole parent chain is replayed.
    #[arg(short = 'i', long)]
    pub backup_id: String,

    /// Target data directory. Must be empty or absent.
    #[arg(short = 'D', long)]
    pub target: PathBuf,

    /// Number of parallel file workers.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,
}

pub fn execute(args: RestoreArgs) -> Result<()> {
    let store = BackupStore::load(&args.store)?;
    let chain = parent_chain(&store, &args.backup_id)?;

    for backup in &chain {
        if !backup.is_ok() {
            return Err(Error::Cli(format!(
                "backup {} in the restore chain is not valid",
                backup.id
            ))
            .into());
        }
    }

    fs::create_dir_all(&args.target)?;
    if fs::read_dir(&args.target)?.next().is_some() {
        return Err(Error::Cli(format!(
            "restore target is not empty: {}",
            args.target.display()
        ))
        .into());
    }

    let dest_backup = *chain.last().expect("chain is never empty");

    // Directory skeleton first so workers never race on mkdir.
    for file in &dest_backup.files {
        if let Some(parent) = args.target.join(&file.rel_path).parent() {
            fs::create_dir_all(parent)?;
        }
    }

    let token = cancel::shared_token();
    let chain_ref = &chain;
    let target = args.target.clone();

    let written = run_jobs(
        dest_backup.files.iter().collect::<Vec<_>>(),
        args.jobs,
        &token,
        |file| {
            // The source vanished during backup; nothing to recreate.
            if file.write_size == FILE_NOT_FOUND {
                return Ok(0u64);
            }

            let to_path = target.join(&file.rel_path);

            if file.write_size == 0 {
                create_empty_file(&target, file)?;
                return Ok(0);
            }

            let bytes = if file.is_datafile {
                let mut out = LocalBlockWriter::create(&to_path)?;
                let bytes = restore_data_file(chain_ref, file, &mut out, &to_path, &token)?;
                out.flush()?;
                bytes
            } else {
                restore_non_data_file(chain_ref, dest_backup, file, &to_path, &token)?.max(0) as u64
            };

            fs::set_permissions(&to_path, fs::Permissions::from_mode(file.mode))
                .map_err(|e| {
                    anyhow::anyhow!("Cannot change mode of \"{}\": {e}", to_path.display())
                })?;

            Ok(bytes)
        },
    )?;

    info!(
        "restored backup {} into {}: {} bytes",
        dest_backup.id,
        args.target.display(),
        written.iter().sum::<u64>()
    );

    Ok(())
}
