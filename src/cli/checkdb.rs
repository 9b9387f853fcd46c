//! `pgbak checkdb`: verify checksums of live data files.

use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use crate::cancel;
use crate::cli::backup::collect_files;
use crate::datafile::check_data_file;
use crate::workers::run_jobs;
use crate::{Error, Result};

#[derive(Args, Debug, Clone)]
pub struct CheckdbArgs {
    /// Instance data directory to scan.
    #[arg(short = 'D', long)]
    pub pgdata: PathBuf,

    /// Treat data checksums as disabled in this cluster.
    #[arg(long)]
    pub no_checksum: bool,

    /// Number of parallel file workers.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,
}

pub fn execute(args: CheckdbArgs) -> Result<()> {
    let files: Vec<_> = collect_files(&args.pgdata)?
        .into_iter()
        .filter(|f| f.is_datafile)
        .collect();

    let token = cancel::shared_token();
    let pgdata = args.pgdata.clone();
    let checksum_enabled = !args.no_checksum;

    let results = run_jobs(files, args.jobs, &token, |file| {
        let from = pgdata.join(&file.rel_path);
        let valid = check_data_file(&file, &from, checksum_enabled, &token)?;
        if !valid {
            warn!("data file \"{}\" contains corrupted pages", file.rel_path);
        }
        Ok(valid)
    })?;

    let corrupted = results.iter().filter(|v| !**v).count();
    if corrupted > 0 {
        return Err(Error::Cli(format!(
            "checkdb: {corrupted} data files contain corrupted pages"
        ))
        .into());
    }

    info!("checkdb: {} data files are valid", results.len());
    Ok(())
}
