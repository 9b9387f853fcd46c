//! Minimal backup catalogue: per-backup metadata, the on-disk store layout,
//! and parent-chain resolution.
//!
//! Layout: `<store>/<backup-id>/backup.json` holds the metadata and filelist;
//! framed data files live under `<store>/<backup-id>/database/`.

pub mod chain;
pub mod file;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compress::CompressAlg;
use crate::page::Lsn;
use crate::{Error, Result};

pub use chain::parent_chain;
pub use file::{find_file, sort_filelist, FileEntry, BYTES_INVALID, FILE_NOT_FOUND};

/// Version stamped into new backups; determines the file CRC flavour on read.
pub const PROGRAM_VERSION: &str = "2.2.7";

pub const DATABASE_DIR: &str = "database";
const METADATA_FILE: &str = "backup.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    Full,
    Page,
    Delta,
    Ptrack,
}

impl BackupMode {
    pub fn is_incremental(self) -> bool {
        !matches!(self, BackupMode::Full)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Running,
    Ok,
    Corrupt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub id: String,
    pub parent_id: Option<String>,
    pub mode: BackupMode,
    pub status: BackupStatus,
    pub program_version: String,
    /// Unix seconds at backup start; drives the non-data skip decision.
    pub start_time: i64,
    pub start_lsn: Lsn,
    pub stop_lsn: Lsn,
    pub checksum_enabled: bool,
    pub compress_alg: CompressAlg,
    pub compress_level: u32,
    pub files: Vec<FileEntry>,

    #[serde(skip)]
    pub root_dir: PathBuf,
}

impl Backup {
    pub fn is_ok(&self) -> bool {
        matches!(self.status, BackupStatus::Ok)
    }

    /// Directory holding the framed data files of this backup.
    pub fn database_dir(&self) -> PathBuf {
        self.root_dir.join(DATABASE_DIR)
    }

    pub fn lookup_file(&self, rel_path: &str) -> Option<&FileEntry> {
        find_file(&self.files, rel_path)
    }

    pub fn save(&self) -> Result<()> {
        let payload = serde_json::to_vec_pretty(self).map_err(Error::Serde)?;
        fs::write(self.root_dir.join(METADATA_FILE), payload)?;
        Ok(())
    }

    pub fn load(root_dir: &Path) -> Result<Self> {
        let contents = fs::read(root_dir.join(METADATA_FILE))?;
        let mut backup: Backup = serde_json::from_slice(&contents).map_err(Error::Serde)?;
        backup.root_dir = root_dir.to_path_buf();
        sort_filelist(&mut backup.files);
        Ok(backup)
    }
}

#[derive(Debug, Clone)]
pub struct BackupStore {
    pub path: PathBuf,
    pub backups: Vec<Backup>,
}

impl BackupStore {
    /// Scan a store directory, loading every backup that carries metadata.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::InvalidStorePath(path.display().to_string()).into());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if !entry.path().join(METADATA_FILE).exists() {
                continue;
            }
            backups.push(Backup::load(&entry.path())?);
        }
        backups.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(Self {
            path: path.to_path_buf(),
            backups,
        })
    }

    pub fn find_backup(&self, backup_id: &str) -> Option<&Backup> {
        self.backups
            .iter()
            .find(|b| b.id.eq_ignore_ascii_case(backup_id))
    }

    /// Latest OK backup, used as the parent for incremental modes.
    pub fn latest_ok(&self) -> Option<&Backup> {
        self.backups
            .iter()
            .filter(|b| b.is_ok())
            .max_by_key(|b| b.start_time)
    }

    /// Allocate a directory for a new backup and return its skeleton.
    pub fn create_backup(
        &self,
        mode: BackupMode,
        parent_id: Option<String>,
        compress_alg: CompressAlg,
        compress_level: u32,
        checksum_enabled: bool,
    ) -> Result<Backup> {
        let id = new_backup_id();
        let root_dir = self.path.join(&id);
        fs::create_dir_all(root_dir.join(DATABASE_DIR))?;

        let start_time = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(Backup {
            id,
            parent_id,
            mode,
            status: BackupStatus::Running,
            program_version: PROGRAM_VERSION.to_string(),
            start_time,
            start_lsn: Lsn::INVALID,
            stop_lsn: Lsn::INVALID,
            checksum_enabled,
            compress_alg,
            compress_level,
            files: Vec::new(),
            root_dir,
        })
    }
}

/// Short, sortable-enough backup identifier.
pub fn new_backup_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

/// Parse "2.0.25" into 20025. Unparseable input collapses to 0, which every
/// version gate treats as "too old".
pub fn parse_program_version(version: &str) -> u32 {
    let mut parts = version.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    major * 10000 + minor * 100 + patch
}
