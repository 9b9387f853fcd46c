//! Per-file bookkeeping inside a backup filelist.

use serde::{Deserialize, Serialize};

use crate::compress::CompressAlg;
use crate::pagemap::PageBitmap;

/// `write_size` sentinel: the file was unchanged and nothing was stored.
pub const BYTES_INVALID: i64 = -1;
/// `write_size` sentinel: the source vanished during backup. Benign.
pub const FILE_NOT_FOUND: i64 = -2;

/// One backed-up file (relation segment or non-data file).
///
/// Owned by exactly one backup's filelist; the drivers borrow it mutably for
/// the duration of a single backup or restore pass. The pagemap is single-use
/// runtime state fed in by the caller and is not persisted here; PAGE-mode
/// change maps live in their own sidecar files.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileEntry {
    pub rel_path: String,
    pub segno: u32,
    pub db_oid: u32,
    pub tblspc_oid: u32,
    pub rel_oid: u32,
    pub is_datafile: bool,
    /// Source size in bytes at the time the filelist was built.
    pub size: u64,
    /// Permission bits applied to the destination copy.
    pub mode: u32,
    /// Source mtime (seconds); drives the non-data skip decision.
    pub mtime: i64,
    pub n_blocks: u32,
    pub read_size: u64,
    /// Bytes stored, or one of [`BYTES_INVALID`] / [`FILE_NOT_FOUND`].
    pub write_size: i64,
    pub uncompressed_size: i64,
    pub crc: u32,
    pub compress_alg: CompressAlg,

    #[serde(skip)]
    pub exists_in_prev: bool,
    /// True when the change-tracking source could not produce a map at all;
    /// distinct from an empty map, which means "nothing changed".
    #[serde(skip)]
    pub pagemap_absent: bool,
    #[serde(skip)]
    pub pagemap: Option<PageBitmap>,
}

impl FileEntry {
    pub fn new(rel_path: impl Into<String>) -> Self {
        Self {
            rel_path: rel_path.into(),
            mode: 0o600,
            ..Default::default()
        }
    }

    /// Whether anything was actually stored for this entry.
    pub fn is_stored(&self) -> bool {
        self.write_size > 0
    }
}

/// Keep the filelist ordered by relative path so lookups can bisect.
pub fn sort_filelist(files: &mut [FileEntry]) {
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
}

/// Binary-search the (sorted) filelist for a relative path.
pub fn find_file<'a>(files: &'a [FileEntry], rel_path: &str) -> Option<&'a FileEntry> {
    files
        .binary_search_by(|f| f.rel_path.as_str().cmp(rel_path))
        .ok()
        .map(|idx| &files[idx])
}
