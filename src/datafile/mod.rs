//! The per-file engine: read, frame, restore and check data files.

pub mod backup;
pub mod check;
pub mod read;
pub mod restore;
pub mod write;

pub use backup::{backup_data_file, backup_non_data_file, BackupContext};
pub use check::{check_data_file, check_file_pages};
pub use read::{prepare_page, BlockProvider, ReadOutcome};
pub use restore::{
    create_empty_file, page_may_be_compressed, restore_data_file, restore_data_file_internal,
    restore_non_data_file, BlockWriter, LocalBlockWriter,
};
pub use write::{write_frame, FrameHeader};

/// How many times a block read is retried before declaring corruption.
pub const PAGE_READ_ATTEMPTS: u32 = 100;

/// Full-buffering size for sequential file I/O.
pub const STDIO_BUFSIZE: usize = 65536;

/// Permission bits applied to freshly written backup files.
pub const FILE_PERMISSION: u32 = 0o600;

/// Frame sentinel: the source file ends at `block * BLCKSZ`.
pub const PAGE_TRUNCATED: i32 = -1;

/// Whether a backup of the given (parsed) program version rolls CRC32C over
/// its files. Versions strictly between 2.0.21 and 2.0.25 used the
/// traditional CRC32.
pub fn backup_uses_crc32c(backup_version: u32) -> bool {
    backup_version <= 20021 || backup_version >= 20025
}

/// Rolling whole-file CRC in either of the two historical flavours.
///
/// Must be fed exactly the bytes written to disk, in write order.
#[derive(Debug, Clone)]
pub struct BackupCrc {
    use_crc32c: bool,
    value: u32,
}

impl BackupCrc {
    pub fn new(use_crc32c: bool) -> Self {
        Self {
            use_crc32c,
            value: 0,
        }
    }

    pub fn update(&mut self, buf: &[u8]) {
        if self.use_crc32c {
            self.value = crc32c::crc32c_append(self.value, buf);
        } else {
            let mut hasher = crc32fast::Hasher::new_with_initial(self.value);
            hasher.update(buf);
            self.value = hasher.finalize();
        }
    }

    pub fn finish(&self) -> u32 {
        self.value
    }
}
