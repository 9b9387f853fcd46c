use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::tempdir;

use pgbak::cancel::CancelToken;
use pgbak::catalog::{BackupMode, FileEntry};
use pgbak::cli;
use pgbak::compress::CompressAlg;
use pgbak::datafile::{
    backup_data_file, check_data_file, check_file_pages, BackupContext, FrameHeader,
    PAGE_TRUNCATED,
};
use pgbak::page::{Lsn, PageBuf, BLCKSZ};

#[path = "../common/mod.rs"]
mod common;

use common::{broken_page, valid_page};

fn write_pages(path: &Path, pages: &[PageBuf]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = fs::File::create(path).unwrap();
    for page in pages {
        f.write_all(page).unwrap();
    }
}

fn backup_one(
    dir: &Path,
    pages: &[PageBuf],
    calg: CompressAlg,
) -> (FileEntry, std::path::PathBuf) {
    let src = dir.join("100");
    write_pages(&src, pages);
    let dst = dir.join("100.backup");

    let mut ctx = BackupContext::local(BackupMode::Full, CancelToken::new());
    ctx.calg = calg;
    ctx.clevel = 1;

    let mut file = FileEntry::new("base/1/100");
    file.is_datafile = true;
    file.size = fs::metadata(&src).unwrap().len();

    backup_data_file(&ctx, &mut file, &src, &dst, true).unwrap();
    (file, dst)
}

#[test]
fn freshly_written_backup_validates() {
    for calg in [CompressAlg::None, CompressAlg::Zlib] {
        let dir = tempdir().unwrap();
        let pages: Vec<PageBuf> =
            (0..4).map(|i| valid_page(10 + i, 0, i as u32, i as u8)).collect();
        let (file, stored) = backup_one(dir.path(), &pages, calg);

        let valid = check_file_pages(
            &file,
            &stored,
            Lsn::INVALID,
            true,
            20207,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(valid, "backup written with {calg} must validate");
    }
}

#[test]
fn bit_rot_in_the_stored_file_is_caught() {
    let dir = tempdir().unwrap();
    let pages: Vec<PageBuf> = (0..4).map(|i| valid_page(10 + i, 0, i as u32, i as u8)).collect();
    let (file, stored) = backup_one(dir.path(), &pages, CompressAlg::None);

    let mut bytes = fs::read(&stored).unwrap();
    // flip one payload byte deep in block 2
    let offset = 2 * (8 + BLCKSZ) + 8 + 4000;
    bytes[offset] ^= 0xFF;
    fs::write(&stored, &bytes).unwrap();

    let valid = check_file_pages(
        &file,
        &stored,
        Lsn::INVALID,
        true,
        20207,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!valid);
}

#[test]
fn torn_trailing_header_fails_validation_without_error() {
    let dir = tempdir().unwrap();
    let pages = vec![valid_page(10, 0, 0, 1)];
    let (file, stored) = backup_one(dir.path(), &pages, CompressAlg::None);

    let mut f = fs::OpenOptions::new().append(true).open(&stored).unwrap();
    f.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    drop(f);

    let valid = check_file_pages(
        &file,
        &stored,
        Lsn::INVALID,
        true,
        20207,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!valid);
}

#[test]
fn pages_from_the_future_are_reported_but_tolerated() {
    let dir = tempdir().unwrap();
    let pages = vec![valid_page(1000, 0, 0, 1), valid_page(400, 0, 1, 2)];
    let (file, stored) = backup_one(dir.path(), &pages, CompressAlg::None);

    let valid =
        check_file_pages(&file, &stored, Lsn(500), true, 20207, &CancelToken::new()).unwrap();
    assert!(valid, "LSN past stop_lsn must not fail validation");
}

#[test]
fn empty_frames_and_truncate_markers_fold_into_the_crc() {
    let dir = tempdir().unwrap();
    let stored = dir.path().join("100.backup");

    let mut bytes = Vec::new();
    bytes.extend_from_slice(
        &FrameHeader {
            block: 0,
            compressed_size: 0,
        }
        .encode(),
    );
    let page = valid_page(10, 0, 0, 0x44);
    bytes.extend_from_slice(
        &FrameHeader {
            block: 0,
            compressed_size: BLCKSZ as i32,
        }
        .encode(),
    );
    bytes.extend_from_slice(&page);
    bytes.extend_from_slice(
        &FrameHeader {
            block: 1,
            compressed_size: PAGE_TRUNCATED,
        }
        .encode(),
    );
    fs::write(&stored, &bytes).unwrap();

    let mut file = FileEntry::new("base/1/100");
    file.compress_alg = CompressAlg::None;
    file.crc = crc32c::crc32c(&bytes);

    let valid = check_file_pages(
        &file,
        &stored,
        Lsn::INVALID,
        true,
        20207,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(valid);
}

#[test]
fn stored_crc_flavour_follows_the_backup_version() {
    let dir = tempdir().unwrap();
    let stored = dir.path().join("100.backup");

    let page = valid_page(10, 0, 0, 0x44);
    let mut bytes = Vec::new();
    bytes.extend_from_slice(
        &FrameHeader {
            block: 0,
            compressed_size: BLCKSZ as i32,
        }
        .encode(),
    );
    bytes.extend_from_slice(&page);
    fs::write(&stored, &bytes).unwrap();

    // 2.0.23 sits in the traditional-CRC32 window.
    let mut file = FileEntry::new("base/1/100");
    file.compress_alg = CompressAlg::None;
    file.crc = crc32fast::hash(&bytes);

    let valid = check_file_pages(
        &file,
        &stored,
        Lsn::INVALID,
        true,
        20023,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(valid);

    // ...and the CRC32C flavour must then disagree.
    let valid = check_file_pages(
        &file,
        &stored,
        Lsn::INVALID,
        true,
        20207,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(!valid);
}

#[test]
fn live_check_continues_past_corrupted_blocks() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("100");
    write_pages(&src, &[broken_page(0xAA), valid_page(10, 0, 1, 2)]);

    let mut file = FileEntry::new("base/1/100");
    file.is_datafile = true;
    file.size = fs::metadata(&src).unwrap().len();

    let valid = check_data_file(&file, &src, true, &CancelToken::new()).unwrap();
    assert!(!valid);
}

#[test]
fn live_check_of_a_vanished_file_passes() {
    let dir = tempdir().unwrap();
    let file = FileEntry::new("base/1/100");
    let valid =
        check_data_file(&file, &dir.path().join("100"), true, &CancelToken::new()).unwrap();
    assert!(valid);
}

#[test]
fn live_check_accepts_a_healthy_file() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("100");
    write_pages(&src, &[valid_page(10, 0, 0, 1), [0u8; BLCKSZ]]);

    let mut file = FileEntry::new("base/1/100");
    file.is_datafile = true;
    file.size = fs::metadata(&src).unwrap().len();

    let valid = check_data_file(&file, &src, true, &CancelToken::new()).unwrap();
    assert!(valid);
}

#[test]
fn cli_validate_flags_a_tampered_backup() {
    let dir = tempdir().unwrap();
    let pgdata = dir.path().join("pgdata");
    let store = dir.path().join("store");

    write_pages(
        &pgdata.join("base/1/100"),
        &[valid_page(50, 0, 0, 1), valid_page(50, 0, 1, 2)],
    );
    fs::write(pgdata.join("PG_VERSION"), "14\n").unwrap();

    cli::backup::execute(cli::backup::BackupArgs {
        store: store.clone(),
        pgdata: pgdata.clone(),
        mode: "full".into(),
        compress_alg: "none".into(),
        compress_level: 1,
        no_checksum: false,
        ptrack_version: "2.2".into(),
        start_lsn: None,
        stop_lsn: None,
        jobs: 1,
    })
    .unwrap();

    let loaded = pgbak::catalog::BackupStore::load(&store).unwrap();
    let backup = &loaded.backups[0];

    cli::validate::execute(cli::validate::ValidateArgs {
        store: store.clone(),
        backup_id: backup.id.clone(),
        jobs: 1,
    })
    .unwrap();

    // flip one byte of the stored relation and validate again
    let stored = backup.database_dir().join("base/1/100");
    let mut bytes = fs::read(&stored).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&stored, &bytes).unwrap();

    let err = cli::validate::execute(cli::validate::ValidateArgs {
        store: store.clone(),
        backup_id: backup.id.clone(),
        jobs: 1,
    })
    .unwrap_err();
    assert!(err.to_string().contains("corrupt"), "{err}");

    let reloaded = pgbak::catalog::BackupStore::load(&store).unwrap();
    assert!(!reloaded.backups[0].is_ok());
}
