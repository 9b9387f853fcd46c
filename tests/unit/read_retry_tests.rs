use std::fs;
use std::io::Write;

use tempfile::tempdir;

use pgbak::cancel::CancelToken;
use pgbak::catalog::{BackupMode, FileEntry};
use pgbak::datafile::read::{read_page_with_retries, RetryRead};
use pgbak::datafile::{prepare_page, BackupContext, ReadOutcome};
use pgbak::page::validate::PageCheck;
use pgbak::page::{Lsn, PageBuf, BLCKSZ};

#[path = "../common/mod.rs"]
mod common;

use common::{broken_page, valid_page};

/// Reader that replays a scripted sequence of outcomes.
struct ScriptedReader {
    script: Vec<ScriptStep>,
    cursor: usize,
}

enum ScriptStep {
    Page(PageBuf),
    Partial(usize),
    Eof,
}

impl ScriptedReader {
    fn new(script: Vec<ScriptStep>) -> Self {
        Self { script, cursor: 0 }
    }

    fn read(&mut self, buf: &mut PageBuf) -> std::io::Result<usize> {
        let step = &self.script[self.cursor.min(self.script.len() - 1)];
        self.cursor += 1;
        match step {
            ScriptStep::Page(page) => {
                buf.copy_from_slice(page);
                Ok(BLCKSZ)
            }
            ScriptStep::Partial(n) => Ok(*n),
            ScriptStep::Eof => Ok(0),
        }
    }
}

#[test]
fn torn_reads_recover_on_the_hundredth_attempt() {
    let good = valid_page(10, 0, 0, 0x33);
    let mut script: Vec<ScriptStep> = (0..99).map(|_| ScriptStep::Page(broken_page(0xAA))).collect();
    script.push(ScriptStep::Page(good));

    let mut reader = ScriptedReader::new(script);
    let mut page: PageBuf = [0u8; BLCKSZ];

    let outcome =
        read_page_with_retries(|buf| reader.read(buf), &mut page, 0, true, "relfile", 0).unwrap();
    assert_eq!(outcome, RetryRead::Valid(Lsn(10)));
    assert_eq!(page, good);
}

#[test]
fn one_hundred_torn_reads_fail() {
    let script: Vec<ScriptStep> = (0..100).map(|_| ScriptStep::Page(broken_page(0xAA))).collect();
    let mut reader = ScriptedReader::new(script);
    let mut page: PageBuf = [0u8; BLCKSZ];

    let outcome =
        read_page_with_retries(|buf| reader.read(buf), &mut page, 0, true, "relfile", 0).unwrap();
    assert_eq!(outcome, RetryRead::Failed(PageCheck::HeaderInvalid));
}

#[test]
fn partial_reads_are_retried() {
    let good = valid_page(10, 0, 0, 0x33);
    let mut script: Vec<ScriptStep> = (0..99).map(|_| ScriptStep::Partial(4096)).collect();
    script.push(ScriptStep::Page(good));

    let mut reader = ScriptedReader::new(script);
    let mut page: PageBuf = [0u8; BLCKSZ];

    let outcome =
        read_page_with_retries(|buf| reader.read(buf), &mut page, 0, true, "relfile", 0).unwrap();
    assert_eq!(outcome, RetryRead::Valid(Lsn(10)));
}

#[test]
fn empty_read_means_truncation() {
    let mut reader = ScriptedReader::new(vec![ScriptStep::Eof]);
    let mut page: PageBuf = [0u8; BLCKSZ];

    let outcome =
        read_page_with_retries(|buf| reader.read(buf), &mut page, 0, true, "relfile", 0).unwrap();
    assert_eq!(outcome, RetryRead::Truncated);
}

#[test]
fn io_errors_are_fatal() {
    let mut page: PageBuf = [0u8; BLCKSZ];
    let result = read_page_with_retries(
        |_buf| Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied)),
        &mut page,
        0,
        true,
        "relfile",
        0,
    );
    assert!(result.is_err());
}

#[test]
fn checksum_mismatch_after_retries_reports_checksum_detail() {
    // stored for block 0, read as absolute block 1: checksum never matches
    let page = valid_page(10, 0, 0, 0x33);
    let script: Vec<ScriptStep> = (0..100).map(|_| ScriptStep::Page(page)).collect();
    let mut reader = ScriptedReader::new(script);
    let mut out: PageBuf = [0u8; BLCKSZ];

    let outcome =
        read_page_with_retries(|buf| reader.read(buf), &mut out, 1, true, "relfile", 0).unwrap();
    assert!(matches!(outcome, RetryRead::Failed(PageCheck::ChecksumMismatch(_))));
}

fn write_source(dir: &std::path::Path, name: &str, pages: &[PageBuf]) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = fs::File::create(&path).unwrap();
    for page in pages {
        f.write_all(page).unwrap();
    }
    path
}

#[test]
fn prepare_page_strict_fails_on_persistent_corruption() {
    let dir = tempdir().unwrap();
    let path = write_source(dir.path(), "100", &[broken_page(0xAA)]);
    let src = fs::File::open(&path).unwrap();

    let file = FileEntry::new("base/1/100");
    let ctx = BackupContext::local(BackupMode::Full, CancelToken::new());
    let mut page: PageBuf = [0u8; BLCKSZ];

    let err = prepare_page(&ctx, &file, 0, &src, &mut page, true, "base/1/100").unwrap_err();
    assert!(err.to_string().contains("Corruption detected"), "{err}");
}

#[test]
fn prepare_page_non_strict_reports_and_continues() {
    let dir = tempdir().unwrap();
    let path = write_source(dir.path(), "100", &[broken_page(0xAA)]);
    let src = fs::File::open(&path).unwrap();

    let file = FileEntry::new("base/1/100");
    let ctx = BackupContext::local(BackupMode::Full, CancelToken::new());
    let mut page: PageBuf = [0u8; BLCKSZ];

    let (state, _) = prepare_page(&ctx, &file, 0, &src, &mut page, false, "base/1/100").unwrap();
    assert_eq!(state, ReadOutcome::Corrupted);
}

#[test]
fn delta_mode_skips_old_pages_but_copies_nullified_lsn() {
    let dir = tempdir().unwrap();
    let fresh = valid_page(100, 0, 0, 1);
    let stale = valid_page(50, 0, 1, 2);
    let path = write_source(dir.path(), "100", &[fresh, stale]);
    let src = fs::File::open(&path).unwrap();

    let mut file = FileEntry::new("base/1/100");
    file.exists_in_prev = true;

    let mut ctx = BackupContext::local(BackupMode::Delta, CancelToken::new());
    ctx.prev_start_lsn = Lsn(75);

    let mut page: PageBuf = [0u8; BLCKSZ];

    let (state, lsn) = prepare_page(&ctx, &file, 0, &src, &mut page, true, "f").unwrap();
    assert_eq!(state, ReadOutcome::Ok);
    assert_eq!(lsn, Lsn(100));

    let (state, lsn) = prepare_page(&ctx, &file, 1, &src, &mut page, true, "f").unwrap();
    assert_eq!(state, ReadOutcome::Skip);
    assert_eq!(lsn, Lsn(50));

    // a zeroed page short-circuits before the LSN comparison
    let zero_path = write_source(dir.path(), "101", &[[0u8; BLCKSZ]]);
    let zero_src = fs::File::open(&zero_path).unwrap();
    let (state, _) = prepare_page(&ctx, &file, 0, &zero_src, &mut page, true, "f").unwrap();
    assert_eq!(state, ReadOutcome::Ok);
}

#[test]
fn cancelled_token_aborts_reading() {
    let dir = tempdir().unwrap();
    let path = write_source(dir.path(), "100", &[valid_page(1, 0, 0, 0)]);
    let src = fs::File::open(&path).unwrap();

    let token = CancelToken::new();
    token.cancel();
    let ctx = BackupContext::local(BackupMode::Full, token);

    let file = FileEntry::new("base/1/100");
    let mut page: PageBuf = [0u8; BLCKSZ];

    let err = prepare_page(&ctx, &file, 0, &src, &mut page, true, "f").unwrap_err();
    assert!(err.to_string().contains("Interrupted"), "{err}");
}
