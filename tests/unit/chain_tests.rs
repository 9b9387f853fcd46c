use std::path::PathBuf;

use pgbak::catalog::{
    parent_chain, parse_program_version, Backup, BackupMode, BackupStatus, BackupStore,
};
use pgbak::compress::CompressAlg;
use pgbak::page::Lsn;

fn backup(id: &str, parent: Option<&str>, mode: BackupMode) -> Backup {
    Backup {
        id: id.to_string(),
        parent_id: parent.map(|p| p.to_string()),
        mode,
        status: BackupStatus::Ok,
        program_version: "2.2.7".to_string(),
        start_time: 0,
        start_lsn: Lsn::INVALID,
        stop_lsn: Lsn::INVALID,
        checksum_enabled: true,
        compress_alg: CompressAlg::None,
        compress_level: 0,
        files: Vec::new(),
        root_dir: PathBuf::new(),
    }
}

fn store(backups: Vec<Backup>) -> BackupStore {
    BackupStore {
        path: PathBuf::new(),
        backups,
    }
}

#[test]
fn chain_resolves_oldest_first() {
    let store = store(vec![
        backup("D2", Some("D1"), BackupMode::Delta),
        backup("FULL", None, BackupMode::Full),
        backup("D1", Some("FULL"), BackupMode::Page),
    ]);

    let chain = parent_chain(&store, "D2").unwrap();
    let ids: Vec<&str> = chain.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["FULL", "D1", "D2"]);
}

#[test]
fn full_backup_is_its_own_chain() {
    let store = store(vec![backup("FULL", None, BackupMode::Full)]);
    let chain = parent_chain(&store, "FULL").unwrap();
    assert_eq!(chain.len(), 1);
}

#[test]
fn target_lookup_ignores_case() {
    let store = store(vec![backup("FULL", None, BackupMode::Full)]);
    assert!(parent_chain(&store, "full").is_ok());
}

#[test]
fn missing_target_is_an_error() {
    let store = store(vec![backup("FULL", None, BackupMode::Full)]);
    let err = parent_chain(&store, "NOPE").unwrap_err();
    assert!(err.to_string().contains("missing backup"), "{err}");
}

#[test]
fn missing_parent_is_an_error() {
    let store = store(vec![backup("D1", Some("GONE"), BackupMode::Delta)]);
    let err = parent_chain(&store, "D1").unwrap_err();
    assert!(err.to_string().contains("missing backup"), "{err}");
}

#[test]
fn parent_cycles_are_detected() {
    let store = store(vec![
        backup("A", Some("B"), BackupMode::Delta),
        backup("B", Some("A"), BackupMode::Delta),
    ]);
    let err = parent_chain(&store, "A").unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn chain_must_start_with_a_full_backup() {
    let store = store(vec![backup("D1", None, BackupMode::Delta)]);
    let err = parent_chain(&store, "D1").unwrap_err();
    assert!(err.to_string().contains("FULL"), "{err}");
}

#[test]
fn program_versions_parse_to_comparable_numbers() {
    assert_eq!(parse_program_version("2.0.25"), 20025);
    assert_eq!(parse_program_version("2.0.21"), 20021);
    assert_eq!(parse_program_version("2.2.7"), 20207);
    assert_eq!(parse_program_version("2.2"), 20200);
    assert_eq!(parse_program_version("garbage"), 0);
}
