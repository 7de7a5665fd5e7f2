//! Working-directory reconciliation across all identity kinds.

use cairn_schema::{extract_key, ClusterName, KeyKind};
use cairn_store::{reconcile, Outcome, StagingArea, WorkDir};
use std::fs;
use std::path::Path;

fn keyring(kind: KeyKind, key: &str) -> String {
    format!("[{}]\n\tkey = {key}\n", kind.entity())
}

fn stage_all(w: &WorkDir, suffix: &str) -> StagingArea {
    let area = StagingArea::create_in(w.root()).unwrap();
    for kind in KeyKind::ALL {
        area.stage(
            &kind.file_name(w.cluster()),
            keyring(kind, &format!("AQ{kind}{suffix}==")).as_bytes(),
        )
        .unwrap();
    }
    area
}

fn snapshot(root: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().unwrap().is_file())
        .map(|e| {
            (
                e.file_name().to_string_lossy().into_owned(),
                fs::read_to_string(e.path()).unwrap(),
            )
        })
        .collect();
    files.sort();
    files
}

#[test]
fn fresh_directory_receives_every_keyring() {
    let dir = tempfile::tempdir().unwrap();
    let w = WorkDir::new(dir.path(), ClusterName::from("test"));
    let area = stage_all(&w, "1");
    let report = reconcile(&w, &area, &KeyKind::ALL).unwrap();
    assert_eq!(report.created(), 5);
    assert!(report.backups().is_empty());
    assert_eq!(w.existing_keyrings(), KeyKind::ALL.to_vec());
}

#[test]
fn rerun_against_unchanged_source_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let w = WorkDir::new(dir.path(), ClusterName::from("test"));

    let area = stage_all(&w, "1");
    reconcile(&w, &area, &KeyKind::ALL).unwrap();
    drop(area);
    let after_first = snapshot(dir.path());

    let area = stage_all(&w, "1");
    let report = reconcile(&w, &area, &KeyKind::ALL).unwrap();
    drop(area);
    assert_eq!(report.unchanged(), 5);
    assert_eq!(snapshot(dir.path()), after_first);
}

#[test]
fn formatting_differences_are_not_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let w = WorkDir::new(dir.path(), ClusterName::from("test"));
    fs::write(
        w.keyring_path(KeyKind::Admin),
        "[client.admin]\n  \t key =   \"AQadmin1==\"\n",
    )
    .unwrap();
    let area = stage_all(&w, "1");
    let report = reconcile(&w, &area, &[KeyKind::Admin]).unwrap();
    assert_eq!(report.entries[0].outcome, Outcome::Unchanged);
    assert!(w.backups(KeyKind::Admin).unwrap().is_empty());
}

#[test]
fn changed_secret_leaves_exactly_one_backup_with_old_secret() {
    let dir = tempfile::tempdir().unwrap();
    let w = WorkDir::new(dir.path(), ClusterName::from("test"));
    let old = keyring(KeyKind::Admin, "AQoldsecret==");
    fs::write(w.keyring_path(KeyKind::Admin), &old).unwrap();

    let area = stage_all(&w, "2");
    let report = reconcile(&w, &area, &KeyKind::ALL).unwrap();
    assert_eq!(report.replaced(), 1);
    assert_eq!(report.created(), 4);

    let live = fs::read_to_string(w.keyring_path(KeyKind::Admin)).unwrap();
    assert_eq!(extract_key(&live).as_deref(), Some("AQadmin2=="));

    let backups = w.backups(KeyKind::Admin).unwrap();
    assert_eq!(backups.len(), 1);
    let name = backups[0].file_name().unwrap().to_string_lossy().into_owned();
    let stamp = name.strip_prefix("test.client.admin.keyring-").unwrap();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(fs::read_to_string(&backups[0]).unwrap(), old);
}

#[test]
fn staging_area_is_gone_after_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let w = WorkDir::new(dir.path(), ClusterName::from("test"));
    let area = stage_all(&w, "1");
    let staging_path = area.path().to_path_buf();
    reconcile(&w, &area, &KeyKind::ALL).unwrap();
    area.close().unwrap();
    assert!(!staging_path.exists());
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with(".cairn-staging-"))
        .collect();
    assert!(leftovers.is_empty());
}
