//! Merging harvested keyrings into the working directory.
//!
//! A local keyring is never dropped: it is either left alone because it
//! already carries the harvested secret, or copied to a timestamped backup
//! before the harvested file replaces it.

use crate::staging::StagingArea;
use crate::workdir::WorkDir;
use crate::{write_atomic, StoreError};
use cairn_schema::{extract_key, key_fingerprint, keys_equivalent, KeyKind};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// `<original-name>-<YYYYMMDDHHMMSS>`
pub const BACKUP_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No local file existed; the harvested one was moved in.
    Created,
    /// The local file already carries the harvested secret.
    Unchanged,
    /// The local file was backed up and replaced.
    Replaced,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileEntry {
    pub kind: KeyKind,
    pub path: PathBuf,
    pub outcome: Outcome,
    pub backup: Option<PathBuf>,
    /// Fingerprint of the secret now in `path`.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub entries: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    fn count(&self, outcome: Outcome) -> usize {
        self.entries.iter().filter(|e| e.outcome == outcome).count()
    }

    pub fn created(&self) -> usize {
        self.count(Outcome::Created)
    }

    pub fn unchanged(&self) -> usize {
        self.count(Outcome::Unchanged)
    }

    pub fn replaced(&self) -> usize {
        self.count(Outcome::Replaced)
    }

    pub fn backups(&self) -> Vec<&Path> {
        self.entries
            .iter()
            .filter_map(|e| e.backup.as_deref())
            .collect()
    }
}

pub fn backup_name(file_name: &str, at: &DateTime<Local>) -> String {
    format!("{file_name}-{}", at.format(BACKUP_STAMP_FORMAT))
}

/// Copy `src` to a fresh backup path. Same-second collisions get `.1`,
/// `.2`, ... appended; an existing file is never overwritten.
fn make_backup(src: &Path, contents: &[u8], at: &DateTime<Local>) -> Result<PathBuf, StoreError> {
    let dir = src.parent().unwrap_or_else(|| Path::new("."));
    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = backup_name(&file_name, at);
    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            dir.join(&base)
        } else {
            dir.join(format!("{base}.{attempt}"))
        };
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&candidate)
        {
            Ok(mut f) => {
                f.write_all(contents)?;
                f.sync_all()?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Reconcile one staged keyring against the working directory.
pub fn reconcile_one(
    workdir: &WorkDir,
    kind: KeyKind,
    staged: &Path,
) -> Result<ReconcileEntry, StoreError> {
    let staged_bytes = fs::read(staged)?;
    let staged_text = String::from_utf8_lossy(&staged_bytes);
    let Some(staged_key) = extract_key(&staged_text) else {
        return Err(StoreError::StagedWithoutKey {
            kind,
            path: staged.to_path_buf(),
        });
    };
    let fingerprint = key_fingerprint(&staged_key);
    let dest = workdir.keyring_path(kind);

    let local = match fs::read(&dest) {
        Ok(b) => Some(b),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let Some(local) = local else {
        write_atomic(&dest, &staged_bytes)?;
        info!("{kind}: stored {} (key {fingerprint})", dest.display());
        return Ok(ReconcileEntry {
            kind,
            path: dest,
            outcome: Outcome::Created,
            backup: None,
            fingerprint,
        });
    };

    let local_text = String::from_utf8_lossy(&local);
    // A local file without a key is never equivalent.
    if keys_equivalent(&local_text, &staged_text).unwrap_or(false) {
        info!("{kind}: {} already up to date", dest.display());
        return Ok(ReconcileEntry {
            kind,
            path: dest,
            outcome: Outcome::Unchanged,
            backup: None,
            fingerprint,
        });
    }

    let backup = make_backup(&dest, &local, &Local::now())?;
    write_atomic(&dest, &staged_bytes)?;
    match extract_key(&local_text) {
        Some(old) => warn!(
            "{kind}: local key {} differs from harvested key {fingerprint}; previous file saved as {}",
            key_fingerprint(&old),
            backup.display()
        ),
        None => warn!(
            "{kind}: local file had no key; previous file saved as {}",
            backup.display()
        ),
    }
    Ok(ReconcileEntry {
        kind,
        path: dest,
        outcome: Outcome::Replaced,
        backup: Some(backup),
        fingerprint,
    })
}

/// Reconcile every staged keyring in `kinds`, in order. Staged files are
/// looked up by their working-directory file name.
pub fn reconcile(
    workdir: &WorkDir,
    staging: &StagingArea,
    kinds: &[KeyKind],
) -> Result<ReconcileReport, StoreError> {
    let mut report = ReconcileReport::default();
    for kind in kinds {
        let staged = staging.file(&kind.file_name(workdir.cluster()));
        report.entries.push(reconcile_one(workdir, *kind, &staged)?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_schema::ClusterName;
    use chrono::TimeZone;

    const ADMIN_A: &str = "[client.admin]\n\tkey = AQA==\n";
    const ADMIN_B: &str = "[client.admin]\n\tkey = AQB==\n";

    fn setup() -> (tempfile::TempDir, WorkDir) {
        let dir = tempfile::tempdir().unwrap();
        let w = WorkDir::new(dir.path(), ClusterName::from("test"));
        (dir, w)
    }

    fn stage(w: &WorkDir, text: &str) -> (StagingArea, PathBuf) {
        let area = StagingArea::create_in(w.root()).unwrap();
        let p = area
            .stage(&KeyKind::Admin.file_name(w.cluster()), text.as_bytes())
            .unwrap();
        (area, p)
    }

    #[test]
    fn backup_name_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(
            backup_name("test.client.admin.keyring", &at),
            "test.client.admin.keyring-20240309070501"
        );
    }

    #[test]
    fn absent_local_file_is_created() {
        let (_d, w) = setup();
        let (_area, staged) = stage(&w, ADMIN_A);
        let e = reconcile_one(&w, KeyKind::Admin, &staged).unwrap();
        assert_eq!(e.outcome, Outcome::Created);
        assert_eq!(fs::read_to_string(w.keyring_path(KeyKind::Admin)).unwrap(), ADMIN_A);
    }

    #[test]
    fn equivalent_local_file_is_untouched() {
        let (_d, w) = setup();
        let local = "[client.admin]\n    key = \"AQA==\"\n";
        fs::write(w.keyring_path(KeyKind::Admin), local).unwrap();
        let (_area, staged) = stage(&w, ADMIN_A);
        let e = reconcile_one(&w, KeyKind::Admin, &staged).unwrap();
        assert_eq!(e.outcome, Outcome::Unchanged);
        // Byte-for-byte what the operator had.
        assert_eq!(fs::read_to_string(w.keyring_path(KeyKind::Admin)).unwrap(), local);
        assert!(w.backups(KeyKind::Admin).unwrap().is_empty());
    }

    #[test]
    fn conflicting_local_file_is_backed_up() {
        let (_d, w) = setup();
        fs::write(w.keyring_path(KeyKind::Admin), ADMIN_A).unwrap();
        let (_area, staged) = stage(&w, ADMIN_B);
        let e = reconcile_one(&w, KeyKind::Admin, &staged).unwrap();
        assert_eq!(e.outcome, Outcome::Replaced);
        assert_eq!(fs::read_to_string(w.keyring_path(KeyKind::Admin)).unwrap(), ADMIN_B);
        let backups = w.backups(KeyKind::Admin).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(&backups[0]).unwrap(), ADMIN_A);
        assert_eq!(e.backup.as_deref(), Some(backups[0].as_path()));
    }

    #[test]
    fn local_file_without_key_is_replaced() {
        let (_d, w) = setup();
        fs::write(w.keyring_path(KeyKind::Admin), "garbage\n").unwrap();
        let (_area, staged) = stage(&w, ADMIN_A);
        let e = reconcile_one(&w, KeyKind::Admin, &staged).unwrap();
        assert_eq!(e.outcome, Outcome::Replaced);
        assert_eq!(fs::read_to_string(e.backup.unwrap()).unwrap(), "garbage\n");
    }

    #[test]
    fn same_second_backups_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("test.client.admin.keyring");
        let at = Local.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let first = make_backup(&src, b"one", &at).unwrap();
        let second = make_backup(&src, b"two", &at).unwrap();
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-20240101000000.1"));
        assert_eq!(fs::read(&first).unwrap(), b"one");
    }

    #[test]
    fn staged_file_without_key_is_rejected() {
        let (_d, w) = setup();
        fs::write(w.keyring_path(KeyKind::Admin), ADMIN_A).unwrap();
        let (_area, staged) = stage(&w, "[client.admin]\n");
        let err = reconcile_one(&w, KeyKind::Admin, &staged).unwrap_err();
        assert!(matches!(err, StoreError::StagedWithoutKey { .. }));
        // The local file survives untouched.
        assert_eq!(fs::read_to_string(w.keyring_path(KeyKind::Admin)).unwrap(), ADMIN_A);
    }

    #[test]
    fn second_pass_is_a_noop() {
        let (_d, w) = setup();
        let area = StagingArea::create_in(w.root()).unwrap();
        for kind in [KeyKind::Admin, KeyKind::BootstrapOsd] {
            let text = format!("[{}]\n\tkey = K{kind}==\n", kind.entity());
            area.stage(&kind.file_name(w.cluster()), text.as_bytes()).unwrap();
        }
        let kinds = [KeyKind::Admin, KeyKind::BootstrapOsd];
        let first = reconcile(&w, &area, &kinds).unwrap();
        assert_eq!(first.created(), 2);
        let second = reconcile(&w, &area, &kinds).unwrap();
        assert_eq!(second.unchanged(), 2);
        assert!(second.backups().is_empty());
    }
}
