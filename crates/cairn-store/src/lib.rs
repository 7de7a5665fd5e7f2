//! The operator's working directory for Cairn.
//!
//! This crate owns every file Cairn writes locally: `WorkDir` maps identity
//! kinds to keyring paths and locates the cluster config, `StagingArea` is the
//! owner-only scratch directory harvested keyrings land in first, and
//! `reconcile` merges staged keyrings into the working directory, backing up
//! any local file whose secret is about to be replaced. All writes go through
//! a temp file, `persist`, and a directory fsync.

pub mod reconcile;
pub mod staging;
pub mod workdir;

pub use reconcile::{
    backup_name, reconcile, reconcile_one, Outcome, ReconcileEntry, ReconcileReport,
    BACKUP_STAMP_FORMAT,
};
pub use staging::{StagingArea, UmaskGuard};
pub use workdir::WorkDir;

use cairn_schema::{KeyKind, KeyringError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable.
///
/// POSIX does not promise rename durability without it, whatever ext4's
/// default ordering happens to do.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Replace `dest` with `contents` via a sibling temp file. The result is
/// readable by the owner only.
pub(crate) fn write_atomic(dest: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("working directory I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Keyring(#[from] KeyringError),
    #[error("working directory does not exist: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("monitor keyring not found at {}; it must exist before monitors are created", .0.display())]
    MissingMonKeyring(PathBuf),
    #[error("staged {kind} keyring at {} contains no key", .path.display())]
    StagedWithoutKey { kind: KeyKind, path: PathBuf },
    #[error("invalid staged file name '{0}'")]
    InvalidStagedName(String),
}
