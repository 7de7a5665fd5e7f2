use crate::StoreError;
use std::fs::{self, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Restricts the process umask to owner-only until dropped.
pub struct UmaskGuard {
    previous: libc::mode_t,
}

impl UmaskGuard {
    #[allow(unsafe_code)]
    pub fn restrict() -> Self {
        // SAFETY: umask() only swaps the process file-mode mask; it cannot fail.
        let previous = unsafe { libc::umask(0o077) };
        Self { previous }
    }
}

impl Drop for UmaskGuard {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: see `restrict`.
        unsafe {
            libc::umask(self.previous);
        }
    }
}

/// Owner-only scratch directory for freshly harvested keyrings.
///
/// Created inside the working directory so staged files sit on the same
/// filesystem as their final location. The directory and everything in it is
/// removed when the area is dropped, whatever the outcome of the harvest.
pub struct StagingArea {
    // Field order matters: the directory goes before the umask is restored.
    dir: TempDir,
    _umask: UmaskGuard,
}

impl StagingArea {
    pub fn create_in(parent: &Path) -> Result<Self, StoreError> {
        let umask = UmaskGuard::restrict();
        let dir = tempfile::Builder::new()
            .prefix(".cairn-staging-")
            .tempdir_in(parent)?;
        fs::set_permissions(dir.path(), Permissions::from_mode(0o700))?;
        debug!("staging harvested keyrings in {}", dir.path().display());
        Ok(Self { dir, _umask: umask })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where a staged file with this name lives (or would live).
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Write `contents` as a new owner-only file.
    pub fn stage(&self, name: &str, contents: &[u8]) -> Result<PathBuf, StoreError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(StoreError::InvalidStagedName(name.to_owned()));
        }
        let path = self.file(name);
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;
        f.write_all(contents)?;
        f.sync_all()?;
        Ok(path)
    }

    /// Remove the directory now, reporting any failure.
    pub fn close(self) -> Result<(), StoreError> {
        let Self { dir, _umask } = self;
        dir.close()?;
        Ok(())
    }
}
