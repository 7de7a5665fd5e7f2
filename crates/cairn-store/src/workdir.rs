use crate::StoreError;
use cairn_schema::{extract_key, ClusterName, KeyKind, CONFIG_FILE_NAME};
use std::fs;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = ".cairn.lock";

/// Layout of the operator's working directory for one cluster.
///
/// Nothing here consults the process working directory; every path is
/// derived from `root`.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    cluster: ClusterName,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>, cluster: ClusterName) -> Self {
        Self {
            root: root.into(),
            cluster,
        }
    }

    /// Like [`new`](Self::new), but the directory must already exist.
    pub fn open(root: impl Into<PathBuf>, cluster: ClusterName) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::NotADirectory(root));
        }
        Ok(Self::new(root, cluster))
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn cluster(&self) -> &ClusterName {
        &self.cluster
    }

    #[inline]
    pub fn keyring_path(&self, kind: KeyKind) -> PathBuf {
        self.root.join(kind.file_name(&self.cluster))
    }

    #[inline]
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// The cluster's daemon config, pushed verbatim to monitor hosts.
    #[inline]
    pub fn ceph_conf_path(&self) -> PathBuf {
        self.root.join(format!("{}.conf", self.cluster))
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn read_ceph_conf(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.ceph_conf_path()) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The cluster-wide monitor keyring that seeds every new monitor.
    pub fn read_mon_keyring(&self) -> Result<String, StoreError> {
        let path = self.keyring_path(KeyKind::Mon);
        let text = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::MissingMonKeyring(path));
            }
            Err(e) => return Err(e.into()),
        };
        if extract_key(&text).is_none() {
            return Err(cairn_schema::KeyringError::NoKey.into());
        }
        Ok(text)
    }

    /// Kinds whose keyring file is present.
    pub fn existing_keyrings(&self) -> Vec<KeyKind> {
        KeyKind::ALL
            .into_iter()
            .filter(|k| self.keyring_path(*k).is_file())
            .collect()
    }

    /// Backup files made for `kind`, oldest first.
    pub fn backups(&self, kind: KeyKind) -> Result<Vec<PathBuf>, StoreError> {
        let prefix = format!("{}-", kind.file_name(&self.cluster));
        let mut found: Vec<PathBuf> = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stamp) = name.strip_prefix(&prefix) else {
                continue;
            };
            let digits = stamp.split('.').next().unwrap_or_default();
            if digits.len() == 14 && digits.bytes().all(|b| b.is_ascii_digit()) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wd(root: &Path) -> WorkDir {
        WorkDir::new(root, ClusterName::from("test"))
    }

    #[test]
    fn paths_follow_cluster_name() {
        let w = wd(Path::new("/srv/cluster"));
        assert_eq!(
            w.keyring_path(KeyKind::Admin),
            PathBuf::from("/srv/cluster/test.client.admin.keyring")
        );
        assert_eq!(
            w.keyring_path(KeyKind::BootstrapOsd),
            PathBuf::from("/srv/cluster/test.bootstrap-osd.keyring")
        );
        assert_eq!(w.ceph_conf_path(), PathBuf::from("/srv/cluster/test.conf"));
        assert_eq!(w.config_path(), PathBuf::from("/srv/cluster/cairn.toml"));
        assert_eq!(w.lock_file(), PathBuf::from("/srv/cluster/.cairn.lock"));
    }

    #[test]
    fn open_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorkDir::open(dir.path(), ClusterName::from("test")).is_ok());
        let err = WorkDir::open(dir.path().join("missing"), ClusterName::from("test")).unwrap_err();
        assert!(matches!(err, StoreError::NotADirectory(_)));
    }

    #[test]
    fn mon_keyring_must_exist_and_carry_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let w = wd(dir.path());
        assert!(matches!(
            w.read_mon_keyring().unwrap_err(),
            StoreError::MissingMonKeyring(_)
        ));
        fs::write(w.keyring_path(KeyKind::Mon), "[mon.]\ncaps mon = allow *\n").unwrap();
        assert!(matches!(w.read_mon_keyring().unwrap_err(), StoreError::Keyring(_)));
        fs::write(w.keyring_path(KeyKind::Mon), "[mon.]\nkey = AQMon==\n").unwrap();
        assert!(w.read_mon_keyring().unwrap().contains("AQMon=="));
    }

    #[test]
    fn missing_ceph_conf_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let w = wd(dir.path());
        assert_eq!(w.read_ceph_conf().unwrap(), None);
        fs::write(w.ceph_conf_path(), "[global]\n").unwrap();
        assert_eq!(w.read_ceph_conf().unwrap().as_deref(), Some("[global]\n"));
    }

    #[test]
    fn backups_only_match_timestamped_names() {
        let dir = tempfile::tempdir().unwrap();
        let w = wd(dir.path());
        for name in [
            "test.client.admin.keyring",
            "test.client.admin.keyring-20240101120000",
            "test.client.admin.keyring-20240101120000.1",
            "test.client.admin.keyring-old",
            "test.bootstrap-osd.keyring-20240101120000",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let backups = w.backups(KeyKind::Admin).unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(w.existing_keyrings(), vec![KeyKind::Admin]);
    }
}
