//! Package-manager strategies, one per OS family.
//!
//! Each strategy only assembles fixed argv lists and hands them to the
//! session; the package managers themselves provide idempotency for
//! `install`, and `remove` skips anything that is not installed.

use crate::platform::OsFamily;
use crate::session::Session;
use crate::RuntimeError;
use tracing::{debug, info};

/// Options for a third-party package repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoOptions {
    /// Signing key to import before the repository is registered.
    pub gpg_url: Option<String>,
    /// Repository priority, where the package manager supports one.
    pub priority: Option<u32>,
    /// Apt components; defaults to `main`.
    pub components: Vec<String>,
}

pub trait PackageManager {
    fn name(&self) -> &'static str;

    fn is_installed(&self, s: &mut Session, package: &str) -> Result<bool, RuntimeError>;

    fn install(&self, s: &mut Session, names: &[&str], extra_flags: &[&str]) -> Result<(), RuntimeError>;

    fn remove(&self, s: &mut Session, names: &[&str], purge: bool) -> Result<(), RuntimeError>;

    fn clean(&self, s: &mut Session) -> Result<(), RuntimeError>;

    fn add_repo_gpg_key(&self, s: &mut Session, url: &str) -> Result<(), RuntimeError>;

    fn add_repo(
        &self,
        s: &mut Session,
        name: &str,
        url: &str,
        opts: &RepoOptions,
    ) -> Result<(), RuntimeError>;

    fn remove_repo(&self, s: &mut Session, name: &str) -> Result<(), RuntimeError>;
}

fn argv(parts: &[&str], names: &[&str]) -> Vec<String> {
    parts
        .iter()
        .chain(names.iter())
        .map(|p| (*p).to_owned())
        .collect()
}

fn exec(s: &mut Session, argv: &[String]) -> Result<(), RuntimeError> {
    s.check(argv, None).map(|_| ())
}

/// Subset of `names` that is currently installed.
fn installed_subset<'a>(
    pm: &dyn PackageManager,
    s: &mut Session,
    names: &[&'a str],
) -> Result<Vec<&'a str>, RuntimeError> {
    let mut present = Vec::with_capacity(names.len());
    for name in names {
        if pm.is_installed(s, name)? {
            present.push(*name);
        } else {
            debug!("{}: {name} not installed, skipping removal", s.host());
        }
    }
    Ok(present)
}

/// Repository names become file names, so they are restricted.
fn check_repo_name(s: &Session, name: &str) -> Result<(), RuntimeError> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(RuntimeError::CommandFailed {
            host: s.host().to_string(),
            command: format!("add repository '{name}'"),
            code: -1,
            stderr: "invalid repository name".to_owned(),
        })
    }
}

fn ini_repo_file(name: &str, url: &str, opts: &RepoOptions, rpm_md: bool) -> String {
    let mut body = format!("[{name}]\nname={name}\nbaseurl={url}\nenabled=1\n");
    if rpm_md {
        body.push_str("type=rpm-md\nautorefresh=1\n");
    }
    match opts.gpg_url {
        Some(ref key) => {
            body.push_str("gpgcheck=1\n");
            body.push_str(&format!("gpgkey={key}\n"));
        }
        None => body.push_str("gpgcheck=0\n"),
    }
    if let Some(p) = opts.priority {
        body.push_str(&format!("priority={p}\n"));
    }
    body
}

/// Debian and Ubuntu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Apt {
    pub codename: String,
}

impl Apt {
    const SOURCES_DIR: &'static str = "/etc/apt/sources.list.d";
    const KEYS_DIR: &'static str = "/etc/apt/trusted.gpg.d";

    fn apt_get(args: &[&str], names: &[&str]) -> Vec<String> {
        let mut cmd = argv(
            &[
                "env",
                "DEBIAN_FRONTEND=noninteractive",
                "DEBIAN_PRIORITY=critical",
                "apt-get",
                "--assume-yes",
                "-q",
            ],
            args,
        );
        cmd.extend(names.iter().map(|n| (*n).to_owned()));
        cmd
    }

    fn key_file(url: &str) -> String {
        let stem = url
            .rsplit('/')
            .next()
            .and_then(|last| last.split('.').next())
            .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'))
            .unwrap_or("cairn-repo");
        format!("{}/{stem}.asc", Self::KEYS_DIR)
    }
}

impl PackageManager for Apt {
    fn name(&self) -> &'static str {
        "apt"
    }

    fn is_installed(&self, s: &mut Session, package: &str) -> Result<bool, RuntimeError> {
        let out = s.run(&["dpkg-query", "-W", "-f", "${Status}", package], None)?;
        Ok(out.success() && out.stdout.contains("install ok installed"))
    }

    fn install(&self, s: &mut Session, names: &[&str], extra_flags: &[&str]) -> Result<(), RuntimeError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut args = vec!["--no-install-recommends"];
        args.extend_from_slice(extra_flags);
        args.push("install");
        info!("{}: installing {}", s.host(), names.join(" "));
        exec(s, &Self::apt_get(&args, names))
    }

    fn remove(&self, s: &mut Session, names: &[&str], purge: bool) -> Result<(), RuntimeError> {
        let present = installed_subset(self, s, names)?;
        if present.is_empty() {
            return Ok(());
        }
        let action = if purge { "purge" } else { "remove" };
        exec(s, &Self::apt_get(&[action], &present))?;
        exec(s, &Self::apt_get(&["autoremove"], &[]))
    }

    fn clean(&self, s: &mut Session) -> Result<(), RuntimeError> {
        exec(s, &Self::apt_get(&["clean"], &[]))
    }

    fn add_repo_gpg_key(&self, s: &mut Session, url: &str) -> Result<(), RuntimeError> {
        let dest = Self::key_file(url);
        s.makedirs(Self::KEYS_DIR)?;
        exec(s, &argv(&["curl", "-fsSL", "--output", &dest, "--", url], &[]))
    }

    fn add_repo(
        &self,
        s: &mut Session,
        name: &str,
        url: &str,
        opts: &RepoOptions,
    ) -> Result<(), RuntimeError> {
        check_repo_name(s, name)?;
        if let Some(ref key) = opts.gpg_url {
            self.add_repo_gpg_key(s, key)?;
        }
        let components = if opts.components.is_empty() {
            "main".to_owned()
        } else {
            opts.components.join(" ")
        };
        let line = format!("deb {url} {} {components}\n", self.codename);
        s.write_file(&format!("{}/{name}.list", Self::SOURCES_DIR), line.as_bytes(), 0o644)?;
        if let Some(p) = opts.priority {
            let host = url
                .split("://")
                .nth(1)
                .and_then(|rest| rest.split('/').next())
                .unwrap_or(url);
            let pin = format!("Package: *\nPin: origin {host}\nPin-Priority: {p}\n");
            s.write_file(&format!("/etc/apt/preferences.d/{name}.pref"), pin.as_bytes(), 0o644)?;
        }
        exec(s, &Self::apt_get(&["update"], &[]))
    }

    fn remove_repo(&self, s: &mut Session, name: &str) -> Result<(), RuntimeError> {
        check_repo_name(s, name)?;
        s.remove(&format!("{}/{name}.list", Self::SOURCES_DIR))?;
        s.remove(&format!("/etc/apt/preferences.d/{name}.pref"))?;
        exec(s, &Self::apt_get(&["update"], &[]))
    }
}

/// Red Hat family; `program` is `yum` or `dnf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Yum {
    pub program: &'static str,
}

impl PackageManager for Yum {
    fn name(&self) -> &'static str {
        self.program
    }

    fn is_installed(&self, s: &mut Session, package: &str) -> Result<bool, RuntimeError> {
        Ok(s.run(&["rpm", "-q", package], None)?.success())
    }

    fn install(&self, s: &mut Session, names: &[&str], extra_flags: &[&str]) -> Result<(), RuntimeError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut cmd = argv(&[self.program, "-y", "-q"], extra_flags);
        cmd.push("install".to_owned());
        cmd.extend(names.iter().map(|n| (*n).to_owned()));
        info!("{}: installing {}", s.host(), names.join(" "));
        exec(s, &cmd)
    }

    fn remove(&self, s: &mut Session, names: &[&str], _purge: bool) -> Result<(), RuntimeError> {
        let present = installed_subset(self, s, names)?;
        if present.is_empty() {
            return Ok(());
        }
        exec(s, &argv(&[self.program, "-y", "-q", "remove"], &present))
    }

    fn clean(&self, s: &mut Session) -> Result<(), RuntimeError> {
        exec(s, &argv(&[self.program, "clean", "all"], &[]))
    }

    fn add_repo_gpg_key(&self, s: &mut Session, url: &str) -> Result<(), RuntimeError> {
        exec(s, &argv(&["rpm", "--import", url], &[]))
    }

    fn add_repo(
        &self,
        s: &mut Session,
        name: &str,
        url: &str,
        opts: &RepoOptions,
    ) -> Result<(), RuntimeError> {
        check_repo_name(s, name)?;
        if let Some(ref key) = opts.gpg_url {
            self.add_repo_gpg_key(s, key)?;
        }
        let body = ini_repo_file(name, url, opts, false);
        s.write_file(&format!("/etc/yum.repos.d/{name}.repo"), body.as_bytes(), 0o644)
    }

    fn remove_repo(&self, s: &mut Session, name: &str) -> Result<(), RuntimeError> {
        check_repo_name(s, name)?;
        s.remove(&format!("/etc/yum.repos.d/{name}.repo"))
    }
}

/// SUSE family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zypper;

impl PackageManager for Zypper {
    fn name(&self) -> &'static str {
        "zypper"
    }

    fn is_installed(&self, s: &mut Session, package: &str) -> Result<bool, RuntimeError> {
        Ok(s.run(&["rpm", "-q", package], None)?.success())
    }

    fn install(&self, s: &mut Session, names: &[&str], extra_flags: &[&str]) -> Result<(), RuntimeError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut cmd = argv(&["zypper", "--non-interactive", "--quiet", "install"], extra_flags);
        cmd.extend(names.iter().map(|n| (*n).to_owned()));
        info!("{}: installing {}", s.host(), names.join(" "));
        exec(s, &cmd)
    }

    fn remove(&self, s: &mut Session, names: &[&str], _purge: bool) -> Result<(), RuntimeError> {
        let present = installed_subset(self, s, names)?;
        if present.is_empty() {
            return Ok(());
        }
        exec(s, &argv(&["zypper", "--non-interactive", "--quiet", "remove"], &present))
    }

    fn clean(&self, s: &mut Session) -> Result<(), RuntimeError> {
        exec(s, &argv(&["zypper", "--non-interactive", "clean", "--all"], &[]))
    }

    fn add_repo_gpg_key(&self, s: &mut Session, url: &str) -> Result<(), RuntimeError> {
        exec(s, &argv(&["rpm", "--import", url], &[]))
    }

    fn add_repo(
        &self,
        s: &mut Session,
        name: &str,
        url: &str,
        opts: &RepoOptions,
    ) -> Result<(), RuntimeError> {
        check_repo_name(s, name)?;
        if let Some(ref key) = opts.gpg_url {
            self.add_repo_gpg_key(s, key)?;
        }
        let body = ini_repo_file(name, url, opts, true);
        s.write_file(&format!("/etc/zypp/repos.d/{name}.repo"), body.as_bytes(), 0o644)?;
        exec(s, &argv(&["zypper", "--non-interactive", "--gpg-auto-import-keys", "refresh", name], &[]))
    }

    fn remove_repo(&self, s: &mut Session, name: &str) -> Result<(), RuntimeError> {
        check_repo_name(s, name)?;
        s.remove(&format!("/etc/zypp/repos.d/{name}.repo"))
    }
}

/// Arch Linux. Repositories live in pacman.conf and are not managed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacman;

impl Pacman {
    fn unsupported(s: &Session, operation: &str) -> RuntimeError {
        RuntimeError::Unsupported {
            host: s.host().to_string(),
            operation: operation.to_owned(),
            strategy: "pacman".to_owned(),
        }
    }
}

impl PackageManager for Pacman {
    fn name(&self) -> &'static str {
        "pacman"
    }

    fn is_installed(&self, s: &mut Session, package: &str) -> Result<bool, RuntimeError> {
        Ok(s.run(&["pacman", "-Q", package], None)?.success())
    }

    fn install(&self, s: &mut Session, names: &[&str], extra_flags: &[&str]) -> Result<(), RuntimeError> {
        if names.is_empty() {
            return Ok(());
        }
        let mut cmd = argv(&["pacman", "-S", "--noconfirm", "--needed"], extra_flags);
        cmd.extend(names.iter().map(|n| (*n).to_owned()));
        info!("{}: installing {}", s.host(), names.join(" "));
        exec(s, &cmd)
    }

    fn remove(&self, s: &mut Session, names: &[&str], purge: bool) -> Result<(), RuntimeError> {
        let present = installed_subset(self, s, names)?;
        if present.is_empty() {
            return Ok(());
        }
        let flag = if purge { "-Rns" } else { "-R" };
        exec(s, &argv(&["pacman", flag, "--noconfirm"], &present))
    }

    fn clean(&self, s: &mut Session) -> Result<(), RuntimeError> {
        exec(s, &argv(&["pacman", "-Sc", "--noconfirm"], &[]))
    }

    fn add_repo_gpg_key(&self, s: &mut Session, _url: &str) -> Result<(), RuntimeError> {
        Err(Self::unsupported(s, "add_repo_gpg_key"))
    }

    fn add_repo(
        &self,
        s: &mut Session,
        _name: &str,
        _url: &str,
        _opts: &RepoOptions,
    ) -> Result<(), RuntimeError> {
        Err(Self::unsupported(s, "add_repo"))
    }

    fn remove_repo(&self, s: &mut Session, _name: &str) -> Result<(), RuntimeError> {
        Err(Self::unsupported(s, "remove_repo"))
    }
}

/// The package strategy selected for a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packager {
    Apt(Apt),
    Yum(Yum),
    Zypper(Zypper),
    Pacman(Pacman),
}

impl Packager {
    pub fn for_family(family: OsFamily, distro: &str, release: &str, codename: &str) -> Self {
        match family {
            OsFamily::Debian => Packager::Apt(Apt {
                codename: codename.to_owned(),
            }),
            OsFamily::RedHat => {
                let major: u32 = release
                    .split('.')
                    .next()
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(0);
                let program = if distro == "fedora" || major >= 8 {
                    "dnf"
                } else {
                    "yum"
                };
                Packager::Yum(Yum { program })
            }
            OsFamily::Suse => Packager::Zypper(Zypper),
            OsFamily::Arch => Packager::Pacman(Pacman),
        }
    }

    fn inner(&self) -> &dyn PackageManager {
        match self {
            Packager::Apt(p) => p,
            Packager::Yum(p) => p,
            Packager::Zypper(p) => p,
            Packager::Pacman(p) => p,
        }
    }
}

impl PackageManager for Packager {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn is_installed(&self, s: &mut Session, package: &str) -> Result<bool, RuntimeError> {
        self.inner().is_installed(s, package)
    }

    fn install(&self, s: &mut Session, names: &[&str], extra_flags: &[&str]) -> Result<(), RuntimeError> {
        self.inner().install(s, names, extra_flags)
    }

    fn remove(&self, s: &mut Session, names: &[&str], purge: bool) -> Result<(), RuntimeError> {
        self.inner().remove(s, names, purge)
    }

    fn clean(&self, s: &mut Session) -> Result<(), RuntimeError> {
        self.inner().clean(s)
    }

    fn add_repo_gpg_key(&self, s: &mut Session, url: &str) -> Result<(), RuntimeError> {
        self.inner().add_repo_gpg_key(s, url)
    }

    fn add_repo(
        &self,
        s: &mut Session,
        name: &str,
        url: &str,
        opts: &RepoOptions,
    ) -> Result<(), RuntimeError> {
        self.inner().add_repo(s, name, url, opts)
    }

    fn remove_repo(&self, s: &mut Session, name: &str) -> Result<(), RuntimeError> {
        self.inner().remove_repo(s, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFleet, MockHost};
    use crate::ops::CommandOutput;
    use crate::transport::HostTarget;
    use std::time::Duration;

    fn session(fleet: &MockFleet) -> Session {
        Session::open(fleet, &HostTarget::new("h"), true, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn rpm_family_picks_dnf_for_modern_releases() {
        let p = Packager::for_family(OsFamily::RedHat, "centos", "7.9.2009", "core");
        assert_eq!(p.name(), "yum");
        let p = Packager::for_family(OsFamily::RedHat, "rocky", "9.3", "");
        assert_eq!(p.name(), "dnf");
        let p = Packager::for_family(OsFamily::RedHat, "fedora", "40", "");
        assert_eq!(p.name(), "dnf");
    }

    #[test]
    fn apt_install_is_noninteractive() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h"));
        let mut s = session(&fleet);
        let apt = Packager::for_family(OsFamily::Debian, "ubuntu", "22.04", "jammy");
        apt.install(&mut s, &["ceph-mon", "ceph-common"], &[]).unwrap();
        let cmds = fleet.host("h").commands();
        let install = cmds.last().unwrap();
        assert!(install.contains(&"DEBIAN_FRONTEND=noninteractive".to_owned()));
        assert!(install.ends_with(&["install".to_owned(), "ceph-mon".to_owned(), "ceph-common".to_owned()]));
    }

    #[test]
    fn install_nothing_runs_nothing() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h"));
        let mut s = session(&fleet);
        Packager::Pacman(Pacman).install(&mut s, &[], &[]).unwrap();
        assert!(fleet.host("h").commands().is_empty());
    }

    #[test]
    fn remove_skips_packages_that_are_absent() {
        let fleet = MockFleet::new();
        fleet.add(
            MockHost::new("h")
                .respond(&["rpm", "-q", "ceph-mon"], CommandOutput::ok("ceph-mon-18.2\n"))
                .respond(&["rpm", "-q", "ceph-mds"], CommandOutput::failed(1, "not installed")),
        );
        let mut s = session(&fleet);
        let yum = Packager::Yum(Yum { program: "dnf" });
        yum.remove(&mut s, &["ceph-mon", "ceph-mds"], false).unwrap();
        let host = fleet.host("h");
        assert!(host.ran(&["dnf", "remove", "ceph-mon"]));
        assert!(!host.ran(&["dnf", "remove", "ceph-mds"]));
    }

    #[test]
    fn remove_of_nothing_installed_is_a_noop() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h").respond(&["pacman", "-Q"], CommandOutput::failed(1, "")));
        let mut s = session(&fleet);
        Packager::Pacman(Pacman).remove(&mut s, &["ceph"], true).unwrap();
        assert!(!fleet.host("h").ran(&["pacman", "-Rns"]));
    }

    #[test]
    fn yum_repo_file_carries_gpg_and_priority() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h"));
        let mut s = session(&fleet);
        let opts = RepoOptions {
            gpg_url: Some("https://download.ceph.com/keys/release.asc".to_owned()),
            priority: Some(1),
            components: Vec::new(),
        };
        Packager::Yum(Yum { program: "yum" })
            .add_repo(&mut s, "ceph", "https://download.ceph.com/rpm-reef/el7/x86_64", &opts)
            .unwrap();
        let host = fleet.host("h");
        assert!(host.ran(&["rpm", "--import", "https://download.ceph.com/keys/release.asc"]));
        let body = host.file_text("/etc/yum.repos.d/ceph.repo").unwrap();
        assert!(body.starts_with("[ceph]\n"));
        assert!(body.contains("gpgcheck=1\n"));
        assert!(body.contains("priority=1\n"));
    }

    #[test]
    fn apt_repo_uses_codename() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h"));
        let mut s = session(&fleet);
        let apt = Packager::Apt(Apt {
            codename: "bookworm".to_owned(),
        });
        apt.add_repo(&mut s, "ceph", "https://download.ceph.com/debian-reef", &RepoOptions::default())
            .unwrap();
        let host = fleet.host("h");
        assert_eq!(
            host.file_text("/etc/apt/sources.list.d/ceph.list").unwrap(),
            "deb https://download.ceph.com/debian-reef bookworm main\n"
        );
        assert!(host.ran(&["apt-get", "update"]));
        apt.remove_repo(&mut s, "ceph").unwrap();
        assert!(fleet.host("h").file_text("/etc/apt/sources.list.d/ceph.list").is_none());
    }

    #[test]
    fn apt_key_file_named_after_url() {
        assert_eq!(
            Apt::key_file("https://download.ceph.com/keys/release.asc"),
            "/etc/apt/trusted.gpg.d/release.asc"
        );
        assert_eq!(
            Apt::key_file("https://example.com/"),
            "/etc/apt/trusted.gpg.d/cairn-repo.asc"
        );
    }

    #[test]
    fn repo_names_cannot_escape_directory() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h"));
        let mut s = session(&fleet);
        let err = Packager::Zypper(Zypper)
            .add_repo(&mut s, "../../etc/passwd", "https://x", &RepoOptions::default())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::CommandFailed { .. }));
    }

    #[test]
    fn pacman_has_no_repo_management() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("h"));
        let mut s = session(&fleet);
        let err = Packager::Pacman(Pacman).remove_repo(&mut s, "ceph").unwrap_err();
        assert!(matches!(err, RuntimeError::Unsupported { .. }));
    }
}
