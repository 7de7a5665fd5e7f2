//! Capability resolution: which distribution a host runs, and therefore
//! which package and init strategies drive it.

use crate::init::{InitSystem, ServiceManager, SysVinit, Systemd, Upstart};
use crate::pkg::{PackageManager, Packager};
use crate::session::Session;
use crate::RuntimeError;
use cairn_schema::HostName;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Debian,
    RedHat,
    Suse,
    Arch,
}

impl OsFamily {
    /// Family for a name already passed through [`normalize_distro_name`].
    pub fn from_distro(distro: &str) -> Option<Self> {
        match distro {
            "debian" | "ubuntu" => Some(OsFamily::Debian),
            "redhat" | "centos" | "fedora" | "scientific" | "oracle" | "virtuozzo" | "rocky"
            | "almalinux" => Some(OsFamily::RedHat),
            "suse" => Some(OsFamily::Suse),
            "arch" => Some(OsFamily::Arch),
            _ => None,
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OsFamily::Debian => "debian",
            OsFamily::RedHat => "redhat",
            OsFamily::Suse => "suse",
            OsFamily::Arch => "arch",
        };
        f.write_str(s)
    }
}

/// Case-fold a reported distribution name and collapse vendor aliases.
pub fn normalize_distro_name(raw: &str) -> String {
    let d = raw.trim().trim_matches('"').to_lowercase();
    if d.starts_with("redhat") || d.starts_with("red hat") || d == "rhel" {
        return "redhat".to_owned();
    }
    if d.starts_with("scientific") {
        return "scientific".to_owned();
    }
    if d.starts_with("oracle") || d == "ol" {
        return "oracle".to_owned();
    }
    if d.starts_with("suse") || d.starts_with("opensuse") || d.starts_with("sles") {
        return "suse".to_owned();
    }
    if d.starts_with("centos") {
        return "centos".to_owned();
    }
    if d.starts_with("linuxmint") || d.starts_with("linux mint") {
        return "ubuntu".to_owned();
    }
    if d.starts_with("virtuozzo") {
        return "virtuozzo".to_owned();
    }
    if d.starts_with("arch") {
        return "arch".to_owned();
    }
    if d.starts_with("rocky") {
        return "rocky".to_owned();
    }
    if d.starts_with("alma") {
        return "almalinux".to_owned();
    }
    d
}

/// What a host says about itself. `distro` is already normalized;
/// `reported` is the name as the host gave it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsRelease {
    pub distro: String,
    pub reported: String,
    pub release: String,
    pub codename: String,
}

fn parse_lsb_release(stdout: &str) -> Option<OsRelease> {
    let mut lines = stdout.lines().map(str::trim);
    let distro = lines.next().filter(|l| !l.is_empty())?;
    let release = lines.next().unwrap_or_default();
    let codename = lines.next().unwrap_or_default();
    Some(OsRelease {
        distro: normalize_distro_name(distro),
        reported: distro.trim_matches('"').to_owned(),
        release: release.to_owned(),
        codename: if codename == "n/a" {
            String::new()
        } else {
            codename.to_lowercase()
        },
    })
}

fn parse_os_release(text: &str) -> Option<OsRelease> {
    let fields: HashMap<&str, &str> = text
        .lines()
        .filter_map(|l| l.trim().split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"').trim_matches('\'')))
        .collect();
    let id = fields.get("ID").copied().filter(|s| !s.is_empty())?;
    let mut distro = normalize_distro_name(id);
    // Derivatives we do not know by name often declare a known parent.
    if OsFamily::from_distro(&distro).is_none() {
        if let Some(like) = fields.get("ID_LIKE") {
            if let Some(parent) = like
                .split_whitespace()
                .map(normalize_distro_name)
                .find(|p| OsFamily::from_distro(p).is_some())
            {
                distro = parent;
            }
        }
    }
    let codename = fields
        .get("VERSION_CODENAME")
        .or_else(|| fields.get("UBUNTU_CODENAME"))
        .copied()
        .unwrap_or_default();
    Some(OsRelease {
        distro,
        reported: id.to_owned(),
        release: fields.get("VERSION_ID").copied().unwrap_or_default().to_owned(),
        codename: codename.to_owned(),
    })
}

/// Parse `CentOS Linux release 7.9.2009 (Core)` style lines.
fn parse_redhat_release(text: &str) -> Option<OsRelease> {
    let line = text.lines().next()?.trim();
    let (name, rest) = line.split_once(" release ")?;
    let mut parts = rest.splitn(2, ' ');
    let release = parts.next().unwrap_or_default();
    let codename = parts
        .next()
        .and_then(|c| c.trim().strip_prefix('('))
        .and_then(|c| c.strip_suffix(')'))
        .unwrap_or_default();
    Some(OsRelease {
        distro: normalize_distro_name(name),
        reported: name.to_owned(),
        release: release.to_owned(),
        codename: codename.to_lowercase(),
    })
}

fn parse_suse_release(text: &str) -> OsRelease {
    let release = text
        .lines()
        .filter_map(|l| l.split_once('='))
        .find(|(k, _)| k.trim() == "VERSION")
        .map(|(_, v)| v.trim().to_owned())
        .unwrap_or_default();
    OsRelease {
        distro: "suse".to_owned(),
        reported: "SuSE".to_owned(),
        release,
        codename: String::new(),
    }
}

fn identify_by_lsb(s: &mut Session) -> Result<Option<OsRelease>, RuntimeError> {
    let out = s.run(&["lsb_release", "-s", "-i", "-r", "-c"], None)?;
    if !out.success() {
        return Ok(None);
    }
    Ok(parse_lsb_release(&out.stdout))
}

fn identify_by_os_release(s: &mut Session) -> Result<Option<OsRelease>, RuntimeError> {
    Ok(s.read_file("/etc/os-release")?
        .as_deref()
        .and_then(parse_os_release))
}

fn identify_by_release_files(s: &mut Session) -> Result<Option<OsRelease>, RuntimeError> {
    if let Some(text) = s.read_file("/etc/redhat-release")? {
        return Ok(parse_redhat_release(&text));
    }
    if let Some(text) = s.read_file("/etc/SuSE-release")? {
        return Ok(Some(parse_suse_release(&text)));
    }
    if let Some(text) = s.read_file("/etc/debian_version")? {
        return Ok(Some(OsRelease {
            distro: "debian".to_owned(),
            reported: "Debian".to_owned(),
            release: text.trim().to_owned(),
            codename: String::new(),
        }));
    }
    if s.path_exists("/etc/arch-release")? {
        return Ok(Some(OsRelease {
            distro: "arch".to_owned(),
            reported: "Arch".to_owned(),
            release: "rolling".to_owned(),
            codename: String::new(),
        }));
    }
    Ok(None)
}

/// Try the structured query, then os-release, then distribution marker files.
pub fn identify(s: &mut Session) -> Result<OsRelease, RuntimeError> {
    let probes: [(&str, fn(&mut Session) -> Result<Option<OsRelease>, RuntimeError>); 3] = [
        ("lsb_release", identify_by_lsb),
        ("os-release", identify_by_os_release),
        ("release files", identify_by_release_files),
    ];
    for (label, probe) in probes {
        if let Some(found) = probe(s)? {
            debug!("{}: identified via {label}: {found:?}", s.host());
            return Ok(found);
        }
    }
    Err(RuntimeError::PlatformUnknown {
        host: s.host().to_string(),
    })
}

/// Which init system runs on the host.
pub fn detect_init(s: &mut Session, family: OsFamily) -> Result<InitSystem, RuntimeError> {
    if s.path_exists("/run/systemd/system")? {
        return Ok(InitSystem::Systemd(Systemd));
    }
    let out = s.run(&["initctl", "version"], None)?;
    if out.success() && out.stdout.contains("upstart") {
        return Ok(InitSystem::Upstart(Upstart));
    }
    Ok(InitSystem::SysVinit(SysVinit { family }))
}

/// A resolved host: identity, platform, and the strategies chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: HostName,
    pub user: Option<String>,
    pub os: OsRelease,
    pub family: OsFamily,
    pub init: InitSystem,
    pub packager: Packager,
}

impl Host {
    pub fn describe(&self) -> String {
        format!(
            "{} {} {} ({}, {}, {})",
            self.os.distro,
            self.os.release,
            self.os.codename,
            self.family,
            self.packager.name(),
            self.init.name()
        )
    }
}

/// Identify the platform behind `s` and select its strategies.
pub fn resolve_host(s: &mut Session, user: Option<&str>) -> Result<Host, RuntimeError> {
    let os = identify(s)?;
    let family =
        OsFamily::from_distro(&os.distro).ok_or_else(|| RuntimeError::UnsupportedPlatform {
            host: s.host().to_string(),
            family: os.reported.clone(),
        })?;
    let init = detect_init(s, family)?;
    let packager = Packager::for_family(family, &os.distro, &os.release, &os.codename);
    let host = Host {
        name: s.host().clone(),
        user: user.map(str::to_owned),
        os,
        family,
        init,
        packager,
    };
    info!("{}: {}", host.name, host.describe());
    Ok(host)
}
