//! Creating one monitor on one host.
//!
//! The protocol walks a monitor through `MonitorStage`s: data directory,
//! keyring seeding (`ceph-mon --mkfs`), daemon start, and a status poll. Every
//! step is safe to repeat against a host where it already happened.

use crate::lifecycle::{validate_transition, MonitorStage};
use crate::status::{observe, MonitorReport};
use crate::CoreError;
use cairn_runtime::{Host, ServiceManager, Session};
use cairn_schema::{ClusterName, HostName, MonitorStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Where a monitor's state lives on its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonPaths {
    pub data_dir: String,
    /// The monitor's own keyring, written by `--mkfs`.
    pub keyring: String,
    pub asok: String,
    pub seed_keyring: String,
    pub done: String,
}

impl MonPaths {
    pub const TMP_DIR: &'static str = "/var/lib/ceph/tmp";

    pub fn new(cluster: &ClusterName, name: &str) -> Self {
        let data_dir = format!("/var/lib/ceph/mon/{cluster}-{name}");
        Self {
            keyring: format!("{data_dir}/keyring"),
            done: format!("{data_dir}/done"),
            asok: format!("/var/run/ceph/{cluster}-mon.{name}.asok"),
            seed_keyring: format!("{}/{cluster}-{name}.mon.keyring", Self::TMP_DIR),
            data_dir,
        }
    }

    /// Marker telling the init scripts which system manages this monitor.
    pub fn init_marker(&self, init: &str) -> String {
        format!("{}/{init}", self.data_dir)
    }
}

/// Inputs shared by every monitor of a bootstrap run.
#[derive(Debug, Clone, Copy)]
pub struct BootstrapContext<'a> {
    pub cluster: &'a ClusterName,
    /// Cluster-wide monitor keyring; never generated here.
    pub mon_keyring: &'a str,
    pub ceph_conf: Option<&'a str>,
    pub overwrite_conf: bool,
    pub initial_members: &'a [HostName],
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapOutcome {
    pub host: HostName,
    pub name: String,
    pub stage: MonitorStage,
    /// `false` when the data directory was already populated.
    pub created: bool,
    pub report: MonitorReport,
    pub warnings: Vec<String>,
}

struct Progress {
    stage: MonitorStage,
}

impl Progress {
    fn advance(&mut self, host: &HostName, to: MonitorStage) -> Result<(), CoreError> {
        validate_transition(self.stage, to)?;
        debug!("{host}: {} -> {to}", self.stage);
        self.stage = to;
        Ok(())
    }
}

/// Push the cluster config, refusing to clobber a different one.
fn push_conf(s: &mut Session, ctx: &BootstrapContext<'_>) -> Result<(), CoreError> {
    let Some(conf) = ctx.ceph_conf else {
        return Ok(());
    };
    let path = format!("/etc/ceph/{}.conf", ctx.cluster);
    match s.read_file(&path)? {
        Some(existing) if existing == conf => {
            debug!("{}: {path} already current", s.host());
            return Ok(());
        }
        Some(_) if !ctx.overwrite_conf => {
            return Err(CoreError::ConfigMismatch {
                host: s.host().clone(),
                path,
            });
        }
        _ => {}
    }
    s.makedirs("/etc/ceph")?;
    s.write_file(&path, conf.as_bytes(), 0o644)?;
    info!("{}: wrote {path}", s.host());
    Ok(())
}

/// Run `ceph-mon --mkfs` from a temporary seed keyring. The seed is removed
/// whether or not mkfs succeeds.
fn seed_keyring(
    s: &mut Session,
    ctx: &BootstrapContext<'_>,
    name: &str,
    paths: &MonPaths,
    init: &str,
) -> Result<(), CoreError> {
    s.makedirs(MonPaths::TMP_DIR)?;
    s.write_file(&paths.seed_keyring, ctx.mon_keyring.as_bytes(), 0o600)?;
    let mkfs = s.check(
        &[
            "ceph-mon",
            "--cluster",
            ctx.cluster.as_str(),
            "--mkfs",
            "-i",
            name,
            "--keyring",
            paths.seed_keyring.as_str(),
        ],
        None,
    );
    let cleanup = s.remove(&paths.seed_keyring);
    mkfs?;
    cleanup?;
    s.write_file(&paths.done, b"", 0o644)?;
    s.write_file(&paths.init_marker(init), b"", 0o644)?;
    Ok(())
}

fn advisory_checks(
    report: &MonitorReport,
    name: &str,
    ctx: &BootstrapContext<'_>,
    s: &mut Session,
    warnings: &mut Vec<String>,
) {
    let host = s.host().clone();
    let mut warn_host = |msg: String| {
        warn!("{host}: {msg}");
        warnings.push(msg);
    };

    if !ctx.initial_members.iter().any(|m| m.short() == name) {
        warn_host(format!("mon.{name} is not listed in mon_initial_members"));
    }
    match report.status {
        MonitorStatus::InQuorum => {}
        MonitorStatus::NotRunning => {
            warn_host(format!("mon.{name} does not answer on its admin socket yet"));
        }
        _ => warn_host(format!(
            "mon.{name} is not in quorum yet (state: {})",
            report.state.as_deref().unwrap_or("unknown")
        )),
    }
    if report.status != MonitorStatus::NotRunning {
        if let Ok(doc) = crate::status::fetch_status(s, ctx.cluster, name) {
            if doc.monmap_rank(name).is_none() {
                warn_host(format!("mon.{name} is not in its own monmap"));
            }
        }
    }
}

/// Bootstrap the monitor for `host` over `s`.
pub fn bootstrap_monitor(
    s: &mut Session,
    host: &Host,
    ctx: &BootstrapContext<'_>,
) -> Result<BootstrapOutcome, CoreError> {
    let name = host.name.short().to_owned();
    let paths = MonPaths::new(ctx.cluster, &name);
    let mut warnings = Vec::new();
    let mut progress = Progress {
        stage: MonitorStage::Absent,
    };
    info!("{}: deploying mon.{name} ({})", host.name, host.describe());

    // Advisory only: a mismatch usually keeps quorum from forming, but not always.
    let reported = s.short_hostname()?;
    if reported != name {
        let msg = format!(
            "remote hostname '{reported}' does not match '{name}'; \
             the monitor will likely fail to join quorum"
        );
        warn!("{}: ********************************************************", host.name);
        warn!("{}: {msg}", host.name);
        warn!("{}: ********************************************************", host.name);
        warnings.push(msg);
    }

    push_conf(s, ctx)?;

    progress.advance(&host.name, MonitorStage::DataDirCreated)?;
    s.makedirs(&paths.data_dir)?;

    progress.advance(&host.name, MonitorStage::KeyringSeeded)?;
    let created = if s.path_exists(&paths.done)? {
        info!("{}: mon.{name} data directory already populated", host.name);
        false
    } else {
        seed_keyring(s, ctx, &name, &paths, host.init.name())?;
        true
    };

    progress.advance(&host.name, MonitorStage::DaemonStarted)?;
    host.init.start(s, "mon", &name, ctx.cluster)?;
    host.init.enable(s, "mon", &name, ctx.cluster)?;

    progress.advance(&host.name, MonitorStage::Polled)?;
    let report = observe(s, ctx.cluster, &name);
    info!("{}: mon.{name} is {}", host.name, report.status);
    advisory_checks(&report, &name, ctx, s, &mut warnings);

    Ok(BootstrapOutcome {
        host: host.name.clone(),
        name,
        stage: progress.stage,
        created,
        report,
        warnings,
    })
}
