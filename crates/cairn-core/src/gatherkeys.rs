//! Harvesting keyrings from a monitor that is in quorum.
//!
//! Candidates are tried in order and the first usable one becomes the
//! source. Everything harvested lands in an owner-only staging directory;
//! the working directory is only touched once every identity is in hand.

use crate::bootstrap::MonPaths;
use crate::status::fetch_status;
use crate::{CoreError, KeyHarvestError};
use cairn_runtime::{Connector, HostTarget, Session};
use cairn_schema::{parse_keyring_str, ClusterName, HostName, KeyKind};
use cairn_store::{reconcile, ReconcileReport, StagingArea, WorkDir};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// `ceph auth get` exit code for an entity that does not exist.
const ENOENT: i32 = 2;

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub escalate: bool,
    pub timeout: Duration,
    /// Passed to the cluster CLI as `--connect-timeout`.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub source: HostName,
    pub reconcile: ReconcileReport,
}

/// A monitor that passed every check, with its keyring already read.
struct Source {
    session: Session,
    name: String,
    mon_keyring: String,
}

/// Confirm `text` is a keyring whose section for `kind` carries a key.
fn check_identity(text: &str, kind: KeyKind) -> Result<(), String> {
    let keyring = parse_keyring_str(text).map_err(|e| e.to_string())?;
    let entity = kind.entity();
    match keyring.entity(&entity) {
        Some(section) if section.key.is_some() => Ok(()),
        Some(_) => Err(format!("[{entity}] has no key")),
        None => Err(format!("no [{entity}] section")),
    }
}

/// Check that `target` can serve as the key source. The error string says why
/// it cannot; a rejected candidate is logged and skipped.
fn check_candidate(
    connector: &dyn Connector,
    target: &HostTarget,
    cluster: &ClusterName,
    settings: &HarvestSettings,
) -> Result<Source, String> {
    let name = target.host.short().to_owned();
    let mut session = Session::open(connector, target, settings.escalate, settings.timeout)
        .map_err(|e| e.to_string())?;
    let paths = MonPaths::new(cluster, &name);

    let mon_keyring = session
        .read_file(&paths.keyring)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no monitor keyring at {}", paths.keyring))?;
    check_identity(&mon_keyring, KeyKind::Mon)
        .map_err(|e| format!("unusable monitor keyring at {}: {e}", paths.keyring))?;

    let doc = fetch_status(&mut session, cluster, &name).map_err(|e| e.to_string())?;
    // Incomplete documents are rejected here.
    let in_quorum = doc.member_in_quorum(&name).map_err(|e| e.to_string())?;
    match doc.monmap_rank(&name) {
        None => return Err(format!("mon.{name} is not in its monmap")),
        Some(rank) if rank != doc.rank => {
            return Err(format!(
                "mon.{name} reports rank {} but the monmap says {rank}",
                doc.rank
            ))
        }
        Some(rank) if !in_quorum => {
            return Err(format!("mon.{name} (rank {rank}) is not in quorum"));
        }
        Some(_) => {}
    }
    Ok(Source {
        session,
        name,
        mon_keyring,
    })
}

fn auth_args(cluster: &ClusterName, paths: &MonPaths, settings: &HarvestSettings) -> Vec<String> {
    vec![
        "/usr/bin/ceph".to_owned(),
        format!("--connect-timeout={}", settings.connect_timeout_secs),
        format!("--cluster={cluster}"),
        "--name".to_owned(),
        "mon.".to_owned(),
        format!("--keyring={}", paths.keyring),
        "auth".to_owned(),
    ]
}

/// Fetch one client identity, creating it with its caps if it does not exist.
/// The error string says why the identity could not be produced.
fn fetch_identity(
    src: &mut Source,
    kind: KeyKind,
    cluster: &ClusterName,
    settings: &HarvestSettings,
) -> Result<String, String> {
    let paths = MonPaths::new(cluster, &src.name);
    let entity = kind.entity();

    let mut get = auth_args(cluster, &paths, settings);
    get.extend(["get".to_owned(), entity.to_string()]);
    let mut out = src.session.run(&get, None).map_err(|e| e.to_string())?;

    if out.exit_code == ENOENT {
        debug!("{}: {entity} does not exist yet, creating it", src.session.host());
        let mut create = auth_args(cluster, &paths, settings);
        create.extend(["get-or-create".to_owned(), entity.to_string()]);
        for (role, cap) in kind.caps() {
            create.push((*role).to_owned());
            create.push((*cap).to_owned());
        }
        out = src.session.run(&create, None).map_err(|e| e.to_string())?;
    }

    if !out.success() {
        return Err(format!("exit {}: {}", out.exit_code, out.stderr.trim()));
    }
    check_identity(&out.stdout, kind)?;
    Ok(out.stdout)
}

/// Harvest every identity from the first usable candidate and reconcile
/// them into `workdir`.
pub fn gather_keys(
    connector: &dyn Connector,
    candidates: &[HostTarget],
    workdir: &WorkDir,
    settings: &HarvestSettings,
) -> Result<HarvestReport, CoreError> {
    let cluster = workdir.cluster().clone();

    let mut source = None;
    for target in candidates {
        crate::concurrency::check_interrupt()?;
        match check_candidate(connector, target, &cluster, settings) {
            Ok(src) => {
                info!("{}: using mon.{} as key source", target.host, src.name);
                source = Some(src);
                break;
            }
            Err(reason) => warn!("{}: not usable for harvesting: {reason}", target.host),
        }
    }
    let Some(mut src) = source else {
        return Err(KeyHarvestError::NoUsableMonitor {
            tried: candidates.iter().map(|t| t.host.clone()).collect(),
        }
        .into());
    };

    let staging = StagingArea::create_in(workdir.root())?;
    let mut missing = Vec::new();
    for kind in KeyKind::ALL {
        crate::concurrency::check_interrupt()?;
        let text = if kind == KeyKind::Mon {
            Ok(src.mon_keyring.clone())
        } else {
            fetch_identity(&mut src, kind, &cluster, settings)
        };
        match text {
            Ok(text) => {
                staging.stage(&kind.file_name(&cluster), text.as_bytes())?;
            }
            Err(reason) => {
                warn!(
                    "{}: could not fetch {}: {reason}",
                    src.session.host(),
                    kind.entity()
                );
                missing.push(kind);
            }
        }
    }
    let source_host = src.session.host().clone();
    src.session.close();

    if !missing.is_empty() {
        // `staging` drops here; the working directory was never touched.
        return Err(KeyHarvestError::MissingIdentities {
            host: source_host,
            missing,
        }
        .into());
    }

    let report = reconcile(workdir, &staging, &KeyKind::ALL)?;
    staging.close()?;
    info!(
        "{source_host}: keys gathered ({} new, {} unchanged, {} replaced)",
        report.created(),
        report.unchanged(),
        report.replaced()
    );
    Ok(HarvestReport {
        source: source_host,
        reconcile: report,
    })
}
