//! Monitor status probing through the daemon's admin socket.

use crate::bootstrap::MonPaths;
use crate::CoreError;
use cairn_runtime::Session;
use cairn_schema::{ClusterName, HostName, MonStatus, MonitorStatus};
use serde::Serialize;
use tracing::debug;

/// Ask the monitor `name` on `s` for its status document.
pub fn fetch_status(
    s: &mut Session,
    cluster: &ClusterName,
    name: &str,
) -> Result<MonStatus, CoreError> {
    let asok = MonPaths::new(cluster, name).asok;
    let out = s.check(
        &[
            "ceph",
            "--cluster",
            cluster.as_str(),
            "--admin-daemon",
            asok.as_str(),
            "mon_status",
        ],
        None,
    )?;
    Ok(MonStatus::parse(&out.stdout)?)
}

/// One observation of a monitor. Failures to reach or parse it are folded
/// into `NotRunning` with the reason kept in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub host: HostName,
    pub name: String,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MonitorReport {
    pub fn unreachable(host: &HostName, name: &str, error: &CoreError) -> Self {
        Self {
            host: host.clone(),
            name: name.to_owned(),
            status: MonitorStatus::NotRunning,
            state: None,
            rank: None,
            quorum: None,
            error: Some(error.to_string()),
        }
    }

    pub fn in_quorum(&self) -> bool {
        self.status == MonitorStatus::InQuorum
    }
}

/// Probe a monitor and classify it; never fails.
pub fn observe(s: &mut Session, cluster: &ClusterName, name: &str) -> MonitorReport {
    match fetch_status(s, cluster, name) {
        Ok(doc) => MonitorReport {
            host: s.host().clone(),
            name: name.to_owned(),
            status: doc.classify(),
            state: Some(doc.state.clone()),
            rank: Some(doc.rank),
            quorum: doc.quorum.clone(),
            error: None,
        },
        Err(e) => {
            debug!("{}: mon.{name} status unavailable: {e}", s.host());
            MonitorReport::unreachable(s.host(), name, &e)
        }
    }
}
