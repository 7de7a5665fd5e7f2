use crate::bootstrap::{bootstrap_monitor, BootstrapContext, BootstrapOutcome};
use crate::concurrency::{check_interrupt, WorkDirLock};
use crate::gatherkeys::{gather_keys, HarvestReport, HarvestSettings};
use crate::quorum::{wait_for_quorum, Pause, QuorumWait, Sleeper};
use crate::status::{observe, MonitorReport};
use crate::CoreError;
use cairn_runtime::{resolve_host, Connector, Host, HostTarget, Session, SshConnector};
use cairn_schema::{parse_config_file, ClusterConfig, ClusterName, HostName, CONFIG_FILE_NAME};
use cairn_store::WorkDir;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-invocation knobs that do not live in `cairn.toml`.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Login user; overrides `ssh.user` from the config.
    pub username: Option<String>,
    pub overwrite_conf: bool,
    /// Use sudo on hosts where we do not log in as root.
    pub escalate: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            username: None,
            overwrite_conf: false,
            escalate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostFailure {
    pub host: HostName,
    pub error: String,
}

/// Result of bootstrapping a batch of monitors; failures are collected, not fatal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateReport {
    pub outcomes: Vec<BootstrapOutcome>,
    pub failures: Vec<HostFailure>,
}

impl CreateReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn accumulated host failures into one error naming every failed host.
    pub fn into_result(self) -> Result<Self, CoreError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(CoreError::MonitorsFailed {
                failed: self.failures.len(),
                hosts: self.failures.into_iter().map(|f| f.host).collect(),
            })
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InitialReport {
    pub monitors: Vec<BootstrapOutcome>,
    pub quorum: Vec<HostName>,
    pub harvest: HarvestReport,
}

/// Drives every cluster-level operation against one working directory.
///
/// Hosts are handled one at a time in the order given. Operations that write
/// into the working directory hold its lock for their whole duration.
pub struct Deployer {
    connector: Box<dyn Connector>,
    workdir: WorkDir,
    config: ClusterConfig,
    options: DeployOptions,
    pause: Box<dyn Pause>,
}

impl Deployer {
    pub fn new(
        connector: Box<dyn Connector>,
        workdir: WorkDir,
        config: ClusterConfig,
        options: DeployOptions,
    ) -> Self {
        Self {
            connector,
            workdir,
            config,
            options,
            pause: Box::new(Sleeper),
        }
    }

    /// Open the working directory at `root` and talk to hosts over ssh.
    ///
    /// `cluster` overrides the cluster name from `cairn.toml`.
    pub fn open(
        root: &Path,
        cluster: Option<ClusterName>,
        options: DeployOptions,
    ) -> Result<Self, CoreError> {
        let mut config = parse_config_file(root.join(CONFIG_FILE_NAME))?;
        if let Some(name) = cluster {
            cairn_schema::validate_cluster_name(&name)?;
            config.cluster.name = name;
        }
        let workdir = WorkDir::open(root, config.cluster.name.clone())?;
        let connector = ssh_connector(&config);
        Ok(Self::new(Box::new(connector), workdir, config, options))
    }

    #[must_use]
    pub fn with_pause(mut self, pause: Box<dyn Pause>) -> Self {
        self.pause = pause;
        self
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn cluster(&self) -> &ClusterName {
        &self.config.cluster.name
    }

    fn user(&self) -> Option<&str> {
        self.options
            .username
            .as_deref()
            .or(self.config.ssh.user.as_deref())
    }

    fn target(&self, host: &HostName) -> HostTarget {
        HostTarget::new(host.clone()).with_user(self.user())
    }

    fn targets(&self, hosts: &[HostName]) -> Vec<HostTarget> {
        hosts.iter().map(|h| self.target(h)).collect()
    }

    fn session(&self, host: &HostName) -> Result<Session, CoreError> {
        Ok(Session::open(
            self.connector.as_ref(),
            &self.target(host),
            self.options.escalate,
            self.config.timeouts.command(),
        )?)
    }

    /// Identify `host`'s platform and the strategies that go with it.
    pub fn resolve(&self, host: &HostName) -> Result<Host, CoreError> {
        let mut s = self.session(host)?;
        Ok(resolve_host(&mut s, self.user())?)
    }

    fn create_one(&self, host: &HostName, ctx: &BootstrapContext<'_>) -> Result<BootstrapOutcome, CoreError> {
        let mut s = self.session(host)?;
        let resolved = resolve_host(&mut s, self.user())?;
        let outcome = bootstrap_monitor(&mut s, &resolved, ctx)?;
        s.close();
        Ok(outcome)
    }

    fn create_monitors_unlocked(&self, hosts: &[HostName]) -> Result<CreateReport, CoreError> {
        let mon_keyring = self.workdir.read_mon_keyring()?;
        let ceph_conf = self.workdir.read_ceph_conf()?;
        let ctx = BootstrapContext {
            cluster: self.cluster(),
            mon_keyring: &mon_keyring,
            ceph_conf: ceph_conf.as_deref(),
            overwrite_conf: self.options.overwrite_conf,
            initial_members: &self.config.cluster.mon_initial_members,
        };

        let mut report = CreateReport::default();
        for host in hosts {
            check_interrupt()?;
            match self.create_one(host, &ctx) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(CoreError::Interrupted) => return Err(CoreError::Interrupted),
                Err(e) => {
                    error!("{host}: failed to create monitor: {e}");
                    report.failures.push(HostFailure {
                        host: host.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }
        if report.failures.is_empty() {
            info!("{} monitor(s) deployed", report.outcomes.len());
        } else {
            warn!(
                "{} of {} monitor(s) failed to deploy",
                report.failures.len(),
                hosts.len()
            );
        }
        Ok(report)
    }

    /// Bootstrap a monitor on each host, without waiting for quorum.
    /// An empty list means every `mon_initial_members` entry.
    pub fn create_monitors(&self, hosts: &[HostName]) -> Result<CreateReport, CoreError> {
        let hosts = if hosts.is_empty() {
            self.config.cluster.mon_initial_members.as_slice()
        } else {
            hosts
        };
        self.create_monitors_unlocked(hosts)
    }

    /// Bootstrap every initial monitor and block until all of them are in quorum.
    pub fn bootstrap_initial_monitors(&mut self) -> Result<(Vec<BootstrapOutcome>, Vec<HostName>), CoreError> {
        let members = self.config.cluster.mon_initial_members.clone();
        let created = self.create_monitors_unlocked(&members)?.into_result()?;

        let targets = self.targets(&members);
        let wait = QuorumWait {
            cluster: &self.config.cluster.name,
            backoff_secs: &self.config.quorum.backoff_secs,
            escalate: self.options.escalate,
            timeout: self.config.timeouts.command(),
        };
        let quorum = wait_for_quorum(self.connector.as_ref(), &targets, &wait, self.pause.as_mut())?;
        Ok((created.outcomes, quorum))
    }

    /// `mon create-initial`: bootstrap, wait for quorum, then harvest keys
    /// from the initial members in order.
    pub fn create_initial(&mut self) -> Result<InitialReport, CoreError> {
        let _lock = WorkDirLock::acquire_or_fail(&self.workdir.lock_file())?;
        let (monitors, quorum) = self.bootstrap_initial_monitors()?;
        let harvest = self.gather_keys_unlocked(&quorum)?;
        Ok(InitialReport {
            monitors,
            quorum,
            harvest,
        })
    }

    fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            escalate: self.options.escalate,
            timeout: self.config.timeouts.command(),
            connect_timeout_secs: self.config.timeouts.connect_secs,
        }
    }

    fn gather_keys_unlocked(&self, hosts: &[HostName]) -> Result<HarvestReport, CoreError> {
        gather_keys(
            self.connector.as_ref(),
            &self.targets(hosts),
            &self.workdir,
            &self.harvest_settings(),
        )
    }

    /// Harvest keyrings from the first usable monitor among `hosts`.
    pub fn gather_keys(&self, hosts: &[HostName]) -> Result<HarvestReport, CoreError> {
        let _lock = WorkDirLock::acquire_or_fail(&self.workdir.lock_file())?;
        self.gather_keys_unlocked(hosts)
    }

    /// Observe one monitor. Unreachable hosts come back as `NotRunning`.
    pub fn monitor_status(&self, host: &HostName) -> MonitorReport {
        let name = host.short();
        match self.session(host) {
            Ok(mut s) => observe(&mut s, self.cluster(), name),
            Err(e) => {
                warn!("{host}: {e}");
                MonitorReport::unreachable(host, name, &e)
            }
        }
    }
}

/// Ssh connector configured from the `[ssh]` and `[timeouts]` sections.
pub fn ssh_connector(config: &ClusterConfig) -> SshConnector {
    let mut connector = SshConnector::new(config.timeouts.idle());
    connector.user.clone_from(&config.ssh.user);
    connector.port = config.ssh.port;
    connector.options.clone_from(&config.ssh.options);
    connector.connect_timeout = Duration::from_secs(config.timeouts.connect_secs);
    connector
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::RecordingPause;
    use cairn_runtime::{CommandOutput, MockFleet, MockHost};

    const MON_KEYRING: &str = "[mon.]\n\tkey = AQmon==\n\tcaps mon = \"allow *\"\n";

    fn deployer(fleet: &MockFleet, root: &Path) -> Deployer {
        std::fs::write(root.join("test.mon.keyring"), MON_KEYRING).unwrap();
        let config = ClusterConfig::new("test", &["a", "b"]);
        let workdir = WorkDir::open(root, ClusterName::from("test")).unwrap();
        Deployer::new(Box::new(fleet.clone()), workdir, config, DeployOptions::default())
            .with_pause(Box::new(RecordingPause::new()))
    }

    fn host(name: &str) -> MockHost {
        MockHost::new(name)
            .respond(&["lsb_release"], CommandOutput::ok("Ubuntu\n22.04\njammy\n"))
            .dir("/run/systemd/system")
            .respond(
                &["mon_status"],
                CommandOutput::ok(format!(
                    r#"{{"rank":0,"state":"leader","quorum":[0],"monmap":{{"mons":[{{"name":"{name}","rank":0}}]}}}}"#
                )),
            )
    }

    #[test]
    fn one_bad_host_does_not_stop_the_batch() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a").unreachable());
        fleet.add(host("b"));
        let dir = tempfile::tempdir().unwrap();
        let d = deployer(&fleet, dir.path());

        let report = d.create_monitors(&[]).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].host, HostName::from("a"));
        assert!(fleet.host("b").ran(&["ceph-mon", "--mkfs"]));

        match report.into_result().unwrap_err() {
            CoreError::MonitorsFailed { failed, hosts } => {
                assert_eq!(failed, 1);
                assert_eq!(hosts, vec![HostName::from("a")]);
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn missing_mon_keyring_fails_before_contacting_hosts() {
        let fleet = MockFleet::new();
        fleet.add(host("a"));
        let dir = tempfile::tempdir().unwrap();
        let d = deployer(&fleet, dir.path());
        std::fs::remove_file(dir.path().join("test.mon.keyring")).unwrap();
        assert!(d.create_monitors(&[HostName::from("a")]).is_err());
        assert!(fleet.contacted().is_empty());
    }

    #[test]
    fn status_of_unknown_host_is_not_running() {
        let fleet = MockFleet::new();
        let dir = tempfile::tempdir().unwrap();
        let d = deployer(&fleet, dir.path());
        let report = d.monitor_status(&HostName::from("ghost"));
        assert!(!report.in_quorum());
        assert!(report.error.is_some());
    }

    #[test]
    fn held_lock_refuses_gather() {
        let fleet = MockFleet::new();
        fleet.add(host("a"));
        let dir = tempfile::tempdir().unwrap();
        let d = deployer(&fleet, dir.path());
        let _held = WorkDirLock::acquire(&d.workdir().lock_file()).unwrap();
        assert!(matches!(
            d.gather_keys(&[HostName::from("a")]),
            Err(CoreError::Busy(_))
        ));
    }

    #[test]
    fn username_flag_beats_config() {
        let fleet = MockFleet::new();
        let dir = tempfile::tempdir().unwrap();
        let mut d = deployer(&fleet, dir.path());
        d.config.ssh.user = Some("cfg".to_owned());
        assert_eq!(d.target(&HostName::from("a")).user.as_deref(), Some("cfg"));
        d.options.username = Some("flag".to_owned());
        assert_eq!(d.target(&HostName::from("a")).user.as_deref(), Some("flag"));
    }

    #[test]
    fn ssh_connector_follows_config() {
        let mut config = ClusterConfig::new("test", &["a"]);
        config.ssh.port = Some(2222);
        config.ssh.options = vec!["Compression=yes".to_owned()];
        let c = ssh_connector(&config);
        assert_eq!(c.port, Some(2222));
        assert_eq!(c.options, vec!["Compression=yes".to_owned()]);
        assert_eq!(c.connect_timeout, Duration::from_secs(25));
    }
}
