//! Init-system strategies for starting and enabling cluster daemons.

use crate::platform::OsFamily;
use crate::session::Session;
use crate::RuntimeError;
use cairn_schema::ClusterName;
use tracing::debug;

pub trait ServiceManager {
    /// Also the name of the marker file left in a daemon's data directory.
    fn name(&self) -> &'static str;

    fn start(
        &self,
        s: &mut Session,
        role: &str,
        instance: &str,
        cluster: &ClusterName,
    ) -> Result<(), RuntimeError>;

    fn enable(
        &self,
        s: &mut Session,
        role: &str,
        instance: &str,
        cluster: &ClusterName,
    ) -> Result<(), RuntimeError>;

    fn stop(
        &self,
        s: &mut Session,
        role: &str,
        instance: &str,
        cluster: &ClusterName,
    ) -> Result<(), RuntimeError>;

    fn disable(
        &self,
        s: &mut Session,
        role: &str,
        instance: &str,
        cluster: &ClusterName,
    ) -> Result<(), RuntimeError>;
}

fn exec(s: &mut Session, argv: &[&str]) -> Result<(), RuntimeError> {
    s.check(argv, None).map(|_| ())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Systemd;

impl Systemd {
    fn unit(role: &str, instance: &str) -> String {
        format!("ceph-{role}@{instance}")
    }
}

impl ServiceManager for Systemd {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn start(&self, s: &mut Session, role: &str, instance: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        exec(s, &["systemctl", "start", &Self::unit(role, instance)])
    }

    fn enable(&self, s: &mut Session, role: &str, instance: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        exec(s, &["systemctl", "enable", "ceph.target"])?;
        exec(s, &["systemctl", "enable", &Self::unit(role, instance)])
    }

    fn stop(&self, s: &mut Session, role: &str, instance: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        exec(s, &["systemctl", "stop", &Self::unit(role, instance)])
    }

    fn disable(&self, s: &mut Session, role: &str, instance: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        exec(s, &["systemctl", "disable", &Self::unit(role, instance)])
    }
}

/// Upstart jobs are started by event; boot-time start is driven by the
/// marker file in the data directory, so enable and disable have nothing to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upstart;

impl ServiceManager for Upstart {
    fn name(&self) -> &'static str {
        "upstart"
    }

    fn start(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        let job = format!("ceph-{role}");
        let cluster_arg = format!("cluster={cluster}");
        let id_arg = format!("id={instance}");
        exec(s, &["initctl", "emit", &job, &cluster_arg, &id_arg])
    }

    fn enable(&self, s: &mut Session, role: &str, instance: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        debug!("{}: upstart starts {role}.{instance} from its marker file", s.host());
        Ok(())
    }

    fn stop(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        let job = format!("ceph-{role}");
        let cluster_arg = format!("cluster={cluster}");
        let id_arg = format!("id={instance}");
        let out = s.run(&["initctl", "stop", &job, &cluster_arg, &id_arg], None)?;
        // Stopping a job that is not running is not an error.
        if out.success() || out.stderr.contains("Unknown instance") {
            Ok(())
        } else {
            Err(RuntimeError::CommandFailed {
                host: s.host().to_string(),
                command: format!("initctl stop {job} {cluster_arg} {id_arg}"),
                code: out.exit_code,
                stderr: out.stderr.trim().to_owned(),
            })
        }
    }

    fn disable(&self, _: &mut Session, _: &str, _: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// The `/etc/init.d/ceph` script. Boot registration differs between the
/// Debian tools and chkconfig, hence the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SysVinit {
    pub family: OsFamily,
}

impl SysVinit {
    const SCRIPT: &'static str = "/etc/init.d/ceph";

    fn control(
        s: &mut Session,
        action: &str,
        role: &str,
        instance: &str,
        cluster: &ClusterName,
    ) -> Result<(), RuntimeError> {
        let conf = format!("/etc/ceph/{cluster}.conf");
        let daemon = format!("{role}.{instance}");
        exec(s, &[Self::SCRIPT, "-c", &conf, action, &daemon])
    }
}

impl ServiceManager for SysVinit {
    fn name(&self) -> &'static str {
        "sysvinit"
    }

    fn start(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        Self::control(s, "start", role, instance, cluster)
    }

    fn enable(&self, s: &mut Session, _: &str, _: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        match self.family {
            OsFamily::Debian => exec(s, &["update-rc.d", "ceph", "defaults"]),
            _ => exec(s, &["chkconfig", "ceph", "on"]),
        }
    }

    fn stop(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        Self::control(s, "stop", role, instance, cluster)
    }

    fn disable(&self, s: &mut Session, _: &str, _: &str, _: &ClusterName) -> Result<(), RuntimeError> {
        match self.family {
            OsFamily::Debian => exec(s, &["update-rc.d", "-f", "ceph", "remove"]),
            _ => exec(s, &["chkconfig", "ceph", "off"]),
        }
    }
}

/// The init strategy selected for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitSystem {
    Systemd(Systemd),
    Upstart(Upstart),
    SysVinit(SysVinit),
}

impl InitSystem {
    fn inner(&self) -> &dyn ServiceManager {
        match self {
            InitSystem::Systemd(i) => i,
            InitSystem::Upstart(i) => i,
            InitSystem::SysVinit(i) => i,
        }
    }
}

impl ServiceManager for InitSystem {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn start(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        self.inner().start(s, role, instance, cluster)
    }

    fn enable(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        self.inner().enable(s, role, instance, cluster)
    }

    fn stop(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        self.inner().stop(s, role, instance, cluster)
    }

    fn disable(&self, s: &mut Session, role: &str, instance: &str, cluster: &ClusterName) -> Result<(), RuntimeError> {
        self.inner().disable(s, role, instance, cluster)
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
        Session::open(fleet, &HostTarget::new("a"), true, Duration::from_secs(5)).unwrap()
    }

    fn cluster() -> ClusterName {
        ClusterName::from("test")
    }

    #[test]
    fn systemd_uses_instance_units() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a"));
        let mut s = session(&fleet);
        let init = InitSystem::Systemd(Systemd);
        init.start(&mut s, "mon", "a", &cluster()).unwrap();
        init.enable(&mut s, "mon", "a", &cluster()).unwrap();
        let host = fleet.host("a");
        assert!(host.ran(&["systemctl", "start", "ceph-mon@a"]));
        assert!(host.ran(&["systemctl", "enable", "ceph.target"]));
        assert!(host.ran(&["systemctl", "enable", "ceph-mon@a"]));
        assert_eq!(init.name(), "systemd");
    }

    #[test]
    fn upstart_emits_event_with_cluster() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a"));
        let mut s = session(&fleet);
        Upstart.start(&mut s, "mon", "a", &cluster()).unwrap();
        assert!(fleet
            .host("a")
            .ran(&["initctl", "emit", "ceph-mon", "cluster=test", "id=a"]));
    }

    #[test]
    fn upstart_stop_tolerates_unknown_instance() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a").respond(
            &["initctl", "stop"],
            CommandOutput::failed(1, "initctl: Unknown instance: test/a"),
        ));
        let mut s = session(&fleet);
        Upstart.stop(&mut s, "mon", "a", &cluster()).unwrap();
    }

    #[test]
    fn sysvinit_passes_cluster_conf() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a"));
        let mut s = session(&fleet);
        let init = SysVinit {
            family: OsFamily::RedHat,
        };
        init.start(&mut s, "mon", "a", &cluster()).unwrap();
        init.enable(&mut s, "mon", "a", &cluster()).unwrap();
        let host = fleet.host("a");
        assert!(host.ran(&["/etc/init.d/ceph", "-c", "/etc/ceph/test.conf", "start", "mon.a"]));
        assert!(host.ran(&["chkconfig", "ceph", "on"]));
    }

    #[test]
    fn sysvinit_on_debian_uses_update_rc_d() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a"));
        let mut s = session(&fleet);
        SysVinit {
            family: OsFamily::Debian,
        }
        .enable(&mut s, "mon", "a", &cluster())
        .unwrap();
        assert!(fleet.host("a").ran(&["update-rc.d", "ceph", "defaults"]));
    }

    #[test]
    fn start_failure_names_the_command() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("a").respond(&["systemctl"], CommandOutput::failed(5, "Unit not found")));
        let mut s = session(&fleet);
        let err = Systemd.start(&mut s, "mon", "a", &cluster()).unwrap_err();
        assert!(err.to_string().contains("systemctl start ceph-mon@a"));
    }
}
