use crate::ops::{CommandOutput, RemoteOp, PROTOCOL_VERSION};
use crate::transport::{Connector, HostTarget, Transport};
use crate::RuntimeError;
use cairn_schema::HostName;
use std::time::Duration;
use tracing::{debug, warn};

/// How commands are elevated on the target, detected once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Escalation not requested, or not available.
    None,
    /// Already uid 0; nothing to do.
    AlreadyRoot,
    /// Passwordless sudo works.
    Sudo,
}

/// An open channel to one host.
///
/// Sessions are scoped: `close` is idempotent and also runs on drop, so every
/// exit path releases the underlying connection.
pub struct Session {
    host: HostName,
    transport: Option<Box<dyn Transport>>,
    escalation: Escalation,
    default_timeout: Duration,
}

impl Session {
    pub fn open(
        connector: &dyn Connector,
        target: &HostTarget,
        escalate: bool,
        default_timeout: Duration,
    ) -> Result<Self, RuntimeError> {
        let transport = connector.connect(target)?;
        let mut session = Self {
            host: target.host.clone(),
            transport: Some(transport),
            escalation: Escalation::None,
            default_timeout,
        };
        if escalate {
            session.escalation = session.detect_escalation()?;
        }
        debug!(
            "{}: session open (protocol v{PROTOCOL_VERSION}, escalation: {:?})",
            session.host, session.escalation
        );
        Ok(session)
    }

    fn detect_escalation(&mut self) -> Result<Escalation, RuntimeError> {
        let uid = self.dispatch(&RemoteOp::EffectiveUid, false, self.default_timeout)?;
        if uid.success() && uid.stdout.trim() == "0" {
            return Ok(Escalation::AlreadyRoot);
        }
        let probe = self.dispatch(&RemoteOp::EscalationProbe, false, self.default_timeout)?;
        if probe.success() {
            Ok(Escalation::Sudo)
        } else {
            warn!(
                "{}: passwordless sudo unavailable, running unprivileged: {}",
                self.host,
                probe.stderr.trim()
            );
            Ok(Escalation::None)
        }
    }

    pub fn host(&self) -> &HostName {
        &self.host
    }

    pub fn escalation(&self) -> Escalation {
        self.escalation
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    fn dispatch(
        &mut self,
        op: &RemoteOp,
        escalate: bool,
        timeout: Duration,
    ) -> Result<CommandOutput, RuntimeError> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| RuntimeError::SessionClosed(self.host.to_string()))?;
        transport.dispatch(op, escalate, timeout)
    }

    /// Perform one operation with the default timeout. Non-zero exit codes
    /// are returned, not raised.
    pub fn call(&mut self, op: &RemoteOp) -> Result<CommandOutput, RuntimeError> {
        self.call_with_timeout(op, self.default_timeout)
    }

    pub fn call_with_timeout(
        &mut self,
        op: &RemoteOp,
        timeout: Duration,
    ) -> Result<CommandOutput, RuntimeError> {
        let escalate = self.escalation == Escalation::Sudo;
        debug!("{}: {}", self.host, op.describe());
        self.dispatch(op, escalate, timeout)
    }

    /// Run argv and capture its output regardless of exit code.
    pub fn run<S: AsRef<str>>(
        &mut self,
        argv: &[S],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RuntimeError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        self.call_with_timeout(&RemoteOp::run(argv), timeout)
    }

    /// Run argv and fail on a non-zero exit code.
    pub fn check<S: AsRef<str>>(
        &mut self,
        argv: &[S],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RuntimeError> {
        let op = RemoteOp::run(argv);
        let output = self.call_with_timeout(&op, timeout.unwrap_or(self.default_timeout))?;
        self.require_success(&op, output)
    }

    fn require_success(
        &self,
        op: &RemoteOp,
        output: CommandOutput,
    ) -> Result<CommandOutput, RuntimeError> {
        if output.success() {
            Ok(output)
        } else {
            Err(RuntimeError::CommandFailed {
                host: self.host.to_string(),
                command: op.describe(),
                code: output.exit_code,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }

    /// Contents of a remote file, or `None` if it cannot be read.
    pub fn read_file(&mut self, path: &str) -> Result<Option<String>, RuntimeError> {
        let out = self.call(&RemoteOp::ReadFile {
            path: path.to_owned(),
        })?;
        if out.success() {
            Ok(Some(out.stdout))
        } else {
            debug!("{}: cannot read {path}: {}", self.host, out.stderr.trim());
            Ok(None)
        }
    }

    pub fn write_file(&mut self, path: &str, contents: &[u8], mode: u32) -> Result<(), RuntimeError> {
        let op = RemoteOp::WriteFile {
            path: path.to_owned(),
            contents: contents.to_vec(),
            mode,
        };
        let out = self.call(&op)?;
        self.require_success(&op, out).map(|_| ())
    }

    pub fn makedirs(&mut self, path: &str) -> Result<(), RuntimeError> {
        let op = RemoteOp::MakeDirs {
            path: path.to_owned(),
        };
        let out = self.call(&op)?;
        self.require_success(&op, out).map(|_| ())
    }

    pub fn remove(&mut self, path: &str) -> Result<(), RuntimeError> {
        let op = RemoteOp::Remove {
            path: path.to_owned(),
        };
        let out = self.call(&op)?;
        self.require_success(&op, out).map(|_| ())
    }

    pub fn path_exists(&mut self, path: &str) -> Result<bool, RuntimeError> {
        let out = self.call(&RemoteOp::PathExists {
            path: path.to_owned(),
        })?;
        Ok(out.success())
    }

    /// The short hostname the machine reports for itself.
    pub fn short_hostname(&mut self) -> Result<String, RuntimeError> {
        let op = RemoteOp::ShortHostname;
        let out = self.call(&op)?;
        let out = self.require_success(&op, out)?;
        Ok(out.stdout.trim().to_owned())
    }

    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            debug!("{}: session closed", self.host);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockFleet, MockHost};

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn root_login_needs_no_sudo() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1").root(true));
        let s = Session::open(&fleet, &HostTarget::new("mon1"), true, T).unwrap();
        assert_eq!(s.escalation(), Escalation::AlreadyRoot);
    }

    #[test]
    fn sudo_detected_once() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1").root(false).sudo(true));
        let mut s = Session::open(&fleet, &HostTarget::new("mon1"), true, T).unwrap();
        assert_eq!(s.escalation(), Escalation::Sudo);
        s.run(&["true"], None).unwrap();
        s.run(&["true"], None).unwrap();
        let probes = fleet
            .host("mon1")
            .log
            .iter()
            .filter(|r| r.op == RemoteOp::EscalationProbe)
            .count();
        assert_eq!(probes, 1);
        assert!(fleet.host("mon1").log.iter().skip(2).all(|r| r.escalated));
    }

    #[test]
    fn no_sudo_falls_back_to_unprivileged() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1").root(false).sudo(false));
        let s = Session::open(&fleet, &HostTarget::new("mon1"), true, T).unwrap();
        assert_eq!(s.escalation(), Escalation::None);
    }

    #[test]
    fn escalation_not_requested_skips_probe() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1"));
        let s = Session::open(&fleet, &HostTarget::new("mon1"), false, T).unwrap();
        assert_eq!(s.escalation(), Escalation::None);
        assert!(fleet.host("mon1").log.is_empty());
    }

    #[test]
    fn close_is_idempotent_and_runs_on_drop() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1"));
        {
            let mut s = Session::open(&fleet, &HostTarget::new("mon1"), false, T).unwrap();
            s.close();
            s.close();
            assert!(s.is_closed());
            assert!(matches!(
                s.short_hostname(),
                Err(RuntimeError::SessionClosed(_))
            ));
        }
        {
            let _s = Session::open(&fleet, &HostTarget::new("mon1"), false, T).unwrap();
        }
        let host = fleet.host("mon1");
        assert_eq!(host.sessions_opened, 2);
        assert_eq!(host.sessions_closed, 2);
    }

    #[test]
    fn check_raises_on_nonzero_exit() {
        let fleet = MockFleet::new();
        fleet.add(
            MockHost::new("mon1").respond(&["systemctl"], crate::ops::CommandOutput::failed(5, "no unit")),
        );
        let mut s = Session::open(&fleet, &HostTarget::new("mon1"), false, T).unwrap();
        let err = s.check(&["systemctl", "start", "x"], None).unwrap_err();
        match err {
            RuntimeError::CommandFailed { host, code, stderr, .. } => {
                assert_eq!(host, "mon1");
                assert_eq!(code, 5);
                assert_eq!(stderr, "no unit");
            }
            other => panic!("unexpected error: {other}"),
        }
        // `run` hands the failure back as data instead.
        let out = s.run(&["systemctl", "start", "x"], None).unwrap();
        assert_eq!(out.exit_code, 5);
    }

    #[test]
    fn file_helpers_round_trip() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1").hostname("mon1"));
        let mut s = Session::open(&fleet, &HostTarget::new("mon1"), false, T).unwrap();
        assert_eq!(s.read_file("/etc/ceph/ceph.conf").unwrap(), None);
        s.makedirs("/etc/ceph").unwrap();
        s.write_file("/etc/ceph/ceph.conf", b"[global]\n", 0o644).unwrap();
        assert!(s.path_exists("/etc/ceph/ceph.conf").unwrap());
        assert_eq!(
            s.read_file("/etc/ceph/ceph.conf").unwrap().as_deref(),
            Some("[global]\n")
        );
        s.remove("/etc/ceph/ceph.conf").unwrap();
        assert!(!s.path_exists("/etc/ceph/ceph.conf").unwrap());
        assert_eq!(s.short_hostname().unwrap(), "mon1");
    }

    #[test]
    fn unreachable_host_fails_to_open() {
        let fleet = MockFleet::new();
        fleet.add(MockHost::new("mon1").unreachable());
        let err = Session::open(&fleet, &HostTarget::new("mon1"), true, T)
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Connect { .. }));
    }
}
