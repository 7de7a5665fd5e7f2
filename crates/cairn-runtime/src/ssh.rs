//! OpenSSH transport.
//!
//! Each session runs its own control master so the many small operations of a
//! bootstrap share one authenticated connection. The control socket lives in a
//! private temporary directory that disappears with the transport.

use crate::local::{is_local_host, LocalTransport};
use crate::ops::{shell_join, CommandOutput, RemoteOp};
use crate::process::{run_with_limits, Limits};
use crate::transport::{Connector, HostTarget, Transport};
use crate::RuntimeError;
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, warn};

/// ssh exits with 255 when the connection itself failed, but a remote
/// command may exit 255 too.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Whether an ssh invocation that exited with `exit_code` lost its
/// connection. `master_alive` is only consulted for the ambiguous 255.
fn connection_lost(exit_code: i32, master_alive: impl FnOnce() -> bool) -> bool {
    exit_code == SSH_CONNECTION_FAILURE && !master_alive()
}

#[derive(Debug, Clone)]
pub struct SshConnector {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub options: Vec<String>,
    pub connect_timeout: Duration,
    pub idle: Duration,
}

impl SshConnector {
    pub fn new(idle: Duration) -> Self {
        Self {
            user: None,
            port: None,
            options: Vec::new(),
            connect_timeout: Duration::from_secs(30),
            idle,
        }
    }

    fn base_args(&self, control_path: &str, target: &HostTarget) -> Vec<String> {
        let mut args = vec![
            "-o".to_owned(),
            "BatchMode=yes".to_owned(),
            "-o".to_owned(),
            "StrictHostKeyChecking=accept-new".to_owned(),
            "-o".to_owned(),
            "LogLevel=ERROR".to_owned(),
            "-o".to_owned(),
            "ControlMaster=auto".to_owned(),
            "-o".to_owned(),
            format!("ControlPath={control_path}"),
            "-o".to_owned(),
            "ControlPersist=120".to_owned(),
            "-o".to_owned(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_owned());
            args.push(port.to_string());
        }
        for opt in &self.options {
            args.push("-o".to_owned());
            args.push(opt.clone());
        }
        let user = target.user.as_deref().or(self.user.as_deref());
        if let Some(u) = user {
            args.push("-l".to_owned());
            args.push(u.to_owned());
        }
        args
    }
}

pub struct SshTransport {
    host: String,
    base_args: Vec<String>,
    idle: Duration,
    // Held for its Drop: removes the control socket directory.
    _control_dir: TempDir,
    closed: bool,
}

impl SshTransport {
    fn ssh_command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(&self.base_args).arg("--").arg(&self.host).arg(remote);
        cmd
    }

    /// Ask the control master whether it is still running (`ssh -O check`).
    fn master_alive(&self) -> bool {
        Command::new("ssh")
            .args(&self.base_args)
            .args(["-O", "check", "--", &self.host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn dispatch(
        &mut self,
        op: &RemoteOp,
        escalate: bool,
        timeout: Duration,
    ) -> Result<CommandOutput, RuntimeError> {
        if self.closed {
            return Err(RuntimeError::SessionClosed(self.host.clone()));
        }
        let lowered = op.lower_escalated(escalate);
        let remote = shell_join(&lowered.argv);
        let label = op.describe();
        let output = run_with_limits(
            self.ssh_command(&remote),
            lowered.stdin.as_deref(),
            Limits::new(timeout, self.idle),
            &self.host,
            &label,
        )?;
        if connection_lost(output.exit_code, || self.master_alive()) {
            return Err(RuntimeError::Connect {
                host: self.host.clone(),
                reason: output.stderr.trim().to_owned(),
            });
        }
        Ok(output)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let status = Command::new("ssh")
            .args(&self.base_args)
            .args(["-O", "exit", "--", &self.host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => debug!("{}: control master closed", self.host),
            Ok(_) => debug!("{}: no control master to close", self.host),
            Err(e) => warn!("{}: failed to close control master: {e}", self.host),
        }
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Connector for SshConnector {
    fn connect(&self, target: &HostTarget) -> Result<Box<dyn Transport>, RuntimeError> {
        if is_local_host(&target.host) && target.user.is_none() && self.user.is_none() {
            debug!("{}: using local execution", target.host);
            return Ok(Box::new(LocalTransport::new(&target.host, self.idle)));
        }

        let control_dir = tempfile::Builder::new().prefix("cairn-ssh-").tempdir()?;
        let control_path = control_dir.path().join("cm").to_string_lossy().into_owned();
        let mut transport = SshTransport {
            host: target.host.to_string(),
            base_args: self.base_args(&control_path, target),
            idle: self.idle,
            _control_dir: control_dir,
            closed: false,
        };

        // Establish the master up front so authentication problems surface
        // as connection errors rather than as the first command failing.
        let probe = transport.dispatch(
            &RemoteOp::run(&["true"]),
            false,
            self.connect_timeout + Duration::from_secs(5),
        )?;
        if !probe.success() {
            return Err(RuntimeError::Connect {
                host: target.destination(),
                reason: probe.stderr.trim().to_owned(),
            });
        }
        debug!("{}: connected", target.destination());
        Ok(Box::new(transport))
    }
}
