use crate::ops::{CommandOutput, RemoteOp};
use crate::process::{run_with_limits, Limits};
use crate::transport::{Connector, HostTarget, Transport};
use crate::RuntimeError;
use std::process::Command;
use std::time::Duration;

/// Hostnames that are served by [`LocalTransport`] instead of ssh.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Executes operations on the machine Cairn itself runs on.
pub struct LocalTransport {
    host: String,
    idle: Duration,
    closed: bool,
}

impl LocalTransport {
    pub fn new(host: &str, idle: Duration) -> Self {
        Self {
            host: host.to_owned(),
            idle,
            closed: false,
        }
    }
}

impl Transport for LocalTransport {
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
        let Some((program, args)) = lowered.argv.split_first() else {
            return Ok(CommandOutput::default());
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        run_with_limits(
            cmd,
            lowered.stdin.as_deref(),
            Limits::new(timeout, self.idle),
            &self.host,
            &op.describe(),
        )
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Connector that only knows the local machine.
pub struct LocalConnector {
    idle: Duration,
}

impl LocalConnector {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }
}

impl Connector for LocalConnector {
    fn connect(&self, target: &HostTarget) -> Result<Box<dyn Transport>, RuntimeError> {
        Ok(Box::new(LocalTransport::new(&target.host, self.idle)))
    }
}
