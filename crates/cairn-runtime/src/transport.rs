use crate::ops::{CommandOutput, RemoteOp};
use crate::RuntimeError;
use cairn_schema::HostName;
use std::time::Duration;

/// Who to connect to, and as whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    pub host: HostName,
    pub user: Option<String>,
}

impl HostTarget {
    pub fn new(host: impl Into<HostName>) -> Self {
        Self {
            host: host.into(),
            user: None,
        }
    }

    #[must_use]
    pub fn with_user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(str::to_owned);
        self
    }

    /// `user@host` or just `host`.
    pub fn destination(&self) -> String {
        match self.user {
            Some(ref u) => format!("{u}@{}", self.host),
            None => self.host.to_string(),
        }
    }
}

/// A channel to exactly one host.
///
/// Implementations execute one operation at a time; `close` must tolerate
/// being called more than once.
pub trait Transport: Send {
    fn host(&self) -> &str;

    fn dispatch(
        &mut self,
        op: &RemoteOp,
        escalate: bool,
        timeout: Duration,
    ) -> Result<CommandOutput, RuntimeError>;

    fn close(&mut self);
}

/// Opens transports. One connector serves a whole run; each `connect` call
/// yields an independent channel.
pub trait Connector {
    fn connect(&self, target: &HostTarget) -> Result<Box<dyn Transport>, RuntimeError>;
}
