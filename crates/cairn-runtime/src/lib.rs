//! Remote execution and host capability layer for Cairn.
//!
//! This crate implements everything that touches a target machine: the closed
//! vocabulary of remote operations (`RemoteOp`), pluggable transports (ssh with a
//! control master, local execution, and an in-memory mock fleet) behind the
//! `Connector`/`Transport` traits, the privilege-escalating `Session`, the
//! capability resolver that identifies a host's distribution and init system,
//! and the package-manager and init-system strategies selected from it.

pub mod init;
pub mod local;
pub mod mock;
pub mod ops;
pub mod pkg;
pub mod platform;
pub mod prereq;
pub mod process;
pub mod session;
pub mod ssh;
pub mod transport;

pub use init::{InitSystem, ServiceManager, SysVinit, Systemd, Upstart};
pub use local::{LocalConnector, LocalTransport};
pub use mock::{MockFleet, MockHost, MockReply, RecordedOp};
pub use ops::{CommandOutput, RemoteOp, PROTOCOL_VERSION};
pub use pkg::{Apt, PackageManager, Packager, Pacman, RepoOptions, Yum, Zypper};
pub use platform::{
    detect_init, identify, normalize_distro_name, resolve_host, Host, OsFamily, OsRelease,
};
pub use prereq::{check_local_prereqs, format_missing, MissingPrereq};
pub use session::{Escalation, Session};
pub use ssh::SshConnector;
pub use transport::{Connector, HostTarget, Transport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{host}: unsupported platform '{family}'")]
    UnsupportedPlatform { host: String, family: String },
    #[error("{host}: could not identify the operating system")]
    PlatformUnknown { host: String },
    #[error("{host}: connection failed: {reason}")]
    Connect { host: String, reason: String },
    #[error("{host}: `{command}` exited with {code}: {stderr}")]
    CommandFailed {
        host: String,
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("{host}: `{command}` timed out after {secs}s")]
    Timeout {
        host: String,
        command: String,
        secs: u64,
    },
    #[error("{host}: no output for {secs}s, session disconnected")]
    IdleTimeout { host: String, secs: u64 },
    #[error("{0}: session already closed")]
    SessionClosed(String),
    #[error("{host}: {operation} is not supported by {strategy}")]
    Unsupported {
        host: String,
        operation: String,
        strategy: String,
    },
}

impl RuntimeError {
    /// The host an error refers to, when it refers to one.
    pub fn host(&self) -> Option<&str> {
        match self {
            RuntimeError::Io(_) => None,
            RuntimeError::UnsupportedPlatform { host, .. }
            | RuntimeError::PlatformUnknown { host }
            | RuntimeError::Connect { host, .. }
            | RuntimeError::CommandFailed { host, .. }
            | RuntimeError::Timeout { host, .. }
            | RuntimeError::IdleTimeout { host, .. }
            | RuntimeError::Unsupported { host, .. } => Some(host),
            RuntimeError::SessionClosed(host) => Some(host),
        }
    }
}
