//! Orchestration core for Cairn.
//!
//! This crate ties the schema, runtime and store layers together: the
//! per-monitor bootstrap protocol and its stage validation, status polling and
//! classification, the quorum coordinator, the key harvester, and the
//! `Deployer` that drives them across hosts. It also provides the
//! working-directory lock and cooperative interrupt handling.

pub mod bootstrap;
pub mod concurrency;
pub mod deployer;
pub mod gatherkeys;
pub mod lifecycle;
pub mod quorum;
pub mod status;

pub use bootstrap::{bootstrap_monitor, BootstrapContext, BootstrapOutcome, MonPaths};
pub use concurrency::{check_interrupt, install_signal_handler, shutdown_requested, WorkDirLock};
pub use deployer::{ssh_connector, CreateReport, DeployOptions, Deployer, HostFailure, InitialReport};
pub use gatherkeys::{gather_keys, HarvestReport, HarvestSettings};
pub use lifecycle::{validate_transition, MonitorStage};
pub use quorum::{wait_for_quorum, Pause, QuorumWait, RecordingPause, Sleeper};
pub use status::{fetch_status, observe, MonitorReport};

use cairn_schema::{HostName, KeyKind};
use std::path::PathBuf;
use thiserror::Error;

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum KeyHarvestError {
    #[error("no monitor could be used to gather keys (tried: {})", join(.tried))]
    NoUsableMonitor { tried: Vec<HostName> },
    #[error("{host}: {} identity kind(s) could not be harvested: {}", .missing.len(), join(.missing))]
    MissingIdentities {
        host: HostName,
        missing: Vec<KeyKind>,
    },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(#[from] cairn_schema::ConfigError),
    #[error("monitor status error: {0}")]
    Status(#[from] cairn_schema::StatusError),
    #[error("store error: {0}")]
    Store(#[from] cairn_store::StoreError),
    #[error("{0}")]
    Runtime(#[from] cairn_runtime::RuntimeError),
    #[error("invalid monitor stage transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("{host}: {path} exists with different content; use --overwrite-conf to replace it")]
    ConfigMismatch { host: HostName, path: String },
    #[error("monitors did not reach quorum: {}", join(.missing))]
    QuorumNotReached { missing: Vec<HostName> },
    #[error("key harvest failed: {0}")]
    KeyHarvest(#[from] KeyHarvestError),
    #[error("{failed} monitor(s) failed to deploy: {}", join(.hosts))]
    MonitorsFailed { failed: usize, hosts: Vec<HostName> },
    #[error("interrupted")]
    Interrupted,
    #[error("working directory is in use by another cairn process (lock: {})", .0.display())]
    Busy(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
