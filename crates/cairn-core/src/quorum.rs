//! Waiting for the initial monitors to form quorum.

use crate::concurrency::{check_interrupt, shutdown_requested};
use crate::status::fetch_status;
use crate::CoreError;
use cairn_runtime::{Connector, HostTarget, Session};
use cairn_schema::{ClusterName, HostName};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Blocks between status polls.
pub trait Pause {
    fn pause(&mut self, delay: Duration) -> Result<(), CoreError>;
}

/// Real sleeping, cut short by an interrupt.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sleeper;

impl Pause for Sleeper {
    fn pause(&mut self, delay: Duration) -> Result<(), CoreError> {
        let deadline = Instant::now() + delay;
        loop {
            if shutdown_requested() {
                return Err(CoreError::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(250)));
        }
    }
}

/// Records requested delays instead of sleeping. Clones share the record.
#[derive(Debug, Default, Clone)]
pub struct RecordingPause {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingPause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Pause for RecordingPause {
    fn pause(&mut self, delay: Duration) -> Result<(), CoreError> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delay);
        Ok(())
    }
}

/// Settings for one quorum wait.
#[derive(Debug, Clone)]
pub struct QuorumWait<'a> {
    pub cluster: &'a ClusterName,
    /// Delays between polls, consumed from the end; one poll per entry.
    pub backoff_secs: &'a [u64],
    pub escalate: bool,
    pub timeout: Duration,
}

/// Poll one monitor until it reports a quorum state or the schedule runs out.
fn poll_until_quorum(
    connector: &dyn Connector,
    target: &HostTarget,
    wait: &QuorumWait<'_>,
    pause: &mut dyn Pause,
) -> Result<bool, CoreError> {
    let name = target.host.short();
    let mut schedule = wait.backoff_secs.to_vec();
    let attempts = schedule.len();
    for attempt in 1..=attempts {
        check_interrupt()?;
        // A fresh session and status document every time; nothing is cached.
        let state = match Session::open(connector, target, wait.escalate, wait.timeout) {
            Ok(mut s) => fetch_status(&mut s, wait.cluster, name),
            Err(e) => Err(e.into()),
        };
        match state {
            Ok(doc) if doc.has_quorum_state() => match doc.require_complete() {
                Ok(_) => {
                    info!("{}: mon.{name} has reached quorum ({})", target.host, doc.state);
                    return Ok(true);
                }
                Err(e) => warn!(
                    "{}: mon.{name} reports {} but its status is not ready ({e}), attempt {attempt}/{attempts}",
                    target.host, doc.state
                ),
            },
            Ok(doc) => warn!(
                "{}: mon.{name} not in quorum yet (state: {}), attempt {attempt}/{attempts}",
                target.host,
                if doc.state.is_empty() { "none" } else { doc.state.as_str() }
            ),
            Err(e) => warn!(
                "{}: mon.{name} status unavailable, attempt {attempt}/{attempts}: {e}",
                target.host
            ),
        }
        if attempt == attempts {
            break;
        }
        if let Some(secs) = schedule.pop() {
            info!("{}: waiting {secs}s before polling again", target.host);
            pause.pause(Duration::from_secs(secs))?;
        }
    }
    Ok(false)
}

/// Wait for every target to report quorum membership.
///
/// Hosts are polled one after another in the given order. Returns the full
/// set when every monitor made it; otherwise fails naming the stragglers.
pub fn wait_for_quorum(
    connector: &dyn Connector,
    targets: &[HostTarget],
    wait: &QuorumWait<'_>,
    pause: &mut dyn Pause,
) -> Result<Vec<HostName>, CoreError> {
    let mut in_quorum = Vec::new();
    let mut missing = Vec::new();
    for target in targets {
        if poll_until_quorum(connector, target, wait, pause)? {
            in_quorum.push(target.host.clone());
        } else {
            missing.push(target.host.clone());
        }
    }
    if missing.is_empty() {
        info!("all {} initial monitors are in quorum", in_quorum.len());
        Ok(in_quorum)
    } else {
        for host in &missing {
            warn!("{host}: monitor never reached quorum");
        }
        Err(CoreError::QuorumNotReached { missing })
    }
}
