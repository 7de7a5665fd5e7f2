//! In-memory simulated hosts.
//!
//! A `MockFleet` is a `Connector` whose transports operate on `MockHost`
//! records: a small file tree, a reported hostname, privilege flags, and
//! scripted replies for `Run` operations. Every dispatched operation is logged
//! so callers can assert on what was sent.

use crate::ops::{CommandOutput, RemoteOp};
use crate::transport::{Connector, HostTarget, Transport};
use crate::RuntimeError;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    Output(CommandOutput),
    Timeout,
}

impl From<CommandOutput> for MockReply {
    fn from(out: CommandOutput) -> Self {
        MockReply::Output(out)
    }
}

#[derive(Debug, Clone)]
struct Scripted {
    needles: Vec<String>,
    replies: VecDeque<MockReply>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOp {
    pub op: RemoteOp,
    pub escalated: bool,
}

#[derive(Debug, Clone)]
pub struct MockHost {
    pub name: String,
    pub reported_hostname: String,
    pub is_root: bool,
    pub has_sudo: bool,
    pub reachable: bool,
    pub files: BTreeMap<String, Vec<u8>>,
    pub file_modes: BTreeMap<String, u32>,
    pub dirs: BTreeSet<String>,
    pub log: Vec<RecordedOp>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    scripted: Vec<Scripted>,
}

impl MockHost {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            reported_hostname: name.split('.').next().unwrap_or(name).to_owned(),
            is_root: true,
            has_sudo: false,
            reachable: true,
            files: BTreeMap::new(),
            file_modes: BTreeMap::new(),
            dirs: BTreeSet::new(),
            log: Vec::new(),
            sessions_opened: 0,
            sessions_closed: 0,
            scripted: Vec::new(),
        }
    }

    #[must_use]
    pub fn hostname(mut self, reported: &str) -> Self {
        reported.clone_into(&mut self.reported_hostname);
        self
    }

    #[must_use]
    pub fn root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    #[must_use]
    pub fn sudo(mut self, has_sudo: bool) -> Self {
        self.has_sudo = has_sudo;
        self
    }

    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    #[must_use]
    pub fn file(mut self, path: &str, contents: &str) -> Self {
        self.put_file(path, contents.as_bytes(), 0o644);
        self
    }

    #[must_use]
    pub fn dir(mut self, path: &str) -> Self {
        self.make_dirs(path);
        self
    }

    /// Reply to every `Run` whose argv contains all `needles` with `output`.
    /// Later scripts take precedence over earlier ones.
    #[must_use]
    pub fn respond(self, needles: &[&str], output: CommandOutput) -> Self {
        self.respond_seq(needles, vec![MockReply::Output(output)])
    }

    /// Reply with `replies` in order; the last one repeats once the rest are used.
    #[must_use]
    pub fn respond_seq(mut self, needles: &[&str], replies: Vec<MockReply>) -> Self {
        self.scripted.push(Scripted {
            needles: needles.iter().map(|s| (*s).to_owned()).collect(),
            replies: replies.into(),
        });
        self
    }

    pub fn file_text(&self, path: &str) -> Option<String> {
        self.files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Every `Run` argv, in dispatch order.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log
            .iter()
            .filter_map(|r| match &r.op {
                RemoteOp::Run { argv } => Some(argv.clone()),
                _ => None,
            })
            .collect()
    }

    /// Whether some `Run` argv contained all of `needles`.
    pub fn ran(&self, needles: &[&str]) -> bool {
        self.commands()
            .iter()
            .any(|argv| needles.iter().all(|n| argv.iter().any(|a| a == n)))
    }

    fn put_file(&mut self, path: &str, contents: &[u8], mode: u32) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            if !parent.is_empty() {
                self.make_dirs(parent);
            }
        }
        self.files.insert(path.to_owned(), contents.to_vec());
        self.file_modes.insert(path.to_owned(), mode);
    }

    fn make_dirs(&mut self, path: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            self.dirs.insert(current.clone());
        }
    }

    fn scripted_reply(&mut self, argv: &[String]) -> Option<MockReply> {
        let entry = self
            .scripted
            .iter_mut()
            .rev()
            .find(|s| s.needles.iter().all(|n| argv.iter().any(|a| a == n)))?;
        if entry.replies.len() > 1 {
            entry.replies.pop_front()
        } else {
            entry.replies.front().cloned()
        }
    }

    fn handle(&mut self, op: &RemoteOp, escalated: bool) -> MockReply {
        self.log.push(RecordedOp {
            op: op.clone(),
            escalated,
        });
        let out = match op {
            RemoteOp::Run { argv } => {
                return self
                    .scripted_reply(argv)
                    .unwrap_or_else(|| MockReply::Output(CommandOutput::ok("")));
            }
            RemoteOp::ReadFile { path } => match self.files.get(path) {
                Some(bytes) => CommandOutput::ok(String::from_utf8_lossy(bytes)),
                None => CommandOutput::failed(
                    1,
                    format!("cat: {path}: No such file or directory"),
                ),
            },
            RemoteOp::WriteFile {
                path,
                contents,
                mode,
            } => {
                self.put_file(path, contents, *mode);
                CommandOutput::ok("")
            }
            RemoteOp::MakeDirs { path } => {
                self.make_dirs(path);
                CommandOutput::ok("")
            }
            RemoteOp::Remove { path } => {
                self.files.remove(path);
                self.file_modes.remove(path);
                CommandOutput::ok("")
            }
            RemoteOp::PathExists { path } => {
                if self.files.contains_key(path) || self.dirs.contains(path) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "")
                }
            }
            RemoteOp::ShortHostname => CommandOutput::ok(format!("{}\n", self.reported_hostname)),
            RemoteOp::EffectiveUid => {
                CommandOutput::ok(if self.is_root { "0\n" } else { "1000\n" })
            }
            RemoteOp::EscalationProbe => {
                if self.has_sudo {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "sudo: a password is required")
                }
            }
        };
        MockReply::Output(out)
    }
}

type Hosts = Arc<Mutex<HashMap<String, MockHost>>>;

fn lock(hosts: &Hosts) -> MutexGuard<'_, HashMap<String, MockHost>> {
    hosts.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A set of simulated hosts, addressable by name.
#[derive(Clone, Default)]
pub struct MockFleet {
    hosts: Hosts,
}

impl MockFleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, host: MockHost) {
        lock(&self.hosts).insert(host.name.clone(), host);
    }

    /// Snapshot of a host's current state. Panics if the host was never added.
    pub fn host(&self, name: &str) -> MockHost {
        lock(&self.hosts)
            .get(name)
            .cloned()
            .unwrap_or_else(|| panic!("mock host '{name}' not in fleet"))
    }

    pub fn update(&self, name: &str, f: impl FnOnce(&mut MockHost)) {
        if let Some(h) = lock(&self.hosts).get_mut(name) {
            f(h);
        }
    }

    /// Hosts that had at least one session opened, sorted.
    pub fn contacted(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.hosts)
            .values()
            .filter(|h| h.sessions_opened > 0)
            .map(|h| h.name.clone())
            .collect();
        names.sort();
        names
    }
}

pub struct MockTransport {
    hosts: Hosts,
    host: String,
    closed: bool,
}

impl Transport for MockTransport {
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
        let mut hosts = lock(&self.hosts);
        let h = hosts.get_mut(&self.host).ok_or_else(|| RuntimeError::Connect {
            host: self.host.clone(),
            reason: "host vanished from mock fleet".to_owned(),
        })?;
        match h.handle(op, escalate) {
            MockReply::Output(out) => Ok(out),
            MockReply::Timeout => Err(RuntimeError::Timeout {
                host: self.host.clone(),
                command: op.describe(),
                secs: timeout.as_secs(),
            }),
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(h) = lock(&self.hosts).get_mut(&self.host) {
            h.sessions_closed += 1;
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Connector for MockFleet {
    fn connect(&self, target: &HostTarget) -> Result<Box<dyn Transport>, RuntimeError> {
        let mut hosts = lock(&self.hosts);
        let Some(h) = hosts.get_mut(target.host.as_str()) else {
            return Err(RuntimeError::Connect {
                host: target.host.to_string(),
                reason: "Could not resolve hostname".to_owned(),
            });
        };
        if !h.reachable {
            return Err(RuntimeError::Connect {
                host: target.host.to_string(),
                reason: "Connection refused".to_owned(),
            });
        }
        h.sessions_opened += 1;
        Ok(Box::new(MockTransport {
            hosts: Arc::clone(&self.hosts),
            host: target.host.to_string(),
            closed: false,
        }))
    }
}
