//! The closed set of operations a session can ask a target host to perform.
//!
//! The orchestrator never ships code or free-form shell text. Every operation
//! lowers to a fixed argv template; caller-supplied values travel as separate
//! positional arguments or on stdin.

use serde::{Deserialize, Serialize};

/// Version of the remote operation vocabulary. Bumped whenever a template
/// changes meaning.
pub const PROTOCOL_VERSION: u32 = 1;

/// Atomic remote file write: contents arrive on stdin, land in a sibling temp
/// file with owner-only permissions, get their final mode, then replace `$1`.
const WRITE_FILE_SCRIPT: &str =
    r#"umask 077 && tmp="$1.cairn.$$" && cat > "$tmp" && chmod "$2" "$tmp" && mv -f "$tmp" "$1""#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RemoteOp {
    /// Run a program with arguments.
    Run { argv: Vec<String> },
    ReadFile { path: String },
    WriteFile {
        path: String,
        contents: Vec<u8>,
        mode: u32,
    },
    MakeDirs { path: String },
    Remove { path: String },
    PathExists { path: String },
    ShortHostname,
    EffectiveUid,
    /// Non-interactive privilege check; always run unescalated.
    EscalationProbe,
}

/// A lowered operation: argv plus optional stdin payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
}

impl RemoteOp {
    pub fn run<S: AsRef<str>>(argv: &[S]) -> Self {
        RemoteOp::Run {
            argv: argv.iter().map(|a| a.as_ref().to_owned()).collect(),
        }
    }

    /// Short name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteOp::Run { .. } => "run",
            RemoteOp::ReadFile { .. } => "read_file",
            RemoteOp::WriteFile { .. } => "write_file",
            RemoteOp::MakeDirs { .. } => "makedirs",
            RemoteOp::Remove { .. } => "remove",
            RemoteOp::PathExists { .. } => "path_exists",
            RemoteOp::ShortHostname => "short_hostname",
            RemoteOp::EffectiveUid => "effective_uid",
            RemoteOp::EscalationProbe => "escalation_probe",
        }
    }

    pub fn lower(&self) -> RemoteCommand {
        let argv: Vec<String> = match self {
            RemoteOp::Run { argv } => argv.clone(),
            RemoteOp::ReadFile { path } => vec!["cat".into(), "--".into(), path.clone()],
            RemoteOp::WriteFile { path, mode, .. } => vec![
                "sh".into(),
                "-c".into(),
                WRITE_FILE_SCRIPT.into(),
                "cairn-write".into(),
                path.clone(),
                format!("{mode:o}"),
            ],
            RemoteOp::MakeDirs { path } => vec!["mkdir".into(), "-p".into(), "--".into(), path.clone()],
            RemoteOp::Remove { path } => vec!["rm".into(), "-f".into(), "--".into(), path.clone()],
            RemoteOp::PathExists { path } => vec!["test".into(), "-e".into(), path.clone()],
            RemoteOp::ShortHostname => vec!["hostname".into(), "-s".into()],
            RemoteOp::EffectiveUid => vec!["id".into(), "-u".into()],
            RemoteOp::EscalationProbe => vec!["sudo".into(), "-n".into(), "true".into()],
        };
        let stdin = match self {
            RemoteOp::WriteFile { contents, .. } => Some(contents.clone()),
            _ => None,
        };
        RemoteCommand { argv, stdin }
    }

    /// Lowered argv, prefixed with non-interactive sudo when escalating.
    pub fn lower_escalated(&self, escalate: bool) -> RemoteCommand {
        let mut cmd = self.lower();
        if escalate && !matches!(self, RemoteOp::EscalationProbe) {
            let mut argv = vec!["sudo".to_owned(), "-n".to_owned(), "--".to_owned()];
            argv.append(&mut cmd.argv);
            cmd.argv = argv;
        }
        cmd
    }

    /// Human-readable rendering for logs. File contents are never included.
    pub fn describe(&self) -> String {
        match self {
            RemoteOp::Run { argv } => argv.join(" "),
            RemoteOp::ReadFile { path } => format!("read {path}"),
            RemoteOp::WriteFile { path, mode, .. } => format!("write {path} (mode {mode:o})"),
            RemoteOp::MakeDirs { path } => format!("mkdir -p {path}"),
            RemoteOp::Remove { path } => format!("rm -f {path}"),
            RemoteOp::PathExists { path } => format!("test -e {path}"),
            RemoteOp::ShortHostname => "hostname -s".to_owned(),
            RemoteOp::EffectiveUid => "id -u".to_owned(),
            RemoteOp::EscalationProbe => "sudo -n true".to_owned(),
        }
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// POSIX single-quoting: replace ' with '\'' then wrap in '.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:@,+%".contains(&b))
    {
        return s.to_owned();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Join an argv into a single shell-safe command line.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}
