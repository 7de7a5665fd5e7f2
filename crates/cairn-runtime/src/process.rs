//! Child-process execution with a hard deadline and an idle deadline.
//!
//! Output is drained on two reader threads into a channel so the caller can
//! notice silence (idle timeout) independently of the overall command timeout.

use crate::ops::CommandOutput;
use crate::RuntimeError;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Deadline for the whole command.
    pub timeout: Duration,
    /// Deadline for a gap with no output at all.
    pub idle: Duration,
}

impl Limits {
    pub fn new(timeout: Duration, idle: Duration) -> Self {
        Self { timeout, idle }
    }
}

enum Chunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Closed,
}

fn spawn_reader<R: Read + Send + 'static>(
    mut source: R,
    tx: Sender<Chunk>,
    wrap: fn(Vec<u8>) -> Chunk,
) {
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match source.read(&mut buf) {
                Ok(0) | Err(_) => {
                    let _ = tx.send(Chunk::Closed);
                    return;
                }
                Ok(n) => {
                    if tx.send(wrap(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
            }
        }
    });
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Run `cmd` to completion, feeding `stdin` and enforcing `limits`.
///
/// `host` and `label` only feed error messages.
pub fn run_with_limits(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    limits: Limits,
    host: &str,
    label: &str,
) -> Result<CommandOutput, RuntimeError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    trace!("{host}: spawning {label}");
    let mut child = cmd.spawn()?;

    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let data = data.to_vec();
        thread::spawn(move || {
            let _ = pipe.write_all(&data);
        });
    }

    let (tx, rx) = mpsc::channel();
    let mut open_streams = 0;
    if let Some(out) = child.stdout.take() {
        spawn_reader(out, tx.clone(), Chunk::Stdout);
        open_streams += 1;
    }
    if let Some(err) = child.stderr.take() {
        spawn_reader(err, tx.clone(), Chunk::Stderr);
        open_streams += 1;
    }
    drop(tx);

    let started = Instant::now();
    let mut last_data = started;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let status = loop {
        let now = Instant::now();
        if now.duration_since(started) >= limits.timeout {
            kill(&mut child);
            return Err(RuntimeError::Timeout {
                host: host.to_owned(),
                command: label.to_owned(),
                secs: limits.timeout.as_secs(),
            });
        }
        if now.duration_since(last_data) >= limits.idle {
            kill(&mut child);
            return Err(RuntimeError::IdleTimeout {
                host: host.to_owned(),
                secs: limits.idle.as_secs(),
            });
        }

        if open_streams > 0 {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(Chunk::Stdout(bytes)) => {
                    stdout.extend_from_slice(&bytes);
                    last_data = Instant::now();
                }
                Ok(Chunk::Stderr(bytes)) => {
                    stderr.extend_from_slice(&bytes);
                    last_data = Instant::now();
                }
                Ok(Chunk::Closed) => open_streams -= 1,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => open_streams = 0,
            }
            continue;
        }

        match child.try_wait()? {
            Some(status) => break status,
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        // Killed by a signal: no exit code.
        exit_code: status.code().unwrap_or(-1),
    };
    debug!(
        "{host}: {label} exited {} after {:?}",
        output.exit_code,
        started.elapsed()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(timeout_ms: u64, idle_ms: u64) -> Limits {
        Limits::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(idle_ms),
        )
    }

    #[test]
    fn captures_stdout_stderr_and_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let out = run_with_limits(cmd, None, limits(10_000, 10_000), "local", "sh").unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, 3);
    }

    #[test]
    fn feeds_stdin() {
        let cmd = Command::new("cat");
        let out =
            run_with_limits(cmd, Some(b"hello"), limits(10_000, 10_000), "local", "cat").unwrap();
        assert_eq!(out.stdout, "hello");
        assert!(out.success());
    }

    #[test]
    fn command_timeout_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "while true; do echo tick; sleep 0.05; done"]);
        let err = run_with_limits(cmd, None, limits(300, 10_000), "local", "ticker").unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }), "{err}");
    }

    #[test]
    fn idle_timeout_fires_on_silence() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_with_limits(cmd, None, limits(10_000, 300), "local", "sleep").unwrap_err();
        assert!(matches!(err, RuntimeError::IdleTimeout { .. }), "{err}");
    }

    #[test]
    fn missing_program_is_io_error() {
        let cmd = Command::new("/nonexistent/cairn-test-binary");
        let err = run_with_limits(cmd, None, limits(1000, 1000), "local", "x").unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
