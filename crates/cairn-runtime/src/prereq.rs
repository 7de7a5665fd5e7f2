use std::fmt;
use std::process::Command;

/// A missing local tool with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check the tools needed on the operator's machine.
/// An empty list means everything is present.
pub fn check_local_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("ssh") {
        missing.push(MissingPrereq {
            name: "ssh",
            purpose: "running commands on monitor hosts",
            install_hint: "apt install openssh-client | dnf install openssh-clients | zypper install openssh | pacman -S openssh",
        });
    }

    missing
}

pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nCairn needs these tools to reach cluster hosts.");
    msg
}
