pub mod completions;
pub mod create_initial;
pub mod doctor;
pub mod gatherkeys;
pub mod mon_create;
pub mod mon_status;

use cairn_core::{DeployOptions, Deployer};
use cairn_schema::{ClusterName, HostName, MonitorStatus};
use cairn_store::{Outcome, ReconcileReport};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_WORKDIR_ERROR: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Flags shared by every command that talks to the cluster.
#[derive(Debug, Clone)]
pub struct Globals {
    pub workdir: PathBuf,
    pub cluster: Option<String>,
    pub username: Option<String>,
    pub overwrite_conf: bool,
    pub json: bool,
}

impl Globals {
    pub fn deployer(&self) -> Result<Deployer, String> {
        let options = DeployOptions {
            username: self.username.clone(),
            overwrite_conf: self.overwrite_conf,
            ..DeployOptions::default()
        };
        Deployer::open(
            &self.workdir,
            self.cluster.as_deref().map(ClusterName::from),
            options,
        )
        .map_err(|e| e.to_string())
    }
}

pub fn host_names(hosts: &[String]) -> Vec<HostName> {
    hosts.iter().map(|h| HostName::from(h.as_str())).collect()
}

/// Exit code for an error message surfaced at the command boundary.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("config error:") {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("store error:") || msg.starts_with("working directory is in use") {
        EXIT_WORKDIR_ERROR
    } else if msg == "interrupted" {
        EXIT_INTERRUPTED
    } else {
        EXIT_FAILURE
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: MonitorStatus) -> String {
    let text = status.to_string();
    match status {
        MonitorStatus::InQuorum => Style::new().green().apply_to(text).to_string(),
        MonitorStatus::Running => Style::new().cyan().apply_to(text).to_string(),
        MonitorStatus::Transitioning => Style::new().yellow().apply_to(text).to_string(),
        MonitorStatus::NotRunning => Style::new().red().bold().apply_to(text).to_string(),
    }
}

pub fn print_reconcile(report: &ReconcileReport) {
    for entry in &report.entries {
        let name = entry
            .path
            .file_name()
            .map_or_else(|| entry.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        match entry.outcome {
            Outcome::Created => println!("  + {name}"),
            Outcome::Unchanged => println!("  = {name}"),
            Outcome::Replaced => {
                let backup = entry
                    .backup
                    .as_deref()
                    .map(|b| b.display().to_string())
                    .unwrap_or_default();
                println!(
                    "  {} {name} (previous copy kept as {backup})",
                    Style::new().yellow().apply_to("~")
                );
            }
        }
    }
    println!(
        "{} created, {} unchanged, {} replaced",
        report.created(),
        report.unchanged(),
        report.replaced()
    );
}
