use super::{EXIT_FAILURE, EXIT_SUCCESS};
use cairn_core::WorkDirLock;
use cairn_schema::{parse_config_file, ClusterConfig, ClusterName, KeyKind, CONFIG_FILE_NAME};
use cairn_store::WorkDir;
use std::path::Path;

pub fn run(workdir: &Path, cluster: Option<&str>, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&mut checks, &mut all_pass);

    if workdir.is_dir() {
        checks.push(Check::pass(
            "workdir",
            &format!("Working directory {}", workdir.display()),
        ));
        if let Some(config) = check_config(workdir, &mut checks, &mut all_pass) {
            let name = cluster.map_or_else(|| config.cluster.name.clone(), ClusterName::from);
            check_workdir(&WorkDir::new(workdir, name), &mut checks, &mut all_pass);
        }
    } else {
        all_pass = false;
        checks.push(Check::fail(
            "workdir",
            &format!("Working directory {} does not exist", workdir.display()),
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = cairn_runtime::check_local_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("local_prereqs", "ssh client available"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "local_prereqs",
            &cairn_runtime::format_missing(&missing),
        ));
    }
}

fn check_config(workdir: &Path, checks: &mut Vec<Check>, all_pass: &mut bool) -> Option<ClusterConfig> {
    match parse_config_file(workdir.join(CONFIG_FILE_NAME)) {
        Ok(config) => {
            let members: Vec<String> = config
                .cluster
                .mon_initial_members
                .iter()
                .map(ToString::to_string)
                .collect();
            checks.push(Check::pass(
                "config",
                &format!(
                    "{CONFIG_FILE_NAME} valid (cluster '{}', initial monitors: {})",
                    config.cluster.name,
                    members.join(", ")
                ),
            ));
            Some(config)
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("config", &format!("{CONFIG_FILE_NAME}: {e}")));
            None
        }
    }
}

fn check_workdir(workdir: &WorkDir, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match workdir.read_mon_keyring() {
        Ok(_) => checks.push(Check::pass("mon_keyring", "Monitor keyring present")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("mon_keyring", &format!("Monitor keyring: {e}")));
        }
    }

    if workdir.ceph_conf_path().is_file() {
        checks.push(Check::info(
            "cluster_conf",
            &format!(
                "{} will be pushed to monitor hosts",
                workdir.ceph_conf_path().display()
            ),
        ));
    } else {
        checks.push(Check::info(
            "cluster_conf",
            "No cluster config to push (remote config left as is)",
        ));
    }

    let harvested = workdir
        .existing_keyrings()
        .into_iter()
        .filter(|k| *k != KeyKind::Mon)
        .count();
    checks.push(Check::info(
        "keyrings",
        &format!("{harvested} of {} harvested keyrings present", KeyKind::ALL.len() - 1),
    ));

    match WorkDirLock::try_acquire(&workdir.lock_file()) {
        Ok(Some(_)) => checks.push(Check::pass("workdir_lock", "Working directory lock is free")),
        Ok(None) => checks.push(Check::warn(
            "workdir_lock",
            "Working directory lock is held by another process",
        )),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "workdir_lock",
                &format!("Cannot check working directory lock: {e}"),
            ));
        }
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "protocol_version": cairn_runtime::PROTOCOL_VERSION,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("Cairn Doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
