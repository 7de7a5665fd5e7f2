use super::{
    colorize_status, host_names, json_pretty, spin_fail, spin_ok, spinner, Globals, EXIT_FAILURE,
    EXIT_SUCCESS,
};
use cairn_core::MonitorReport;

fn describe(r: &MonitorReport) -> String {
    let mut line = format!("{}: mon.{} {}", r.host, r.name, colorize_status(r.status));
    if let Some(state) = &r.state {
        line.push_str(&format!(" (state {state}"));
        if let Some(rank) = r.rank {
            line.push_str(&format!(", rank {rank}"));
        }
        if let Some(q) = &r.quorum {
            line.push_str(&format!(", quorum {q:?}"));
        }
        line.push(')');
    }
    if let Some(err) = &r.error {
        line.push_str(&format!(": {err}"));
    }
    line
}

pub fn run(globals: &Globals, hosts: &[String]) -> Result<u8, String> {
    let deployer = globals.deployer()?;
    let mut reports = Vec::new();
    for host in host_names(hosts) {
        if globals.json {
            reports.push(deployer.monitor_status(&host));
            continue;
        }
        let pb = spinner(&format!("querying mon.{}...", host.short()));
        let report = deployer.monitor_status(&host);
        if report.error.is_some() {
            spin_fail(&pb, &describe(&report));
        } else {
            spin_ok(&pb, &describe(&report));
        }
        reports.push(report);
    }

    if globals.json {
        println!("{}", json_pretty(&reports)?);
    }
    // Unreachable monitors make the command fail so scripts can tell.
    if reports.iter().any(|r| r.error.is_some()) {
        Ok(EXIT_FAILURE)
    } else {
        Ok(EXIT_SUCCESS)
    }
}
