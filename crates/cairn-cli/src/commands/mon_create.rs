use super::{host_names, json_pretty, Globals, EXIT_SUCCESS};
use cairn_core::CreateReport;

pub fn run(globals: &Globals, hosts: &[String]) -> Result<u8, String> {
    let deployer = globals.deployer()?;
    let report = deployer
        .create_monitors(&host_names(hosts))
        .map_err(|e| e.to_string())?;

    if globals.json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    report.into_result().map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}

pub fn print_report(report: &CreateReport) {
    for out in &report.outcomes {
        let how = if out.created { "created" } else { "already present" };
        println!("✓ {}: mon.{} {how}, {}", out.host, out.name, out.report.status);
        for w in &out.warnings {
            println!("    warning: {w}");
        }
    }
    for f in &report.failures {
        println!("✗ {}: {}", f.host, f.error);
    }
}
