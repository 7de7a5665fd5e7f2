use super::{json_pretty, mon_create, print_reconcile, Globals, EXIT_SUCCESS};
use cairn_core::CreateReport;

pub fn run(globals: &Globals) -> Result<u8, String> {
    let mut deployer = globals.deployer()?;
    let members = deployer.config().cluster.mon_initial_members.clone();
    if !globals.json {
        let names: Vec<String> = members.iter().map(ToString::to_string).collect();
        println!("deploying initial monitors: {}", names.join(", "));
    }

    let report = deployer.create_initial().map_err(|e| e.to_string())?;

    if globals.json {
        println!("{}", json_pretty(&report)?);
    } else {
        mon_create::print_report(&CreateReport {
            outcomes: report.monitors.clone(),
            failures: Vec::new(),
        });
        println!("all {} monitors are in quorum", report.quorum.len());
        println!("keys gathered from {}:", report.harvest.source);
        print_reconcile(&report.harvest.reconcile);
    }
    Ok(EXIT_SUCCESS)
}
