use super::{host_names, json_pretty, print_reconcile, Globals, EXIT_SUCCESS};

pub fn run(globals: &Globals, hosts: &[String]) -> Result<u8, String> {
    let deployer = globals.deployer()?;
    let report = deployer
        .gather_keys(&host_names(hosts))
        .map_err(|e| e.to_string())?;

    if globals.json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("keys gathered from {}:", report.source);
        print_reconcile(&report.reconcile);
    }
    Ok(EXIT_SUCCESS)
}
