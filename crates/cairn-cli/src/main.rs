mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, Globals, EXIT_FAILURE};
use cairn_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cairn",
    version,
    about = "Bootstrap storage-cluster monitors into quorum and gather their keys"
)]
struct Cli {
    /// Working directory holding cairn.toml and the cluster keyrings.
    #[arg(long, default_value = ".", global = true)]
    workdir: PathBuf,

    /// Cluster name (overrides cairn.toml).
    #[arg(long, global = true)]
    cluster: Option<String>,

    /// Remote login user (overrides cairn.toml).
    #[arg(long, global = true)]
    username: Option<String>,

    /// Replace a remote cluster config that differs from the local one.
    #[arg(long, default_value_t = false, global = true)]
    overwrite_conf: bool,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    /// Only log warnings and errors.
    #[arg(short, long, default_value_t = false, global = true, conflicts_with_all = ["verbose", "trace"])]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Deploy and inspect monitors.
    Mon {
        #[command(subcommand)]
        action: MonCommand,
    },
    /// Gather the admin and bootstrap keyrings from the first usable monitor.
    Gatherkeys {
        /// Candidate monitor hosts, tried in order.
        #[arg(required = true)]
        hosts: Vec<String>,
    },
    /// Check local prerequisites and the working directory.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
enum MonCommand {
    /// Bootstrap monitors without waiting for quorum.
    Create {
        /// Hosts to deploy to; defaults to mon_initial_members.
        hosts: Vec<String>,
    },
    /// Bootstrap the initial monitors, wait for quorum, then gather keys.
    CreateInitial,
    /// Show the status each monitor reports about itself.
    Status {
        #[arg(required = true)]
        hosts: Vec<String>,
    },
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("CAIRN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();
    init_logging(&cli);
    install_signal_handler();

    let globals = Globals {
        workdir: cli.workdir.clone(),
        cluster: cli.cluster.clone(),
        username: cli.username.clone(),
        overwrite_conf: cli.overwrite_conf,
        json: cli.json,
    };
    tracing::debug!(
        "cairn {} in {}",
        env!("CARGO_PKG_VERSION"),
        globals.workdir.display()
    );

    let needs_ssh = !matches!(cli.command, Commands::Doctor | Commands::Completions { .. });
    if needs_ssh && std::env::var("CAIRN_SKIP_PREREQS").as_deref() != Ok("1") {
        let missing = cairn_runtime::check_local_prereqs();
        if !missing.is_empty() {
            eprintln!("error: {}", cairn_runtime::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let result = match cli.command {
        Commands::Mon { action } => match action {
            MonCommand::Create { hosts } => commands::mon_create::run(&globals, &hosts),
            MonCommand::CreateInitial => commands::create_initial::run(&globals),
            MonCommand::Status { hosts } => commands::mon_status::run(&globals, &hosts),
        },
        Commands::Gatherkeys { hosts } => commands::gatherkeys::run(&globals, &hosts),
        Commands::Doctor => {
            commands::doctor::run(&globals.workdir, globals.cluster.as_deref(), globals.json)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
