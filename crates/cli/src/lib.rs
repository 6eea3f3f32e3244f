pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "cloudpilot",
    about = "CloudPilot operator CLI",
    long_about = "Resolve natural-language cloud requests, inspect the operation catalog, \
                  and review effective configuration.",
    after_help = "Examples:\n  cloudpilot query \"show my running instances\"\n  cloudpilot capabilities --json\n  cloudpilot config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Resolve one natural-language request and execute it against the enabled clouds"
    )]
    Query {
        #[arg(help = "The request, e.g. \"list running instances\"")]
        text: String,
        #[arg(long, help = "Session id for follow-up context; defaults to a one-off session")]
        session: Option<String>,
    },
    #[command(about = "List the supported operations per provider")]
    Capabilities {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Query { text, session } => commands::query::run(&text, session.as_deref()),
        Command::Capabilities { json } => {
            commands::CommandResult { exit_code: 0, output: commands::capabilities::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
