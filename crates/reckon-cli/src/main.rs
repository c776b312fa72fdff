mod cli;
mod commands;
mod logging;

use std::process::ExitCode;

use clap::Parser;

use reckon_core::ReckonConfig;

use crate::cli::{Cli, Command};
use crate::commands::{CliError, Outcome};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging("reckon_cli=info,reckon_core=info,warn");

    match run(cli).await {
        Ok(Outcome { output, code }) => {
            println!("{output:#}");
            ExitCode::from(code)
        }
        Err(err) => {
            eprintln!("{}", logging::format_error_report(&err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome, CliError> {
    let mut config = ReckonConfig::from_env()?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }
    if let Some(ms) = cli.busy_timeout_ms {
        config.busy_timeout = std::time::Duration::from_millis(ms);
    }

    match cli.command {
        Command::Lock(command) => commands::run_lock(&config, command).await,
        Command::Issues(command) => commands::run_issues(&config, command).await,
    }
}
