mod aggregate;
mod category;
mod cli;
mod commands;
mod compare;
mod evaluate;
mod loader;
mod model;
mod report;
mod taxonomy;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

const GATE_FAILURE_EXIT: i32 = 2;

fn main() {
    init_tracing();

    match run() {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!(error = %err, "command failed");
            for cause in err.chain().skip(1) {
                error!(cause = %cause, "caused by");
            }
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Compare(args) => {
            let enforce_gate = args.enforce_gate;
            let ready = commands::compare::run(args)?;
            Ok(if enforce_gate && !ready {
                GATE_FAILURE_EXIT
            } else {
                0
            })
        }
        Commands::Taxonomy(args) => commands::taxonomy::run(args).map(|()| 0),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
