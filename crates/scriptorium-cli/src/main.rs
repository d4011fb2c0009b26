//! Scriptorium CLI - audit, version and rebalance a knowledge corpus.

use clap::Parser;
use scriptorium_cli::{commands, Cli, Config, Corpus, Formatter, Outcome};
use tracing_subscriber::EnvFilter;

/// Exit code for anything that stopped a command from running
const FAILURE_EXIT: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Log to stderr so stdout stays clean for tables and JSON
    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match run(cli).await {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(FAILURE_EXIT);
        }
    }
}

async fn run(cli: Cli) -> scriptorium_cli::Result<Outcome> {
    let config = Config::load(cli.config.as_deref(), &cli.root)?;

    let format = cli.format.map(Into::into).unwrap_or(config.settings.format);
    let color_enabled = !cli.no_color && config.settings.color;
    let formatter = Formatter::new(format, color_enabled);

    let corpus = Corpus::open(&cli.root, config)?;
    commands::execute(cli.command, &corpus, &formatter).await
}
