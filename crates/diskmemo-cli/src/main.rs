//! `diskmemo`: inspect and maintain diskmemo cache roots

mod cli;
mod commands;
mod tracing;

use crate::commands::Command;
use crate::tracing::{TracingConfig, TracingFormat};

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:?}");
        std::process::exit(1);
    }
}

fn run() -> miette::Result<()> {
    let cli = cli::parse();

    let tracing_config = TracingConfig {
        format: if cli.json {
            TracingFormat::Json
        } else {
            TracingFormat::Compact
        },
        level: cli.level.into(),
        ..Default::default()
    };
    crate::tracing::init_tracing(tracing_config)?;

    let config = cli.cache_config()?;
    let command: Command = cli.command.into();
    let output = commands::execute(&command, &cli.name, &config, cli.format)?;

    #[allow(clippy::print_stdout)]
    {
        println!("{output}");
    }
    Ok(())
}
