use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use trapseq_cli::commands::{import, prune, runs, segment, status};
use trapseq_cli::{Cli, Commands, Config};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(trapseq_db::Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = trapseq_db::Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // logs go to stderr so stdout stays parseable for `runs --json`
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (mut db, config) = open_database(cli.config.as_deref())?;
    let mut stdout = io::stdout().lock();
    match command {
        Commands::Import => import::run(io::stdin().lock(), &mut stdout, &mut db)?,
        Commands::Seasons => segment::run_seasons(&mut stdout, &mut db, &config)?,
        Commands::Sequences { rebuild } => {
            segment::run_sequences(&mut stdout, &mut db, &config, *rebuild)?;
        }
        Commands::Runs { kind, json } => runs::run(&mut stdout, &db, (*kind).into(), *json)?,
        Commands::Prune => prune::run(&mut stdout, &mut db, &config)?,
        Commands::Status => status::run(&mut stdout, &db, &config)?,
    }
    Ok(())
}
