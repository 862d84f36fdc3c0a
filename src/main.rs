// src/main.rs

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.global.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let Some(command) = cli.command else {
        println!("llamapkg: no command given. Run 'llamapkg --help' for usage.");
        return Ok(());
    };

    let global = &cli.global;
    let open = || commands::open_manager(global);
    match command {
        Commands::Install { packages, dry_run } => {
            commands::cmd_install(&open()?, &packages, dry_run)
        }
        Commands::Remove { packages, dry_run } => {
            commands::cmd_remove(&open()?, &packages, dry_run)
        }
        Commands::Update {
            package,
            to,
            dry_run,
        } => commands::cmd_update(&open()?, package, to, dry_run),
        Commands::List { roots } => commands::cmd_list(&open()?, roots),
        Commands::Why { package } => commands::cmd_why(&open()?, &package),
        Commands::Resolve { packages } => commands::cmd_resolve(&open()?, &packages),
        Commands::Search { query } => commands::cmd_search(&open()?, &query),
        Commands::Publish { artifact, manifest } => {
            commands::cmd_publish(&open()?, &artifact, &manifest)
        }
        Commands::Recover => commands::cmd_recover(&open()?),
        Commands::Verify => commands::cmd_verify(&open()?),
        Commands::Config => commands::cmd_config(&commands::load_config(global)?),
    }
}
