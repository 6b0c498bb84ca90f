mod cli;
mod handlers;

use anyhow::Result;
use chunkfetch::ConfigManager;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::PathBuf;
use std::process;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Validate CLI arguments first
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    // Logs go to stderr so progress bars on stdout stay readable
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config_manager = match &args.config {
        Some(path) => ConfigManager::with_path(PathBuf::from(path))?,
        None => ConfigManager::new()?,
    };

    if !args.skips_config_validation() {
        if let Err(e) = config_manager.validate() {
            eprintln!("Configuration validation failed: {}", e);
            eprintln!("Run 'chunkfetch config reset' to restore the defaults");
            process::exit(1);
        }
    }

    match args.command {
        Commands::Get {
            url,
            output_dir,
            name,
            parallelism,
            sha256,
            size,
        } => {
            let succeeded = handlers::handle_get(
                &config_manager,
                handlers::GetArgs {
                    url,
                    output_dir,
                    name,
                    parallelism,
                    sha256,
                    size,
                },
            )
            .await?;
            if !succeeded {
                process::exit(1);
            }
        }
        Commands::Probe { url } => {
            handlers::handle_probe(&config_manager, url).await?;
        }
        Commands::Clean { dir, dry_run, yes } => {
            handlers::handle_clean(&config_manager, dir, dry_run, yes).await?;
        }
        Commands::Config { action } => {
            handlers::handle_config(&mut config_manager, action).await?;
        }
    }

    Ok(())
}
