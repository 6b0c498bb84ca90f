use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chunkfetch")]
#[command(about = "Resumable, parallel-chunk HTTP downloader")]
#[command(long_about = "
chunkfetch downloads a file over HTTP(S), splitting it into byte ranges that are
fetched concurrently when the server supports it. Interrupted downloads resume
from what is already on disk.

Examples:
  chunkfetch get https://example.com/file.iso          # Download with defaults
  chunkfetch get https://example.com/file.iso -j 8 -o ~/Downloads
  chunkfetch probe https://example.com/file.iso        # Show size and range support
  chunkfetch clean ~/Downloads --dry-run               # List abandoned partial files
")]
#[command(version)]
pub struct Cli {
    /// Override config file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a file
    #[command(visible_alias = "dl")]
    Get {
        /// URL of the file to download
        url: String,

        /// Download directory override
        #[arg(short, long, value_name = "DIR")]
        #[arg(help = "Download into a specific directory")]
        output_dir: Option<String>,

        /// Output file name
        #[arg(short = 'n', long, value_name = "NAME")]
        #[arg(help = "File name (defaults to the last URL path segment)")]
        name: Option<String>,

        /// Number of concurrent chunk fetchers
        #[arg(short = 'j', long, value_name = "N")]
        #[arg(help = "Concurrent chunk fetchers (defaults to the configured value)")]
        parallelism: Option<usize>,

        /// Expected SHA-256 of the finished file
        #[arg(long, value_name = "HEX")]
        #[arg(help = "Verify the finished file against this SHA-256 digest")]
        sha256: Option<String>,

        /// Known file size in bytes
        #[arg(long, value_name = "BYTES")]
        #[arg(help = "Known size; an already complete file is detected without a request")]
        size: Option<u64>,
    },

    /// Show what the server reports about a file
    Probe {
        /// URL to probe
        url: String,
    },

    /// Remove abandoned partial downloads
    #[command(visible_alias = "cleanup")]
    Clean {
        /// Directory to scan (defaults to the configured output directory)
        dir: Option<String>,

        /// Dry run - show what would be deleted without deleting
        #[arg(short, long)]
        #[arg(help = "Show what would be deleted without actually deleting")]
        dry_run: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        #[arg(help = "Skip confirmation prompt")]
        yes: bool,
    },

    /// Manage configuration
    #[command(visible_alias = "cfg")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the config file location
    Path,

    /// Validate configuration
    #[command(visible_alias = "check")]
    Validate,

    /// Reset configuration to defaults
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        #[arg(help = "Skip confirmation prompt")]
        yes: bool,
    },
}

impl Cli {
    /// Validate CLI arguments and show helpful error messages
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Commands::Get {
                url,
                parallelism,
                sha256,
                ..
            } => {
                if reqwest::Url::parse(url).is_err() {
                    return Err(format!("Invalid URL: {}", url));
                }
                if let Some(n) = parallelism {
                    if *n == 0 || *n > 32 {
                        return Err("Parallelism must be between 1 and 32".to_string());
                    }
                }
                if let Some(digest) = sha256 {
                    if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                        return Err("SHA-256 digest must be 64 hex characters".to_string());
                    }
                }
            }
            Commands::Probe { url } => {
                if reqwest::Url::parse(url).is_err() {
                    return Err(format!("Invalid URL: {}", url));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Check if config validation should be skipped for this command
    pub fn skips_config_validation(&self) -> bool {
        matches!(
            self.command,
            Commands::Config {
                action: ConfigAction::Reset { .. } | ConfigAction::Path | ConfigAction::Validate
            }
        )
    }
}
