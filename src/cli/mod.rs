//! CLI module for Careguard
//!
//! Provides commands:
//! - `check`: Load and validate configuration, build the toolkit, report health
//! - `config`: Print the effective configuration

use clap::{Parser, Subcommand};

pub mod check;
pub mod config;

/// Careguard resilience toolkit CLI
#[derive(Parser, Debug)]
#[command(name = "careguard")]
#[command(about = "Resilience and concurrency guard layer for the care assistant backend")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate configuration and print a snapshot of every component
    Check {
        /// Print the snapshot as JSON only
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Show the embedded defaults instead of the merged configuration
        #[arg(long)]
        defaults: bool,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Check { json }) => check::run(json).await,
        Some(Commands::Config { defaults }) => config::run(defaults),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["careguard", "check", "--json"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check { json: true })));

        let cli = Cli::try_parse_from(["careguard", "config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config { defaults: false })));

        let cli = Cli::try_parse_from(["careguard"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["careguard", "serve"]).is_err());
    }
}
