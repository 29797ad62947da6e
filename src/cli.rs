//! Command-line interface for remountd
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// remountd - keeps remote filesystem mounts healthy
#[derive(Parser)]
#[command(name = "remountd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "remountd.toml")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Monitor all mounts and remount after sustained connection failure
    Supervise,

    /// Probe mounts once and show their status
    Status {
        /// Specific mount to check (shows all if not specified)
        mount: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remount a mount now
    Remount {
        /// Mount name
        mount: String,
    },

    /// Validate configuration
    Check,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion script
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "remountd", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["remountd", "-c", "/etc/remountd.toml", "status", "--json"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/remountd.toml"));
        assert!(matches!(
            cli.command,
            Commands::Status { mount: None, json: true }
        ));
    }

    #[test]
    fn test_parse_remount_requires_mount() {
        assert!(Cli::try_parse_from(["remountd", "remount"]).is_err());
        let cli = Cli::try_parse_from(["remountd", "-v", "remount", "projects"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Remount { ref mount } if mount == "projects"));
    }
}
