//! Runtime Updater CLI Module
//! Command-line interface for inspecting and updating the runtime

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "runtime-updater")]
#[command(version)]
#[command(about = "Download, verify and install the shared runtime", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./updater.config.json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show installed runtime status
    Status,

    /// Run a background update attempt
    Update {
        /// Download from this URL instead of the configured one
        #[arg(long)]
        url: Option<String>,

        /// Remove leftover artifacts before starting
        #[arg(long)]
        clean: bool,
    },

    /// Check an artifact against the trusted signers
    Verify {
        /// Artifact path
        artifact: PathBuf,
    },

    /// Extract an artifact into the runtime directory
    Install {
        /// Artifact path
        artifact: PathBuf,

        /// Destination (defaults to the runtime directory)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// Build a signed artifact
    Pack {
        /// Output artifact path
        #[arg(short, long)]
        output: PathBuf,

        /// File holding a hex-encoded ed25519 secret key
        #[arg(short, long)]
        key: PathBuf,

        /// Files to include (stored under their file names)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn json_output(&self) -> bool {
        self.format == OutputFormat::Json
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_with_url() {
        let cli = Cli::parse_from([
            "runtime-updater",
            "--format",
            "json",
            "update",
            "--url",
            "http://mirror/runtime.pkg",
        ]);
        assert!(cli.json_output());
        match cli.command {
            Commands::Update { url, clean } => {
                assert_eq!(url.as_deref(), Some("http://mirror/runtime.pkg"));
                assert!(!clean);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_pack_requires_files() {
        let result = Cli::try_parse_from(["runtime-updater", "pack", "-o", "a.pkg", "-k", "key"]);
        assert!(result.is_err());
    }
}
