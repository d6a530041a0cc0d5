//! AirStore CLI Module
//! Command-line interface for operating configured stores

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod formatter;

#[derive(Parser, Debug)]
#[command(name = "airstore")]
#[command(author = "AirDB Team")]
#[command(version)]
#[command(about = "Operate AirStore record stores and migrations", long_about = None)]
pub struct Cli {
    /// Project directory holding airstore.config.json (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

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
    /// Write a default airstore.config.json
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Backfill the target of a migration store
    Migrate {
        /// Name of a store of type "migration"
        store: String,
    },

    /// Show record count of a store
    Stats {
        /// Store name
        store: String,
    },

    /// Print one record
    Get {
        /// Store name
        store: String,

        /// Record uuid
        uuid: String,
    },
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
