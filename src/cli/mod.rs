//! CLI commands for Plume.
//!
//! Manages installed extensions and inspects libraries the way the editor
//! host sees them, against a headless workspace.

pub mod install;
pub mod library;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::HostConfig;

#[derive(Parser)]
#[command(name = "plume")]
#[command(about = "Plugin host for the Plume markdown editor", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Host config file (default: <config_dir>/plume/host.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List installed extensions
    List,

    /// Install an extension from a local directory
    Install {
        /// Directory containing manifest.json
        dir: PathBuf,
    },

    /// Remove an installed extension
    Uninstall {
        /// Extension id
        id: String,
    },

    /// Activate installed extensions headlessly and report what they register
    Check {
        /// Library root to open while activating
        #[arg(long)]
        library: Option<String>,

        /// Only these extensions (default: all installed)
        ids: Vec<String>,
    },

    /// Print the stable key of a library root
    Hash {
        root: String,
    },

    /// List the files the host would show for a library
    Files {
        root: String,

        /// Allowed extensions, comma separated (empty allows all)
        #[arg(long, value_delimiter = ',')]
        ext: Option<Vec<String>>,

        #[arg(long)]
        max_depth: Option<usize>,

        /// Only descend into these root-relative directories
        #[arg(long = "include", value_name = "DIR")]
        include_dirs: Vec<String>,

        /// Skip these root-relative directories
        #[arg(long = "exclude", value_name = "DIR")]
        exclude_dirs: Vec<String>,
    },

    /// Print (and create) an extension's data directory for a library
    DataDir {
        id: String,
        root: String,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<HostConfig> {
    match path {
        Some(path) => Ok(HostConfig::load_from(path)?),
        None => Ok(HostConfig::load()),
    }
}

/// Parse arguments and run the selected command.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::List => install::run_list(config),
        Commands::Install { dir } => install::run_install(config, &dir),
        Commands::Uninstall { id } => install::run_uninstall(config, &id),
        Commands::Check { library, ids } => install::run_check(config, library, &ids),
        Commands::Hash { root } => {
            library::run_hash(&config, &root);
            Ok(())
        }
        Commands::Files {
            root,
            ext,
            max_depth,
            include_dirs,
            exclude_dirs,
        } => library::run_files(
            &config,
            &root,
            crate::extensions::ListOptions {
                extensions: ext,
                max_depth,
                include_dirs,
                exclude_dirs,
            },
        ),
        Commands::DataDir { id, root } => library::run_data_dir(&config, &id, &root),
    }
}
