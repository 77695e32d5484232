//! capsa - capsule packager.
//!
//! Collects source files from a project tree according to a declarative
//! configuration document, compacts and substitutes script sources,
//! synthesizes a bootstrap stub, and assembles everything into a single
//! optionally compressed, optionally signed capsule file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use capsa::commands;

#[derive(Parser)]
#[command(name = "capsa")]
#[command(about = "Package a project tree into a single capsule file")]
#[command(
    after_help = "QUICK START:\n  capsa validate   Check capsa.json\n  capsa build      Build the capsule\n  capsa info       Inspect a built capsule"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the capsule from the configuration document
    Build {
        /// Configuration document (default: capsa.json, capsa.dist.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Add or replace a single entry in an existing capsule
    Add {
        /// Capsule file to edit
        capsule: PathBuf,
        /// File whose contents to add
        file: PathBuf,
        /// Relative path of the entry inside the capsule
        path: String,
        /// Overwrite an existing entry with the same path
        #[arg(long)]
        replace: bool,
    },

    /// Remove an entry from an existing capsule
    Remove {
        /// Capsule file to edit
        capsule: PathBuf,
        /// Relative path of the entry to remove
        path: String,
    },

    /// Extract capsule entries into a directory
    Extract {
        /// Capsule file to read
        capsule: PathBuf,
        /// Output directory (default: capsule-contents)
        #[arg(short, long, default_value = "capsule-contents")]
        dir: PathBuf,
    },

    /// Validate the configuration document
    Validate {
        /// Configuration document (default: capsa.json, capsa.dist.json)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Verify capsule checksum and signature
    Verify {
        /// Capsule file to check
        capsule: PathBuf,
    },

    /// Show capsule metadata and contents
    Info {
        /// Capsule file to inspect
        capsule: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { config } => commands::cmd_build(config.as_deref())?,
        Commands::Add {
            capsule,
            file,
            path,
            replace,
        } => commands::cmd_add(&capsule, &file, &path, replace)?,
        Commands::Remove { capsule, path } => commands::cmd_remove(&capsule, &path)?,
        Commands::Extract { capsule, dir } => commands::cmd_extract(&capsule, &dir)?,
        Commands::Validate { config } => commands::cmd_validate(config.as_deref())?,
        Commands::Verify { capsule } => commands::cmd_verify(&capsule)?,
        Commands::Info { capsule } => commands::cmd_info(&capsule)?,
    }

    Ok(())
}
