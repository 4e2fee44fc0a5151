//! Command-line parsing (spec §6 "CLI (bootstrap only)").
//!
//! The daemon itself has no subcommand: running `fleetd` with no arguments
//! starts the server. `init`/`init --auto`/`init --dump` are one-shot
//! bootstrap operations against an already-running (or about to run)
//! daemon's variable directory.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "fleetd", version, about = "Clustered container/VM manager daemon")]
pub struct Args {
    /// The runtime directory holding the per-member database, certificates,
    /// and storage-pool trees (spec §6 "Environment").
    #[clap(long, env = "FLEETD_DIR", value_name = "PATH")]
    pub runtime_dir: Option<PathBuf>,

    /// Path to the daemon's TOML configuration file.
    #[clap(long, env = "FLEETD_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bootstraps a fresh server: prompts for (or accepts defaults for)
    /// the storage backend, network, and trust-on-first-use settings.
    Init {
        /// Accept every default without prompting.
        #[clap(long)]
        auto: bool,
        /// Instead of bootstrapping, print the current server config,
        /// networks, storage pools, and profiles as YAML.
        #[clap(long)]
        dump: bool,
    },
}
