//! `fleetd init` / `init --auto` / `init --dump` (spec §6 "CLI (bootstrap
//! only)"). A one-shot companion to the daemon rather than a subsystem of
//! it: it writes the same `Config` TOML and runtime-directory layout the
//! daemon itself reads, then exits.

use std::io::{self, BufRead, Write};
use std::path::Path;

use fleet_api_types::profile::Profile;
use fleet_kv::{SqliteStash, Stash};
use serde::Serialize;

use crate::cli::Command;
use crate::config::{Config, RuntimeDirs};
use crate::instance_store::PROFILES_COLLECTION;

/// Runs `init`, writing a default or prompted-for config to `dirs`, then
/// exits the process (the caller should not start the daemon afterward in
/// the same invocation, matching `lxd init`'s one-shot behavior).
pub fn run(dirs: &RuntimeDirs, config_path: &Path, command: &Command) -> anyhow::Result<()> {
    let Command::Init { auto, dump } = command;

    if *dump {
        return dump_config(dirs, config_path);
    }

    dirs.ensure_exists()?;
    let config = if *auto {
        Config::default()
    } else {
        prompt_for_config()?
    };
    let rendered = toml::to_string_pretty(&config)?;
    std::fs::write(config_path, rendered)?;
    println!("wrote {}", config_path.display());
    Ok(())
}

fn prompt_for_config() -> anyhow::Result<Config> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut config = Config::default();

    print!("member id [{}]: ", config.member_id);
    io::stdout().flush()?;
    if let Some(Ok(line)) = lines.next() {
        let line = line.trim();
        if !line.is_empty() {
            config.member_id = line.to_string();
        }
    }

    print!("HTTPS listen address [{}]: ", config.https_listen_addr);
    io::stdout().flush()?;
    if let Some(Ok(line)) = lines.next() {
        let line = line.trim();
        if !line.is_empty() {
            config.https_listen_addr = line.parse()?;
        }
    }

    Ok(config)
}

#[derive(Serialize)]
struct DumpDocument {
    config: Config,
    /// This daemon has no persisted network catalogue yet (spec §2 scopes
    /// network management as an external collaborator); always empty.
    networks: Vec<serde_json::Value>,
    /// Likewise: storage pools are resolved from an explicit request at
    /// recovery/creation time, not catalogued in the local database.
    storage_pools: Vec<serde_json::Value>,
    profiles: Vec<Profile>,
}

fn dump_config(dirs: &RuntimeDirs, config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(Some(config_path).filter(|p| p.exists()))?;
    let profiles = load_profiles(dirs)?;
    let document = DumpDocument {
        config,
        networks: Vec::new(),
        storage_pools: Vec::new(),
        profiles,
    };
    print!("{}", serde_yaml::to_string(&document)?);
    Ok(())
}

fn load_profiles(dirs: &RuntimeDirs) -> anyhow::Result<Vec<Profile>> {
    let db_path = dirs.local_database_path();
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let stash = SqliteStash::open(&db_path)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let collection = stash.collection::<String, Profile>(PROFILES_COLLECTION).await?;
        let items = stash.with_txn(move |txn| txn.items(collection)).await?;
        Ok::<_, anyhow::Error>(items.into_values().collect())
    })
}
