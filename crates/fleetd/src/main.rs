//! Entrypoint (spec §6): parses CLI args, loads config, opens the local
//! database, wires the daemon's subsystems, and serves the control-plane
//! HTTPS listener, the metrics listener, and the devlxd Unix socket until a
//! shutdown signal arrives.

mod auth;
mod certs;
mod cert_rotation_support;
mod cli;
mod config;
mod devlxd_directory;
mod devlxd_server;
mod enrolment_support;
mod handlers;
mod init_cli;
mod instance_store;
mod logging;
mod metrics;
mod router;
mod state;

use std::sync::Arc;

use clap::Parser;
use fleet_cluster::leader::StaticLeaderResolver;
use fleet_kv::SqliteStash;
use tokio::signal::unix::{signal, SignalKind};

use cli::{Args, Command};
use config::{Config, RuntimeDirs};
use devlxd_directory::{CachedInstanceDirectory, LiveInstanceTable};
use state::Daemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let args = Args::parse();
    let runtime_dir = args
        .runtime_dir
        .unwrap_or_else(|| std::path::PathBuf::from("/var/lib/fleetd"));
    let dirs = RuntimeDirs::new(runtime_dir);
    let config_path = args.config.unwrap_or_else(|| dirs.root.join("fleetd.toml"));

    if let Some(command @ Command::Init { .. }) = &args.command {
        return init_cli::run(&dirs, &config_path, command);
    }

    dirs.ensure_exists()?;
    let config = Config::load(Some(&config_path).filter(|p| p.exists()))?;
    let cert_fingerprint = certs::ensure_server_certificate(&dirs)?;

    let stash = SqliteStash::open(&dirs.local_database_path())?;

    // Real leader election lives in the replicated KV store (spec §2 treats
    // it as external); until this daemon is wired against one, every
    // member resolves itself as leader, which is correct for a
    // single-member deployment and the test/dev path.
    let leader = Arc::new(StaticLeaderResolver {
        is_leader: true,
        leader_address: config.https_listen_addr.to_string(),
    });

    let daemon = Daemon::new(config.clone(), dirs.clone(), stash, leader, cert_fingerprint)?;
    daemon.spawn_background_tasks();
    metrics::register_server_metadata(&daemon.build_info);

    let live_instances = LiveInstanceTable::new();
    let directory = Arc::new(CachedInstanceDirectory::new(live_instances));

    let refresh_cancel = daemon.shutdown.clone();
    let refresh_stash = daemon.stash.clone();
    let refresh_directory = directory.clone();
    fleet_ore::task::spawn(
        || "devlxd-directory-refresh",
        devlxd_directory::run_refresh_loop(refresh_stash, refresh_directory, refresh_cancel),
    );

    let devlxd_cancel = daemon.shutdown.clone();
    let devlxd_daemon = daemon.clone();
    let devlxd_directory = directory.clone();
    fleet_ore::task::spawn(
        || "devlxd-server",
        async move {
            if let Err(err) = devlxd_server::serve(devlxd_daemon, devlxd_directory, devlxd_cancel).await {
                tracing::error!(error = %err, "devlxd server exited");
            }
        },
    );

    let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
        dirs.server_cert_path(),
        dirs.server_key_path(),
    )
    .await?;

    let https_addr = config.https_listen_addr;
    let metrics_addr = config.metrics_listen_addr;
    let control_router = router::build(daemon.clone());
    let metrics_router = router::build_metrics();

    let https_task = tokio::spawn(async move {
        axum_server::bind_rustls(https_addr, tls_config)
            .serve(control_router.into_make_service())
            .await
            .map_err(anyhow::Error::from)
    });

    let metrics_shutdown = daemon.shutdown.clone();
    let metrics_task = tokio::spawn(async move {
        axum::Server::bind(&metrics_addr)
            .serve(metrics_router.into_make_service())
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await
            .map_err(anyhow::Error::from)
    });

    tracing::info!(
        https = %https_addr,
        metrics = %metrics_addr,
        member = %daemon.config.member_id,
        "fleetd started"
    );

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
        result = https_task => {
            result??;
        }
    }
    daemon.shutdown.cancel();
    metrics_task.await??;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}
