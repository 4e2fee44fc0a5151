//! The daemon's shared state (spec §9 "Global mutable state": explicit
//! dependency-injected handles constructed once in [`Daemon::new`] and
//! passed to every subsystem, never `static`).

use std::sync::Arc;

use fleet_auth::{EnrolmentSweep, SecretRing, SessionManager};
use fleet_build_info::BuildInfo;
use fleet_cluster::{CertRotationTask, Forwarder, LeaderResolver, MemberTable, Notifier};
use fleet_devlxd::CredentialedListener;
use fleet_kv::SqliteStash;
use fleet_operations::{EventBus, OperationsRegistry};
use fleet_ore::now::NowFn;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RuntimeDirs};

/// Everything a request handler or background task needs. Cheap to clone:
/// every field is itself reference-counted or `Copy`.
#[derive(Clone)]
pub struct Daemon {
    pub config: Config,
    pub dirs: RuntimeDirs,
    pub build_info: BuildInfo,
    pub now: NowFn,
    pub stash: Arc<SqliteStash>,
    pub operations: Arc<OperationsRegistry>,
    pub event_bus: EventBus,
    pub member_table: MemberTable,
    pub forwarder: Arc<Forwarder>,
    pub notifier: Arc<Notifier>,
    pub leader: Arc<dyn LeaderResolver>,
    pub secret_ring: SecretRing,
    pub session_manager: Arc<SessionManager>,
    pub devlxd_listener_root: std::path::PathBuf,
    pub shutdown: CancellationToken,
}

impl Daemon {
    pub fn new(
        config: Config,
        dirs: RuntimeDirs,
        stash: SqliteStash,
        leader: Arc<dyn LeaderResolver>,
        cert_fingerprint: String,
    ) -> anyhow::Result<Daemon> {
        let now = fleet_ore::now::system_time();
        let event_bus = EventBus::new();
        let operations = Arc::new(OperationsRegistry::new(event_bus.clone()));

        let member_table = MemberTable::new(config.member_id.clone());
        member_table.set_members(
            config
                .seed_members
                .iter()
                .enumerate()
                .map(|(i, address)| fleet_cluster::ClusterMember {
                    id: format!("seed-{i}"),
                    address: address.clone(),
                })
                .collect(),
        );
        let forwarder = Arc::new(Forwarder::new(None)?);
        let notifier = Arc::new(Notifier::new(member_table.clone(), forwarder.clone()));

        let secret_ring = SecretRing::new(Vec::new());
        let session_manager = Arc::new(SessionManager::new(secret_ring.clone(), now.clone(), cert_fingerprint));

        Ok(Daemon {
            config,
            devlxd_listener_root: dirs.devlxd_sockets_dir(),
            dirs,
            build_info: fleet_build_info::build_info!(),
            now,
            stash: Arc::new(stash),
            operations,
            event_bus,
            member_table,
            forwarder,
            notifier,
            leader,
            secret_ring,
            session_manager,
            shutdown: CancellationToken::new(),
        })
    }

    /// Spawns the daemon's background tasks (certificate rotation and the
    /// pending-identity sweep). Returns immediately; the tasks run until
    /// `self.shutdown` fires.
    pub fn spawn_background_tasks(&self) {
        let cancel = self.shutdown.clone();
        let rotation = CertRotationTask::new(
            self.leader.clone(),
            crate::cert_rotation_support::NoopAcmeRenewer,
            crate::cert_rotation_support::FilesystemCertificateInstaller::new(self.dirs.clone()),
            self.notifier.clone(),
            self.forwarder.clone(),
            std::time::Duration::from_secs(24 * 60 * 60),
        );
        fleet_ore::task::spawn(
            || "cert-rotation",
            async move { rotation.run(cancel).await },
        );

        let sweep = EnrolmentSweep::new(
            crate::enrolment_support::StashPendingIdentityStore::new(self.stash.clone()),
            crate::enrolment_support::ClusterLeaderCheck::new(self.leader.clone()),
            crate::enrolment_support::RegistryOperationCanceller::new(self.operations.clone()),
            self.now.clone(),
        );
        let cancel = self.shutdown.clone();
        fleet_ore::task::spawn(|| "enrolment-sweep", async move { sweep.run(cancel).await });
    }
}
