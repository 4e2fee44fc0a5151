//! The [`InstanceDirectory`] devlxd's resolution walk reads against.
//!
//! `find_container_for_pid` is synchronous (it's pure process-tree logic,
//! unit tested against an in-memory fake), but the instance catalogue
//! lives behind the async [`fleet_kv::Stash`] trait. This keeps a
//! copy-on-write cache refreshed on a timer, the same pattern used for the
//! cluster membership table and the secret ring, so the resolution walk
//! never blocks on a KV round-trip mid-lookup.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleet_api_types::instance::{Instance, InstanceType};
use fleet_devlxd::{InstanceDirectory, RunningInstance};
use fleet_kv::{SqliteStash, Stash};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Registered by whatever starts an instance's monitor process (out of this
/// daemon's scope: the actual container runtime supervisor), so the
/// directory knows which init PID to match during the namespace-walk
/// fallback.
#[derive(Clone, Default)]
pub struct LiveInstanceTable {
    inner: Arc<RwLock<Vec<RunningInstance>>>,
}

impl LiveInstanceTable {
    pub fn new() -> LiveInstanceTable {
        LiveInstanceTable::default()
    }

    pub fn register_running(&self, project: String, name: String, init_pid: i32) {
        let mut guard = self.inner.write();
        guard.retain(|r| !(r.project == project && r.name == name));
        guard.push(RunningInstance { project, name, init_pid });
    }

    pub fn unregister(&self, project: &str, name: &str) {
        self.inner.write().retain(|r| !(r.project == project && r.name == name));
    }

    fn snapshot(&self) -> Vec<RunningInstance> {
        self.inner
            .read()
            .iter()
            .map(|r| RunningInstance { project: r.project.clone(), name: r.name.clone(), init_pid: r.init_pid })
            .collect()
    }
}

pub struct CachedInstanceDirectory {
    types: RwLock<Arc<HashMap<(String, String), InstanceType>>>,
    live: LiveInstanceTable,
}

impl CachedInstanceDirectory {
    pub fn new(live: LiveInstanceTable) -> CachedInstanceDirectory {
        CachedInstanceDirectory {
            types: RwLock::new(Arc::new(HashMap::new())),
            live,
        }
    }

    /// Replaces the cached `(project, name) -> instance_type` map, called
    /// by a background refresh task reading the instance catalogue out of
    /// the stash.
    pub fn set_types(&self, types: HashMap<(String, String), InstanceType>) {
        *self.types.write() = Arc::new(types);
    }
}

impl InstanceDirectory for CachedInstanceDirectory {
    fn instance_type(&self, project: &str, name: &str) -> Option<InstanceType> {
        self.types.read().get(&(project.to_string(), name.to_string())).copied()
    }

    fn running_instances(&self) -> Vec<RunningInstance> {
        self.live.snapshot()
    }
}

/// Runs until `cancel` fires, periodically re-reading the instance
/// catalogue out of `stash` and publishing it into `directory`.
pub async fn run_refresh_loop(
    stash: Arc<SqliteStash>,
    directory: Arc<CachedInstanceDirectory>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match load_instance_types(&stash).await {
            Ok(types) => directory.set_types(types),
            Err(err) => tracing::warn!(error = %err, "failed to refresh devlxd instance directory"),
        }
    }
}

async fn load_instance_types(stash: &SqliteStash) -> anyhow::Result<HashMap<(String, String), InstanceType>> {
    let collection = stash
        .collection::<String, Instance>(crate::instance_store::INSTANCES_COLLECTION)
        .await?;
    let items = stash.with_txn(move |txn| txn.items(collection)).await?;
    Ok(items
        .into_values()
        .map(|instance| ((instance.project.clone(), instance.name.clone()), instance.instance_type))
        .collect())
}
