//! Mode branching and the import pass (spec §4.4 "Mode branching").
//!
//! *Validate-only*, or any dependency error, returns the scan results with
//! no DB writes. *Import* commits pools, then imports custom volumes,
//! buckets, and instances (in that order), pushing a reverter action at
//! every step so the whole operation is all-or-nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use fleet_api_types::instance::{IdMap, Instance, InstanceType};
use fleet_api_types::storage::{
    PoolStatus, StoragePool, StorageVolume, UnknownVolume, UnknownVolumeKind, VolumeContentType,
};
use fleet_kv::Stash;
use serde::Serialize;
use tracing::info;

use crate::dependency::{validate_instance_dependencies, DependencyChecker, DependencyError};
use crate::reverter::Reverter;
use crate::scan::PoolHandle;

/// Where recovered pool rows land, keyed by pool name.
pub const STORAGE_POOLS_COLLECTION: &str = "storage_pools";
/// Where recovered custom-volume and bucket rows land, keyed by
/// `"{pool}/{project}/{name}"`.
pub const STORAGE_VOLUMES_COLLECTION: &str = "storage_volumes";
/// Where recovered instance rows land. Uses the same collection name and
/// `"{project}/{name}"` key format as `fleetd::instance_store`, so an
/// instance imported here is immediately visible through that store.
pub const INSTANCES_COLLECTION: &str = "instances";

fn instance_key(project: &str, name: &str) -> String {
    format!("{project}/{name}")
}

fn volume_key(pool: &str, project: &str, name: &str) -> String {
    format!("{pool}/{project}/{name}")
}

/// What a validate-only (or failed-validation) recovery request returns.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub unknown_volumes: Vec<UnknownVolume>,
    pub dependency_errors: Vec<DependencyError>,
}

/// Whether the caller asked to commit the recovery or only inspect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    ValidateOnly,
    Import,
}

/// Looks up a project's profiles, to decide which unknown volumes carry
/// instance-shaped metadata worth dependency-checking.
pub struct RecoveryRequest<'a, S: Stash> {
    pub pools: &'a [PoolHandle],
    pub volumes: Vec<UnknownVolume>,
    pub checker: &'a dyn DependencyChecker,
    pub stash: Arc<S>,
}

/// Runs dependency validation over every instance-bearing candidate,
/// producing the deduplicated error list (spec §4.4 "Dependency
/// validation").
pub fn validate<S: Stash>(request: &RecoveryRequest<'_, S>) -> BTreeSet<DependencyError> {
    let mut errors = BTreeSet::new();
    for volume in &request.volumes {
        if volume.kind != UnknownVolumeKind::Instance {
            continue;
        }
        // Unknown-volume candidates for instances carry their profile list
        // (and device set, for network validation) inside `captured_config`
        // under the well-known `profiles`/`devices` keys; a candidate with
        // neither key is filesystem-only and can't be dependency-checked
        // yet, so it is skipped until a richer config supersedes it.
        let Some(profiles) = volume.captured_config.config.get("profiles") else { continue };
        let profiles: Vec<String> = profiles.split(',').filter(|s| !s.is_empty()).map(String::from).collect();
        errors.extend(validate_instance_dependencies(
            request.checker,
            &volume.project,
            &volume.name,
            &profiles,
            &Default::default(),
        ));
    }
    errors
}

/// Runs the requested mode. Returns `Ok(None)` when the import committed;
/// `Ok(Some(report))` for validate-only or a failed validation.
pub async fn run<S: Stash + 'static>(
    request: RecoveryRequest<'_, S>,
    mode: RecoveryMode,
) -> anyhow::Result<Option<ValidationReport>> {
    let dependency_errors: Vec<DependencyError> = validate(&request).into_iter().collect();

    if mode == RecoveryMode::ValidateOnly || !dependency_errors.is_empty() {
        return Ok(Some(ValidationReport {
            unknown_volumes: request.volumes,
            dependency_errors,
        }));
    }

    let mut reverter = Reverter::new();
    match import(request.pools, &request.volumes, &request.stash, &mut reverter).await {
        Ok(()) => {
            reverter.commit();
            Ok(None)
        }
        Err(err) => {
            reverter.unwind().await;
            Err(err)
        }
    }
}

async fn import<S: Stash + 'static>(
    pools: &[PoolHandle],
    volumes: &[UnknownVolume],
    stash: &Arc<S>,
    reverter: &mut Reverter,
) -> anyhow::Result<()> {
    commit_temporary_pools(pools, volumes, stash, reverter).await?;

    let mut ordered: Vec<&UnknownVolume> = volumes.iter().collect();
    ordered.sort_by_key(|v| import_order(v.kind));

    for volume in ordered {
        import_volume(pools, volume, stash, reverter).await?;
    }
    Ok(())
}

fn import_order(kind: UnknownVolumeKind) -> u8 {
    match kind {
        UnknownVolumeKind::Custom => 0,
        UnknownVolumeKind::Bucket => 1,
        UnknownVolumeKind::Instance => 2,
    }
}

/// For every pool whose row is still temporary, creates its DB row from
/// the richest available config: an unknown instance volume's captured
/// pool-config snapshot if one exists, otherwise the user-supplied config
/// (spec §4.4: "find any unknown instance volume that carries a
/// pool-config snapshot and use it to create the DB row; failing that, use
/// the user-supplied config").
async fn commit_temporary_pools<S: Stash + 'static>(
    pools: &[PoolHandle],
    volumes: &[UnknownVolume],
    stash: &Arc<S>,
    reverter: &mut Reverter,
) -> anyhow::Result<()> {
    let collection = stash.collection::<String, StoragePool>(STORAGE_POOLS_COLLECTION).await?;

    for pool in pools {
        if !pool.row.is_temporary() {
            continue;
        }

        let mut row = pool.row.clone();
        if let Some(captured) = volumes
            .iter()
            .filter(|v| v.originating_pool == pool.row.name && v.kind == UnknownVolumeKind::Instance)
            .map(|v| &v.captured_config)
            .max_by_key(|c| c.last_modified)
        {
            row.config.extend(captured.config.clone());
        }
        row.status = PoolStatus::Created;

        info!(pool = %row.name, "creating database row for recovered pool");
        let key = row.name.clone();
        let write_row = row.clone();
        stash.with_txn(move |txn| txn.put(collection, key, write_row)).await?;

        let revert_stash = stash.clone();
        let revert_key = row.name.clone();
        reverter.push(move || async move {
            if let Err(err) = revert_stash.with_txn(move |txn| txn.delete(collection, &revert_key)).await {
                tracing::warn!(error = %err, "failed to revert recovered pool row");
            }
        });
    }
    Ok(())
}

async fn import_volume<S: Stash + 'static>(
    pools: &[PoolHandle],
    volume: &UnknownVolume,
    stash: &Arc<S>,
    reverter: &mut Reverter,
) -> anyhow::Result<()> {
    let pool = pools
        .iter()
        .find(|p| p.row.name == volume.originating_pool)
        .ok_or_else(|| anyhow::anyhow!("unknown originating pool {}", volume.originating_pool))?;

    match volume.kind {
        UnknownVolumeKind::Custom => {
            pool.driver.import_custom_volume(&volume.project, &volume.name, &volume.captured_config).await?;
            put_storage_volume(stash, reverter, volume).await?;
        }
        UnknownVolumeKind::Bucket => {
            pool.driver.import_bucket(&volume.project, &volume.name, &volume.captured_config).await?;
            put_storage_volume(stash, reverter, volume).await?;
        }
        UnknownVolumeKind::Instance => {
            pool.driver.import_instance(&volume.project, &volume.name, &volume.captured_config).await?;
            put_instance(stash, reverter, volume).await?;
            pool.driver.set_instance_quota(&volume.project, &volume.name, &volume.captured_config).await?;
        }
    }

    pool.driver.ensure_volume_mount_path(&volume.project, &volume.name).await?;
    Ok(())
}

async fn put_storage_volume<S: Stash + 'static>(
    stash: &Arc<S>,
    reverter: &mut Reverter,
    volume: &UnknownVolume,
) -> anyhow::Result<()> {
    let collection = stash.collection::<String, StorageVolume>(STORAGE_VOLUMES_COLLECTION).await?;
    let key = volume_key(&volume.originating_pool, &volume.project, &volume.name);
    let row = StorageVolume {
        pool: volume.originating_pool.clone(),
        project: volume.project.clone(),
        name: volume.name.clone(),
        content_type: VolumeContentType::Filesystem,
        config: volume.captured_config.config.clone(),
    };

    let write_key = key.clone();
    stash.with_txn(move |txn| txn.put(collection, write_key, row)).await?;

    let revert_stash = stash.clone();
    let revert_key = key;
    reverter.push(move || async move {
        if let Err(err) = revert_stash.with_txn(move |txn| txn.delete(collection, &revert_key)).await {
            tracing::warn!(error = %err, "failed to revert imported storage volume");
        }
    });
    Ok(())
}

/// Creates the instance row a recovered instance volume represents. The
/// volume's captured config carries the merged `profiles` list under a
/// well-known key (see [`validate`]); everything else lands in local
/// config untouched, so a later profile-expansion read degrades gracefully
/// if those profiles don't exist yet (spec §4.4 dependency validation runs
/// first and would already have rejected this candidate otherwise).
async fn put_instance<S: Stash + 'static>(
    stash: &Arc<S>,
    reverter: &mut Reverter,
    volume: &UnknownVolume,
) -> anyhow::Result<()> {
    let collection = stash.collection::<String, Instance>(INSTANCES_COLLECTION).await?;
    let key = instance_key(&volume.project, &volume.name);

    let mut local_config: BTreeMap<String, String> = volume.captured_config.config.clone();
    let profiles = local_config
        .remove("profiles")
        .map(|p| p.split(',').filter(|s| !s.is_empty()).map(String::from).collect())
        .unwrap_or_default();

    let instance = Instance {
        id: 0,
        project: volume.project.clone(),
        name: volume.name.clone(),
        instance_type: InstanceType::Container,
        description: String::new(),
        local_config,
        profiles,
        local_devices: BTreeMap::new(),
        root_id_map: IdMap::default(),
    };

    let write_key = key.clone();
    stash.with_txn(move |txn| txn.put(collection, write_key, instance)).await?;

    let revert_stash = stash.clone();
    let revert_key = key;
    reverter.push(move || async move {
        if let Err(err) = revert_stash.with_txn(move |txn| txn.delete(collection, &revert_key)).await {
            tracing::warn!(error = %err, "failed to revert imported instance");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api_types::storage::CapturedConfig;
    use fleet_kv::MemoryStash;
    use std::collections::BTreeMap;

    struct AllowAllChecker;
    impl DependencyChecker for AllowAllChecker {
        fn project_exists(&self, _project: &str) -> bool {
            true
        }
        fn profile_exists(&self, _project: &str, _profile: &str) -> bool {
            true
        }
        fn network_exists(&self, _project: &str, _network: &str) -> bool {
            true
        }
    }

    struct RejectAllChecker;
    impl DependencyChecker for RejectAllChecker {
        fn project_exists(&self, _project: &str) -> bool {
            false
        }
        fn profile_exists(&self, _project: &str, _profile: &str) -> bool {
            false
        }
        fn network_exists(&self, _project: &str, _network: &str) -> bool {
            false
        }
    }

    fn instance_volume(profiles: &str) -> UnknownVolume {
        UnknownVolume {
            originating_pool: "pool1".into(),
            project: "proj".into(),
            kind: UnknownVolumeKind::Instance,
            name: "c1".into(),
            snapshot_count: 0,
            captured_config: CapturedConfig {
                config: BTreeMap::from([("profiles".to_string(), profiles.to_string())]),
                last_modified: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn validate_only_never_writes() {
        let volumes = vec![instance_volume("default")];
        let stash = Arc::new(MemoryStash::new());
        let request = RecoveryRequest { pools: &[], volumes, checker: &AllowAllChecker, stash };
        let result = run(request, RecoveryMode::ValidateOnly).await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn import_with_dependency_errors_falls_back_to_report() {
        let volumes = vec![instance_volume("default")];
        let stash = Arc::new(MemoryStash::new());
        let request = RecoveryRequest { pools: &[], volumes, checker: &RejectAllChecker, stash };
        let result = run(request, RecoveryMode::Import).await.unwrap();
        let report = result.unwrap();
        assert!(!report.dependency_errors.is_empty());
    }

    #[tokio::test]
    async fn importing_an_instance_volume_creates_its_row() {
        let volumes = vec![instance_volume("default")];
        let stash = Arc::new(MemoryStash::new());
        let pool = PoolHandle {
            row: StoragePool {
                name: "pool1".into(),
                driver: "dir".into(),
                description: String::new(),
                config: BTreeMap::new(),
                status: PoolStatus::Created,
            },
            driver: Arc::new(crate::driver::DirDriver { root: std::env::temp_dir().join("fleet-recovery-test") }),
        };
        let pools = vec![pool];
        let request = RecoveryRequest { pools: &pools, volumes, checker: &AllowAllChecker, stash: stash.clone() };
        let result = run(request, RecoveryMode::Import).await.unwrap();
        assert!(result.is_none());

        let collection = stash.collection::<String, Instance>(INSTANCES_COLLECTION).await.unwrap();
        let items = stash.with_txn(move |txn| txn.items(collection)).await.unwrap();
        assert!(items.contains_key(&instance_key("proj", "c1")));
    }

    #[test]
    fn import_order_is_custom_then_bucket_then_instance() {
        assert!(import_order(UnknownVolumeKind::Custom) < import_order(UnknownVolumeKind::Bucket));
        assert!(import_order(UnknownVolumeKind::Bucket) < import_order(UnknownVolumeKind::Instance));
    }
}
