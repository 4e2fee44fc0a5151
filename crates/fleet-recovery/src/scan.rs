//! The scan pass (spec §4.4 "Scan pass"): mounts each pool exactly once,
//! lists unknown volumes from every driver, and folds them into the
//! candidate registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_api_types::storage::{PoolStatus, StoragePool, UnknownVolume};
use thiserror::Error;
use tracing::warn;

use crate::driver::StorageDriver;
use crate::registry::UnknownVolumeRegistry;
use crate::reverter::Reverter;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("synthetic storage pools are not permitted in clustered mode")]
    SyntheticPoolInClusteredMode,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A pool being scanned: its row (which may be `temporary`, i.e.
/// synthesized rather than loaded from the KV store) and its driver
/// handle.
pub struct PoolHandle {
    pub row: StoragePool,
    pub driver: Arc<dyn StorageDriver>,
}

/// Either loads `name` from the KV store, or — if absent and the caller
/// supplied a driver/config — synthesizes a temporary row for the duration
/// of this scan (spec §4.4: "either load it from the KV store or
/// synthesize a temporary pool with the user's driver/config").
pub fn resolve_pool_handle(
    existing: Option<StoragePool>,
    synthetic: Option<(String, BTreeMap<String, String>, Arc<dyn StorageDriver>)>,
    clustered: bool,
) -> Result<PoolHandle, ScanError> {
    if let Some(row) = existing {
        let driver = synthetic.map(|(_, _, d)| d).ok_or_else(|| {
            ScanError::Other(anyhow::anyhow!("no driver supplied for existing pool {}", row.name))
        })?;
        return Ok(PoolHandle { row, driver });
    }
    let (driver_name, mut config, driver) = synthetic.ok_or_else(|| {
        anyhow::anyhow!("pool not found in the KV store and no synthetic config supplied").into()
    })?;
    if clustered {
        return Err(ScanError::SyntheticPoolInClusteredMode);
    }
    driver.fill_default_config(&mut config);
    driver.validate_config(&config)?;
    let row = StoragePool {
        name: driver_name,
        driver: "synthetic".to_string(),
        description: String::new(),
        config,
        status: PoolStatus::Pending,
    };
    Ok(PoolHandle { row, driver })
}

/// Mounts every pool exactly once, registering an unmount in `reverter` so
/// an overall failure leaves nothing mounted (spec §4.4: "On overall
/// failure, a reverter runs and unmounts everything").
pub async fn mount_all(pools: &[PoolHandle], reverter: &mut Reverter) -> anyhow::Result<()> {
    for pool in pools {
        pool.driver.mount().await?;
        let driver = pool.driver.clone();
        let name = pool.row.name.clone();
        reverter.push(move || async move {
            if let Err(err) = driver.unmount().await {
                warn!(pool = %name, error = %err, "failed to unmount pool during rollback");
            }
        });
    }
    Ok(())
}

/// Lists unknown volumes from every pool and folds them into `registry`,
/// ignoring drivers that report unsupported (spec §4.4: "Ignore drivers
/// reporting not-supported").
pub async fn scan_unknown_volumes(pools: &[PoolHandle], registry: &mut UnknownVolumeRegistry) {
    for pool in pools {
        let volumes = match pool.driver.list_unknown_volumes(None).await {
            Ok(volumes) => volumes,
            Err(_not_supported) => continue,
        };
        for v in volumes {
            let unknown = UnknownVolume {
                originating_pool: pool.row.name.clone(),
                project: v.project.clone(),
                kind: v.kind,
                name: v.name,
                snapshot_count: v.snapshot_count,
                captured_config: v.captured_config,
            };
            registry.append_unknown_volume_config(&pool.row.name, &v.project, unknown);
        }
    }
}
