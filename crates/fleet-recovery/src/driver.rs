//! `StorageDriver` (spec §4.4): the vtable every storage backend
//! implements. The recovery engine is written entirely against this trait
//! so it never depends on a concrete backend.

use async_trait::async_trait;
use fleet_api_types::storage::{CapturedConfig, UnknownVolumeKind};

/// Raised by a driver that doesn't implement scan support at all (ZFS and
/// LVM pools, say, where "what volumes exist" isn't knowable without
/// consulting metadata this driver doesn't keep). The scan pass ignores
/// these (spec §4.4: "Ignore drivers reporting not-supported").
#[derive(Debug, thiserror::Error)]
#[error("operation not supported by this storage driver")]
pub struct NotSupported;

/// One volume the driver found on disk with no corresponding KV row.
#[derive(Debug, Clone)]
pub struct DriverUnknownVolume {
    pub project: String,
    pub kind: UnknownVolumeKind,
    pub name: String,
    pub snapshot_count: u32,
    pub captured_config: CapturedConfig,
}

/// A concrete storage-pool backend.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Fills in any config defaults this driver requires before the pool
    /// can be mounted (spec §4.4 "Scan pass": "run the driver's
    /// default-config fill").
    fn fill_default_config(&self, config: &mut std::collections::BTreeMap<String, String>);

    /// Validates pool config, rejecting anything the driver can't operate
    /// on.
    fn validate_config(&self, config: &std::collections::BTreeMap<String, String>) -> anyhow::Result<()>;

    /// Mounts the pool. Idempotent: mounting an already-mounted pool is a
    /// no-op success.
    async fn mount(&self) -> anyhow::Result<()>;

    /// Unmounts the pool. Called by the reverter on failure and by normal
    /// cleanup when a pool was only temporarily mounted for a scan.
    async fn unmount(&self) -> anyhow::Result<()>;

    /// Lists volumes the driver can see on disk that have no corresponding
    /// database row, one entry per volume (bucket configs are the
    /// documented exception allowing more than one candidate per name).
    async fn list_unknown_volumes(&self, project_filter: Option<&str>) -> Result<Vec<DriverUnknownVolume>, NotSupported>;

    /// Recreates the mount paths and symlinks for a volume after its DB row
    /// has been (re)created, as the last step of an import.
    async fn ensure_volume_mount_path(&self, project: &str, name: &str) -> anyhow::Result<()>;

    /// Adopts a discovered custom volume as managed, ahead of its DB row
    /// being written (spec §4.4 "Import").
    async fn import_custom_volume(&self, project: &str, name: &str, config: &CapturedConfig) -> anyhow::Result<()>;

    /// Same as [`StorageDriver::import_custom_volume`] for bucket volumes.
    async fn import_bucket(&self, project: &str, name: &str, config: &CapturedConfig) -> anyhow::Result<()>;

    /// Same as [`StorageDriver::import_custom_volume`] for an instance's
    /// root volume.
    async fn import_instance(&self, project: &str, name: &str, config: &CapturedConfig) -> anyhow::Result<()>;

    /// Reinitializes an instance's root-disk quota from its captured
    /// config, the last step of importing an instance volume (spec §4.4
    /// "Import").
    async fn set_instance_quota(&self, project: &str, name: &str, config: &CapturedConfig) -> anyhow::Result<()>;
}

/// A trivial backend over a plain directory tree, used as the one
/// concrete, testable [`StorageDriver`] — every other backend (ZFS, LVM,
/// Ceph) is the same shape but talks to a different toolchain.
pub struct DirDriver {
    pub root: std::path::PathBuf,
}

#[async_trait]
impl StorageDriver for DirDriver {
    fn fill_default_config(&self, config: &mut std::collections::BTreeMap<String, String>) {
        config.entry("size".to_string()).or_insert_with(|| "0".to_string());
    }

    fn validate_config(&self, _config: &std::collections::BTreeMap<String, String>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn mount(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn unmount(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_unknown_volumes(&self, project_filter: Option<&str>) -> Result<Vec<DriverUnknownVolume>, NotSupported> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(_) => return Ok(out),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((project, volume)) = name.split_once('_') else { continue };
            if let Some(filter) = project_filter {
                if project != filter {
                    continue;
                }
            }
            out.push(DriverUnknownVolume {
                project: project.to_string(),
                kind: UnknownVolumeKind::Custom,
                name: volume.to_string(),
                snapshot_count: 0,
                captured_config: CapturedConfig::from_filesystem_name(),
            });
        }
        Ok(out)
    }

    async fn ensure_volume_mount_path(&self, _project: &str, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    // A plain directory tree carries no separate adoption step or quota
    // mechanism: the volume's content already exists on disk exactly as
    // the scan found it, so these are no-ops.

    async fn import_custom_volume(&self, _project: &str, _name: &str, _config: &CapturedConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn import_bucket(&self, _project: &str, _name: &str, _config: &CapturedConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn import_instance(&self, _project: &str, _name: &str, _config: &CapturedConfig) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_instance_quota(&self, _project: &str, _name: &str, _config: &CapturedConfig) -> anyhow::Result<()> {
        Ok(())
    }
}
