//! `StoragePool` and `StorageVolume` (spec §3), plus the `UnknownVolume`
//! record the recovery engine produces (spec §4.4).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::etag;

/// Node-local status of a storage pool row. A row is `temporary` when it
/// exists only as an in-memory handle during recovery, not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStatus {
    Pending,
    Created,
    Errored,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    pub driver: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
    pub status: PoolStatus,
}

#[derive(Debug, Serialize)]
struct ConfigOnly<'a> {
    description: &'a str,
    config: &'a BTreeMap<String, String>,
}

impl StoragePool {
    pub fn etag(&self) -> String {
        etag::compute(&ConfigOnly {
            description: &self.description,
            config: &self.config,
        })
    }

    /// Whether this row is only an in-process handle, not yet committed to
    /// the KV store (spec §4.4 "Mode branching").
    pub fn is_temporary(&self) -> bool {
        self.status == PoolStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeContentType {
    Filesystem,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageVolume {
    pub pool: String,
    pub project: String,
    pub name: String,
    pub content_type: VolumeContentType,
    pub config: BTreeMap<String, String>,
}

impl StorageVolume {
    pub fn etag(&self) -> String {
        etag::compute(&ConfigOnly {
            description: "",
            config: &self.config,
        })
    }
}

/// What kind of thing an on-disk volume discovered by a recovery scan turns
/// out to be (spec §3 "Unknown volume record").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownVolumeKind {
    Instance,
    Custom,
    Bucket,
}

/// A config snapshot captured for an unknown volume, used to compare
/// freshness between two candidates for the same `(pool, project, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedConfig {
    pub config: BTreeMap<String, String>,
    /// Zero when the config was discovered purely from the on-disk
    /// filesystem name, in which case any richer config (with a non-zero
    /// timestamp) always wins (spec §4.4 "Scan pass").
    pub last_modified: DateTime<Utc>,
}

impl CapturedConfig {
    pub fn from_filesystem_name() -> CapturedConfig {
        CapturedConfig {
            config: BTreeMap::new(),
            last_modified: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// A volume the recovery scan found on disk with no corresponding KV store
/// row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownVolume {
    pub originating_pool: String,
    pub project: String,
    pub kind: UnknownVolumeKind,
    pub name: String,
    pub snapshot_count: u32,
    pub captured_config: CapturedConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn richer_config_with_later_timestamp_wins() {
        let fs_only = CapturedConfig::from_filesystem_name();
        let richer = CapturedConfig {
            config: BTreeMap::from([("size".into(), "10GiB".into())]),
            last_modified: Utc::now(),
        };
        assert!(richer.last_modified > fs_only.last_modified);
    }
}
