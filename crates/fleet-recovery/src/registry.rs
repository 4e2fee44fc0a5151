//! The candidate registry (spec §4.4 "Scan pass"): accumulates
//! `list_unknown_volumes()` output from every mounted pool, keeping
//! whichever candidate for a given `(pool, project, name)` has the later
//! `last_modified` timestamp.

use std::collections::BTreeMap;

use fleet_api_types::storage::UnknownVolume;

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
struct CandidateKey {
    pool: String,
    project: String,
    name: String,
}

/// Accumulates unknown-volume candidates across every scanned pool.
#[derive(Default)]
pub struct UnknownVolumeRegistry {
    candidates: BTreeMap<CandidateKey, UnknownVolume>,
}

impl UnknownVolumeRegistry {
    pub fn new() -> UnknownVolumeRegistry {
        UnknownVolumeRegistry::default()
    }

    /// Adds a candidate discovered on `origin_pool`. If a candidate already
    /// exists for the same `(pool, project, name)`, keeps whichever has the
    /// later `last_modified` (spec §4.4: "configs discovered by raw
    /// filesystem name have `last_modified = zero`, so any richer config
    /// wins automatically").
    pub fn append_unknown_volume_config(&mut self, origin_pool: &str, project: &str, candidate: UnknownVolume) {
        let key = CandidateKey {
            pool: origin_pool.to_string(),
            project: project.to_string(),
            name: candidate.name.clone(),
        };
        match self.candidates.get(&key) {
            Some(existing) if existing.captured_config.last_modified >= candidate.captured_config.last_modified => {}
            _ => {
                self.candidates.insert(key, candidate);
            }
        }
    }

    pub fn into_volumes(self) -> Vec<UnknownVolume> {
        self.candidates.into_values().collect()
    }

    pub fn volumes(&self) -> impl Iterator<Item = &UnknownVolume> {
        self.candidates.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use fleet_api_types::storage::{CapturedConfig, UnknownVolumeKind};
    use std::collections::BTreeMap as Map;

    fn volume(name: &str, last_modified_offset_secs: i64, pool: &str) -> UnknownVolume {
        UnknownVolume {
            originating_pool: pool.to_string(),
            project: "default".into(),
            kind: UnknownVolumeKind::Custom,
            name: name.to_string(),
            snapshot_count: 0,
            captured_config: CapturedConfig {
                config: Map::new(),
                last_modified: Utc::now() + Duration::seconds(last_modified_offset_secs),
            },
        }
    }

    #[test]
    fn richer_config_overrides_filesystem_only_candidate() {
        let mut registry = UnknownVolumeRegistry::new();
        let fs_only = UnknownVolume {
            captured_config: CapturedConfig::from_filesystem_name(),
            ..volume("vol1", 0, "pool1")
        };
        registry.append_unknown_volume_config("pool1", "default", fs_only);

        let richer = volume("vol1", 100, "pool1");
        registry.append_unknown_volume_config("pool1", "default", richer);

        let volumes = registry.into_volumes();
        assert_eq!(volumes.len(), 1);
        assert!(volumes[0].captured_config.last_modified > chrono::DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn older_candidate_does_not_override_newer() {
        let mut registry = UnknownVolumeRegistry::new();
        registry.append_unknown_volume_config("pool1", "default", volume("vol1", 100, "pool1"));
        registry.append_unknown_volume_config("pool1", "default", volume("vol1", 0, "pool1"));
        let volumes = registry.into_volumes();
        assert_eq!(volumes.len(), 1);
        assert!(volumes[0].captured_config.last_modified > Utc::now() + Duration::seconds(50));
    }

    #[test]
    fn distinct_pools_are_distinct_candidates() {
        let mut registry = UnknownVolumeRegistry::new();
        registry.append_unknown_volume_config("pool1", "default", volume("vol1", 0, "pool1"));
        registry.append_unknown_volume_config("pool2", "default", volume("vol1", 0, "pool2"));
        assert_eq!(registry.into_volumes().len(), 2);
    }
}
