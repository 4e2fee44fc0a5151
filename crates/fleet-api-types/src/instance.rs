//! The `Instance` entity (spec §3): a container or virtual machine,
//! identified by `(project, name)`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::etag;
use crate::profile::Profile;

/// A dotted config key's reserved namespace.
pub const RESERVED_NAMESPACES: &[&str] =
    &["volatile.", "user.", "security.", "limits.", "cloud-init."];

/// Whether an instance is a container or a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Container,
    VirtualMachine,
}

/// A device mapping entry: an arbitrary config map keyed by device name.
pub type DeviceConfig = BTreeMap<String, String>;

/// A UID/GID shift range, used to translate a container-relative ID to the
/// corresponding host ID (spec §4.3 "Authorization").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdMapEntry {
    pub host_offset: u32,
    pub ns_offset: u32,
    pub range_size: u32,
    pub is_uid: bool,
    pub is_gid: bool,
}

impl IdMapEntry {
    /// Shifts a namespace-relative ID through this entry, returning the
    /// corresponding host ID if it falls within the mapped range.
    pub fn shift_into_host(&self, ns_id: u32) -> Option<u32> {
        if ns_id >= self.ns_offset && ns_id < self.ns_offset + self.range_size {
            Some(self.host_offset + (ns_id - self.ns_offset))
        } else {
            None
        }
    }
}

/// The instance's root identifier map: zero or more UID/GID shift ranges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdMap {
    pub entries: Vec<IdMapEntry>,
}

impl IdMap {
    /// Computes the host UID that namespace UID 0 (container root) maps to.
    ///
    /// Used by devlxd authorization to decide whether a caller's real UID is
    /// the container's root user.
    pub fn shift_root_uid(&self) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.is_uid)
            .and_then(|e| e.shift_into_host(0))
    }
}

/// An instance's local record as stored in the KV store: local config and
/// devices only, not yet merged with its profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub instance_type: InstanceType,
    pub description: String,
    /// Local config overrides, applied after profile config during
    /// expansion.
    pub local_config: BTreeMap<String, String>,
    /// Profile names in application order; later profiles override earlier
    /// ones, and local config overrides all profiles.
    pub profiles: Vec<String>,
    pub local_devices: BTreeMap<String, DeviceConfig>,
    pub root_id_map: IdMap,
}

/// The writable-state view used for ETag computation: everything a client
/// can PUT/PATCH, nothing computed from other tables.
#[derive(Debug, Serialize)]
pub struct InstanceWritableState<'a> {
    pub description: &'a str,
    pub config: &'a BTreeMap<String, String>,
    pub profiles: &'a [String],
    pub devices: &'a BTreeMap<String, DeviceConfig>,
}

impl Instance {
    /// Computes the expanded configuration: profiles applied in order, then
    /// local config on top. `volatile.*` keys are never carried by
    /// profiles, so any such key found on a profile is dropped before
    /// merging (spec §3 invariant).
    pub fn expanded_config(&self, profiles: &[&Profile]) -> BTreeMap<String, String> {
        let mut merged = BTreeMap::new();
        for profile in profiles {
            for (k, v) in &profile.config {
                if !k.starts_with("volatile.") {
                    merged.insert(k.clone(), v.clone());
                }
            }
        }
        for (k, v) in &self.local_config {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    /// Computes the expanded device set the same way: profile devices in
    /// order, then local devices override by device name.
    pub fn expanded_devices(&self, profiles: &[&Profile]) -> BTreeMap<String, DeviceConfig> {
        let mut merged = BTreeMap::new();
        for profile in profiles {
            for (name, cfg) in &profile.devices {
                merged.insert(name.clone(), cfg.clone());
            }
        }
        for (name, cfg) in &self.local_devices {
            merged.insert(name.clone(), cfg.clone());
        }
        merged
    }

    pub fn etag(&self, profiles: &[&Profile]) -> String {
        let config = self.expanded_config(profiles);
        let devices = self.expanded_devices(profiles);
        etag::compute(&InstanceWritableState {
            description: &self.description,
            config: &config,
            profiles: &self.profiles,
            devices: &devices,
        })
    }

    /// Returns the effective value of `security.devlxd` and friends: `true`
    /// unless explicitly set to a falsy string, except `security.devlxd`
    /// itself, whose default is enabled (spec §4.3 "Feature gating").
    pub fn devlxd_flag(&self, expanded: &BTreeMap<String, String>, key: &str) -> bool {
        let default = key == "security.devlxd";
        match expanded.get(key) {
            Some(v) => matches!(v.as_str(), "true" | "1" | "yes"),
            None => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(config: &[(&str, &str)], devices: &[(&str, &[(&str, &str)])]) -> Profile {
        Profile {
            project: "default".into(),
            name: "p".into(),
            description: String::new(),
            config: config.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            devices: devices
                .iter()
                .map(|(name, cfg)| {
                    (
                        name.to_string(),
                        cfg.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn expanded_config_drops_volatile_from_profiles_but_not_local() {
        let instance = Instance {
            id: 1,
            project: "default".into(),
            name: "c1".into(),
            instance_type: InstanceType::Container,
            description: String::new(),
            local_config: BTreeMap::from([("volatile.idmap.base".into(), "0".into())]),
            profiles: vec!["p".into()],
            local_devices: BTreeMap::new(),
            root_id_map: IdMap::default(),
        };
        let p = profile(&[("volatile.should.drop", "x"), ("limits.cpu", "2")], &[]);
        let expanded = instance.expanded_config(&[&p]);
        assert!(!expanded.contains_key("volatile.should.drop"));
        assert_eq!(expanded.get("limits.cpu"), Some(&"2".to_string()));
        assert_eq!(expanded.get("volatile.idmap.base"), Some(&"0".to_string()));
    }

    #[test]
    fn local_config_overrides_profile_config() {
        let instance = Instance {
            id: 1,
            project: "default".into(),
            name: "c1".into(),
            instance_type: InstanceType::Container,
            description: String::new(),
            local_config: BTreeMap::from([("limits.cpu".into(), "4".into())]),
            profiles: vec!["p".into()],
            local_devices: BTreeMap::new(),
            root_id_map: IdMap::default(),
        };
        let p = profile(&[("limits.cpu", "1")], &[]);
        let expanded = instance.expanded_config(&[&p]);
        assert_eq!(expanded.get("limits.cpu"), Some(&"4".to_string()));
    }

    #[test]
    fn shift_root_uid_computes_host_uid() {
        let map = IdMap {
            entries: vec![IdMapEntry {
                host_offset: 100_000,
                ns_offset: 0,
                range_size: 65536,
                is_uid: true,
                is_gid: false,
            }],
        };
        assert_eq!(map.shift_root_uid(), Some(100_000));
    }

    #[test]
    fn devlxd_flag_defaults() {
        let instance = Instance {
            id: 1,
            project: "default".into(),
            name: "c1".into(),
            instance_type: InstanceType::Container,
            description: String::new(),
            local_config: BTreeMap::new(),
            profiles: vec![],
            local_devices: BTreeMap::new(),
            root_id_map: IdMap::default(),
        };
        let expanded = BTreeMap::new();
        assert!(instance.devlxd_flag(&expanded, "security.devlxd"));
        assert!(!instance.devlxd_flag(&expanded, "security.devlxd.images"));
    }
}
