//! Authorization and feature gating (spec §4.3 "Authorization", "Feature
//! gating"): the caller's UID must equal the container's shifted root UID,
//! and each handler's required `security.devlxd*` flags must be truthy.

use std::collections::BTreeMap;

use fleet_api_types::instance::Instance;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("caller is not the container's root user")]
    NotRoot,
    #[error("feature not enabled: {0}")]
    FeatureDisabled(&'static str),
}

/// Checks that `caller_uid` is the host UID that container UID 0 maps to.
pub fn authorize_caller(instance: &Instance, caller_uid: u32) -> Result<(), AuthzError> {
    match instance.root_id_map.shift_root_uid() {
        Some(shifted) if shifted == caller_uid => Ok(()),
        _ => Err(AuthzError::NotRoot),
    }
}

/// Checks that every flag a handler requires is truthy on the instance's
/// expanded config.
pub fn check_features(
    instance: &Instance,
    expanded: &BTreeMap<String, String>,
    required: &[&'static str],
) -> Result<(), AuthzError> {
    for flag in required {
        if !instance.devlxd_flag(expanded, flag) {
            return Err(AuthzError::FeatureDisabled(flag));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api_types::instance::{IdMap, IdMapEntry, InstanceType};

    fn instance(host_offset: u32) -> Instance {
        Instance {
            id: 1,
            project: "default".into(),
            name: "c1".into(),
            instance_type: InstanceType::Container,
            description: String::new(),
            local_config: BTreeMap::new(),
            profiles: vec![],
            local_devices: BTreeMap::new(),
            root_id_map: IdMap {
                entries: vec![IdMapEntry {
                    host_offset,
                    ns_offset: 0,
                    range_size: 65536,
                    is_uid: true,
                    is_gid: false,
                }],
            },
        }
    }

    #[test]
    fn authorize_accepts_exact_shifted_root_uid() {
        let instance = instance(100_000);
        assert!(authorize_caller(&instance, 100_000).is_ok());
        assert_eq!(authorize_caller(&instance, 100_001), Err(AuthzError::NotRoot));
    }

    #[test]
    fn check_features_rejects_disabled_flag() {
        let instance = instance(100_000);
        let expanded = BTreeMap::new();
        assert!(check_features(&instance, &expanded, &["security.devlxd"]).is_ok());
        assert_eq!(
            check_features(&instance, &expanded, &["security.devlxd.images"]),
            Err(AuthzError::FeatureDisabled("security.devlxd.images"))
        );
    }
}
