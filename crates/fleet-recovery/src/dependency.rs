//! Dependency validation (spec §4.4 "Dependency validation"): every
//! instance-bearing candidate must reference a project, profiles, and
//! networks that actually exist.

use std::collections::BTreeSet;

use fleet_api_types::instance::{DeviceConfig, Instance};

/// Looks up whether referenced entities exist, kept abstract over the KV
/// store so this crate can be tested without one.
pub trait DependencyChecker: Send + Sync {
    fn project_exists(&self, project: &str) -> bool;
    fn profile_exists(&self, project: &str, profile: &str) -> bool;
    fn network_exists(&self, project: &str, network: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyError {
    pub project: String,
    pub instance: String,
    pub message: String,
}

/// Validates one candidate instance's dependencies, returning a
/// deduplicated error list (callers accumulate these across every
/// candidate into the overall `dependency_errors`, spec §4.4).
pub fn validate_instance_dependencies(
    checker: &dyn DependencyChecker,
    project: &str,
    instance_name: &str,
    profiles: &[String],
    devices: &std::collections::BTreeMap<String, DeviceConfig>,
) -> BTreeSet<DependencyError> {
    let mut errors = BTreeSet::new();

    if !checker.project_exists(project) {
        errors.insert(DependencyError {
            project: project.to_string(),
            instance: instance_name.to_string(),
            message: format!("project {project:?} does not exist"),
        });
        // Without a project there is nothing further to check meaningfully
        // scoped to it; profile/network existence is itself checked inside
        // that (missing) project.
        return errors;
    }

    for profile in profiles {
        if !checker.profile_exists(project, profile) {
            errors.insert(DependencyError {
                project: project.to_string(),
                instance: instance_name.to_string(),
                message: format!("profile {profile:?} does not exist in project {project:?}"),
            });
        }
    }

    for (device_name, config) in devices {
        if config.get("type").map(String::as_str) != Some("nic") {
            continue;
        }
        let Some(network) = config.get("network").filter(|n| !n.is_empty()) else {
            continue;
        };
        if !checker.network_exists(project, network) {
            errors.insert(DependencyError {
                project: project.to_string(),
                instance: instance_name.to_string(),
                message: format!("device {device_name:?} references network {network:?} which does not exist in project {project:?}"),
            });
        }
    }

    errors
}

/// Convenience wrapper for validating an already-constructed [`Instance`].
pub fn validate_instance(checker: &dyn DependencyChecker, instance: &Instance) -> BTreeSet<DependencyError> {
    validate_instance_dependencies(
        checker,
        &instance.project,
        &instance.name,
        &instance.profiles,
        &instance.local_devices,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct FakeChecker {
        projects: Vec<&'static str>,
        profiles: Vec<(&'static str, &'static str)>,
        networks: Vec<(&'static str, &'static str)>,
    }

    impl DependencyChecker for FakeChecker {
        fn project_exists(&self, project: &str) -> bool {
            self.projects.contains(&project)
        }
        fn profile_exists(&self, project: &str, profile: &str) -> bool {
            self.profiles.contains(&(project, profile))
        }
        fn network_exists(&self, project: &str, network: &str) -> bool {
            self.networks.contains(&(project, network))
        }
    }

    #[test]
    fn missing_project_short_circuits() {
        let checker = FakeChecker { projects: vec![], profiles: vec![], networks: vec![] };
        let errors = validate_instance_dependencies(&checker, "proj", "c1", &["default".into()], &BTreeMap::new());
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().next().unwrap().message.contains("does not exist"));
    }

    #[test]
    fn missing_profile_and_network_both_reported() {
        let checker = FakeChecker { projects: vec!["proj"], profiles: vec![], networks: vec![] };
        let mut nic = DeviceConfig::new();
        nic.insert("type".to_string(), "nic".to_string());
        nic.insert("network".to_string(), "lxdbr0".to_string());
        let devices = BTreeMap::from([("eth0".to_string(), nic)]);
        let errors = validate_instance_dependencies(&checker, "proj", "c1", &["default".into()], &devices);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn empty_network_device_field_is_not_validated() {
        let checker = FakeChecker { projects: vec!["proj"], profiles: vec![], networks: vec![] };
        let mut nic = DeviceConfig::new();
        nic.insert("type".to_string(), "nic".to_string());
        nic.insert("network".to_string(), "".to_string());
        let devices = BTreeMap::from([("eth0".to_string(), nic)]);
        let errors = validate_instance_dependencies(&checker, "proj", "c1", &[], &devices);
        assert!(errors.is_empty());
    }

    #[test]
    fn satisfied_dependencies_yield_no_errors() {
        let checker = FakeChecker {
            projects: vec!["proj"],
            profiles: vec![("proj", "default")],
            networks: vec![("proj", "lxdbr0")],
        };
        let mut nic = DeviceConfig::new();
        nic.insert("type".to_string(), "nic".to_string());
        nic.insert("network".to_string(), "lxdbr0".to_string());
        let devices = BTreeMap::from([("eth0".to_string(), nic)]);
        let errors = validate_instance_dependencies(&checker, "proj", "c1", &["default".into()], &devices);
        assert!(errors.is_empty());
    }
}
