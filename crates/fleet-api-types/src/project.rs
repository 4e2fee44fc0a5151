//! The `Project` entity (spec §3): a tenancy boundary whose feature flags
//! decide whether a referenced lookup resolves against the project or falls
//! back to the default project.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::etag;

/// The name of the project every `features.*`-disabled lookup falls back
/// to.
pub const DEFAULT_PROJECT: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ProjectWritableState<'a> {
    pub description: &'a str,
    pub config: &'a BTreeMap<String, String>,
}

impl Project {
    pub fn etag(&self) -> String {
        etag::compute(&ProjectWritableState {
            description: &self.description,
            config: &self.config,
        })
    }

    fn feature_enabled(&self, key: &str) -> bool {
        matches!(self.config.get(key).map(String::as_str), Some("true"))
    }

    /// Returns the name of the project that actually backs networks
    /// referenced from this project: itself if `features.networks` is on,
    /// otherwise the default project. This is the "effective project"
    /// glossary term.
    pub fn effective_project_for_networks(&self) -> &str {
        if self.feature_enabled("features.networks") {
            &self.name
        } else {
            DEFAULT_PROJECT
        }
    }

    /// Same resolution, for network zones, which have their own feature
    /// flag independent of `features.networks`.
    pub fn effective_project_for_network_zones(&self) -> &str {
        if self.feature_enabled("features.networks.zones") {
            &self.name
        } else {
            DEFAULT_PROJECT
        }
    }

    pub fn effective_project_for_profiles(&self) -> &str {
        if self.feature_enabled("features.profiles") {
            &self.name
        } else {
            DEFAULT_PROJECT
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_project_falls_back_to_default_when_feature_disabled() {
        let p = Project {
            name: "acme".into(),
            description: String::new(),
            config: BTreeMap::new(),
        };
        assert_eq!(p.effective_project_for_networks(), DEFAULT_PROJECT);
    }

    #[test]
    fn effective_project_is_itself_when_feature_enabled() {
        let p = Project {
            name: "acme".into(),
            description: String::new(),
            config: BTreeMap::from([("features.networks".into(), "true".into())]),
        };
        assert_eq!(p.effective_project_for_networks(), "acme");
    }
}
