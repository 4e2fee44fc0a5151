//! `Network`, `NetworkZone`, `NetworkLoadBalancer`, and `PlacementGroup`
//! (spec §3): project-scoped resources with a config mapping, a
//! reverse-lookup usage set, and an ETag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::etag;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub project: String,
    pub name: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ConfigOnly<'a> {
    description: &'a str,
    config: &'a BTreeMap<String, String>,
}

impl Network {
    pub fn etag(&self) -> String {
        etag::compute(&ConfigOnly {
            description: &self.description,
            config: &self.config,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkZone {
    pub project: String,
    pub name: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
}

impl NetworkZone {
    pub fn etag(&self) -> String {
        etag::compute(&ConfigOnly {
            description: &self.description,
            config: &self.config,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementGroup {
    pub project: String,
    pub name: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
}

impl PlacementGroup {
    pub fn etag(&self) -> String {
        etag::compute(&ConfigOnly {
            description: &self.description,
            config: &self.config,
        })
    }
}

/// One backend target behind a load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerBackend {
    pub name: String,
    pub target_address: String,
}

/// One listen-port-to-backend mapping on a load balancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancerPort {
    pub listen_port: String,
    pub target_backend: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkLoadBalancer {
    pub project: String,
    pub network: String,
    pub listen_address: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
    pub backends: Vec<LoadBalancerBackend>,
    pub ports: Vec<LoadBalancerPort>,
}

#[derive(Debug, Serialize)]
struct LoadBalancerWritableState<'a> {
    description: &'a str,
    config: &'a BTreeMap<String, String>,
    backends: &'a [LoadBalancerBackend],
    ports: &'a [LoadBalancerPort],
}

/// A PATCH payload for a load balancer. Every field is optional; an absent
/// field preserves the prior value, a present-but-empty array clears it
/// (spec §6 PATCH semantics).
#[derive(Debug, Deserialize, Default)]
pub struct NetworkLoadBalancerPatch {
    pub description: Option<String>,
    pub config: Option<BTreeMap<String, String>>,
    pub backends: Option<Vec<LoadBalancerBackend>>,
    pub ports: Option<Vec<LoadBalancerPort>>,
}

impl NetworkLoadBalancer {
    pub fn etag(&self) -> String {
        etag::compute(&LoadBalancerWritableState {
            description: &self.description,
            config: &self.config,
            backends: &self.backends,
            ports: &self.ports,
        })
    }

    /// Applies a PATCH payload: `config` deep-merges key by key, while
    /// `backends`/`ports` replace wholesale when present (spec §6: "identity
    /// on `devices`/`backends`/`ports`"). Scenario 1 in spec §8 requires
    /// that a `{description: "x"}` PATCH leaves `backends`/`ports` byte for
    /// byte unchanged, which falls directly out of leaving them untouched
    /// when absent.
    pub fn apply_patch(&mut self, patch: NetworkLoadBalancerPatch) {
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(config) = patch.config {
            for (k, v) in config {
                self.config.insert(k, v);
            }
        }
        if let Some(backends) = patch.backends {
            self.backends = backends;
        }
        if let Some(ports) = patch.ports {
            self.ports = ports;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb() -> NetworkLoadBalancer {
        NetworkLoadBalancer {
            project: "default".into(),
            network: "net0".into(),
            listen_address: "203.0.113.5".into(),
            description: String::new(),
            config: BTreeMap::new(),
            backends: vec![LoadBalancerBackend {
                name: "b1".into(),
                target_address: "10.0.0.1".into(),
            }],
            ports: vec![LoadBalancerPort {
                listen_port: "80".into(),
                target_backend: "b1".into(),
            }],
        }
    }

    #[test]
    fn patch_with_description_only_preserves_backends_and_ports() {
        let mut lb = lb();
        let before_backends = lb.backends.clone();
        let before_ports = lb.ports.clone();
        lb.apply_patch(NetworkLoadBalancerPatch {
            description: Some("x".into()),
            ..Default::default()
        });
        assert_eq!(lb.description, "x");
        assert_eq!(lb.backends, before_backends);
        assert_eq!(lb.ports, before_ports);
    }

    #[test]
    fn patch_with_empty_backends_clears_them() {
        let mut lb = lb();
        lb.apply_patch(NetworkLoadBalancerPatch {
            backends: Some(vec![]),
            ..Default::default()
        });
        assert!(lb.backends.is_empty());
        // ports untouched since absent from the patch.
        assert_eq!(lb.ports.len(), 1);
    }

    #[test]
    fn config_patch_deep_merges_rather_than_replaces() {
        let mut lb = lb();
        lb.config.insert("existing".into(), "1".into());
        lb.apply_patch(NetworkLoadBalancerPatch {
            config: Some(BTreeMap::from([("new".into(), "2".into())])),
            ..Default::default()
        });
        assert_eq!(lb.config.get("existing"), Some(&"1".to_string()));
        assert_eq!(lb.config.get("new"), Some(&"2".to_string()));
    }
}
