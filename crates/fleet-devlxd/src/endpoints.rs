//! The devlxd per-container API surface (spec §4.3 "Scope of exposed
//! endpoints", "Ready-state transition"; spec §6 "devlxd surface").
//!
//! Handlers are pure domain logic returning typed results; the daemon shell
//! is responsible for wiring these onto the Unix-socket listener and
//! dispatching websocket upgrade vs. chunked-hijack for `/1.0/events`.

use std::collections::BTreeMap;

use fleet_api_types::instance::{DeviceConfig, Instance};
use fleet_operations::event_bus::EventBus;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::authz::{check_features, AuthzError};

/// `GET /1.0`.
#[derive(Debug, Clone, Serialize)]
pub struct RootResponse {
    pub project: String,
    pub name: String,
    pub location: String,
    pub ready: bool,
}

/// `PATCH /1.0` body (spec §4.3 "Ready-state transition").
#[derive(Debug, Clone, Deserialize)]
pub struct StateChange {
    pub state: GuestState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GuestState {
    Started,
    Ready,
}

/// The mutation a successful `PATCH /1.0 {"state":"Ready"}` must apply: set
/// `volatile.last_state.ready=true` and emit an `instance-ready` lifecycle
/// event. Returned rather than applied directly so the caller can fold it
/// into the same KV transaction as everything else in the request.
pub struct ReadyTransition {
    pub volatile_key: &'static str,
    pub volatile_value: &'static str,
}

pub const INSTANCE_READY_EVENT: &str = "instance-ready";

pub struct DevlxdHandlers {
    events: EventBus,
}

impl DevlxdHandlers {
    pub fn new(events: EventBus) -> DevlxdHandlers {
        DevlxdHandlers { events }
    }

    pub fn root(&self, instance: &Instance, location: &str, ready: bool) -> RootResponse {
        RootResponse {
            project: instance.project.clone(),
            name: instance.name.clone(),
            location: location.to_string(),
            ready,
        }
    }

    /// Applies a `PATCH /1.0` state change. `Started` is accepted but has
    /// no side effect beyond acknowledging the guest woke up; `Ready` both
    /// flags the instance and publishes the lifecycle event (spec §4.3).
    pub fn patch_root(
        &self,
        instance: &Instance,
        change: StateChange,
    ) -> Option<ReadyTransition> {
        match change.state {
            GuestState::Started => None,
            GuestState::Ready => {
                self.events.publish(
                    Some(&instance.project),
                    "lifecycle",
                    json!({
                        "action": INSTANCE_READY_EVENT,
                        "source": format!("/1.0/instances/{}", instance.name),
                    }),
                );
                Some(ReadyTransition {
                    volatile_key: "volatile.last_state.ready",
                    volatile_value: "true",
                })
            }
        }
    }

    /// `GET /1.0/config`: only keys prefixed `user.` or `cloud-init.` are
    /// visible to the guest.
    pub fn config_keys<'a>(&self, expanded: &'a BTreeMap<String, String>) -> Vec<&'a str> {
        expanded
            .keys()
            .filter(|k| k.starts_with("user.") || k.starts_with("cloud-init."))
            .map(String::as_str)
            .collect()
    }

    /// `GET /1.0/config/{key}`: returns the raw value (`text/plain` at the
    /// transport layer), merging `cloud-init.ssh-keys.*` into the effective
    /// `cloud-init.user-data`/`cloud-init.vendor-data` streams it feeds.
    pub fn config_value(&self, expanded: &BTreeMap<String, String>, key: &str) -> Option<String> {
        if !(key.starts_with("user.") || key.starts_with("cloud-init.")) {
            return None;
        }
        if key == "cloud-init.user-data" || key == "cloud-init.vendor-data" {
            return Some(merge_ssh_keys(expanded, expanded.get(key).map(String::as_str).unwrap_or("")));
        }
        expanded.get(key).cloned()
    }

    /// `GET /1.0/meta-data`: synthesized cloud-init metadata.
    pub fn meta_data(&self, instance: &Instance) -> String {
        format!(
            "instance-id: {}\nlocal-hostname: {}\n",
            instance.name, instance.name
        )
    }

    /// `GET /1.0/devices`: expanded devices with NIC hardware addresses
    /// filled from volatile state (`volatile.<device>.hwaddr`).
    pub fn devices(
        &self,
        expanded_devices: &BTreeMap<String, DeviceConfig>,
        volatile: &BTreeMap<String, String>,
    ) -> BTreeMap<String, DeviceConfig> {
        let mut out = expanded_devices.clone();
        for (name, cfg) in out.iter_mut() {
            if cfg.get("type").map(String::as_str) == Some("nic") && !cfg.contains_key("hwaddr") {
                if let Some(hwaddr) = volatile.get(&format!("volatile.{name}.hwaddr")) {
                    cfg.insert("hwaddr".to_string(), hwaddr.clone());
                }
            }
        }
        out
    }

    /// Subscribes to this instance's device/config lifecycle events only
    /// (spec §4.3: "publishes configuration and device lifecycle events for
    /// *this* instance only").
    pub fn subscribe_events(&self, project: &str) -> fleet_operations::event_bus::Subscriber {
        self.events.subscribe(Some(project.to_string()), Some("lifecycle".to_string()))
    }

    /// Gate for the extra image-export endpoint (spec §4.3: "reachable
    /// only with the extra `security.devlxd.images` flag").
    pub fn check_image_export_enabled(
        &self,
        instance: &Instance,
        expanded: &BTreeMap<String, String>,
    ) -> Result<(), AuthzError> {
        check_features(instance, expanded, &["security.devlxd.images"])
    }
}

fn merge_ssh_keys(expanded: &BTreeMap<String, String>, base: &str) -> String {
    let keys: Vec<&str> = expanded
        .iter()
        .filter(|(k, _)| k.starts_with("cloud-init.ssh-keys."))
        .map(|(_, v)| v.as_str())
        .collect();
    if keys.is_empty() {
        return base.to_string();
    }
    let mut merged = base.to_string();
    if !merged.is_empty() && !merged.ends_with('\n') {
        merged.push('\n');
    }
    merged.push_str("ssh_authorized_keys:\n");
    for key in keys {
        merged.push_str("  - ");
        merged.push_str(key);
        merged.push('\n');
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api_types::instance::{IdMap, InstanceType};

    fn instance() -> Instance {
        Instance {
            id: 1,
            project: "default".into(),
            name: "c1".into(),
            instance_type: InstanceType::Container,
            description: String::new(),
            local_config: BTreeMap::new(),
            profiles: vec![],
            local_devices: BTreeMap::new(),
            root_id_map: IdMap::default(),
        }
    }

    #[test]
    fn config_keys_filters_to_user_and_cloud_init_prefixes() {
        let handlers = DevlxdHandlers::new(EventBus::new());
        let expanded = BTreeMap::from([
            ("user.foo".to_string(), "bar".to_string()),
            ("cloud-init.user-data".to_string(), "x".to_string()),
            ("limits.cpu".to_string(), "2".to_string()),
        ]);
        let mut keys = handlers.config_keys(&expanded);
        keys.sort();
        assert_eq!(keys, vec!["cloud-init.user-data", "user.foo"]);
    }

    #[test]
    fn config_value_rejects_non_exposed_prefixes() {
        let handlers = DevlxdHandlers::new(EventBus::new());
        let expanded = BTreeMap::from([("limits.cpu".to_string(), "2".to_string())]);
        assert_eq!(handlers.config_value(&expanded, "limits.cpu"), None);
    }

    #[test]
    fn config_value_merges_ssh_keys_into_user_data() {
        let handlers = DevlxdHandlers::new(EventBus::new());
        let expanded = BTreeMap::from([
            ("cloud-init.user-data".to_string(), "#cloud-config".to_string()),
            ("cloud-init.ssh-keys.admin".to_string(), "ssh-rsa AAAA".to_string()),
        ]);
        let merged = handlers.config_value(&expanded, "cloud-init.user-data").unwrap();
        assert!(merged.contains("#cloud-config"));
        assert!(merged.contains("ssh-rsa AAAA"));
    }

    #[test]
    fn patch_root_ready_emits_event_and_volatile_write() {
        let handlers = DevlxdHandlers::new(EventBus::new());
        let instance = instance();
        assert!(handlers.patch_root(&instance, StateChange { state: GuestState::Started }).is_none());
        let transition = handlers.patch_root(&instance, StateChange { state: GuestState::Ready }).unwrap();
        assert_eq!(transition.volatile_key, "volatile.last_state.ready");
    }

    #[test]
    fn devices_fills_hwaddr_from_volatile() {
        let handlers = DevlxdHandlers::new(EventBus::new());
        let mut nic = DeviceConfig::new();
        nic.insert("type".to_string(), "nic".to_string());
        let devices = BTreeMap::from([("eth0".to_string(), nic)]);
        let volatile = BTreeMap::from([("volatile.eth0.hwaddr".to_string(), "00:11:22:33:44:55".to_string())]);
        let filled = handlers.devices(&devices, &volatile);
        assert_eq!(filled["eth0"].get("hwaddr").unwrap(), "00:11:22:33:44:55");
    }

    #[test]
    fn image_export_gate_is_disabled_by_default() {
        let handlers = DevlxdHandlers::new(EventBus::new());
        let instance = instance();
        let expanded = BTreeMap::new();
        assert!(handlers.check_image_export_enabled(&instance, &expanded).is_err());
    }
}
