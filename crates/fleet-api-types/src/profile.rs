//! The `Profile` entity (spec §3): a named reusable config+devices template
//! scoped to a project.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::etag;
use crate::instance::DeviceConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub project: String,
    pub name: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
    pub devices: BTreeMap<String, DeviceConfig>,
}

#[derive(Debug, Serialize)]
pub struct ProfileWritableState<'a> {
    pub description: &'a str,
    pub config: &'a BTreeMap<String, String>,
    pub devices: &'a BTreeMap<String, DeviceConfig>,
}

impl Profile {
    pub fn etag(&self) -> String {
        etag::compute(&ProfileWritableState {
            description: &self.description,
            config: &self.config,
            devices: &self.devices,
        })
    }
}

/// Why a profile cannot be mutated or removed right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUsage {
    pub instances: Vec<String>,
}

impl ProfileUsage {
    pub fn is_in_use(&self) -> bool {
        !self.instances.is_empty()
    }
}
