//! The KV-backed instance/profile lookup devlxd and the HTTP handlers read
//! through. Kept in the daemon binary rather than `fleet-api-types` because
//! it is the one place that actually talks to [`fleet_kv::Stash`].

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_api_types::instance::{DeviceConfig, Instance};
use fleet_api_types::profile::Profile;
use fleet_kv::{SqliteStash, Stash};

pub(crate) const INSTANCES_COLLECTION: &str = "instances";
pub(crate) const PROFILES_COLLECTION: &str = "profiles";

/// `(project, name)` composite key, serialized as a single string so it
/// sorts and (de)serializes the way `fleet_kv`'s `BTreeMap`-backed
/// collections expect.
fn instance_key(project: &str, name: &str) -> String {
    format!("{project}/{name}")
}

fn profile_key(project: &str, name: &str) -> String {
    format!("{project}/{name}")
}

pub struct InstanceStore {
    stash: Arc<SqliteStash>,
}

impl InstanceStore {
    pub fn new(stash: Arc<SqliteStash>) -> InstanceStore {
        InstanceStore { stash }
    }

    pub async fn load_instance(&self, project: &str, name: &str) -> anyhow::Result<Option<Instance>> {
        let collection = self.stash.collection::<String, Instance>(INSTANCES_COLLECTION).await?;
        let key = instance_key(project, name);
        let items = self.stash.with_txn(move |txn| txn.items(collection)).await?;
        Ok(items.into_iter().find(|(k, _)| *k == key).map(|(_, v)| v))
    }

    pub async fn put_instance(&self, instance: Instance) -> anyhow::Result<()> {
        let collection = self.stash.collection::<String, Instance>(INSTANCES_COLLECTION).await?;
        let key = instance_key(&instance.project, &instance.name);
        self.stash.with_txn(move |txn| txn.put(collection, key, instance)).await?;
        Ok(())
    }

    async fn load_profile(&self, project: &str, name: &str) -> anyhow::Result<Option<Profile>> {
        let collection = self.stash.collection::<String, Profile>(PROFILES_COLLECTION).await?;
        let key = profile_key(project, name);
        let items = self.stash.with_txn(move |txn| txn.items(collection)).await?;
        Ok(items.into_iter().find(|(k, _)| *k == key).map(|(_, v)| v))
    }

    /// Loads every profile an instance references, in application order.
    /// A referenced profile that no longer exists is silently skipped: the
    /// expansion degrades to whatever profiles remain, rather than failing
    /// the whole request.
    pub async fn load_profiles_for(&self, instance: &Instance, profile_project: &str) -> anyhow::Result<Vec<Profile>> {
        let mut profiles = Vec::with_capacity(instance.profiles.len());
        for name in &instance.profiles {
            if let Some(profile) = self.load_profile(profile_project, name).await? {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }

    /// Computes the expanded config and devices for `instance`, resolving
    /// its profiles against `profile_project` (spec §3: the project's
    /// `effective_project_for_profiles`).
    pub async fn expand(
        &self,
        instance: &Instance,
        profile_project: &str,
    ) -> anyhow::Result<(BTreeMap<String, String>, BTreeMap<String, DeviceConfig>)> {
        let profiles = self.load_profiles_for(instance, profile_project).await?;
        let refs: Vec<&Profile> = profiles.iter().collect();
        Ok((instance.expanded_config(&refs), instance.expanded_devices(&refs)))
    }

    /// Computes an instance's ETag over its profile-expanded writable state.
    pub async fn etag(&self, instance: &Instance, profile_project: &str) -> anyhow::Result<String> {
        let profiles = self.load_profiles_for(instance, profile_project).await?;
        let refs: Vec<&Profile> = profiles.iter().collect();
        Ok(instance.etag(&refs))
    }
}
