//! The live membership table used by forwarding, the notifier, and
//! certificate rotation.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A cluster member as seen by the consistency layer. `address` is the
/// member's network listen address for cluster-internal traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: String,
    pub address: String,
}

/// The copy-on-write membership table (spec §5 "Shared-resource policy": the
/// cluster secret ring is copy-on-write; the same approach is used here for
/// the membership view so a heartbeat update never blocks a concurrent
/// forward or notify).
#[derive(Clone)]
pub struct MemberTable {
    inner: Arc<RwLock<Arc<BTreeMap<String, ClusterMember>>>>,
    self_id: String,
}

impl MemberTable {
    pub fn new(self_id: impl Into<String>) -> MemberTable {
        MemberTable {
            inner: Arc::new(RwLock::new(Arc::new(BTreeMap::new()))),
            self_id: self_id.into(),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn set_members(&self, members: Vec<ClusterMember>) {
        let map = members.into_iter().map(|m| (m.id.clone(), m)).collect();
        *self.inner.write() = Arc::new(map);
    }

    pub fn mark_alive(&self, id: &str, alive: bool) {
        let snapshot = self.inner.read().clone();
        if !alive {
            if !snapshot.contains_key(id) {
                return;
            }
            let mut map = (*snapshot).clone();
            map.remove(id);
            *self.inner.write() = Arc::new(map);
        }
    }

    /// Snapshot of every currently-known live member other than self.
    pub fn alive_peers(&self) -> Vec<ClusterMember> {
        self.inner
            .read()
            .values()
            .filter(|m| m.id != self.self_id)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<ClusterMember> {
        self.inner.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
