//! Leader resolution (spec §4.2 "Leader resolution").
//!
//! Which member is the single-writer leader is ultimately decided by the
//! replicated KV store's consensus (out of scope here, per spec §2's "KV
//! store (external)"); this module only exposes the cheap query surface
//! the rest of the cluster layer needs, behind a trait so a daemon can be
//! wired against whatever the backing store's leadership primitive is.

use async_trait::async_trait;

/// What `leader_info()` (spec §4.2) returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderInfo {
    pub leader: bool,
    pub address: String,
}

/// Resolves "who is the leader" for this member.
#[async_trait]
pub trait LeaderResolver: Send + Sync {
    async fn leader_info(&self) -> LeaderInfo;
}

/// A resolver over a fixed, test-friendly leader address, useful for unit
/// tests of forwarding/notifier logic that don't exercise real leader
/// election.
pub struct StaticLeaderResolver {
    pub is_leader: bool,
    pub leader_address: String,
}

#[async_trait]
impl LeaderResolver for StaticLeaderResolver {
    async fn leader_info(&self) -> LeaderInfo {
        LeaderInfo {
            leader: self.is_leader,
            address: self.leader_address.clone(),
        }
    }
}
