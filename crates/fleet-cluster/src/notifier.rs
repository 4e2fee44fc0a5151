//! Write-replication fan-out (spec §4.2 "Notifier"): after a leader commits
//! a write, it pushes the same write to every live peer so their in-memory
//! caches (and any node-local projections) stay warm without waiting on the
//! KV store's own replication to be observed.
//!
//! Grounded on the teacher's orchestrator-to-backend split: the notifier is
//! the "backend" side that turns one logical write into N concrete calls,
//! tolerating individual failures the way `mz-orchestrator-kubernetes`
//! tolerates a single namespace operation failing without aborting the rest.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use tracing::warn;

use crate::forward::{ForwardedRequest, Forwarder};
use crate::members::MemberTable;

/// Set on a forwarded notification so the receiving member's router can
/// apply the write locally without re-forwarding it — otherwise every
/// member would notify every other member in an infinite loop.
pub const CLUSTER_NOTIFICATION_HEADER: &str = "fleetd-cluster-notification";

/// Fans a committed write out to every live peer.
pub struct Notifier {
    members: MemberTable,
    forwarder: Arc<Forwarder>,
}

impl Notifier {
    pub fn new(members: MemberTable, forwarder: Arc<Forwarder>) -> Notifier {
        Notifier { members, forwarder }
    }

    /// Replays `method path body` to every live peer, marking the header so
    /// peers don't re-notify. Best-effort: a peer that's unreachable logs a
    /// warning and is skipped, it will catch up once it rejoins and reads
    /// the KV store directly.
    pub async fn notify_all(&self, method: Method, path_and_query: &str, body: Bytes) {
        let peers = self.members.alive_peers();
        if peers.is_empty() {
            return;
        }
        let mut headers = HeaderMap::new();
        headers.insert(CLUSTER_NOTIFICATION_HEADER, HeaderValue::from_static("1"));

        for peer in peers {
            let request = ForwardedRequest {
                method: method.clone(),
                path_and_query: path_and_query.to_string(),
                headers: headers.clone(),
                body: body.clone(),
            };
            if let Err(err) = self.forwarder.forward(&peer.address, request).await {
                warn!(member = %peer.id, address = %peer.address, error = %err, "cluster notification failed");
            }
        }
    }
}

/// True if an inbound request carries the notification header, meaning the
/// router should apply it locally and must not forward or re-notify it.
pub fn is_notification(headers: &HeaderMap) -> bool {
    headers.contains_key(CLUSTER_NOTIFICATION_HEADER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::members::ClusterMember;

    #[tokio::test]
    async fn notify_all_is_a_noop_with_no_peers() {
        let members = MemberTable::new("self");
        let forwarder = Arc::new(Forwarder::new(None).unwrap());
        let notifier = Notifier::new(members, forwarder);
        notifier
            .notify_all(Method::PATCH, "/1.0/instances/foo", Bytes::new())
            .await;
    }

    #[tokio::test]
    async fn notify_all_tolerates_unreachable_peers() {
        let members = MemberTable::new("self");
        members.set_members(vec![
            ClusterMember { id: "self".into(), address: "127.0.0.1:1".into() },
            ClusterMember { id: "peer-1".into(), address: "127.0.0.1:1".into() },
        ]);
        let forwarder = Arc::new(Forwarder::new(None).unwrap());
        let notifier = Notifier::new(members, forwarder);
        // peer-1 is unroutable; this must not panic or hang.
        notifier
            .notify_all(Method::PATCH, "/1.0/instances/foo", Bytes::new())
            .await;
    }

    #[test]
    fn is_notification_detects_the_header() {
        let mut headers = HeaderMap::new();
        assert!(!is_notification(&headers));
        headers.insert(CLUSTER_NOTIFICATION_HEADER, HeaderValue::from_static("1"));
        assert!(is_notification(&headers));
    }
}
