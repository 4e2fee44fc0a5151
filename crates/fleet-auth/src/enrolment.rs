//! Enrolment tokens (spec §4.5 "Enrolment tokens"): pending TLS identities
//! created by token-class operations, swept hourly for expiry.
//!
//! Grounded on the same copy-on-write pattern used for [`crate::SecretRing`]
//! and `fleet_cluster::members::MemberTable`: the leader is authoritative
//! for the database delete, every member only cancels its own local
//! expired-token operation (spec §4.5: "the leader is authoritative for
//! database deletion while every member cancels its local expired token
//! operations").

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use fleet_ore::now::NowFn;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// A TLS identity awaiting out-of-band activation by presenting a client
/// certificate, per the glossary's "Pending identity".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingIdentity {
    pub token: Uuid,
    pub name: String,
    pub expiry: DateTime<Utc>,
    /// Opaque metadata the activation flow needs (e.g. which projects the
    /// resulting certificate should be restricted to). Stored as a JSON
    /// blob so the sweep can detect and discard corrupt entries without
    /// knowing the full schema.
    pub metadata: serde_json::Value,
}

/// Where pending identities live, and what tells this member it is the
/// leader (only the leader deletes the row from the KV store).
#[async_trait::async_trait]
pub trait PendingIdentityStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<PendingIdentity>>;
    async fn delete(&self, token: Uuid) -> anyhow::Result<()>;
}

/// Whether this member is the cluster leader, decoupled from
/// `fleet-cluster` so this crate has no dependency on it.
#[async_trait::async_trait]
pub trait LeaderCheck: Send + Sync {
    async fn is_leader(&self) -> bool;
}

/// Cancels a per-member operation tracking a pending identity that has
/// just expired, so any in-flight enrolment attempt against it observes
/// cancellation rather than silently racing the deletion.
pub trait LocalOperationCanceller: Send + Sync {
    fn cancel_pending_identity_operation(&self, token: Uuid);
}

/// The periodic sweep over pending identities.
pub struct EnrolmentSweep<S, L, C> {
    store: S,
    leader: L,
    canceller: C,
    now: NowFn,
}

impl<S, L, C> EnrolmentSweep<S, L, C>
where
    S: PendingIdentityStore + 'static,
    L: LeaderCheck + 'static,
    C: LocalOperationCanceller + 'static,
{
    pub fn new(store: S, leader: L, canceller: C, now: NowFn) -> Self {
        EnrolmentSweep { store, leader, canceller, now }
    }

    /// Runs the sweep loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {}
            }
            if let Err(err) = self.tick().await {
                warn!(error = %err, "enrolment token sweep failed");
            }
        }
    }

    /// One sweep pass: every member cancels its own local operations for
    /// expired or corrupt pending identities; only the leader deletes rows.
    pub async fn tick(&self) -> anyhow::Result<()> {
        let now = self.now.now_datetime();
        let pending = self.store.list().await?;
        let is_leader = self.leader.is_leader().await;

        for identity in pending {
            if identity.expiry < now || metadata_is_corrupt(&identity.metadata) {
                self.canceller.cancel_pending_identity_operation(identity.token);
                if is_leader {
                    info!(token = %identity.token, name = %identity.name, "sweeping expired pending identity");
                    self.store.delete(identity.token).await?;
                }
            }
        }
        Ok(())
    }
}

/// True if a raw metadata blob cannot be interpreted by the activation
/// flow's expected schema, meaning the sweep should discard the identity
/// as if it were expired (spec §4.5: "whose stored metadata cannot be
/// unmarshalled").
pub fn metadata_is_corrupt(metadata: &serde_json::Value) -> bool {
    !metadata.is_object()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeStore {
        identities: Mutex<Vec<PendingIdentity>>,
        deleted: Mutex<Vec<Uuid>>,
    }

    #[async_trait::async_trait]
    impl PendingIdentityStore for FakeStore {
        async fn list(&self) -> anyhow::Result<Vec<PendingIdentity>> {
            Ok(self.identities.lock().unwrap().clone())
        }
        async fn delete(&self, token: Uuid) -> anyhow::Result<()> {
            self.deleted.lock().unwrap().push(token);
            Ok(())
        }
    }

    struct FakeLeader(bool);

    #[async_trait::async_trait]
    impl LeaderCheck for FakeLeader {
        async fn is_leader(&self) -> bool {
            self.0
        }
    }

    struct FakeCanceller {
        cancelled: Mutex<Vec<Uuid>>,
    }

    impl LocalOperationCanceller for FakeCanceller {
        fn cancel_pending_identity_operation(&self, token: Uuid) {
            self.cancelled.lock().unwrap().push(token);
        }
    }

    fn now() -> NowFn {
        fleet_ore::now::system_time()
    }

    #[tokio::test]
    async fn leader_deletes_expired_follower_only_cancels() {
        let token = Uuid::from_u128(1);
        let expired = PendingIdentity {
            token,
            name: "p1".into(),
            expiry: Utc::now() - chrono::Duration::hours(1),
            metadata: serde_json::json!({}),
        };
        let store = FakeStore { identities: Mutex::new(vec![expired]), deleted: Mutex::new(vec![]) };
        let canceller = FakeCanceller { cancelled: Mutex::new(vec![]) };
        let sweep = EnrolmentSweep::new(store, FakeLeader(true), canceller, now());
        sweep.tick().await.unwrap();
        assert_eq!(sweep.store.deleted.lock().unwrap().as_slice(), &[token]);
        assert_eq!(sweep.canceller.cancelled.lock().unwrap().as_slice(), &[token]);

        let store2 = FakeStore {
            identities: Mutex::new(vec![PendingIdentity {
                token,
                name: "p1".into(),
                expiry: Utc::now() - chrono::Duration::hours(1),
                metadata: serde_json::json!({}),
            }]),
            deleted: Mutex::new(vec![]),
        };
        let canceller2 = FakeCanceller { cancelled: Mutex::new(vec![]) };
        let sweep2 = EnrolmentSweep::new(store2, FakeLeader(false), canceller2, now());
        sweep2.tick().await.unwrap();
        assert!(sweep2.store.deleted.lock().unwrap().is_empty());
        assert_eq!(sweep2.canceller.cancelled.lock().unwrap().as_slice(), &[token]);
    }

    #[test]
    fn corrupt_metadata_detected() {
        assert!(metadata_is_corrupt(&serde_json::json!("not an object")));
        assert!(!metadata_is_corrupt(&serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn unexpired_identity_with_corrupt_metadata_is_swept_too() {
        let token = Uuid::from_u128(2);
        let unexpired_but_corrupt = PendingIdentity {
            token,
            name: "p2".into(),
            expiry: Utc::now() + chrono::Duration::hours(1),
            metadata: serde_json::json!("not an object"),
        };
        let store = FakeStore { identities: Mutex::new(vec![unexpired_but_corrupt]), deleted: Mutex::new(vec![]) };
        let canceller = FakeCanceller { cancelled: Mutex::new(vec![]) };
        let sweep = EnrolmentSweep::new(store, FakeLeader(true), canceller, now());
        sweep.tick().await.unwrap();
        assert_eq!(sweep.store.deleted.lock().unwrap().as_slice(), &[token]);
        assert_eq!(sweep.canceller.cancelled.lock().unwrap().as_slice(), &[token]);
    }
}
