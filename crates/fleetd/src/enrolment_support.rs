//! Concrete [`fleet_auth::enrolment`] trait implementations wiring the
//! pending-identity sweep to the local stash, the cluster leader check, and
//! the operations registry.

use std::sync::Arc;

use async_trait::async_trait;
use fleet_auth::enrolment::{LeaderCheck, LocalOperationCanceller, PendingIdentityStore};
use fleet_auth::PendingIdentity;
use fleet_cluster::LeaderResolver;
use fleet_kv::{SqliteStash, Stash};
use fleet_operations::OperationsRegistry;
use uuid::Uuid;

const PENDING_IDENTITIES_COLLECTION: &str = "pending_identities";

pub struct StashPendingIdentityStore {
    stash: Arc<SqliteStash>,
}

impl StashPendingIdentityStore {
    pub fn new(stash: Arc<SqliteStash>) -> StashPendingIdentityStore {
        StashPendingIdentityStore { stash }
    }
}

#[async_trait]
impl PendingIdentityStore for StashPendingIdentityStore {
    async fn list(&self) -> anyhow::Result<Vec<PendingIdentity>> {
        let collection = self
            .stash
            .collection::<Uuid, PendingIdentity>(PENDING_IDENTITIES_COLLECTION)
            .await?;
        let items = self.stash.with_txn(move |txn| txn.items(collection)).await?;
        Ok(items.into_values().collect())
    }

    async fn delete(&self, token: Uuid) -> anyhow::Result<()> {
        let collection = self
            .stash
            .collection::<Uuid, PendingIdentity>(PENDING_IDENTITIES_COLLECTION)
            .await?;
        self.stash
            .with_txn(move |txn| txn.delete(collection, &token))
            .await?;
        Ok(())
    }
}

pub struct ClusterLeaderCheck {
    leader: Arc<dyn LeaderResolver>,
}

impl ClusterLeaderCheck {
    pub fn new(leader: Arc<dyn LeaderResolver>) -> ClusterLeaderCheck {
        ClusterLeaderCheck { leader }
    }
}

#[async_trait]
impl LeaderCheck for ClusterLeaderCheck {
    async fn is_leader(&self) -> bool {
        self.leader.leader_info().await.leader
    }
}

pub struct RegistryOperationCanceller {
    operations: Arc<OperationsRegistry>,
}

impl RegistryOperationCanceller {
    pub fn new(operations: Arc<OperationsRegistry>) -> RegistryOperationCanceller {
        RegistryOperationCanceller { operations }
    }
}

impl LocalOperationCanceller for RegistryOperationCanceller {
    fn cancel_pending_identity_operation(&self, token: Uuid) {
        let Some(op) = self.operations.get(token) else { return };
        fleet_ore::task::spawn(
            move || format!("cancel-pending-identity-{token}"),
            async move {
                if let Err(err) = op.cancel().await {
                    tracing::warn!(token = %token, error = %err, "failed to cancel expired pending-identity operation");
                }
            },
        );
    }
}
