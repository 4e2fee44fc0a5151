//! The cluster secret ring (spec §4.5, §5 "Shared-resource policy": "the
//! cluster secret ring is copy-on-write"). Every member holds the same
//! ordered set of secrets, replicated through the KV store; a session's
//! embedded v7 UUID timestamp selects which secret signed it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// One generation of cluster secret material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSecret {
    pub id: uuid::Uuid,
    pub created_at: DateTime<Utc>,
    /// Raw HKDF input key material. Never logged or returned over the API.
    pub material: Vec<u8>,
}

/// A copy-on-write snapshot of the secret ring: mutations (rotation,
/// bootstrap) produce a new `Arc<Vec<_>>`; readers take a read lock only
/// long enough to clone the pointer.
#[derive(Clone)]
pub struct SecretRing {
    inner: Arc<RwLock<Arc<Vec<ClusterSecret>>>>,
}

impl SecretRing {
    pub fn new(secrets: Vec<ClusterSecret>) -> SecretRing {
        SecretRing {
            inner: Arc::new(RwLock::new(Arc::new(secrets))),
        }
    }

    /// Replaces the ring wholesale, as happens when a new secret is
    /// generated and replicated, or when this member catches up after a
    /// restart.
    pub fn set(&self, secrets: Vec<ClusterSecret>) {
        *self.inner.write() = Arc::new(secrets);
    }

    /// A point-in-time snapshot of every secret, newest first.
    pub fn snapshot(&self) -> Arc<Vec<ClusterSecret>> {
        self.inner.read().clone()
    }

    /// The newest secret in the ring, used to sign every new session.
    pub fn newest(&self) -> Option<ClusterSecret> {
        self.snapshot().iter().max_by_key(|s| s.created_at).cloned()
    }

    /// Selects the secret whose `created_at` is `<=` the session's embedded
    /// timestamp, preferring the newest such secret (spec §4.5: "the
    /// session ID is a v7 UUID, and its embedded timestamp is used to
    /// select the secret whose creation time is <= that timestamp").
    pub fn select_for_timestamp(&self, issued_at: DateTime<Utc>) -> Result<ClusterSecret, AuthError> {
        self.snapshot()
            .iter()
            .filter(|s| s.created_at <= issued_at)
            .max_by_key(|s| s.created_at)
            .cloned()
            .ok_or(AuthError::NoApplicableSecret)
    }

    /// True if `secret` is the newest secret in the ring — used to decide
    /// whether a verified session should be lazily re-signed.
    pub fn is_newest(&self, secret: &ClusterSecret) -> bool {
        self.newest().map(|n| n.id == secret.id).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn secret(id: u8, created_at: DateTime<Utc>) -> ClusterSecret {
        ClusterSecret {
            id: uuid::Uuid::from_u128(id as u128),
            created_at,
            material: vec![id; 32],
        }
    }

    #[test]
    fn selects_newest_secret_not_newer_than_timestamp() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);
        let ring = SecretRing::new(vec![secret(1, t0), secret(2, t1)]);

        let selected = ring.select_for_timestamp(t0 + Duration::minutes(5)).unwrap();
        assert_eq!(selected.id, secret(1, t0).id);

        let selected = ring.select_for_timestamp(t1 + Duration::minutes(5)).unwrap();
        assert_eq!(selected.id, secret(2, t1).id);
    }

    #[test]
    fn no_applicable_secret_before_any_creation() {
        let t0 = Utc::now();
        let ring = SecretRing::new(vec![secret(1, t0)]);
        let result = ring.select_for_timestamp(t0 - Duration::hours(1));
        assert!(matches!(result, Err(AuthError::NoApplicableSecret)));
    }

    #[test]
    fn is_newest_tracks_rotation() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);
        let ring = SecretRing::new(vec![secret(1, t0)]);
        let old = ring.newest().unwrap();
        assert!(ring.is_newest(&old));

        ring.set(vec![secret(1, t0), secret(2, t1)]);
        assert!(!ring.is_newest(&old));
    }
}
