//! Split-brain-safe certificate rotation (spec §4.2 "Certificate rotation"):
//! a daily scheduled task attempts ACME renewal on the leader only. On
//! success it stores the new key/cert pair, installs it locally, and fans
//! out via the [`crate::notifier::Notifier`] so every member converges on
//! the same key/cert. Challenge traffic landing on a non-leader is
//! forwarded to the leader so the ACME validation server sees it no matter
//! which member it happened to reach.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::Method;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::forward::{ForwardedRequest, Forwarder};
use crate::leader::LeaderResolver;
use crate::notifier::Notifier;

/// The PEM key/cert pair a member's TLS listener is configured with,
/// named `server.crt`/`server.key` on disk per spec §7 "Persisted state".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub not_after: DateTime<Utc>,
}

/// Performs one ACME renewal attempt, returning the new certificate.
/// Implemented against a concrete ACME client by the daemon binary; kept as
/// a trait here so this crate has no hard dependency on an ACME client
/// crate or network access in tests.
#[async_trait::async_trait]
pub trait AcmeRenewer: Send + Sync {
    async fn renew(&self) -> anyhow::Result<ClusterCertificate>;
}

/// Installs a freshly rotated certificate on the local TLS listener.
#[async_trait::async_trait]
pub trait CertificateInstaller: Send + Sync {
    async fn install(&self, cert: &ClusterCertificate) -> anyhow::Result<()>;
}

/// The recurring rotation control loop plus the inbound-forward helper for
/// ACME HTTP-01 challenges.
pub struct CertRotationTask<R, I> {
    leader: Arc<dyn LeaderResolver>,
    renewer: R,
    installer: I,
    notifier: Arc<Notifier>,
    forwarder: Arc<Forwarder>,
    period: Duration,
}

impl<R, I> CertRotationTask<R, I>
where
    R: AcmeRenewer + 'static,
    I: CertificateInstaller + 'static,
{
    pub fn new(
        leader: Arc<dyn LeaderResolver>,
        renewer: R,
        installer: I,
        notifier: Arc<Notifier>,
        forwarder: Arc<Forwarder>,
        period: Duration,
    ) -> Self {
        CertRotationTask {
            leader,
            renewer,
            installer,
            notifier,
            forwarder,
            period,
        }
    }

    /// Runs the rotation loop until `cancel` fires. Intended to be spawned
    /// via `fleet_ore::task::spawn` by the daemon shell.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.period) => {}
            }
            if let Err(err) = self.tick().await {
                error!(error = %err, "certificate rotation attempt failed");
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let info = self.leader.leader_info().await;
        if !info.leader {
            return Ok(());
        }
        let cert = self.renewer.renew().await?;
        self.installer.install(&cert).await?;
        info!(not_after = %cert.not_after, "renewed cluster certificate, fanning out");
        let body = Bytes::from(serde_json::to_vec(&cert)?);
        self.notifier
            .notify_all(Method::PUT, "/1.0/cluster/certificate", body)
            .await;
        Ok(())
    }

    /// Forwards an ACME HTTP-01 challenge request to the leader so the
    /// validation server sees the challenge regardless of which member the
    /// ACME server happened to reach (spec §4.2).
    pub async fn forward_challenge_to_leader(
        &self,
        request: ForwardedRequest,
    ) -> anyhow::Result<crate::forward::ForwardedResponse> {
        let info = self.leader.leader_info().await;
        self.forwarder.forward(&info.address, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::{LeaderInfo, StaticLeaderResolver};
    use crate::members::MemberTable;

    struct StubRenewer;

    #[async_trait::async_trait]
    impl AcmeRenewer for StubRenewer {
        async fn renew(&self) -> anyhow::Result<ClusterCertificate> {
            Ok(ClusterCertificate {
                cert_pem: "cert".into(),
                key_pem: "key".into(),
                not_after: Utc::now(),
            })
        }
    }

    struct StubInstaller {
        installed: std::sync::Mutex<Option<ClusterCertificate>>,
    }

    #[async_trait::async_trait]
    impl CertificateInstaller for StubInstaller {
        async fn install(&self, cert: &ClusterCertificate) -> anyhow::Result<()> {
            *self.installed.lock().unwrap() = Some(cert.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn non_leader_skips_renewal() {
        let leader = Arc::new(StaticLeaderResolver {
            is_leader: false,
            leader_address: "10.0.0.1:8443".into(),
        });
        let installer = StubInstaller { installed: std::sync::Mutex::new(None) };
        let members = MemberTable::new("self");
        let forwarder = Arc::new(Forwarder::new(None).unwrap());
        let notifier = Arc::new(Notifier::new(members, forwarder.clone()));
        let task = CertRotationTask::new(
            leader,
            StubRenewer,
            installer,
            notifier,
            forwarder,
            Duration::from_secs(86400),
        );
        task.tick().await.unwrap();
        assert!(task.installer.installed.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn leader_renews_and_installs() {
        let leader = Arc::new(StaticLeaderResolver {
            is_leader: true,
            leader_address: "10.0.0.1:8443".into(),
        });
        let installer = StubInstaller { installed: std::sync::Mutex::new(None) };
        let members = MemberTable::new("self");
        let forwarder = Arc::new(Forwarder::new(None).unwrap());
        let notifier = Arc::new(Notifier::new(members, forwarder.clone()));
        let task = CertRotationTask::new(
            leader,
            StubRenewer,
            installer,
            notifier,
            forwarder,
            Duration::from_secs(86400),
        );
        task.tick().await.unwrap();
        assert!(task.installer.installed.lock().unwrap().is_some());
    }

    #[test]
    fn leader_info_shape() {
        let info = LeaderInfo { leader: true, address: "x".into() };
        assert!(info.leader);
    }
}
