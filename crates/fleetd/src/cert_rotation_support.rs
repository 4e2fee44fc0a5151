//! Concrete [`fleet_cluster::cert_rotation`] trait implementations the
//! daemon wires the rotation task with.

use async_trait::async_trait;
use fleet_cluster::ClusterCertificate;

use crate::config::RuntimeDirs;

/// No ACME account is configured by default; renewal is a no-op until an
/// operator supplies ACME settings. Kept separate from the trait itself so
/// a real client can be dropped in without touching `fleet-cluster`.
pub struct NoopAcmeRenewer;

#[async_trait]
impl fleet_cluster::cert_rotation::AcmeRenewer for NoopAcmeRenewer {
    async fn renew(&self) -> anyhow::Result<ClusterCertificate> {
        Err(anyhow::anyhow!("no ACME account configured for this member"))
    }
}

/// Writes a rotated certificate to the variable directory's `server.crt`/
/// `server.key` (spec §6 "Persisted state").
pub struct FilesystemCertificateInstaller {
    dirs: RuntimeDirs,
}

impl FilesystemCertificateInstaller {
    pub fn new(dirs: RuntimeDirs) -> FilesystemCertificateInstaller {
        FilesystemCertificateInstaller { dirs }
    }
}

#[async_trait]
impl fleet_cluster::cert_rotation::CertificateInstaller for FilesystemCertificateInstaller {
    async fn install(&self, cert: &ClusterCertificate) -> anyhow::Result<()> {
        tokio::fs::write(self.dirs.server_cert_path(), &cert.cert_pem).await?;
        tokio::fs::write(self.dirs.server_key_path(), &cert.key_pem).await?;
        Ok(())
    }
}
