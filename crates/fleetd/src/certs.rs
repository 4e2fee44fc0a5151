//! Bootstraps this member's TLS identity (spec §6 "Persisted state":
//! "Certificate material is stored as PEM pairs ... in the variable
//! directory"). Real cluster trust (mutual-TLS client certs presented to
//! peers, ACME-issued replacements) is handled by
//! [`fleet_cluster::cert_rotation`]; this module only covers the
//! first-boot case where no certificate exists yet.

use sha2::{Digest, Sha256};

use crate::config::RuntimeDirs;

/// Ensures `dirs` holds a server certificate/key pair, generating a
/// self-signed one on first boot, and returns the SHA-256 fingerprint of
/// the certificate (hex-encoded) used as the session issuer's `iss`/`aud`
/// (spec §4.5).
pub fn ensure_server_certificate(dirs: &RuntimeDirs) -> anyhow::Result<String> {
    let cert_path = dirs.server_cert_path();
    let key_path = dirs.server_key_path();

    let cert_pem = if cert_path.exists() && key_path.exists() {
        std::fs::read_to_string(&cert_path)?
    } else {
        let certified_key = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
        std::fs::write(&cert_path, certified_key.cert.pem())?;
        std::fs::write(&key_path, certified_key.key_pair.serialize_pem())?;
        certified_key.cert.pem()
    };

    let mut hasher = Sha256::new();
    hasher.update(cert_pem.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
