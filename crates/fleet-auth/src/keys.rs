//! HKDF key derivation (spec §4.5 "Key derivation").
//!
//! A session signing key is `HKDF(secret, salt=session_id)`. A
//! cookie-encryption pair is `HKDF(secret, salt=login_id)` with labels
//! `"INTEGRITY"` (64 bytes, for HMAC-SHA512) and `"ENCRYPTION"` (32 bytes,
//! for AES-256).

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::AuthError;
use crate::secret_ring::ClusterSecret;

const INTEGRITY_LABEL: &[u8] = b"INTEGRITY";
const ENCRYPTION_LABEL: &[u8] = b"ENCRYPTION";

/// The derived HMAC-SHA512 key used to sign and verify a session token.
pub struct SessionKey(pub [u8; 64]);

/// The derived cookie-encryption keys: a 64-byte integrity key and a
/// 32-byte AES-256 key.
pub struct CookieKeys {
    pub integrity: [u8; 64],
    pub encryption: [u8; 32],
}

fn hkdf_expand(secret: &ClusterSecret, salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), AuthError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), &secret.material);
    hk.expand(info, out)
        .map_err(|_| AuthError::Other(anyhow::anyhow!("HKDF output length invalid")))
}

/// Derives the session signing key: `HKDF(secret, salt=session_id)`.
pub fn derive_session_key(secret: &ClusterSecret, session_id: uuid::Uuid) -> Result<SessionKey, AuthError> {
    let mut out = [0u8; 64];
    hkdf_expand(secret, session_id.as_bytes(), INTEGRITY_LABEL, &mut out)?;
    Ok(SessionKey(out))
}

/// Derives the cookie-encryption key pair: `HKDF(secret, salt=login_id)`.
pub fn derive_cookie_keys(secret: &ClusterSecret, login_id: uuid::Uuid) -> Result<CookieKeys, AuthError> {
    let mut integrity = [0u8; 64];
    hkdf_expand(secret, login_id.as_bytes(), INTEGRITY_LABEL, &mut integrity)?;
    let mut encryption = [0u8; 32];
    hkdf_expand(secret, login_id.as_bytes(), ENCRYPTION_LABEL, &mut encryption)?;
    Ok(CookieKeys { integrity, encryption })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn secret() -> ClusterSecret {
        ClusterSecret {
            id: uuid::Uuid::from_u128(1),
            created_at: Utc::now(),
            material: vec![7u8; 32],
        }
    }

    #[test]
    fn derivation_is_deterministic_and_salt_dependent() {
        let secret = secret();
        let session_a = uuid::Uuid::from_u128(10);
        let session_b = uuid::Uuid::from_u128(11);

        let key_a1 = derive_session_key(&secret, session_a).unwrap();
        let key_a2 = derive_session_key(&secret, session_a).unwrap();
        assert_eq!(key_a1.0, key_a2.0);

        let key_b = derive_session_key(&secret, session_b).unwrap();
        assert_ne!(key_a1.0, key_b.0);
    }

    #[test]
    fn cookie_keys_integrity_and_encryption_differ() {
        let secret = secret();
        let login_id = uuid::Uuid::from_u128(42);
        let keys = derive_cookie_keys(&secret, login_id).unwrap();
        assert_ne!(&keys.integrity[..32], &keys.encryption[..]);
    }
}
