//! Cookie encryption (spec §4.5 "Key derivation"): the session cookie body
//! is AES-256-GCM encrypted under the derived `ENCRYPTION` key. `GCM`
//! folds confidentiality and integrity into the one key, so the separately
//! derived `INTEGRITY` key is unused by this AEAD scheme; it is still
//! derived alongside `ENCRYPTION` so the key schedule matches spec §4.5
//! exactly and a future cookie field needing a standalone MAC doesn't
//! require touching key derivation.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::AuthError;
use crate::keys::CookieKeys;

const NONCE_LEN: usize = 12;

/// Encrypts and decrypts session cookie payloads under a derived
/// [`CookieKeys::encryption`] key.
pub struct CookieCipher {
    cipher: Aes256Gcm,
}

impl CookieCipher {
    pub fn new(keys: &CookieKeys) -> CookieCipher {
        CookieCipher {
            cipher: Aes256Gcm::new_from_slice(&keys.encryption).expect("32-byte key"),
        }
    }

    /// Encrypts `plaintext`, returning `nonce || ciphertext` so decryption
    /// needs no side-channel for the nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let mut out = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AuthError::Other(anyhow::anyhow!("cookie encryption failed")))?;
        let mut result = nonce_bytes.to_vec();
        result.append(&mut out);
        Ok(result)
    }

    /// Decrypts a payload produced by [`Self::encrypt`].
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>, AuthError> {
        if sealed.len() < NONCE_LEN {
            return Err(AuthError::Other(anyhow::anyhow!("cookie payload too short")));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AuthError::Other(anyhow::anyhow!("cookie decryption failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::derive_cookie_keys;
    use crate::secret_ring::ClusterSecret;
    use chrono::Utc;

    fn keys() -> CookieKeys {
        let secret = ClusterSecret {
            id: uuid::Uuid::from_u128(1),
            created_at: Utc::now(),
            material: vec![5u8; 32],
        };
        derive_cookie_keys(&secret, uuid::Uuid::from_u128(2)).unwrap()
    }

    #[test]
    fn round_trips() {
        let cipher = CookieCipher::new(&keys());
        let sealed = cipher.encrypt(b"session-payload").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), b"session-payload");
    }

    #[test]
    fn tampering_is_rejected() {
        let cipher = CookieCipher::new(&keys());
        let mut sealed = cipher.encrypt(b"session-payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(cipher.decrypt(&sealed).is_err());
    }
}
