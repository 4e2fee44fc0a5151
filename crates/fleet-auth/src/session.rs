//! Session tokens (spec §4.5 "Session token"): a signed JWT-like envelope
//! with registered claims `iss = aud = "lxd:<cert-fingerprint>"`, `sub =
//! session_id`, `exp`, `nbf = now + 5min`, `iat = now`, signed HMAC-SHA512
//! with the HKDF-derived session key.
//!
//! Claim timing is validated against an injected [`fleet_ore::now::NowFn`]
//! rather than `jsonwebtoken`'s own wall-clock check, so rotation and
//! clock-skew tests are deterministic.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fleet_ore::now::NowFn;

use crate::error::AuthError;
use crate::keys::derive_session_key;
use crate::secret_ring::SecretRing;

/// How long an issued session remains valid for use (not counting the
/// `nbf` skew-tolerance window). This spec leaves the exact lifetime
/// unspecified beyond "exp"; 24 hours matches the cookie max-age buffer
/// used for the bearer flow (spec §4.5 "Bearer flow").
pub const SESSION_TTL: chrono::Duration = chrono::Duration::hours(24);

/// Clock-skew tolerance before a freshly issued session becomes usable.
pub const NOT_BEFORE_SKEW: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub iss: String,
    pub aud: String,
    pub sub: Uuid,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
}

/// The result of a successful verification: the claims, and whether the
/// caller should re-sign (rotate) the cookie because a newer cluster
/// secret has since appeared in the ring.
pub struct SessionVerification {
    pub claims: SessionClaims,
    pub needs_resign: bool,
}

/// Issues and verifies session tokens against the cluster secret ring.
pub struct SessionManager {
    ring: SecretRing,
    now: NowFn,
    cert_fingerprint: String,
}

impl SessionManager {
    pub fn new(ring: SecretRing, now: NowFn, cert_fingerprint: String) -> SessionManager {
        SessionManager { ring, now, cert_fingerprint }
    }

    fn issuer(&self) -> String {
        format!("lxd:{}", self.cert_fingerprint)
    }

    /// Issues a new session token, returning the encoded token and the
    /// session ID it carries.
    pub fn issue(&self) -> Result<(String, Uuid), AuthError> {
        let secret = self.ring.newest().ok_or(AuthError::NoApplicableSecret)?;
        let session_id = Uuid::now_v7();
        let key = derive_session_key(&secret, session_id)?;
        let now = self.now.now_datetime();
        let claims = SessionClaims {
            iss: self.issuer(),
            aud: self.issuer(),
            sub: session_id,
            exp: (now + SESSION_TTL).timestamp(),
            nbf: (now + NOT_BEFORE_SKEW).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(&claims, &key.0)?;
        Ok((token, session_id))
    }

    /// Verifies a session token: checks signature, issuer/audience, and the
    /// `[nbf, exp]` validity window against the injected clock.
    pub fn verify(&self, token: &str) -> Result<SessionVerification, AuthError> {
        let claims = decode_unverified_claims(token)?;
        let secret = self.ring.select_for_timestamp(timestamp_to_datetime(claims.iat))?;
        let key = derive_session_key(&secret, claims.sub)?;
        let claims = decode(token, &key.0)?;

        let expected_issuer = self.issuer();
        if claims.iss != expected_issuer || claims.aud != expected_issuer {
            return Err(AuthError::IssuerMismatch);
        }

        let now = self.now.now();
        let now = now as i64 / 1000;
        if now < claims.nbf {
            return Err(AuthError::NotYetValid);
        }
        if now > claims.exp {
            return Err(AuthError::Expired);
        }

        Ok(SessionVerification {
            needs_resign: !self.ring.is_newest(&secret),
            claims,
        })
    }

    /// Re-signs `claims` with the current newest secret, used when
    /// [`SessionVerification::needs_resign`] is set (spec §4.5: "the
    /// verifier still accepts the session but signals 're-sign with
    /// current key' so the cookie is rotated lazily").
    pub fn resign(&self, claims: &SessionClaims) -> Result<String, AuthError> {
        let secret = self.ring.newest().ok_or(AuthError::NoApplicableSecret)?;
        let key = derive_session_key(&secret, claims.sub)?;
        encode(claims, &key.0)
    }
}

fn timestamp_to_datetime(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn encode(claims: &SessionClaims, key: &[u8; 64]) -> Result<String, AuthError> {
    jsonwebtoken::encode(&Header::new(Algorithm::HS512), claims, &EncodingKey::from_secret(key))
        .map_err(|e| AuthError::Other(e.into()))
}

fn decode(token: &str, key: &[u8; 64]) -> Result<SessionClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS512);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(key), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::BadSignature)
}

/// Extracts claims without verifying the signature, only to learn `iat` so
/// the right cluster secret can be selected before the real, signature
/// checked decode.
fn decode_unverified_claims(token: &str) -> Result<SessionClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS512);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(b""), &validation)
        .map(|data| data.claims)
        .map_err(|_| AuthError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret_ring::ClusterSecret;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn clock(millis: Arc<AtomicI64>) -> NowFn {
        NowFn::new(move || millis.load(Ordering::SeqCst) as u64)
    }

    fn ring_at(now: DateTime<Utc>) -> SecretRing {
        SecretRing::new(vec![ClusterSecret {
            id: Uuid::from_u128(1),
            created_at: now - chrono::Duration::hours(1),
            material: vec![3u8; 32],
        }])
    }

    #[test]
    fn fresh_session_not_yet_valid_until_skew_window_elapses() {
        let t0 = Utc::now();
        let millis = Arc::new(AtomicI64::new(t0.timestamp_millis()));
        let ring = ring_at(t0);
        let manager = SessionManager::new(ring, clock(millis.clone()), "fp".into());

        let (token, _) = manager.issue().unwrap();
        assert!(matches!(manager.verify(&token), Err(AuthError::NotYetValid)));

        millis.store((t0 + NOT_BEFORE_SKEW + chrono::Duration::seconds(1)).timestamp_millis(), Ordering::SeqCst);
        let verification = manager.verify(&token).unwrap();
        assert!(!verification.needs_resign);
    }

    #[test]
    fn expired_session_is_rejected() {
        let t0 = Utc::now();
        let millis = Arc::new(AtomicI64::new(t0.timestamp_millis()));
        let ring = ring_at(t0);
        let manager = SessionManager::new(ring, clock(millis.clone()), "fp".into());

        let (token, _) = manager.issue().unwrap();
        millis.store((t0 + SESSION_TTL + chrono::Duration::seconds(1)).timestamp_millis(), Ordering::SeqCst);
        assert!(matches!(manager.verify(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn verification_signals_resign_after_secret_rotation() {
        let t0 = Utc::now();
        let millis = Arc::new(AtomicI64::new(t0.timestamp_millis()));
        let ring = ring_at(t0);
        let manager = SessionManager::new(ring.clone(), clock(millis.clone()), "fp".into());

        let (token, _) = manager.issue().unwrap();
        millis.store((t0 + NOT_BEFORE_SKEW + chrono::Duration::seconds(1)).timestamp_millis(), Ordering::SeqCst);

        // Rotate in a newer secret; the old session should still verify but
        // flag that it needs to be resigned.
        ring.set(vec![
            ClusterSecret { id: Uuid::from_u128(1), created_at: t0 - chrono::Duration::hours(1), material: vec![3u8; 32] },
            ClusterSecret { id: Uuid::from_u128(2), created_at: t0, material: vec![9u8; 32] },
        ]);

        let verification = manager.verify(&token).unwrap();
        assert!(verification.needs_resign);
        let resigned = manager.resign(&verification.claims).unwrap();
        assert_ne!(resigned, token);
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let t0 = Utc::now();
        let millis = Arc::new(AtomicI64::new((t0 + NOT_BEFORE_SKEW + chrono::Duration::seconds(1)).timestamp_millis()));
        let ring = ring_at(t0);
        let issuer_a = SessionManager::new(ring.clone(), clock(millis.clone()), "fp-a".into());
        let issuer_b = SessionManager::new(ring, clock(millis), "fp-b".into());

        let (token, _) = issuer_a.issue().unwrap();
        assert!(matches!(issuer_b.verify(&token), Err(AuthError::IssuerMismatch)));
    }
}
