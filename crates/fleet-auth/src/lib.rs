//! Session & token substrate (spec §4.5): cluster-secret-derived session
//! signing and cookie encryption, bearer/OIDC login, and enrolment tokens
//! for pending TLS identities.
//!
//! Grounded on the teacher's `mz-frontegg-auth` (JWT verification against an
//! external IdP via `jsonwebtoken` + `reqwest`) generalized to this spec's
//! self-issued, HKDF-derived session tokens rather than delegating entirely
//! to a third party.

pub mod cookie;
pub mod enrolment;
pub mod error;
pub mod keys;
pub mod oidc;
pub mod secret_ring;
pub mod session;

pub use cookie::CookieCipher;
pub use enrolment::{EnrolmentSweep, PendingIdentity};
pub use error::AuthError;
pub use keys::{derive_cookie_keys, derive_session_key, CookieKeys};
pub use secret_ring::{ClusterSecret, SecretRing};
pub use session::{SessionClaims, SessionManager, SessionVerification};
