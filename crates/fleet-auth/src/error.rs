//! Error taxonomy for the auth substrate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session token expired")]
    Expired,

    #[error("session token not yet valid")]
    NotYetValid,

    #[error("session token signature invalid")]
    BadSignature,

    #[error("no cluster secret old enough to have signed this session")]
    NoApplicableSecret,

    #[error("issuer/audience does not match this cluster's certificate fingerprint")]
    IssuerMismatch,

    #[error("identity provider rejected the bearer token")]
    BearerRejected,

    #[error("identity provider response missing required claim: {0}")]
    MissingClaim(&'static str),

    #[error("re-login required")]
    ReloginRequired,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
