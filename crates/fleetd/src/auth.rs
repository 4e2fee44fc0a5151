//! Cookie-session login and verification (spec §4.5 "Bearer flow",
//! "Key derivation", "Expired-session handling").
//!
//! The session cookie value is `base64(session_id) . base64(nonce||ciphertext)`:
//! the session ID travels in the clear because it is the salt the
//! cookie-encryption key is derived from, and because its embedded v7
//! timestamp is what [`fleet_auth::SecretRing::select_for_timestamp`] needs
//! to find the secret that sealed it. This daemon has no separate
//! "login attempt" identifier upstream of the session itself, so `login_id`
//! (spec §4.5) and `session_id` are the same UUID here.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use fleet_api_types::envelope::Envelope;
use fleet_api_types::error::SmartError;
use fleet_auth::keys::derive_cookie_keys;
use fleet_auth::session::SessionClaims;
use fleet_auth::{AuthError, CookieCipher};
use uuid::Uuid;

use crate::state::Daemon;

const SESSION_COOKIE: &str = "fleetd_session";
/// spec §4.5 "Bearer flow": cookie max-age is session expiry plus a 7-day
/// buffer so a browser doesn't discard it right as lazy re-signing would
/// otherwise extend it.
const COOKIE_MAX_AGE: chrono::Duration = chrono::Duration::days(7 + 1);

fn auth_error_to_smart(err: AuthError) -> SmartError {
    match err {
        AuthError::BearerRejected | AuthError::MissingClaim(_) => {
            SmartError::Forbidden(err.to_string())
        }
        AuthError::ReloginRequired | AuthError::Expired | AuthError::NotYetValid => {
            SmartError::Forbidden("re-login required".into())
        }
        AuthError::BadSignature | AuthError::IssuerMismatch | AuthError::NoApplicableSecret => {
            SmartError::Forbidden("invalid session".into())
        }
        AuthError::Other(err) => SmartError::Internal(err),
    }
}

fn uuid_v7_timestamp(id: Uuid) -> DateTime<Utc> {
    match id.get_timestamp() {
        Some(ts) => {
            let (secs, nanos) = ts.to_unix();
            DateTime::from_timestamp(secs as i64, nanos).unwrap_or_else(Utc::now)
        }
        None => Utc::now(),
    }
}

fn seal_cookie(daemon: &Daemon, session_id: Uuid, token: &str) -> Result<String, AuthError> {
    let secret = daemon
        .secret_ring
        .newest()
        .ok_or(AuthError::NoApplicableSecret)?;
    let keys = derive_cookie_keys(&secret, session_id)?;
    let sealed = CookieCipher::new(&keys).encrypt(token.as_bytes())?;
    Ok(format!(
        "{}.{}",
        STANDARD_NO_PAD.encode(session_id.as_bytes()),
        STANDARD_NO_PAD.encode(sealed)
    ))
}

fn open_cookie(daemon: &Daemon, cookie_value: &str) -> Result<(Uuid, String), AuthError> {
    let (id_part, sealed_part) = cookie_value
        .split_once('.')
        .ok_or_else(|| AuthError::Other(anyhow::anyhow!("malformed session cookie")))?;
    let id_bytes = STANDARD_NO_PAD
        .decode(id_part)
        .map_err(|e| AuthError::Other(e.into()))?;
    let session_id = Uuid::from_slice(&id_bytes).map_err(|e| AuthError::Other(e.into()))?;
    let sealed = STANDARD_NO_PAD
        .decode(sealed_part)
        .map_err(|e| AuthError::Other(e.into()))?;
    let secret = daemon
        .secret_ring
        .select_for_timestamp(uuid_v7_timestamp(session_id))?;
    let keys = derive_cookie_keys(&secret, session_id)?;
    let token = CookieCipher::new(&keys).decrypt(&sealed)?;
    Ok((session_id, String::from_utf8(token).map_err(|e| AuthError::Other(e.into()))?))
}

fn set_cookie_header(response: &mut Response, value: &str) {
    let cookie = format!(
        "{SESSION_COOKIE}={value}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age={}",
        COOKIE_MAX_AGE.num_seconds()
    );
    if let Ok(value) = cookie.parse() {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
}

/// `POST /1.0/auth/login`: resolves the caller's `Authorization: Bearer`
/// token against the configured OIDC provider and starts a session (spec
/// §4.5 "Bearer flow").
pub async fn login(
    State(daemon): State<Daemon>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, SmartError> {
    let oidc_config = daemon
        .config
        .oidc
        .clone()
        .ok_or_else(|| SmartError::NotImplemented)?;
    let access_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| SmartError::BadRequest("missing bearer token".into()))?;

    let client = fleet_auth::oidc::OidcClient::new(
        oidc_config.userinfo_url,
        oidc_config.token_url,
        oidc_config.client_id,
        oidc_config.client_secret,
    );
    let user = client
        .resolve_bearer(access_token)
        .await
        .map_err(auth_error_to_smart)?;

    let (token, session_id) = daemon.session_manager.issue().map_err(auth_error_to_smart)?;
    let cookie_value = seal_cookie(&daemon, session_id, &token).map_err(auth_error_to_smart)?;

    let mut response =
        Envelope::sync(serde_json::json!({ "sub": user.sub, "email": user.email })).into_response();
    set_cookie_header(&mut response, &cookie_value);
    Ok(response)
}

/// Verifies the session cookie on every request, rejecting with a 401 when
/// absent or invalid and re-signing (lazily rotating) the cookie when
/// [`fleet_auth::session::SessionVerification::needs_resign`] is set (spec
/// §4.5: "the verifier still accepts the session but signals 're-sign with
/// current key'").
pub async fn require_session(
    State(daemon): State<Daemon>,
    mut request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, SmartError> {
    let cookie_value = request
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| find_cookie(v, SESSION_COOKIE))
        .ok_or_else(|| SmartError::Forbidden("no session".into()))?;

    let (session_id, token) = open_cookie(&daemon, &cookie_value).map_err(auth_error_to_smart)?;
    let verification = daemon.session_manager.verify(&token).map_err(auth_error_to_smart)?;

    request.extensions_mut().insert(verification.claims.clone());
    let mut response = next.run(request).await;

    if verification.needs_resign {
        if let Ok(resigned) = daemon.session_manager.resign(&verification.claims) {
            if let Ok(cookie_value) = seal_cookie(&daemon, session_id, &resigned) {
                set_cookie_header(&mut response, &cookie_value);
            }
        }
    }
    Ok(response)
}

fn find_cookie(header_value: &str, name: &str) -> Option<String> {
    header_value.split(';').find_map(|part| {
        let part = part.trim();
        part.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|v| v.to_string())
    })
}

/// Reads the [`SessionClaims`] a prior [`require_session`] layer attached
/// to the request.
#[allow(dead_code)]
pub fn claims_of(request: &Request<Body>) -> Option<&SessionClaims> {
    request.extensions().get::<SessionClaims>()
}
