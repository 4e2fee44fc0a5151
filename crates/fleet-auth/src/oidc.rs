//! Bearer/OIDC login (spec §4.5 "Bearer flow", "Expired-session handling").
//!
//! Grounded on the teacher's `mz-frontegg-auth`, which resolves an opaque
//! bearer token against an external IdP over `reqwest` and maps the
//! response onto internal claims; here the IdP is a generic OIDC provider
//! rather than Frontegg specifically, and a successful resolution starts a
//! session via [`crate::session::SessionManager`] instead of reusing the
//! IdP's own token.

use serde::Deserialize;

use crate::error::AuthError;

/// The subset of an OIDC `/userinfo` response this daemon cares about.
/// `groups` is only present when the IdP is configured to emit it.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
}

fn validate(raw: UserInfoRaw) -> Result<UserInfo, AuthError> {
    let sub = raw.sub.ok_or(AuthError::MissingClaim("sub"))?;
    let email = raw.email.ok_or(AuthError::MissingClaim("email"))?;
    if let Some(groups) = &raw.groups {
        // `groups`, if present, must be an array of strings; serde already
        // enforces that at the deserialization boundary, this just guards
        // against a provider that sends `groups: "admin"` as a bare string
        // (which would otherwise silently fail to deserialize into `raw`
        // rather than this function, so this check is mostly documentation).
        let _: &Vec<String> = groups;
    }
    Ok(UserInfo { sub, email, name: raw.name, groups: raw.groups })
}

#[derive(Debug, Deserialize)]
struct UserInfoRaw {
    sub: Option<String>,
    email: Option<String>,
    name: Option<String>,
    #[serde(default)]
    groups: Option<Vec<String>>,
}

/// Talks to an OIDC provider's `/userinfo` and token-refresh endpoints.
pub struct OidcClient {
    http: reqwest::Client,
    userinfo_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OidcClient {
    pub fn new(userinfo_url: String, token_url: String, client_id: String, client_secret: String) -> OidcClient {
        OidcClient {
            http: reqwest::Client::new(),
            userinfo_url,
            token_url,
            client_id,
            client_secret,
        }
    }

    /// Resolves an opaque bearer token into validated user info.
    pub async fn resolve_bearer(&self, access_token: &str) -> Result<UserInfo, AuthError> {
        let resp = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Other(e.into()))?;
        if !resp.status().is_success() {
            return Err(AuthError::BearerRejected);
        }
        let raw: UserInfoRaw = resp.json().await.map_err(|e| AuthError::Other(e.into()))?;
        validate(raw)
    }

    /// Checks whether a stored access token is still accepted by the IdP,
    /// without starting a new session (spec §4.5 "Expired-session
    /// handling": "if an access token is present and `/userinfo` accepts
    /// it, a new session is issued").
    pub async fn access_token_still_valid(&self, access_token: &str) -> bool {
        self.resolve_bearer(access_token).await.is_ok()
    }

    /// Exchanges a refresh token for a fresh access/refresh token pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        #[derive(serde::Serialize)]
        struct RefreshRequest<'a> {
            grant_type: &'a str,
            refresh_token: &'a str,
            client_id: &'a str,
            client_secret: &'a str,
        }
        let resp = self
            .http
            .post(&self.token_url)
            .form(&RefreshRequest {
                grant_type: "refresh_token",
                refresh_token,
                client_id: &self.client_id,
                client_secret: &self.client_secret,
            })
            .send()
            .await
            .map_err(|e| AuthError::Other(e.into()))?;
        if !resp.status().is_success() {
            return Err(AuthError::ReloginRequired);
        }
        resp.json().await.map_err(|e| AuthError::Other(e.into()))
    }
}

#[derive(Debug, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_sub_and_email() {
        let raw = UserInfoRaw { sub: None, email: Some("a@example.com".into()), name: None, groups: None };
        assert!(matches!(validate(raw), Err(AuthError::MissingClaim("sub"))));

        let raw = UserInfoRaw { sub: Some("u1".into()), email: None, name: None, groups: None };
        assert!(matches!(validate(raw), Err(AuthError::MissingClaim("email"))));
    }

    #[test]
    fn validate_accepts_optional_name_and_groups() {
        let raw = UserInfoRaw {
            sub: Some("u1".into()),
            email: Some("a@example.com".into()),
            name: None,
            groups: Some(vec!["admins".into()]),
        };
        let info = validate(raw).unwrap();
        assert_eq!(info.groups.unwrap(), vec!["admins".to_string()]);
    }
}
