//! Login and token refresh endpoint calls
//!
//! Both endpoints speak camelCase JSON:
//! - `POST <login_url> {"username","password"} -> {"accessToken","refreshToken","user"?}`
//! - `POST <refresh_url> {"refreshToken"} -> {"accessToken","refreshToken"}`
//!
//! These calls go out on the bare `reqwest::Client`, never through the
//! authenticated transport, so an expired access token is never attached.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Access/refresh token pair as returned by the auth API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Response from the login endpoint.
///
/// `user` is passed through untouched; the admin profile shape belongs to
/// the API crate.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}

impl LoginResponse {
    /// Split off the token pair for storage.
    pub fn tokens(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Exchange a refresh token for a new token pair.
///
/// 401/403 from the endpoint means the refresh token is revoked or expired
/// and maps to `InvalidCredentials`; other failures are `TokenExchange`,
/// `Http` or `Timeout`.
pub async fn refresh_tokens(
    client: &reqwest::Client,
    refresh_url: &str,
    refresh: &str,
    timeout: Duration,
) -> Result<TokenPair> {
    debug!(url = refresh_url, "requesting token refresh");
    let response = client
        .post(refresh_url)
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::from_reqwest("token refresh request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenPair>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

/// Log in with username and password.
pub async fn login(
    client: &reqwest::Client,
    login_url: &str,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<LoginResponse> {
    debug!(url = login_url, username, "requesting login");
    let response = client
        .post(login_url)
        .json(&LoginRequest { username, password })
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::from_reqwest("login request failed", e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        if status.as_u16() == 401 {
            return Err(Error::InvalidCredentials(format!(
                "login rejected ({status}): {body}"
            )));
        }
        return Err(Error::TokenExchange(format!(
            "login returned {status}: {body}"
        )));
    }

    response
        .json::<LoginResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid login response: {e}")))
}
