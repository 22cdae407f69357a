//! Admin session: login, current user, logout

use catalog_transport::{ApiRequest, Transport};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::routes;

/// Authenticated admin as returned by login and `/auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUser {
    /// Numeric ids are normalized to strings.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Decode the profile sent with a login response. A malformed profile is
/// logged and dropped; the session itself is still valid.
fn profile(user: Value) -> Option<AdminUser> {
    match serde_json::from_value(user) {
        Ok(user) => Some(user),
        Err(e) => {
            warn!(error = %e, "ignoring malformed user profile in login response");
            None
        }
    }
}

#[derive(Clone)]
pub struct AuthApi {
    transport: Transport,
}

impl AuthApi {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}{path}", self.transport.config().auth_base())
    }

    /// Log in and store the returned tokens in the transport's token store.
    ///
    /// Returns the user profile when the server includes one.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<Option<AdminUser>> {
        let response = catalog_auth::login(
            self.transport.client(),
            &self.auth_url(routes::LOGIN),
            username,
            password,
            self.transport.config().timeout(),
        )
        .await?;

        self.transport.set_credentials(response.tokens()).await?;
        info!(username, "logged in");

        Ok(response.user.and_then(profile))
    }

    /// Profile of the logged-in admin.
    pub async fn me(&self, cancel: &CancellationToken) -> Result<AdminUser> {
        let request = ApiRequest::get(self.auth_url(routes::ME));
        Ok(self.transport.send_json(request, cancel).await?)
    }

    /// Tell the server to end the session, then forget local credentials.
    ///
    /// Credentials are cleared even when the server call fails; that
    /// failure is only logged. Without stored credentials no call is made.
    #[instrument(skip_all)]
    pub async fn logout(&self, cancel: &CancellationToken) -> Result<()> {
        if self.transport.token_store().access_token().await.is_some() {
            let request = ApiRequest::post(self.auth_url(routes::LOGOUT));
            if let Err(e) = self.transport.send(request, cancel).await {
                warn!(error = %e, "logout call failed, clearing credentials anyway");
            }
        }
        self.transport.clear_credentials().await?;
        info!("logged out");
        Ok(())
    }
}
