//! Authenticated HTTP transport
//!
//! Every request carries the stored access token unless the caller set
//! `Authorization` itself. A 401 on the first attempt parks the request on
//! the refresh coordinator; the first such request spawns the refresh task
//! and every other 401 in the meantime waits for the same outcome. Each
//! request is retried at most once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use catalog_auth::{TokenPair, TokenStore};
use common::Secret;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::metrics;
use crate::refresh::{Outcome, PendingSettle, RefreshCoordinator, RefreshPhase, Ticket};
use crate::request::ApiRequest;

const X_FEATURE: HeaderName = HeaderName::from_static("x-feature");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Cloneable handle; clones share credentials and refresh state.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    config: TransportConfig,
    store: Arc<dyn TokenStore>,
    default_headers: RwLock<HeaderMap>,
    refresh: RefreshCoordinator,
}

impl Transport {
    pub fn new(config: TransportConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::InvalidRequest(format!("building http client: {e}")))?;
        Self::with_client(client, config, store)
    }

    /// Build on an existing `reqwest::Client` (shared connection pool).
    pub fn with_client(
        client: reqwest::Client,
        config: TransportConfig,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(feature) = &config.feature {
            let value = HeaderValue::from_str(feature)
                .map_err(|e| Error::InvalidRequest(format!("feature header: {e}")))?;
            headers.insert(X_FEATURE, value);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                store,
                default_headers: RwLock::new(headers),
                refresh: RefreshCoordinator::new(),
            }),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Bare client without auth handling, for login and refresh calls.
    pub fn client(&self) -> &reqwest::Client {
        &self.inner.client
    }

    pub fn token_store(&self) -> &Arc<dyn TokenStore> {
        &self.inner.store
    }

    pub fn refresh_phase(&self) -> RefreshPhase {
        self.inner.refresh.phase()
    }

    /// Store a token pair obtained outside a refresh (login).
    pub async fn set_credentials(&self, tokens: TokenPair) -> catalog_auth::Result<()> {
        let access = Secret::new(tokens.access_token.clone());
        self.inner.store.set_tokens(tokens).await?;
        self.inner.set_default_auth(Some(&access));
        self.inner.refresh.install(access);
        Ok(())
    }

    /// Forget all credentials (logout).
    pub async fn clear_credentials(&self) -> catalog_auth::Result<()> {
        self.inner.set_default_auth(None);
        self.inner.refresh.forget();
        self.inner.store.clear().await
    }

    /// Send a request and decode the JSON response body.
    ///
    /// An empty 2xx body decodes to `Value::Null`.
    #[instrument(skip_all, fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: ApiRequest, cancel: &CancellationToken) -> Result<Value> {
        let seen_epoch = self.inner.refresh.epoch();

        match self.dispatch(&request, None, cancel).await {
            Err(Error::Unauthorized { body }) if self.inner.config.enable_refresh => {
                let token = self
                    .fresh_token(seen_epoch, Error::Unauthorized { body }, cancel)
                    .await?;
                debug!("retrying with refreshed token");
                self.dispatch(&request, Some(&token), cancel).await
            }
            other => other,
        }
    }

    /// `send` followed by typed deserialization.
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let value = self.send(request, cancel).await?;
        serde_json::from_value(value).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Obtain the token to retry with after a 401.
    async fn fresh_token(
        &self,
        seen_epoch: u64,
        original: Error,
        cancel: &CancellationToken,
    ) -> Result<Secret<String>> {
        let rx = match self.inner.refresh.join(seen_epoch) {
            Ticket::Ready(token) => return Ok(token),
            Ticket::Queued(rx) => rx,
            Ticket::Leader(rx) => {
                // Runs detached so a cancelled leader cannot strand the queue
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let pending = PendingSettle::new(&inner.refresh);
                    let outcome = inner.refresh_credentials(original).await;
                    let drained = pending.settle(outcome);
                    debug!(drained, "refresh settled");
                });
                rx
            }
        };

        tokio::select! {
            outcome = rx => outcome.unwrap_or_else(|_| {
                Err(Error::RefreshFailed("refresh task dropped".into()))
            }),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// One HTTP attempt. `token` overrides every other auth source.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&Secret<String>>,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let inner = &self.inner;
        let timeout = request.timeout.unwrap_or_else(|| inner.config.timeout());
        let url = inner.config.url_for(&request.path);

        let mut headers = inner.default_headers.read().clone();
        for (name, value) in &request.headers {
            headers.insert(name.clone(), value.clone());
        }
        match token {
            Some(token) => {
                headers.insert(AUTHORIZATION, bearer(token)?);
            }
            None if !request.has_explicit_auth() => {
                // A refreshed token wins over the store, which may have
                // failed to persist it
                let current = match inner.refresh.latest() {
                    Some(token) => Some(token),
                    None => inner.store.access_token().await,
                };
                if let Some(token) = current {
                    headers.insert(AUTHORIZATION, bearer(&token)?);
                }
            }
            None => {}
        }

        let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(X_REQUEST_ID, value);
        }

        let mut builder = inner
            .client
            .request(request.method.clone(), &url)
            .headers(headers)
            .timeout(timeout);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let started = Instant::now();
        let result = tokio::select! {
            result = execute(builder, timeout) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        };
        let elapsed = started.elapsed();

        let method = request.method.as_str();
        match result {
            Ok((status, body)) => {
                metrics::record_request(method, status.as_str(), elapsed);
                debug!(
                    request_id,
                    status = status.as_u16(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "request completed"
                );
                decode(status, body)
            }
            Err(e) => {
                metrics::record_request(method, e.kind(), elapsed);
                debug!(request_id, error = %e, "request failed");
                Err(e)
            }
        }
    }
}

impl Inner {
    /// Body of the refresh task. Never touches the request queue.
    async fn refresh_credentials(&self, original: Error) -> Outcome {
        let Some(refresh) = self.store.refresh_token().await else {
            warn!("no refresh token stored, clearing credentials");
            self.clear_stored().await;
            metrics::record_refresh("no_refresh_token");
            return Err(original);
        };

        let result = catalog_auth::refresh_tokens(
            &self.client,
            &self.config.refresh_url(),
            refresh.expose(),
            self.config.timeout(),
        )
        .await;

        match result {
            Ok(tokens) => {
                let access = Secret::new(tokens.access_token.clone());
                if let Err(e) = self.store.set_tokens(tokens).await {
                    warn!(error = %e, "failed to persist refreshed tokens");
                }
                self.set_default_auth(Some(&access));
                metrics::record_refresh("success");
                info!("access token refreshed");
                Ok(access)
            }
            Err(e) => {
                warn!(error = %e, "token refresh failed, clearing credentials");
                self.clear_stored().await;
                metrics::record_refresh("failure");
                Err(Error::RefreshFailed(e.to_string()))
            }
        }
    }

    async fn clear_stored(&self) {
        self.set_default_auth(None);
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear stored credentials");
        }
    }

    fn set_default_auth(&self, token: Option<&Secret<String>>) {
        let mut headers = self.default_headers.write();
        match token.map(bearer) {
            Some(Ok(value)) => {
                headers.insert(AUTHORIZATION, value);
            }
            Some(Err(e)) => {
                warn!(error = %e, "access token is not a valid header value");
                headers.remove(AUTHORIZATION);
            }
            None => {
                headers.remove(AUTHORIZATION);
            }
        }
    }
}

fn bearer(token: &Secret<String>) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
        .map_err(|e| Error::InvalidRequest(format!("access token header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

async fn execute(builder: reqwest::RequestBuilder, timeout: Duration) -> Result<(StatusCode, String)> {
    let response = builder
        .send()
        .await
        .map_err(|e| Error::from_reqwest(e, timeout))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::from_reqwest(e, timeout))?;
    Ok((status, body))
}

fn decode(status: StatusCode, body: String) -> Result<Value> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::Unauthorized { body });
    }
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| Error::Decode(e.to_string()))
}
