//! Request description handed to `Transport::send`
//!
//! A request is plain data (method, path, query, JSON body, headers) so it
//! can be replayed once after a token refresh.

use std::time::Duration;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) body: Option<Value>,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append query parameters from any value serializing to a flat object.
    ///
    /// `null` fields are skipped and arrays repeat the key once per element.
    pub fn query<T: Serialize + ?Sized>(mut self, params: &T) -> Result<Self> {
        let value = serde_json::to_value(params)
            .map_err(|e| Error::InvalidRequest(format!("query params: {e}")))?;
        self.query.extend(query_pairs(value)?);
        Ok(self)
    }

    /// Set a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| Error::InvalidRequest(format!("request body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Set a header. A caller-set `Authorization` is never replaced by the
    /// stored token on the first attempt.
    pub fn header(mut self, name: HeaderName, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("header {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Authenticate this request with an explicit bearer token.
    pub fn bearer(self, token: &str) -> Result<Self> {
        self.header(AUTHORIZATION, &format!("Bearer {token}"))
    }

    /// Override the transport's default timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    pub(crate) fn has_explicit_auth(&self) -> bool {
        self.headers.contains_key(AUTHORIZATION)
    }
}

fn scalar_to_string(key: &str, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Array(_) | Value::Object(_) => Err(Error::InvalidRequest(format!(
            "query param {key} must be a scalar"
        ))),
    }
}

fn query_pairs(value: Value) -> Result<Vec<(String, String)>> {
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(Vec::new()),
        other => {
            return Err(Error::InvalidRequest(format!(
                "query params must serialize to an object, got {other}"
            )));
        }
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map {
        match &value {
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = scalar_to_string(&key, item)? {
                        pairs.push((key.clone(), s));
                    }
                }
            }
            _ => {
                if let Some(s) = scalar_to_string(&key, &value)? {
                    pairs.push((key, s));
                }
            }
        }
    }
    Ok(pairs)
}
