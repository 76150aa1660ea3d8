//! Authenticated, rate-limited request execution against the Zont API.
//!
//! [`ZontClient`] is the HTTP implementation of [`Transport`]. It retries
//! transient failures with jittered exponential backoff, honours server
//! `Retry-After` hints, re-authenticates once on an expired token and charges
//! every request to the [`ClientContext`] it shares with other callers.

mod auth;
mod client;
mod context;
mod rate_limit;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use crate::error::ZontResult;

pub use auth::{PasswordLogin, StaticToken, TokenProvider};
pub use client::ZontClient;
pub use context::{ClientContext, Credentials};
pub use rate_limit::{RateBudget, RateLimit};

/// One API call: method, route below the endpoint, optional JSON body.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
}

impl ApiRequest {
    /// Create a request without a body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    /// Create a JSON `POST`, the shape of every Zont API call.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

/// Executes API requests and returns the decoded, `ok`-checked response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> ZontResult<Value>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: ApiRequest) -> ZontResult<Value> {
        (**self).execute(request).await
    }
}
