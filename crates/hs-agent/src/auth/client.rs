//! Token lifecycle HTTP client

use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use hs_core::config::AuthConfig;
use hs_core::{AuthEvent, EventBus};
use hs_protocol::{RefreshTokenRequest, RefreshTokenResponse};

use super::credential::AccessCredential;

/// Coordinator endpoint that exchanges a refresh token for an access token
pub const REFRESH_PATH: &str = "/api/v1/auth/refresh";

#[derive(Debug, Error)]
pub enum ClientError {
    /// The credential could not be refreshed
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The request never produced a response
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The coordinator answered with a non-success status
    #[error("Request failed with status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid coordinator URL: {0}")]
    InvalidUrl(String),
}

/// An outbound coordinator request
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the coordinator base URL, with a leading `/`
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Whether the request carries the bearer token
    pub protected: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
            headers: Vec::new(),
            protected: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, ClientError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A fully-read coordinator response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    fn into_status_error(self) -> ClientError {
        ClientError::Status {
            status: self.status,
            body: String::from_utf8_lossy(&self.body).into_owned(),
        }
    }
}

/// HTTP client that keeps the agent's credential fresh
///
/// Protected requests are refreshed up front when the access token is
/// expired or inside the refresh window, and retried exactly once after a
/// `401`. Refreshes run with the credential lock held, so concurrent callers
/// that all need a refresh trigger one refresh between them.
pub struct AuthClient {
    base_url: String,
    http: reqwest::Client,
    credential: Mutex<AccessCredential>,
    refresh_timeout: Duration,
    refresh_window: Duration,
    events: EventBus,
}

impl AuthClient {
    pub fn new(
        base_url: &str,
        credential: AccessCredential,
        config: &AuthConfig,
        events: EventBus,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            base_url: base_url.to_string(),
            http,
            credential: Mutex::new(credential),
            refresh_timeout: config.refresh_timeout,
            refresh_window: config.refresh_window,
            events,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Snapshot of the current credential
    pub async fn credential(&self) -> AccessCredential {
        self.credential.lock().await.clone()
    }

    /// Perform a request, refreshing and retrying as needed for protected ones.
    ///
    /// A second `401` is returned as a response, not an error.
    pub async fn execute(&self, req: ApiRequest) -> Result<ApiResponse, ClientError> {
        if !req.protected {
            return self.send(&req, None).await;
        }

        self.refresh_if_needed().await?;
        let token = self.credential.lock().await.access_token.clone();
        let resp = self.send(&req, Some(&token)).await?;

        if resp.status != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!("{} {} got 401, refreshing once", req.method, req.path);
        self.refresh_after_unauthorized(&token).await?;
        let token = self.credential.lock().await.access_token.clone();
        self.send(&req, Some(&token)).await
    }

    /// Perform a request and decode a 2xx JSON body
    pub async fn execute_json<T: DeserializeOwned>(&self, req: ApiRequest) -> Result<T, ClientError> {
        let resp = self.execute(req).await?;
        if !resp.is_success() {
            return Err(resp.into_status_error());
        }
        resp.json()
    }

    /// Perform a request and require a 2xx status
    pub async fn execute_ok(&self, req: ApiRequest) -> Result<(), ClientError> {
        let resp = self.execute(req).await?;
        if !resp.is_success() {
            return Err(resp.into_status_error());
        }
        Ok(())
    }

    /// Refresh unconditionally
    pub async fn refresh_token(&self) -> Result<(), ClientError> {
        let mut cred = self.credential.lock().await;
        self.refresh_locked(&mut cred).await
    }

    /// Refresh when the access token is expired or inside the refresh window.
    /// Returns whether a refresh happened.
    pub async fn refresh_if_needed(&self) -> Result<bool, ClientError> {
        let mut cred = self.credential.lock().await;
        if !cred.needs_refresh(self.refresh_window) {
            return Ok(false);
        }
        self.refresh_locked(&mut cred).await?;
        Ok(true)
    }

    /// Refresh after `rejected` got a 401, unless another caller already
    /// replaced it.
    async fn refresh_after_unauthorized(&self, rejected: &str) -> Result<(), ClientError> {
        let mut cred = self.credential.lock().await;
        if cred.access_token != rejected {
            tracing::debug!("Credential already refreshed by another request");
            return Ok(());
        }
        self.refresh_locked(&mut cred).await
    }

    async fn refresh_locked(&self, cred: &mut AccessCredential) -> Result<(), ClientError> {
        match self.request_refresh(&cred.refresh_token).await {
            Ok(resp) => {
                cred.access_token = resp.access_token;
                cred.expires_at = resp.expires_at;
                if let Some(rotated) = resp.refresh_token.filter(|t| !t.is_empty()) {
                    cred.refresh_token = rotated;
                }
                tracing::info!("Access token refreshed, expires at {}", cred.expires_at);
                self.events.publish(AuthEvent::Refreshed {
                    access_token: cred.access_token.clone(),
                    refresh_token: cred.refresh_token.clone(),
                    expires_at: cred.expires_at,
                });
                Ok(())
            }
            Err(reason) => {
                tracing::warn!("Token refresh failed: {}", reason);
                self.events.publish(AuthEvent::RefreshFailed {
                    reason: reason.clone(),
                });
                Err(ClientError::RefreshFailed(reason))
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshTokenResponse, String> {
        if refresh_token.is_empty() {
            return Err("no refresh token available".to_string());
        }

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, REFRESH_PATH))
            .timeout(self.refresh_timeout)
            .json(&RefreshTokenRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("coordinator returned {}", status));
        }

        resp.json::<RefreshTokenResponse>()
            .await
            .map_err(|e| format!("invalid refresh response: {}", e))
    }

    async fn send(&self, req: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ClientError> {
        let url = format!("{}{}", self.base_url, req.path);
        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(body) = &req.body {
            builder = builder.json(body);
        }
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        tracing::trace!("{} {} -> {}", req.method, req.path, status);

        Ok(ApiResponse { status, body })
    }
}
