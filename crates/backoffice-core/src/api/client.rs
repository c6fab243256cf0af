//! JSON client for the back-office REST API.
//!
//! `ApiClient` resolves paths against the configured base URL, encodes and
//! decodes JSON, and backs off on rate limiting. Authentication is not its
//! concern: it is built over a [`Transport`] that is normally the
//! authenticating gateway, so every call gets the bearer token and the
//! transparent refresh on expiry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::{ApiRequest, ApiResponse, HttpError, Transport};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// How hard to retry a rate-limited request. The delay doubles on each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

/// Clone is cheap, the transport is shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    base_url: Url,
    retry: RetryPolicy,
}

impl ApiClient {
    /// `base_url` should end with `/` so joined paths stay under it.
    pub fn new(transport: Arc<dyn Transport>, base_url: Url) -> Self {
        Self {
            transport,
            base_url,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve an API path such as `invoices/42` or `/products?page=2`.
    pub fn url(&self, path: &str) -> Result<Url, HttpError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| HttpError::InvalidRequest(format!("{}: {}", path, e)))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = ApiRequest::get(self.url(path)?);
        self.execute_json(request).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = ApiRequest::post(self.url(path)?).json(body)?;
        self.execute_json(request).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = ApiRequest::put(self.url(path)?).json(body)?;
        self.execute_json(request).await
    }

    /// An empty response body decodes as `null`, so `T = ()` works for 204s.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = ApiRequest::delete(self.url(path)?);
        self.execute_json(request).await
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let method = request.method.clone();
        let url = request.url.clone();

        let response = self
            .execute(request)
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, url))?;

        response
            .json()
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// Send `request`, backing off and retrying while the server answers 429.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            debug!(method = %request.method, url = %request.url, "API request");
            match self.transport.send(request.clone()).await {
                Err(HttpError::RateLimited) => {
                    retries += 1;
                    if retries > self.retry.max_retries {
                        return Err(HttpError::RateLimited);
                    }
                    warn!(
                        url = %request.url,
                        retry = retries,
                        backoff_ms = backoff.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                other => return other,
            }
        }
    }
}
