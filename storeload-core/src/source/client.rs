//! HTTP client for the REST API source.

use crate::Result;
use crate::error::LoadError;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// API client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL; resources are fetched from `<base_url>/<resource>`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    /// Base backoff delay, doubled on each retry
    pub retry_delay: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://etl-server.fly.dev".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ApiConfig {
    /// Validates API settings.
    ///
    /// # Errors
    /// Returns error if the base URL is not http(s) or the timeout is zero
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url).map_err(|e| {
            LoadError::configuration(format!("invalid API base URL '{}': {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(LoadError::configuration(format!(
                "API base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.timeout.is_zero() {
            return Err(LoadError::configuration("API timeout must be greater than 0"));
        }
        if self.max_retries > 10 {
            return Err(LoadError::configuration("API max_retries should not exceed 10"));
        }
        Ok(())
    }

    /// Sets the URL resource paths are joined onto.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets how many times a failed request is retried.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the first backoff delay; later retries double it.
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

/// Fetches JSON resources with retry and exponential backoff.
///
/// A 404 is an empty resource. Server errors, 429 and transport failures are
/// retried; other client errors and undecodable bodies fail at once.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    config: ApiConfig,
    base: Url,
}

impl ApiClient {
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built
    pub fn new(config: ApiConfig) -> Result<Self> {
        config.validate()?;
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| LoadError::configuration(format!("invalid API base URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("storeload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoadError::source_failed("building HTTP client", e))?;

        Ok(Self {
            client,
            config,
            base,
        })
    }

    /// Configuration this client was built from.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// URL of `resource` under the base URL.
    ///
    /// # Errors
    /// Returns error if `resource` does not form a valid URL
    pub fn endpoint(&self, resource: &str) -> Result<Url> {
        self.base
            .join(resource)
            .map_err(|e| LoadError::configuration(format!("invalid resource '{resource}': {e}")))
    }

    /// Fetches and decodes one resource.
    ///
    /// # Errors
    /// Returns a source error when retries are exhausted, on a non-retryable
    /// HTTP status, or when the body is not JSON
    pub async fn fetch(&self, resource: &str) -> Result<Json> {
        let url = self.endpoint(resource)?;
        let mut attempt: u32 = 0;

        loop {
            debug!("GET {} (attempt {})", url, attempt + 1);
            let error = match self
                .client
                .get(url.clone())
                .header(ACCEPT, "application/json")
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        warn!("Resource '{}' not found at {}; treating as empty", resource, url);
                        return Ok(Json::Array(Vec::new()));
                    }
                    match response.error_for_status() {
                        Ok(response) => {
                            return response.json::<Json>().await.map_err(|e| {
                                LoadError::source_failed(format!("decoding '{resource}' response"), e)
                            });
                        }
                        Err(error)
                            if status.is_server_error()
                                || status == StatusCode::TOO_MANY_REQUESTS =>
                        {
                            error
                        }
                        Err(error) => {
                            return Err(LoadError::source_failed(
                                format!("fetching '{resource}'"),
                                error,
                            ));
                        }
                    }
                }
                Err(error) => error,
            };

            if attempt >= self.config.max_retries {
                return Err(LoadError::source_failed(
                    format!("fetching '{}' after {} attempts", resource, attempt + 1),
                    error,
                ));
            }
            let delay = self
                .config
                .retry_delay
                .saturating_mul(2_u32.saturating_pow(attempt));
            warn!(
                "Fetching '{}' failed ({}); retrying in {:?}",
                resource, error, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
