use bytes::Bytes;
use reqwest::{Client, ClientBuilder};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::upstream::UpstreamError;

/// Configuration for per-endpoint connection limits.
///
/// Each endpoint gets its own semaphore so one slow provider can never starve the
/// in-flight budget of the others, while all endpoints share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent in-flight requests to this endpoint
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds under normal load
    pub permit_timeout_ms: u64,
    /// Permit acquisition timeout in milliseconds when permits are scarce
    pub permit_timeout_scarce_ms: u64,
    /// Number of available permits below which they are considered scarce
    pub scarce_permit_threshold: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 64,
            permit_timeout_ms: 500,
            permit_timeout_scarce_ms: 200,
            scarce_permit_threshold: 8,
        }
    }
}

/// Builds the keep-alive client shared by every endpoint.
///
/// # Errors
///
/// Returns an error if the underlying reqwest client fails to build.
pub fn build_shared_client() -> Result<Client, UpstreamError> {
    ClientBuilder::new()
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(64)
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(60))
        .http2_adaptive_window(true)
        .use_rustls_tls()
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("solgate/", env!("CARGO_PKG_VERSION")))
        .tcp_keepalive(Duration::from_secs(30))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "failed to build http client");
            UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
        })
}

/// Transport for one endpoint: a pooled POST with a bounded number of in-flight sockets.
///
/// The transport performs exactly one attempt per call. Retrying on another endpoint is
/// the connection manager's decision, not the transport's.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

/// RAII guard ensuring semaphore permits are always released.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl PermitGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>) -> Self {
        Self { _permit: permit, semaphore }
    }

    fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

impl HttpClient {
    /// Creates a transport over the shared client with its own in-flight ceiling.
    #[must_use]
    pub fn new(client: Client, config: HttpClientConfig) -> Self {
        Self { concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)), client, config }
    }

    /// Sanitizes network errors so upstream URLs and keys never leak into error text.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "unexpected redirect".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Sends one HTTP POST with a JSON body.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Timeout`] if the request times out
    /// - [`UpstreamError::ConcurrencyLimit`] if no permit frees up in time
    /// - [`UpstreamError::HttpError`] for non-success HTTP status codes
    /// - [`UpstreamError::ConnectionFailed`] for network-related failures
    pub async fn send_request(
        &self,
        url: &str,
        headers: &[(String, String)],
        body: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, UpstreamError> {
        let permit_timeout =
            if self.concurrent_limit.available_permits() < self.config.scarce_permit_threshold {
                Duration::from_millis(self.config.permit_timeout_scarce_ms)
            } else {
                Duration::from_millis(self.config.permit_timeout_ms)
            };

        let permit = tokio::time::timeout(
            permit_timeout,
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            UpstreamError::ConcurrencyLimit("no connection permit available".to_string())
        })?
        .map_err(|_| UpstreamError::ConcurrencyLimit("connection semaphore closed".to_string()))?;

        let permit_guard = PermitGuard::new(permit, self.concurrent_limit.clone());
        tracing::trace!(
            available_permits = permit_guard.available_permits(),
            "http request started"
        );

        let mut request =
            self.client.post(url).header("content-type", "application/json").timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = match request.body(body).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(UpstreamError::Timeout),
            Err(e) => return Err(UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))),
        };

        let status = response.status();
        if status.is_success() {
            let result = response.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::ConnectionFailed(Self::sanitize_network_error(&e))
                }
            });
            tracing::trace!(
                available_permits = permit_guard.available_permits(),
                "http request completed"
            );
            return result;
        }

        let raw_text = response.text().await.unwrap_or_default();
        let sanitized_text = truncate_utf8(&raw_text, 256);
        tracing::trace!(status = status.as_u16(), "http request failed");
        Err(UpstreamError::HttpError(status.as_u16(), sanitized_text))
    }

    /// Number of requests currently holding a connection permit.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.config.concurrent_limit.saturating_sub(self.concurrent_limit.available_permits())
    }
}

/// Truncates on a char boundary so multi-byte error bodies never panic the slice.
fn truncate_utf8(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}
