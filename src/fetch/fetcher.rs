//! Page fetching with retry and error classification
//!
//! Plain pages go straight through the HTTP client. Script-rendered pages go
//! through a browser session's render endpoint instead, with a longer
//! timeout and no retry loop here (the caller replaces the session and
//! retries once).

use crate::fetch::backoff::BackoffPolicy;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

/// Errors from fetching a plain page
#[derive(Debug, Error)]
pub enum FetchError {
    /// Terminal HTTP status, or a retryable one once attempts ran out
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Transport failure (timeout, connect, reset), terminal or exhausted
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// All attempts consumed without a classified final error
    #[error("{url}: no response after {attempts} attempts")]
    RetriesExhausted { url: String, attempts: u32 },

    /// The HTTP client itself could not be built
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Errors from rendering a page through a browser session
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render endpoint {endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("render request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A successfully fetched page
#[derive(Debug)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Page body content
    pub body: String,
}

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Classifies an HTTP status for retry purposes
///
/// 5xx is retryable. Every 4xx, 429 included, is terminal for the URL.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Classifies a transport-level error for retry purposes
///
/// Timeouts, connection failures, and request-stage errors (resets
/// mid-transfer) are retryable.
pub fn classify_transport(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Fetches a URL, retrying transient failures with exponential backoff
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | 2xx | Return page |
/// | 4xx (429 included) | Terminal, no retry |
/// | 5xx | Retry up to the attempt bound |
/// | Timeout / connect / reset | Retry up to the attempt bound |
/// | Other transport error | Terminal |
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `url` - The URL to fetch
/// * `policy` - Attempt bound and delay curve
pub async fn fetch_page(
    client: &Client,
    url: &Url,
    policy: &BackoffPolicy,
) -> Result<FetchedPage, FetchError> {
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            sleep(policy.delay_for_attempt(attempt - 1)).await;
        }

        match client.get(url.clone()).send().await {
            Ok(response) => {
                let status = response.status();
                let final_url = response.url().clone();

                if status.is_success() {
                    match response.text().await {
                        Ok(body) => {
                            debug!(url = %url, status = status.as_u16(), attempt = attempt + 1, "fetched");
                            return Ok(FetchedPage {
                                final_url,
                                status: status.as_u16(),
                                body,
                            });
                        }
                        // Body reads can die to the same resets as the
                        // request itself, so they share a classification
                        Err(source) => match classify_transport(&source) {
                            RetryDisposition::Retryable => {
                                warn!(url = %url, attempt = attempt + 1, error = %source, "body read failed, will retry");
                                last_error = Some(FetchError::Transport {
                                    url: url.to_string(),
                                    source,
                                });
                            }
                            RetryDisposition::NonRetryable => {
                                return Err(FetchError::Transport {
                                    url: url.to_string(),
                                    source,
                                });
                            }
                        },
                    }
                } else {
                    let error = FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    };
                    match classify_status(status) {
                        RetryDisposition::Retryable => {
                            warn!(url = %url, status = status.as_u16(), attempt = attempt + 1, "server error, will retry");
                            last_error = Some(error);
                        }
                        RetryDisposition::NonRetryable => return Err(error),
                    }
                }
            }
            Err(source) => match classify_transport(&source) {
                RetryDisposition::Retryable => {
                    warn!(url = %url, attempt = attempt + 1, error = %source, "transport failure, will retry");
                    last_error = Some(FetchError::Transport {
                        url: url.to_string(),
                        source,
                    });
                }
                RetryDisposition::NonRetryable => {
                    return Err(FetchError::Transport {
                        url: url.to_string(),
                        source,
                    });
                }
            },
        }
    }

    Err(last_error.unwrap_or(FetchError::RetriesExhausted {
        url: url.to_string(),
        attempts: policy.max_attempts,
    }))
}

/// Renders a URL through a browser session's render endpoint
///
/// The session exposes `GET {endpoint}/render?url=...` and answers with the
/// rendered DOM. A single attempt only: on failure the caller replaces the
/// session and retries once, after which the run fails.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `endpoint` - The leased session's base endpoint
/// * `url` - The page to render
/// * `timeout` - Rendering timeout (longer than the plain fetch timeout)
pub async fn render_page(
    client: &Client,
    endpoint: &str,
    url: &Url,
    timeout: Duration,
) -> Result<FetchedPage, RenderError> {
    let render_url = format!("{}/render", endpoint.trim_end_matches('/'));

    let response = client
        .get(&render_url)
        .query(&[("url", url.as_str())])
        .timeout(timeout)
        .send()
        .await
        .map_err(|source| RenderError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(RenderError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
        });
    }

    // Sessions report the post-redirect URL in a header when they have one
    let final_url = response
        .headers()
        .get("x-final-url")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Url::parse(v).ok())
        .unwrap_or_else(|| url.clone());

    let body = response
        .text()
        .await
        .map_err(|source| RenderError::Transport {
            endpoint: endpoint.to_string(),
            source,
        })?;

    debug!(url = %url, endpoint, "rendered");
    Ok(FetchedPage {
        final_url,
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            RetryDisposition::Retryable
        );
    }

    #[test]
    fn test_client_errors_are_terminal() {
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            classify_status(StatusCode::GONE),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn test_rate_limit_is_terminal() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn test_success_is_not_retried() {
        assert_eq!(
            classify_status(StatusCode::OK),
            RetryDisposition::NonRetryable
        );
    }

    // Transport classification and the retry loop itself are exercised
    // against wiremock servers in the integration tests
}
