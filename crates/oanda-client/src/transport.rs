//! Single-attempt HTTP transport
//!
//! One deterministic attempt per call: the transport never retries. It maps
//! the raw HTTP result onto [`AttemptOutcome`] so the dispatcher can decide
//! between credential rotation, backoff, and giving up.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::request::PreparedRequest;

/// Classified result of one transport attempt.
///
/// - 2xx → `Success`
/// - 401/403 → `AuthFailure` (credential-attributable, rotate key)
/// - 429 → `RateLimited` (honor any Retry-After hint)
/// - other 4xx → `ClientError` (the request itself is wrong, never retried)
/// - 5xx → `ServerError` (transient, backoff and retry)
/// - network-level failures → `TransportFailure`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success {
        body: String,
        status: u16,
    },
    AuthFailure {
        status: u16,
    },
    RateLimited {
        status: u16,
        retry_after: Option<Duration>,
    },
    ClientError {
        status: u16,
        body: String,
    },
    ServerError {
        status: u16,
    },
    TransportFailure {
        cause: String,
    },
}

impl AttemptOutcome {
    /// Map an HTTP status and body to an outcome.
    pub fn classify(status: u16, body: String, retry_after: Option<Duration>) -> Self {
        match status {
            200..=299 => AttemptOutcome::Success { body, status },
            401 | 403 => AttemptOutcome::AuthFailure { status },
            429 => AttemptOutcome::RateLimited {
                status,
                retry_after,
            },
            500..=599 => AttemptOutcome::ServerError { status },
            _ => AttemptOutcome::ClientError { status, body },
        }
    }

    /// Outcome label for log events.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success { .. } => "success",
            AttemptOutcome::AuthFailure { .. } => "auth_failure",
            AttemptOutcome::RateLimited { .. } => "rate_limited",
            AttemptOutcome::ClientError { .. } => "client_error",
            AttemptOutcome::ServerError { .. } => "server_error",
            AttemptOutcome::TransportFailure { .. } => "transport_failure",
        }
    }
}

/// Executes one prepared request.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn Transport>`), so tests can script outcomes.
pub trait Transport: Send + Sync {
    fn send<'a>(
        &'a self,
        request: &'a PreparedRequest,
    ) -> Pin<Box<dyn Future<Output = AttemptOutcome> + Send + 'a>>;
}

/// Production transport over a shared `reqwest::Client` with a fixed
/// per-attempt timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client construction failed: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        request: &'a PreparedRequest,
    ) -> Pin<Box<dyn Future<Output = AttemptOutcome> + Send + 'a>> {
        Box::pin(async move {
            let mut req = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.clone());
            if let Some(body) = &request.body {
                req = req.body(body.clone());
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    return AttemptOutcome::TransportFailure {
                        cause: e.to_string(),
                    };
                }
            };

            let status = response.status().as_u16();
            let retry_after = parse_retry_after(response.headers());
            match response.text().await {
                Ok(body) => AttemptOutcome::classify(status, body, retry_after),
                Err(e) => AttemptOutcome::TransportFailure {
                    cause: format!("response body read failed: {e}"),
                },
            }
        })
    }
}

/// Parse a `Retry-After` header given in seconds. HTTP-date values are
/// ignored; the dispatcher falls back to computed backoff.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn classify_success_carries_body_and_status() {
        let outcome = AttemptOutcome::classify(201, "{\"ok\":true}".into(), None);
        assert_eq!(
            outcome,
            AttemptOutcome::Success {
                body: "{\"ok\":true}".into(),
                status: 201
            }
        );
    }

    #[test]
    fn classify_auth_statuses() {
        assert_eq!(
            AttemptOutcome::classify(401, String::new(), None),
            AttemptOutcome::AuthFailure { status: 401 }
        );
        assert_eq!(
            AttemptOutcome::classify(403, String::new(), None),
            AttemptOutcome::AuthFailure { status: 403 }
        );
    }

    #[test]
    fn classify_rate_limited_keeps_hint() {
        let outcome = AttemptOutcome::classify(429, String::new(), Some(Duration::from_secs(7)));
        assert_eq!(
            outcome,
            AttemptOutcome::RateLimited {
                status: 429,
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }

    #[test]
    fn classify_server_errors() {
        for status in [500, 502, 503, 504] {
            assert_eq!(
                AttemptOutcome::classify(status, String::new(), None),
                AttemptOutcome::ServerError { status }
            );
        }
    }

    #[test]
    fn classify_other_4xx_is_client_error() {
        assert_eq!(
            AttemptOutcome::classify(404, "no such account".into(), None),
            AttemptOutcome::ClientError {
                status: 404,
                body: "no such account".into()
            }
        );
    }

    #[test]
    fn retry_after_seconds_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(12)));
    }

    #[test]
    fn retry_after_http_date_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Fri, 31 Dec 1999 23:59:59 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_absent_is_none() {
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }
}
