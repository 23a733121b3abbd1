//! HTTP transport with failure classification and retry.
//!
//! A [`Transport`] owns one connection pool, the default headers, and the
//! timeout configuration. Every call goes through [`Transport::request`],
//! which classifies failures into [`ClientError`] kinds and retries the
//! transient ones.

use crate::config::TransportConfig;
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// Header carrying the workspace scope.
pub const WORKSPACE_HEADER: &str = "x-workspace-name";

/// Longest error body kept in a message.
const MAX_ERROR_BODY: usize = 500;

/// HTTP transport with retry logic.
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    config: Arc<TransportConfig>,
    retry: RetryPolicy,
    slots: Arc<Semaphore>,
    attempts: Arc<AtomicU64>,
}

impl Transport {
    /// Create a new transport.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::with_counter(config, Arc::new(AtomicU64::new(0)))
    }

    /// Create a transport that reports its attempts into `attempts`.
    pub(crate) fn with_counter(config: TransportConfig, attempts: Arc<AtomicU64>) -> Result<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.access_token))
            .map_err(|_| ClientError::InvalidConfig("access_token contains invalid characters".to_string()))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        if let Some(workspace) = &config.workspace_name {
            let value = HeaderValue::from_str(workspace).map_err(|_| {
                ClientError::InvalidConfig("workspace_name contains invalid characters".to_string())
            })?;
            headers.insert(HeaderName::from_static(WORKSPACE_HEADER), value);
        }

        // Without keep-alive the server should close the socket too.
        if config.pool.max_keepalive_connections == 0 {
            headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        let mut builder = Client::builder()
            .connect_timeout(config.timeouts.connect)
            .read_timeout(config.timeouts.read)
            .timeout(config.timeouts.request_ceiling())
            .pool_max_idle_per_host(config.pool.max_keepalive_connections)
            .pool_idle_timeout(config.pool.keepalive_expiry)
            .tcp_nodelay(true)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .gzip(true)
            .brotli(true);

        if !config.http2 {
            builder = builder.http1_only();
        }

        let client = builder.build().map_err(ClientError::Build)?;

        debug!(
            base_url = %config.base_url,
            max_connections = config.pool.max_connections,
            max_keepalive = config.pool.max_keepalive_connections,
            "Transport created"
        );

        Ok(Self {
            client,
            retry: RetryPolicy::new(config.retry.clone()),
            slots: Arc::new(Semaphore::new(config.pool.max_connections)),
            config: Arc::new(config),
            attempts,
        })
    }

    /// The configuration this transport was built from.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Total attempts made so far, retries included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub(crate) fn attempt_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.attempts)
    }

    /// Full URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/api/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Send a GET request.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.request(Method::GET, path, None, None).await
    }

    /// Send a POST request with a JSON body.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::POST, path, Some(body), None).await
    }

    /// Send a PUT request with a JSON body.
    pub async fn put(&self, path: &str, body: &Value) -> Result<Value> {
        self.request(Method::PUT, path, Some(body), None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.request(Method::DELETE, path, None, None).await
    }

    /// Send a request, retrying transient failures.
    ///
    /// `headers` are merged over the default headers. Returns the parsed JSON
    /// body (`{}` for an empty body) or the last classified failure once the
    /// retry budget is spent.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
    ) -> Result<Value> {
        let url = self.url(path);
        let mut attempt = 0;

        loop {
            self.attempts.fetch_add(1, Ordering::Relaxed);

            let error = match self.send_once(&method, &url, body, headers).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let decision = self.retry.decide(&error, attempt);
            if !decision.retryable {
                if error.is_retryable() {
                    warn!(
                        %url,
                        attempts = attempt + 1,
                        reason = %decision.reason,
                        error = %error,
                        "Retries exhausted"
                    );
                } else {
                    warn!(%url, reason = %decision.reason, error = %error, "Non-retryable error");
                }
                return Err(error);
            }

            debug!(
                %url,
                attempt = attempt + 1,
                max_retries = self.retry.max_retries(),
                delay_ms = u64::try_from(decision.delay.as_millis()).unwrap_or(u64::MAX),
                reason = %decision.reason,
                error = %error,
                "Request failed, retrying"
            );
            sleep(decision.delay).await;
            attempt += 1;
        }
    }

    /// Send a single request without retries.
    async fn send_once(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        headers: Option<&HeaderMap>,
    ) -> Result<Value> {
        let pool_timeout = self.config.timeouts.pool;
        let _slot = match tokio::time::timeout(pool_timeout, Arc::clone(&self.slots).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ClientError::Protocol("connection pool is closed".to_string())),
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "no connection available within {}ms",
                    pool_timeout.as_millis()
                )));
            }
        };

        let mut request = self.client.request(method.clone(), url);
        if let Some(headers) = headers {
            request = request.headers(headers.clone());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        trace!(%method, url, "Sending request");

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let bytes = response.bytes().await.map_err(classify_transport_error)?;

        if status.is_success() {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Object(serde_json::Map::new()));
            }
            return serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse {
                message: format!("failed to parse response body: {e}"),
            });
        }

        Err(classify_status(status, &bytes, retry_after))
    }
}

/// Map a reqwest failure onto the transport-level kinds.
fn classify_transport_error(error: reqwest::Error) -> ClientError {
    if error.is_timeout() {
        ClientError::Timeout(error.to_string())
    } else if error.is_connect() {
        ClientError::Connect(error.to_string())
    } else if error.is_builder() {
        ClientError::InvalidConfig(error.to_string())
    } else {
        // Everything else is the exchange breaking off mid-stream.
        ClientError::Protocol(error.to_string())
    }
}

/// Map a non-success status onto its error kind.
fn classify_status(status: StatusCode, body: &[u8], retry_after: Option<Duration>) -> ClientError {
    let code = status.as_u16();
    match code {
        401 => ClientError::Authentication {
            message: error_message(body, "Authentication failed"),
        },
        404 => ClientError::NotFound {
            message: error_message(body, "Resource not found"),
        },
        429 => ClientError::RateLimited {
            message: error_message(body, "Rate limit exceeded"),
            retry_after,
        },
        500..=599 => ClientError::Server {
            status: code,
            message: error_message(body, "Server error"),
        },
        _ => ClientError::Client {
            status: code,
            message: error_message(body, &format!("HTTP {code}")),
        },
    }
}

/// Pull a readable message out of an error body.
fn error_message(body: &[u8], default: &str) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return default.to_string();
    };

    let message = ["error", "detail", "message"]
        .iter()
        .find_map(|key| match value.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        });

    match message {
        Some(m) if m.len() > MAX_ERROR_BODY => {
            let cut = (0..=MAX_ERROR_BODY).rev().find(|&i| m.is_char_boundary(i)).unwrap_or(0);
            format!("{}...", &m[..cut])
        }
        Some(m) => m,
        None => default.to_string(),
    }
}

/// `Retry-After` as whole seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn transport(base_url: &str) -> Transport {
        Transport::new(TransportConfig::new(base_url, "token")).unwrap()
    }

    #[test]
    fn test_url_building() {
        let t = transport("https://t2s.example.com/");
        assert_eq!(
            t.url("/projects/p1/contexts"),
            "https://t2s.example.com/api/projects/p1/contexts"
        );
        assert_eq!(t.url("projects"), "https://t2s.example.com/api/projects");
    }

    #[test]
    fn test_status_classification() {
        let cases = [
            (401, ErrorKind::Authentication),
            (404, ErrorKind::NotFound),
            (400, ErrorKind::ClientFault),
            (409, ErrorKind::ClientFault),
            (429, ErrorKind::RateLimited),
            (500, ErrorKind::ServerFault),
            (503, ErrorKind::ServerFault),
        ];
        for (code, kind) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify_status(status, b"", None).kind(), kind, "status {code}");
        }
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(br#"{"error": "bad project"}"#, "x"), "bad project");
        assert_eq!(error_message(br#"{"detail": "missing name"}"#, "x"), "missing name");
        assert_eq!(
            error_message(br#"{"detail": [{"loc": ["body"]}]}"#, "x"),
            r#"[{"loc":["body"]}]"#
        );
        assert_eq!(error_message(b"<html>oops</html>", "Server error"), "Server error");
        assert_eq!(error_message(b"", "Server error"), "Server error");

        let long = format!(r#"{{"error": "{}"}}"#, "e".repeat(600));
        assert_eq!(error_message(long.as_bytes(), "x").len(), MAX_ERROR_BODY + 3);
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("5"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(5)));

        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Transport::new(TransportConfig::new("https://t2s.example.com", "")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
