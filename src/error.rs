//! Error types for the text-to-SQL client.
//!
//! [`ClientError`] is what a single [`Transport`](crate::Transport) call can
//! fail with. [`BulkError`] is what a whole batch fails with, and
//! [`TaskError`] covers tasks that never produced a value at all.

use crate::outcome::ItemFailure;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a failed call, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local, pre-network validation failure.
    Validation,
    /// HTTP 401.
    Authentication,
    /// HTTP 404.
    NotFound,
    /// Any other 4xx (and any unexpected non-2xx status).
    ClientFault,
    /// HTTP 429.
    RateLimited,
    /// HTTP 5xx.
    ServerFault,
    /// The connection could not be established.
    Connect,
    /// Connect, read, or pool wait timed out.
    Timeout,
    /// The connection dropped mid-exchange.
    Protocol,
    /// A 2xx response whose body could not be decoded.
    InvalidResponse,
    /// Bad client configuration.
    Config,
}

impl ErrorKind {
    /// Whether a failure of this kind is transient and worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerFault | Self::Connect | Self::Timeout | Self::Protocol
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Authentication => "authentication",
            Self::NotFound => "not_found",
            Self::ClientFault => "client_fault",
            Self::RateLimited => "rate_limited",
            Self::ServerFault => "server_fault",
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::InvalidResponse => "invalid_response",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// Errors returned by a [`Transport`](crate::Transport) call.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Request validation failed before anything was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server rejected the credentials (HTTP 401).
    #[error("authentication failed: {message}")]
    Authentication {
        /// Message extracted from the response body.
        message: String,
    },

    /// The resource does not exist (HTTP 404).
    #[error("not found: {message}")]
    NotFound {
        /// Message extracted from the response body.
        message: String,
    },

    /// The server rejected the request (4xx other than 401, 404, 429).
    #[error("client error {status}: {message}")]
    Client {
        /// HTTP status code returned.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// Too many requests (HTTP 429).
    #[error("rate limited: {message}{}", retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimited {
        /// Message extracted from the response body.
        message: String,
        /// Wait requested by the server through `Retry-After`.
        retry_after: Option<Duration>,
    },

    /// The server failed (HTTP 5xx).
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code returned.
        status: u16,
        /// Message extracted from the response body.
        message: String,
    },

    /// Could not connect.
    #[error("failed to connect to API: {0}")]
    Connect(String),

    /// Request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection dropped while the request or response was in flight.
    #[error("HTTP protocol error: {0}")]
    Protocol(String),

    /// A success response that could not be parsed.
    #[error("invalid API response: {message}")]
    InvalidResponse {
        /// Description of what was invalid.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
}

impl ClientError {
    /// The classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Client { .. } => ErrorKind::ClientFault,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Server { .. } => ErrorKind::ServerFault,
            Self::Connect(_) => ErrorKind::Connect,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            Self::InvalidConfig(_) | Self::Build(_) => ErrorKind::Config,
        }
    }

    /// Returns true if the transport would retry this error.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Server-provided wait hint, only ever set on rate-limit errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status code, when the error came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { .. } => Some(401),
            Self::NotFound { .. } => Some(404),
            Self::RateLimited { .. } => Some(429),
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure of a task submitted to the [`RateLimitedExecutor`](crate::RateLimitedExecutor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task body panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was aborted before it produced a value.
    #[error("task was cancelled before completion")]
    Cancelled,
}

/// Failure of a whole [`bulk_create`](crate::BulkCreator::bulk_create) call.
#[derive(Error, Debug)]
pub enum BulkError<E> {
    /// One or more records failed validation; nothing was sent.
    #[error("bulk validation failed: {}", join_failures(failures))]
    Validation {
        /// Every offending record, in input order.
        failures: Vec<ItemFailure>,
    },

    /// Some records could not be created while the others were.
    #[error("bulk create partially failed: {succeeded}/{total} succeeded. Errors: {}", join_failures(failures))]
    Creation {
        /// Number of records that were created.
        succeeded: usize,
        /// Size of the batch.
        total: usize,
        /// Every failed record, in input order.
        failures: Vec<ItemFailure>,
    },

    /// A record failed in sequential mode (or during the bootstrap step),
    /// which stops the batch at that record.
    #[error("item {index} failed: {error}")]
    Failed {
        /// Position of the failed record.
        index: usize,
        /// The error returned by the create operation.
        error: E,
    },
}

impl<E> BulkError<E> {
    /// The per-record failures carried by this error.
    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            Self::Validation { failures } | Self::Creation { failures, .. } => failures,
            Self::Failed { .. } => &[],
        }
    }

    /// Returns true if the batch was rejected before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

fn join_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(|f| f.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, ClientError>;
