//! # text2sql-client
//!
//! Async client for a text-to-SQL service, built around a concurrent
//! bulk-creation engine.
//!
//! ## Features
//!
//! - **Classified retries**: transient failures (connect, timeout, dropped
//!   connections, 5xx, 429) are retried with exponential backoff, and a
//!   `Retry-After` hint is honored verbatim. Client errors fail at once.
//! - **Bounded concurrency**: worker slots and in-flight request permits are
//!   two independent limits.
//! - **Connection isolation**: every parallel record gets its own
//!   single-connection transport.
//! - **Ordered results**: a batch returns every value in input order, or one
//!   error listing each failed record.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use text2sql_client::{BulkCreator, BulkOptions, Transport, TransportConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = TransportConfig::new("https://t2s.example.com", "access-token")
//!         .with_workspace("workspaces/analytics");
//!     let creator = BulkCreator::new(Transport::new(config)?);
//!
//!     let contexts = vec![
//!         json!({"name": "fiscal_year", "content": "Fiscal year starts in April"}),
//!         json!({"name": "regions", "content": "EMEA excludes Turkey"}),
//!     ];
//!
//!     let created = creator
//!         .bulk_create(
//!             contexts,
//!             |c| match c.get("name") {
//!                 Some(_) => vec![],
//!                 None => vec!["name is required".to_string()],
//!             },
//!             |transport, body| async move {
//!                 transport.post("projects/p1/contexts", &body).await
//!             },
//!             BulkOptions::default(),
//!         )
//!         .await?;
//!
//!     println!("created {} contexts", created.len());
//!     Ok(())
//! }
//! ```
//!
//! See [`TransportConfig`] for every transport option.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bulk;
pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod isolated;
pub mod outcome;
pub mod retry;
pub mod tracker;

// Re-exports for convenience
pub use bulk::{BulkCreator, BulkOptions, accept_all};
pub use client::Transport;
pub use config::{PoolConfig, RetryConfig, TimeoutConfig, TransportConfig};
pub use error::{BulkError, ClientError, ErrorKind, Result, TaskError};
pub use executor::{RateLimitedExecutor, TaskHandle};
pub use isolated::IsolatedClientFactory;
pub use outcome::{BatchOutcome, ItemFailure, TaskResult};
pub use reqwest::Method;
pub use retry::{RetryDecision, RetryPolicy};
pub use tracker::{StatsSnapshot, StatsTracker};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
