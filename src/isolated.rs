//! Single-use transports for parallel tasks.
//!
//! Many simultaneous requests over one shared pool were seen to drop
//! connections mid-exchange. Each parallel task therefore gets its own
//! [`Transport`] holding exactly one connection that is never kept alive,
//! at the cost of one extra handshake per task.

use crate::client::Transport;
use crate::config::{PoolConfig, TransportConfig};
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use tracing::trace;

/// Derive the configuration of an isolated transport: same endpoint,
/// headers, timeouts and retry policy, but a single non-persistent
/// HTTP/1.1 connection.
pub fn isolated_config(config: &TransportConfig) -> TransportConfig {
    TransportConfig {
        pool: PoolConfig::single_use(),
        http2: false,
        ..config.clone()
    }
}

/// Produces throwaway single-connection transports from a primary one.
#[derive(Debug, Clone)]
pub struct IsolatedClientFactory {
    config: TransportConfig,
    attempts: Arc<AtomicU64>,
}

impl IsolatedClientFactory {
    /// Create a factory mirroring `transport`.
    ///
    /// Transports made here add their attempts to `transport`'s counter and
    /// share nothing else with it.
    pub fn new(transport: &Transport) -> Self {
        Self {
            config: isolated_config(transport.config()),
            attempts: transport.attempt_counter(),
        }
    }

    /// Build a fresh transport. Use it for one record, then drop it.
    pub fn make_isolated(&self) -> Result<Transport> {
        trace!(base_url = %self.config.base_url, "Creating isolated transport");
        Transport::with_counter(self.config.clone(), Arc::clone(&self.attempts))
    }
}

impl Transport {
    /// Build a single-connection copy of this transport.
    pub fn make_isolated(&self) -> Result<Transport> {
        IsolatedClientFactory::new(self).make_isolated()
    }
}
