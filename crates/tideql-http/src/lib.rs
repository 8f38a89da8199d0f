//! Shared HTTP substrate for TideQL adapters.
//!
//! Three pieces: host-keyed transport pools (a blocking pool with explicit
//! scoped acquisition and an async per-host client map, sharing one
//! [`PoolConfig`] but never sharing transports), a retry controller that
//! interprets rate-limit signals with exponential back-off, and a
//! page-parallel fetcher that bounds in-flight requests while preserving
//! page order.

mod config;
mod paging;
mod pool;
mod retry;

pub use config::PoolConfig;
pub use paging::PageFetcher;
pub use pool::{
    async_pool, blocking_pool, close_pools, configure_pools, host_key, transport_error,
    AsyncHttpPool, AsyncPoolStats, HttpPool, PoolStats, TransportHandle,
};
pub use retry::RetryController;
