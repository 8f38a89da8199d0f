use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, LazyLock, Mutex};
use std::time::{Duration, Instant};

use log::debug;
use tideql_common::error::{Error, Result};

use crate::config::PoolConfig;

static NEXT_TRANSPORT_ID: AtomicU64 = AtomicU64::new(1);

/// Derives the pool key for an adapter base URL: the hostname, or
/// `"default"` when none can be extracted.
pub fn host_key(base_url: &str) -> String {
    let candidate = if base_url.contains("://") {
        base_url.to_string()
    } else {
        format!("https://{}", base_url)
    };
    url::Url::parse(&candidate)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "default".to_string())
}

/// Maps a reqwest failure onto the closed error taxonomy.
pub fn transport_error(operation: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::timeout(format!("{}: {}", operation, error))
    } else if error.is_connect() {
        Error::connection(format!("{}: {}", operation, error))
    } else {
        Error::adapter(format!("{}: {}", operation, error))
    }
}

struct PooledTransport {
    id: u64,
    client: reqwest::blocking::Client,
    last_used: Instant,
    use_count: u64,
}

impl PooledTransport {
    fn touch(&mut self) {
        self.last_used = Instant::now();
        self.use_count += 1;
    }

    fn is_expired(&self, max_idle: Duration) -> bool {
        self.last_used.elapsed() > max_idle
    }
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<String, Vec<PooledTransport>>,
    live: HashMap<String, usize>,
    total: usize,
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub hosts: usize,
    pub idle_transports: usize,
    pub live_transports: usize,
    pub closed: bool,
}

/// Host-keyed pool of reusable blocking HTTP transports.
///
/// Acquisition is scoped: the returned [`TransportHandle`] dereferences to
/// the client and returns the transport on drop, on every exit path. When a
/// host is at `max_per_host` (or the process at `max_total`) the caller
/// blocks until a transport is released.
pub struct HttpPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    released: Condvar,
}

impl HttpPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            released: Condvar::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn acquire(&self, host: &str) -> Result<TransportHandle<'_>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::connection("HTTP pool lock poisoned"))?;
        loop {
            if state.closed {
                return Err(Error::connection("HTTP pool is closed"));
            }

            let mut reused: Option<PooledTransport> = None;
            let mut evicted = 0usize;
            if let Some(idle) = state.idle.get_mut(host) {
                while let Some(transport) = idle.pop() {
                    if transport.is_expired(self.config.max_idle) {
                        debug!("evicting idle transport {} for {}", transport.id, host);
                        evicted += 1;
                        continue;
                    }
                    reused = Some(transport);
                    break;
                }
            }
            if evicted > 0 {
                let live = state.live.entry(host.to_string()).or_insert(0);
                *live = live.saturating_sub(evicted);
                state.total = state.total.saturating_sub(evicted);
            }
            if let Some(transport) = reused {
                return Ok(TransportHandle {
                    pool: self,
                    host: host.to_string(),
                    transport: Some(transport),
                });
            }

            let live = state.live.get(host).copied().unwrap_or(0);
            if live < self.config.max_per_host && state.total < self.config.max_total {
                *state.live.entry(host.to_string()).or_insert(0) += 1;
                state.total += 1;
                let client = match build_blocking_client(&self.config) {
                    Ok(client) => client,
                    Err(e) => {
                        *state.live.entry(host.to_string()).or_insert(1) -= 1;
                        state.total -= 1;
                        return Err(e);
                    }
                };
                let transport = PooledTransport {
                    id: NEXT_TRANSPORT_ID.fetch_add(1, Ordering::Relaxed),
                    client,
                    last_used: Instant::now(),
                    use_count: 0,
                };
                debug!("created transport {} for {}", transport.id, host);
                return Ok(TransportHandle {
                    pool: self,
                    host: host.to_string(),
                    transport: Some(transport),
                });
            }

            // Host or process cap reached: block until a release.
            state = self
                .released
                .wait(state)
                .map_err(|_| Error::connection("HTTP pool lock poisoned"))?;
        }
    }

    fn release(&self, host: &str, mut transport: PooledTransport) {
        transport.touch();
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.closed {
            let live = state.live.entry(host.to_string()).or_insert(0);
            *live = live.saturating_sub(1);
            state.total = state.total.saturating_sub(1);
        } else {
            state.idle.entry(host.to_string()).or_default().push(transport);
        }
        self.released.notify_one();
    }

    /// Drops idle transports that outlived the configured idle window.
    pub fn evict_idle(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let max_idle = self.config.max_idle;
        let mut evicted = 0usize;
        let mut live_delta: HashMap<String, usize> = HashMap::new();
        for (host, idle) in state.idle.iter_mut() {
            let before = idle.len();
            idle.retain(|t| !t.is_expired(max_idle));
            let removed = before - idle.len();
            if removed > 0 {
                *live_delta.entry(host.clone()).or_insert(0) += removed;
                evicted += removed;
            }
        }
        for (host, removed) in live_delta {
            let live = state.live.entry(host).or_insert(0);
            *live = live.saturating_sub(removed);
            state.total = state.total.saturating_sub(removed);
        }
        if evicted > 0 {
            debug!("evicted {} idle transports", evicted);
            self.released.notify_all();
        }
    }

    /// Total completed uses recorded for a host's pooled transports.
    pub fn use_count(&self, host: &str) -> u64 {
        self.state
            .lock()
            .ok()
            .and_then(|state| {
                state
                    .idle
                    .get(host)
                    .map(|idle| idle.iter().map(|t| t.use_count).sum())
            })
            .unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        match self.state.lock() {
            Ok(state) => PoolStats {
                hosts: state.live.iter().filter(|(_, n)| **n > 0).count(),
                idle_transports: state.idle.values().map(Vec::len).sum(),
                live_transports: state.total,
                closed: state.closed,
            },
            Err(_) => PoolStats {
                hosts: 0,
                idle_transports: 0,
                live_transports: 0,
                closed: true,
            },
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            let dropped: usize = state.idle.values().map(Vec::len).sum();
            state.idle.clear();
            state.total = state.total.saturating_sub(dropped);
            for count in state.live.values_mut() {
                *count = 0;
            }
        }
        self.released.notify_all();
    }
}

/// Scoped transport acquisition: dereferences to the blocking client and
/// returns the transport to the pool when dropped.
pub struct TransportHandle<'a> {
    pool: &'a HttpPool,
    host: String,
    transport: Option<PooledTransport>,
}

impl TransportHandle<'_> {
    pub fn id(&self) -> u64 {
        self.transport.as_ref().map(|t| t.id).unwrap_or(0)
    }

    pub fn client(&self) -> &reqwest::blocking::Client {
        &self
            .transport
            .as_ref()
            .expect("transport present until drop")
            .client
    }
}

impl Deref for TransportHandle<'_> {
    type Target = reqwest::blocking::Client;

    fn deref(&self) -> &Self::Target {
        self.client()
    }
}

impl Drop for TransportHandle<'_> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            self.pool.release(&self.host, transport);
        }
    }
}

fn build_blocking_client(config: &PoolConfig) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .danger_accept_invalid_certs(!config.verify_tls);
    if config.keep_alive {
        builder = builder.tcp_keepalive(Some(Duration::from_secs(60)));
    } else {
        builder = builder.pool_max_idle_per_host(0);
    }
    if !config.http2 {
        builder = builder.http1_only();
    }
    builder
        .build()
        .map_err(|e| Error::connection(format!("failed to build HTTP transport: {}", e)))
}

fn build_async_client(config: &PoolConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.read_timeout)
        .pool_max_idle_per_host(config.max_per_host)
        .danger_accept_invalid_certs(!config.verify_tls);
    if config.keep_alive {
        builder = builder.tcp_keepalive(Some(Duration::from_secs(60)));
    }
    if !config.http2 {
        builder = builder.http1_only();
    }
    builder
        .build()
        .map_err(|e| Error::connection(format!("failed to build HTTP client: {}", e)))
}

struct AsyncPoolState {
    clients: HashMap<String, reqwest::Client>,
    closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncPoolStats {
    pub hosts: usize,
    pub closed: bool,
}

/// Host-keyed clients for the cooperative-concurrency path.
///
/// The async client is itself a connection pool, so one shared client per
/// host mirrors what the blocking pool does with explicit transports.
pub struct AsyncHttpPool {
    config: PoolConfig,
    state: Mutex<AsyncPoolState>,
}

impl AsyncHttpPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AsyncPoolState {
                clients: HashMap::new(),
                closed: false,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn client(&self, host: &str) -> Result<reqwest::Client> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::connection("HTTP pool lock poisoned"))?;
        if state.closed {
            return Err(Error::connection("HTTP pool is closed"));
        }
        if let Some(client) = state.clients.get(host) {
            return Ok(client.clone());
        }
        let client = build_async_client(&self.config)?;
        state.clients.insert(host.to_string(), client.clone());
        Ok(client)
    }

    pub fn stats(&self) -> AsyncPoolStats {
        match self.state.lock() {
            Ok(state) => AsyncPoolStats {
                hosts: state.clients.len(),
                closed: state.closed,
            },
            Err(_) => AsyncPoolStats {
                hosts: 0,
                closed: true,
            },
        }
    }

    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.clients.clear();
        }
    }
}

static BLOCKING_POOL: LazyLock<Mutex<Option<Arc<HttpPool>>>> = LazyLock::new(|| Mutex::new(None));
static ASYNC_POOL: LazyLock<Mutex<Option<Arc<AsyncHttpPool>>>> = LazyLock::new(|| Mutex::new(None));

/// The process-wide blocking pool, created on first use.
pub fn blocking_pool() -> Arc<HttpPool> {
    let mut slot = BLOCKING_POOL.lock().expect("pool registry lock poisoned");
    slot.get_or_insert_with(|| Arc::new(HttpPool::new(PoolConfig::default())))
        .clone()
}

/// The process-wide cooperative pool, created on first use.
pub fn async_pool() -> Arc<AsyncHttpPool> {
    let mut slot = ASYNC_POOL.lock().expect("pool registry lock poisoned");
    slot.get_or_insert_with(|| Arc::new(AsyncHttpPool::new(PoolConfig::default())))
        .clone()
}

/// Replaces both process-wide pools with fresh instances of `config`.
/// Adapters constructed afterwards pick up the new pools.
pub fn configure_pools(config: PoolConfig) {
    let mut slot = BLOCKING_POOL.lock().expect("pool registry lock poisoned");
    if let Some(old) = slot.replace(Arc::new(HttpPool::new(config.clone()))) {
        old.close();
    }
    drop(slot);
    let mut slot = ASYNC_POOL.lock().expect("pool registry lock poisoned");
    if let Some(old) = slot.replace(Arc::new(AsyncHttpPool::new(config))) {
        old.close();
    }
}

/// Closes and forgets both process-wide pools.
pub fn close_pools() {
    if let Some(pool) = BLOCKING_POOL.lock().expect("pool registry lock poisoned").take() {
        pool.close();
    }
    if let Some(pool) = ASYNC_POOL.lock().expect("pool registry lock poisoned").take() {
        pool.close();
    }
}
