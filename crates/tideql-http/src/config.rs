use std::time::Duration;

/// Configuration shared by the blocking and cooperative HTTP pools.
///
/// The two pools share this configuration but never share transports.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Live transports allowed per host.
    pub max_per_host: usize,
    /// Live transports allowed process-wide.
    pub max_total: usize,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Idle transports older than this are evicted on the next acquisition.
    pub max_idle: Duration,
    pub keep_alive: bool,
    pub http2: bool,
    pub verify_tls: bool,
    /// Default retry budget handed to [`crate::RetryController::from_config`].
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_host: 10,
            max_total: 100,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_idle: Duration::from_secs(300),
            keep_alive: true,
            http2: true,
            verify_tls: true,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    pub fn with_max_per_host(mut self, max_per_host: usize) -> Self {
        self.max_per_host = max_per_host;
        self
    }

    pub fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_max_idle(mut self, max_idle: Duration) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_http2(mut self, http2: bool) -> Self {
        self.http2 = http2;
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PoolConfig::default();
        assert_eq!(config.max_per_host, 10);
        assert_eq!(config.max_total, 100);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.max_idle, Duration::from_secs(300));
        assert!(config.keep_alive);
        assert!(config.http2);
        assert!(config.verify_tls);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_builder_overrides() {
        let config = PoolConfig::default()
            .with_max_per_host(20)
            .with_max_total(200)
            .with_connect_timeout(Duration::from_secs(5))
            .with_http2(false)
            .with_max_retries(0);
        assert_eq!(config.max_per_host, 20);
        assert_eq!(config.max_total, 200);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(!config.http2);
        assert_eq!(config.max_retries, 0);
    }
}
